// GraphSock Server
//
// Demo server binary: serves the GraphQL endpoint over HTTP and both
// WebSocket subprotocols, backed by the demo engine.

mod config;
mod demo;
mod logging;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use graphsock_api::ide::PlaygroundOptions;
use graphsock_api::{routes, GraphqlWsOptions, ServerOptions, TransportWsOptions};
use graphsock_core::GraphQLEngine;

#[actix_web::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = match config::ServerConfig::from_file("config.toml") {
        Ok(cfg) => cfg,
        Err(_) => {
            eprintln!("Warning: config.toml not found, using defaults");
            config::ServerConfig::default()
        }
    };

    logging::init_logging(&config.logging.level);

    info!("Starting GraphSock Server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: host={}, port={}",
        config.server.host, config.server.port
    );

    let engine: Arc<dyn GraphQLEngine> = Arc::new(demo::DemoEngine);

    let keep_alive = match config.graphql.keep_alive_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    let options = Arc::new(ServerOptions {
        pretty: config.graphql.pretty,
        graphql_ws: Some(GraphqlWsOptions {
            keep_alive,
            ..Default::default()
        }),
        transport_ws: Some(TransportWsOptions {
            connection_init_wait_timeout: Duration::from_millis(
                config.graphql.connection_init_wait_timeout_ms,
            ),
            ..Default::default()
        }),
        playground: config
            .graphql
            .playground
            .then(PlaygroundOptions::default),
        ..Default::default()
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);
    info!("Endpoint: /graphql (POST, GET and WebSocket upgrade)");

    let workers = if config.server.workers == 0 {
        num_cpus::get()
    } else {
        config.server.workers
    };

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(engine.clone()))
            .app_data(web::Data::new(options.clone()))
            .configure(routes::configure_routes)
    })
    .bind(&bind_addr)?
    .workers(workers)
    .run()
    .await?;

    info!("Server shutdown complete");
    Ok(())
}
