//! Route configuration and the HTTP/WebSocket dispatcher.

use actix_web::{web, Error, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use log::debug;
use std::sync::Arc;

use graphsock_core::GraphQLEngine;

use crate::handlers;
use crate::options::ServerOptions;

/// Mounts the GraphQL endpoint.
///
/// One route serves everything: WebSocket upgrades are dispatched to the
/// subprotocol layer, anything else goes to the query handler.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/graphql", web::route().to(graphql_entry));
}

/// True iff the request asks for a WebSocket upgrade.
fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(actix_web::http::header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Entry point for the GraphQL endpoint.
pub async fn graphql_entry(
    req: HttpRequest,
    mut payload: web::Payload,
    engine: web::Data<Arc<dyn GraphQLEngine>>,
    options: web::Data<Arc<ServerOptions>>,
) -> Result<HttpResponse, Error> {
    if is_websocket_upgrade(&req) {
        debug!("upgrading connection to websocket");
        return handlers::ws::handle_upgrade(
            req,
            payload,
            engine.get_ref().clone(),
            options.get_ref().clone(),
        );
    }

    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        body.extend_from_slice(&chunk?);
    }

    Ok(handlers::query::handle_query(
        &req,
        &body.freeze(),
        engine.get_ref().clone(),
        options.get_ref().clone(),
    )
    .await)
}
