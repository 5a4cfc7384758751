//! WebSocket upgrade and subprotocol negotiation.
//!
//! The dispatcher hands upgrade requests here. The server advertises the
//! modern protocol first, then the legacy one; the connection object for
//! the negotiated subprotocol owns the socket from then on, fed by the
//! read task spawned below.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use std::sync::Arc;

use graphsock_commons::close::{SUBPROTOCOL_GRAPHQL_WS, SUBPROTOCOL_TRANSPORT_WS};
use graphsock_core::{GraphQLEngine, Metadata};

use crate::options::ServerOptions;
use crate::ws::graphql_ws::GraphqlWsConnection;
use crate::ws::transport_ws::TransportWsConnection;
use crate::ws::{ActixSink, MessageSink};

/// Upgrades the request and spawns the connection task.
pub fn handle_upgrade(
    req: HttpRequest,
    stream: web::Payload,
    engine: Arc<dyn GraphQLEngine>,
    options: Arc<ServerOptions>,
) -> Result<HttpResponse, actix_web::Error> {
    let offered = requested_subprotocols(&req);
    let negotiated = negotiate_subprotocol(&offered);
    debug!(
        "client requested subprotocols {:?}, negotiated {:?}",
        offered, negotiated
    );

    let (mut response, session, msg_stream) = actix_ws::handle(&req, stream)?;

    if let Some(subprotocol) = negotiated {
        response.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            header::HeaderValue::from_static(subprotocol),
        );
    }

    let client_ip = req.peer_addr().map(|addr| addr.ip().to_string());
    let metadata = match &options.ws_context_fn {
        Some(seed) => seed(&req),
        None => Arc::new(Metadata::new()),
    };

    actix_web::rt::spawn(run_connection(
        negotiated,
        engine,
        options,
        session,
        msg_stream,
        client_ip,
        metadata,
    ));

    Ok(response)
}

/// Client subprotocol offers, in request order.
fn requested_subprotocols(req: &HttpRequest) -> Vec<String> {
    req.headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Picks the first server-supported subprotocol the client offered,
/// modern first.
fn negotiate_subprotocol(offered: &[String]) -> Option<&'static str> {
    [SUBPROTOCOL_TRANSPORT_WS, SUBPROTOCOL_GRAPHQL_WS]
        .into_iter()
        .find(|server| offered.iter().any(|client| client == server))
}

async fn run_connection(
    negotiated: Option<&'static str>,
    engine: Arc<dyn GraphQLEngine>,
    options: Arc<ServerOptions>,
    session: Session,
    msg_stream: MessageStream,
    client_ip: Option<String>,
    metadata: Arc<Metadata>,
) {
    match negotiated {
        Some(SUBPROTOCOL_TRANSPORT_WS) => {
            let Some(proto_options) = options.transport_ws.clone() else {
                close_unsupported(session, SUBPROTOCOL_TRANSPORT_WS).await;
                return;
            };
            let sink = ActixSink::new(session.clone());
            let conn = match TransportWsConnection::connect(
                SUBPROTOCOL_TRANSPORT_WS,
                engine,
                Arc::new(proto_options),
                sink,
                client_ip,
                metadata,
            )
            .await
            {
                Ok(conn) => conn,
                Err(_) => return,
            };
            read_loop(conn, session, msg_stream).await;
        }

        Some(SUBPROTOCOL_GRAPHQL_WS) => {
            let Some(proto_options) = options.graphql_ws.clone() else {
                close_unsupported(session, SUBPROTOCOL_GRAPHQL_WS).await;
                return;
            };
            let sink = ActixSink::new(session.clone());
            let conn = match GraphqlWsConnection::connect(
                SUBPROTOCOL_GRAPHQL_WS,
                engine,
                Arc::new(proto_options),
                sink,
                client_ip,
                metadata,
            )
            .await
            {
                Ok(conn) => conn,
                Err(_) => return,
            };
            read_loop(conn, session, msg_stream).await;
        }

        _ => {
            warn!("connection does not implement a supported GraphQL subprotocol");
            let _ = session
                .close(Some(CloseReason {
                    code: CloseCode::Protocol,
                    description: Some(
                        "connection does not implement a supported GraphQL subprotocol"
                            .to_string(),
                    ),
                }))
                .await;
        }
    }
}

async fn close_unsupported(session: Session, subprotocol: &str) {
    warn!("server does not support the {:?} protocol", subprotocol);
    let _ = session
        .close(Some(CloseReason {
            code: CloseCode::Protocol,
            description: Some(format!(
                "server does not support {:?} protocol",
                subprotocol
            )),
        }))
        .await;
}

/// Inbound side of a protocol connection, as seen by the read loop.
#[async_trait]
trait DriveConnection: Send + Sync {
    async fn on_text(&self, text: &str);
    async fn on_close_frame(&self, normal: bool, description: &str);
    async fn on_transport_error(&self, description: &str);
}

#[async_trait]
impl<S: MessageSink> DriveConnection for TransportWsConnection<S> {
    async fn on_text(&self, text: &str) {
        self.handle_text(text).await;
    }
    async fn on_close_frame(&self, normal: bool, description: &str) {
        self.handle_close_frame(normal, description).await;
    }
    async fn on_transport_error(&self, description: &str) {
        self.handle_transport_error(description).await;
    }
}

#[async_trait]
impl<S: MessageSink> DriveConnection for GraphqlWsConnection<S> {
    async fn on_text(&self, text: &str) {
        self.handle_text(text).await;
    }
    async fn on_close_frame(&self, normal: bool, description: &str) {
        self.handle_close_frame(normal, description).await;
    }
    async fn on_transport_error(&self, description: &str) {
        self.handle_transport_error(description).await;
    }
}

/// Reads frames off the socket and feeds the connection until the peer
/// goes away or the connection closes.
async fn read_loop<C: DriveConnection>(conn: C, mut session: Session, mut stream: MessageStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => conn.on_text(&text).await,

            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => conn.on_text(text).await,
                Err(_) => {
                    conn.on_transport_error("binary frame is not valid utf-8").await;
                    return;
                }
            },

            Ok(Message::Ping(bytes)) => {
                if session.pong(&bytes).await.is_err() {
                    conn.on_transport_error("failed to answer websocket ping").await;
                    return;
                }
            }

            Ok(Message::Pong(_)) | Ok(Message::Continuation(_)) | Ok(Message::Nop) => {}

            Ok(Message::Close(reason)) => {
                let (normal, description) = match &reason {
                    Some(reason) => (
                        reason.code == CloseCode::Normal,
                        reason.description.clone().unwrap_or_default(),
                    ),
                    None => (true, String::new()),
                };
                conn.on_close_frame(normal, &description).await;
                return;
            }

            Err(err) => {
                conn.on_transport_error(&err.to_string()).await;
                return;
            }
        }
    }

    // stream ended without a close frame
    conn.on_transport_error("client went away").await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_prefers_the_modern_protocol() {
        let offered = vec![
            "graphql-ws".to_string(),
            "graphql-transport-ws".to_string(),
        ];
        assert_eq!(
            negotiate_subprotocol(&offered),
            Some(SUBPROTOCOL_TRANSPORT_WS)
        );
    }

    #[test]
    fn test_negotiation_falls_back_to_legacy() {
        let offered = vec!["graphql-ws".to_string()];
        assert_eq!(negotiate_subprotocol(&offered), Some(SUBPROTOCOL_GRAPHQL_WS));
    }

    #[test]
    fn test_negotiation_rejects_unknown() {
        let offered = vec!["soap".to_string()];
        assert_eq!(negotiate_subprotocol(&offered), None);
        assert_eq!(negotiate_subprotocol(&[]), None);
    }
}
