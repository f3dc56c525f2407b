//! A websocket API for the secure sum protocol.
//!
//! Every participant holds a single websocket connection. Any request that can be upgraded is
//! accepted regardless of its path; other requests are answered with a JSON error. Each text
//! frame carries one control message, see [`fedsum_core::message`].

use std::{convert::Infallible, future::Future, net::SocketAddr};

use futures::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;
use warp::{
    ws::{self, WebSocket, Ws},
    Filter,
};

use crate::{coordinator::connection::Connection, services::MessageHandler, settings::ApiSettings};

#[derive(Debug, Error)]
/// Errors of the websocket server.
pub enum ApiError {
    #[error("failed to bind the websocket endpoint: {0}")]
    Bind(#[from] warp::Error),
}

/// Starts the websocket server at the configured address and runs it until it fails.
///
/// # Errors
/// Fails if the address can't be bound.
pub async fn serve(api_settings: ApiSettings, handler: MessageHandler) -> Result<(), ApiError> {
    let (address, server) = bind(api_settings.bind_address, handler)?;
    info!("websocket endpoint listening on {}", address);
    server.await;
    Ok(())
}

/// Binds the websocket server to `address` and returns the bound address together with the
/// server future. Binding to port `0` picks a free port.
///
/// # Errors
/// Fails if the address can't be bound.
pub fn bind(
    address: SocketAddr,
    handler: MessageHandler,
) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), ApiError> {
    let socket = warp::ws()
        .and(with_message_handler(handler))
        .map(|ws: Ws, handler: MessageHandler| {
            ws.on_upgrade(move |socket| handle_socket(socket, handler))
        });
    let fallback =
        warp::any().map(|| warp::reply::json(&json!({ "error": "Could not upgrade protocol" })));

    let routes = socket.or(fallback).with(warp::log("ws"));
    warp::serve(routes)
        .try_bind_ephemeral(address)
        .map_err(ApiError::from)
}

/// Converts a message handler into a `warp` filter.
fn with_message_handler(
    handler: MessageHandler,
) -> impl Filter<Extract = (MessageHandler,), Error = Infallible> + Clone {
    warp::any().map(move || handler.clone())
}

/// Drives a single websocket connection until it closes.
///
/// Frames are handled one after the other, so the messages of a connection reach the coordinator
/// in the order they arrived. Outbound messages are written by a separate task.
async fn handle_socket(socket: WebSocket, handler: MessageHandler) {
    let (connection, mut outbound) = Connection::new();
    let connection_id = connection.id();
    let span = info_span!("connection", id = %connection_id);

    async move {
        info!("connection opened");
        let (mut sink, mut stream) = socket.split();

        let writer = tokio::spawn(
            async move {
                while let Some(message) = outbound.recv().await {
                    if let Err(err) = sink.send(ws::Message::text(message.encode())).await {
                        debug!("failed to write to socket: {}", err);
                        break;
                    }
                }
                let _ = sink.close().await;
            }
            .in_current_span(),
        );

        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("failed to read from socket: {}", err);
                    break;
                }
            };
            if frame.is_close() {
                break;
            }
            if !frame.is_text() && !frame.is_binary() {
                continue;
            }
            match std::str::from_utf8(frame.as_bytes()) {
                Ok(text) => handler.handle_message(&connection, text).await,
                Err(_) => {
                    connection.send(fedsum_core::message::Message::parse_error());
                }
            }
        }

        handler.handle_disconnect(connection_id).await;
        // the coordinator may still hold a handle to this connection
        writer.abort();
        info!("connection closed");
    }
    .instrument(span)
    .await
}
