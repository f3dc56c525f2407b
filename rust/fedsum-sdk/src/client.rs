mod ws;

pub use self::ws::{connect, WsClient, WsReceiver};

use thiserror::Error;

/// Errors of the websocket client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),
}
