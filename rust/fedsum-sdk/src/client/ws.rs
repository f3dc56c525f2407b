use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message as Frame,
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use fedsum_core::message::Message;

use super::ClientError;
use crate::CoordinatorClient;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a websocket connection to the coordinator at `url`.
///
/// Returns the sending and the receiving half of the connection.
///
/// # Errors
/// Fails if the connection can't be established.
pub async fn connect(url: &Url) -> Result<(WsClient, WsReceiver), ClientError> {
    let (socket, _) = connect_async(url.as_str()).await?;
    debug!("connected to {}", url);
    let (sink, stream) = socket.split();
    Ok((WsClient { sink }, WsReceiver { stream }))
}

/// The sending half of a coordinator connection.
pub struct WsClient {
    sink: SplitSink<Socket, Frame>,
}

#[async_trait]
impl CoordinatorClient for WsClient {
    type Error = ClientError;

    async fn send(&mut self, message: Message) -> Result<(), Self::Error> {
        self.sink.send(Frame::Text(message.encode())).await?;
        Ok(())
    }
}

/// The receiving half of a coordinator connection.
pub struct WsReceiver {
    stream: SplitStream<Socket>,
}

impl WsReceiver {
    /// Waits for the next control message. Returns `None` once the connection is closed.
    ///
    /// Frames that don't hold a valid message are skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        while let Some(frame) = self.stream.next().await {
            let text = match frame {
                Ok(Frame::Text(text)) => text,
                Ok(Frame::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(Frame::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => {
                    warn!("failed to read from the coordinator: {}", err);
                    return None;
                }
            };
            match Message::decode(&text) {
                Ok(message) => return Some(message),
                Err(err) => warn!("skipping malformed message: {}", err),
            }
        }
        None
    }
}
