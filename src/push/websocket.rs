use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::Result;

use super::{PushConnection, PushConnector};

/// Websocket transport for the push connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>> {
        let (stream, response) = connect_async(url).await?;
        tracing::info!(url = url, status = %response.status(), "Push connection open");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "Push connection closed by server");
                    return None;
                }
                // Pings are answered by tungstenite itself; binary frames are not used.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await?;
        tracing::info!("Push connection closed");
        Ok(())
    }
}
