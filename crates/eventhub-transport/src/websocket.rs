// WebSocket subscriber connections (one persistent session per client).
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::{Connection, Connector, Error, Result};

/// Dials `ws://` / `wss://` endpoints.
///
/// ```no_run
/// use eventhub_transport::{Connection, Connector, WebSocketConnector};
///
/// async fn first_message() -> eventhub_transport::Result<bytes::Bytes> {
///     let mut connection = WebSocketConnector.connect("ws://127.0.0.1:8080/test1").await?;
///     connection.receive().await
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(&self, endpoint: &str) -> Result<WebSocketConnection> {
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(Error::InvalidEndpoint(endpoint.to_string()));
        }
        let (stream, response) = connect_async(endpoint)
            .await
            .map_err(|err| Error::Connect {
                endpoint: endpoint.to_string(),
                source: Box::new(err),
            })?;
        tracing::trace!(endpoint, status = %response.status(), "websocket handshake complete");
        Ok(WebSocketConnection { stream })
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        // The hub's command grammar is text; anything else goes out as binary.
        let message = match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(err) => Message::Binary(err.into_bytes()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|err| Error::Write(Box::new(err)))
    }

    async fn receive(&mut self) -> Result<Bytes> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Err(Error::Closed);
                }
                Some(Err(err)) => return Err(Error::Read(Box::new(err))),
            };
            match message {
                Message::Text(text) => return Ok(Bytes::from(text)),
                Message::Binary(data) => return Ok(Bytes::from(data)),
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "websocket closed by peer");
                    return Err(Error::Closed);
                }
                // Control frames are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(Error::Write(Box::new(err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn rejects_non_websocket_endpoints() {
        let err = WebSocketConnector
            .connect("http://127.0.0.1:1/test1")
            .await
            .err()
            .expect("invalid endpoint");
        assert!(matches!(err, Error::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn refused_dial_is_a_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let err = WebSocketConnector
            .connect(&format!("ws://{addr}/test1"))
            .await
            .err()
            .expect("refused");
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[tokio::test]
    async fn websocket_smoke_test() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(tcp).await.expect("handshake");
            ws.send(Message::Text("hello".into())).await.expect("text");
            ws.send(Message::Ping(vec![1])).await.expect("ping");
            ws.send(Message::Binary(vec![0xff, 0x00])).await.expect("binary");
            let echoed = loop {
                match ws.next().await.expect("frame").expect("message") {
                    Message::Text(text) => break text,
                    _ => continue,
                }
            };
            ws.close(None).await.expect("close");
            echoed
        });

        let mut connection = WebSocketConnector
            .connect(&format!("ws://{addr}/test1"))
            .await
            .expect("connect");
        assert_eq!(connection.receive().await.expect("text"), Bytes::from_static(b"hello"));
        assert_eq!(
            connection.receive().await.expect("binary"),
            Bytes::from_static(&[0xff, 0x00])
        );
        connection
            .send(Bytes::from_static(b"LIST\r\n"))
            .await
            .expect("send");
        let err = connection.receive().await.expect_err("closed");
        assert!(matches!(err, Error::Closed));
        assert_eq!(server.await.expect("join"), "LIST\r\n");
    }
}
