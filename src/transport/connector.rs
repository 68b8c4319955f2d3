use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use url::Url;

use crate::error::SyncError;
use crate::transport::message::CLOSE_ABNORMAL;

/// Frames written by the transport to an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(u16),
}

/// Events read from an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Error(String),
    /// Always the last event a link produces
    Closed { code: u16, reason: String },
}

/// An established connection, reduced to a pair of channels
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to the permission event endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: Url) -> Result<Link, SyncError>;
}

/// Builds the endpoint URL with the session token as the `token` query parameter
pub fn endpoint_url(base: &str, token: &str) -> Result<Url, SyncError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// WebSocket connector over tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: Url) -> Result<Link, SyncError> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (tx_out, mut rx_out) = mpsc::unbounded_channel::<Frame>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<LinkEvent>();

        // Writer: forwards frames until the transport drops its sender or asks to close
        tokio::spawn(async move {
            while let Some(frame) = rx_out.recv().await {
                let msg = match frame {
                    Frame::Text(text) => Message::text(text),
                    Frame::Close(code) => Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: Utf8Bytes::from_static(""),
                    })),
                };
                let closing = matches!(msg, Message::Close(_));
                if ws_sender.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Reader: translates socket messages into link events
        tokio::spawn(async move {
            let mut close = (CLOSE_ABNORMAL, String::new());
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if tx_in.send(LinkEvent::Text(text.as_str().to_string())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            close = (u16::from(frame.code), frame.reason.as_str().to_string());
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx_in.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            let _ = tx_in.send(LinkEvent::Closed {
                code: close.0,
                reason: close.1,
            });
        });

        Ok(Link {
            outbound: tx_out,
            inbound: rx_in,
        })
    }
}
