//! websocket push feed
//!
//! Subscribes to the relay's `/ws` channel and forwards decoded
//! `historico` / `nuevoDato` events. Undecodable frames are dropped; a lost
//! connection is retried after a fixed delay.

use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::domain::PushEvent;

/// `http://host:port` -> `ws://host:port/ws`
pub fn ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/ws", base)
}

pub fn decode(text: &str) -> Option<PushEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!("[PUSH] dropping malformed message: {}", e);
            None
        }
    }
}

/// runs until the receiving side of `tx` is dropped
pub async fn run_push_feed(url: String, reconnect_delay: Duration, tx: mpsc::Sender<PushEvent>) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut stream, _)) => {
                tracing::info!("[PUSH] connected to {}", url);
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            let Some(event) = decode(&text) else { continue };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("[PUSH] connection error: {}", e);
                            break;
                        }
                    }
                }
                tracing::info!("[PUSH] disconnected");
            }
            Err(e) => tracing::warn!("[PUSH] could not connect to {}: {}", url, e),
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("http://127.0.0.1:3000/"), "ws://127.0.0.1:3000/ws");
        assert_eq!(ws_url("https://campo.example"), "wss://campo.example/ws");
    }

    #[test]
    fn test_decode_drops_garbage() {
        assert!(decode("not json").is_none());
        assert!(decode(r#"{"event": "otro", "data": 1}"#).is_none());
        assert!(matches!(
            decode(r#"{"event": "historico", "data": []}"#),
            Some(PushEvent::Historico(v)) if v.is_empty()
        ));
    }
}
