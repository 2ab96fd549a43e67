use super::LogSubscription;
use crate::entity::LogEntry;
use crate::error::{ServiceError, ServiceResult};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PROTOCOL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct RealtimeChannel {
    socket_url: Url,
    api_key: String,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Insert(Value),
    Error(String),
    Other,
}

impl RealtimeChannel {
    pub fn new(store_url: &str, api_key: &str) -> ServiceResult<Self> {
        let invalid =
            |reason: String| ServiceError::Invalid(format!("store url '{}': {}", store_url, reason));
        let mut socket_url = Url::parse(store_url)
            .and_then(|base| base.join("realtime/v1/websocket"))
            .map_err(|e| invalid(e.to_string()))?;
        let scheme = match socket_url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(invalid(format!("scheme '{}' is not http(s)", other))),
        };
        socket_url
            .set_scheme(scheme)
            .map_err(|_| invalid("cannot switch to websocket scheme".to_string()))?;
        socket_url
            .query_pairs_mut()
            .append_pair("apikey", api_key)
            .append_pair("vsn", PROTOCOL_VERSION);

        Ok(Self {
            socket_url,
            api_key: api_key.to_string(),
        })
    }

    pub fn socket_url(&self) -> &str {
        self.socket_url.as_str()
    }

    // The join reply is not awaited; a rejected join ends the feed.
    pub async fn subscribe_inserts(
        &self,
        channel: &str,
        table: &str,
    ) -> ServiceResult<LogSubscription> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.socket_url())
            .await
            .map_err(|e| ServiceError::Realtime(format!("connect failed: {}", e)))?;

        let topic = format!("realtime:{}", channel);
        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "INSERT", "schema": "public", "table": table }
                    ]
                },
                "access_token": self.api_key,
            },
            "ref": "1",
        });
        ws.send(Message::Text(join.to_string().into()))
            .await
            .map_err(|e| ServiceError::Realtime(format!("join failed: {}", e)))?;
        info!("Subscribed to {} inserts on {}", table, topic);

        let (subscription, tx, mut shutdown) = LogSubscription::channel();

        tokio::spawn(async move {
            let (mut sink, mut stream) = ws.split();
            let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
            let mut next_ref: u64 = 2;

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        let leave = json!({
                            "topic": topic,
                            "event": "phx_leave",
                            "payload": {},
                            "ref": next_ref.to_string(),
                        });
                        let _ = sink.send(Message::Text(leave.to_string().into())).await;
                        let _ = sink.close().await;
                        debug!("Left {}", topic);
                        break;
                    }
                    _ = heartbeat.tick() => {
                        let beat = json!({
                            "topic": "phoenix",
                            "event": "heartbeat",
                            "payload": {},
                            "ref": next_ref.to_string(),
                        });
                        next_ref += 1;
                        if let Err(e) = sink.send(Message::Text(beat.to_string().into())).await {
                            warn!("Realtime heartbeat failed: {}", e);
                            break;
                        }
                    }
                    incoming = stream.next() => {
                        let text = match incoming {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Realtime socket closed for {}", topic);
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!("Realtime socket error: {}", e);
                                break;
                            }
                        };

                        match parse_frame(&text) {
                            Frame::Insert(record) => match serde_json::from_value::<LogEntry>(record) {
                                Ok(entry) => {
                                    if tx.send(entry).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Skipping undecodable log row: {}", e),
                            },
                            Frame::Error(reason) => {
                                warn!("Realtime channel {} failed: {}", topic, reason);
                                break;
                            }
                            Frame::Other => {}
                        }
                    }
                }
            }
        });

        Ok(subscription)
    }
}

pub(crate) fn parse_frame(text: &str) -> Frame {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };
    let event = frame["event"].as_str().unwrap_or_default();
    let payload = &frame["payload"];

    match event {
        "postgres_changes" if payload["data"]["type"] == "INSERT" => {
            Frame::Insert(payload["data"]["record"].clone())
        }
        "phx_reply" if payload["status"] == "error" => {
            Frame::Error(payload["response"].to_string())
        }
        "system" if payload["status"] == "error" => Frame::Error(
            payload["message"]
                .as_str()
                .unwrap_or("subscription rejected")
                .to_string(),
        ),
        "phx_error" => Frame::Error("channel crashed".to_string()),
        "phx_close" => Frame::Error("channel closed by server".to_string()),
        _ => Frame::Other,
    }
}
