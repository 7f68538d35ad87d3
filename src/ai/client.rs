use anyhow::{Context, Result};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::*;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
        }
    }

    /// Send a streaming messages request.
    /// Parsed SSE events are sent to the returned channel.
    pub async fn stream_message(
        &self,
        request: CreateMessageRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let (tx, rx) = mpsc::channel(256);

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let is_anthropic = self.base_url.contains("anthropic.com");

        let mut req = self.http.post(&url);
        if is_anthropic {
            req = req
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION);
        } else {
            req = req.header("authorization", format!("Bearer {}", self.api_key));
        }

        let resp = req
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to AI API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("AI API error {status}: {body}");
        }

        tokio::spawn(async move {
            // Decodes UTF-8 across chunk boundaries before splitting events.
            let mut events = resp.bytes_stream().eventsource();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("SSE stream error: {e}");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: format!("stream interrupted: {e}"),
                            })
                            .await;
                        return;
                    }
                };

                if let Some(evt) = parse_sse_event(&event.event, &event.data) {
                    let is_stop = matches!(evt, StreamEvent::MessageStop);
                    if tx.send(evt).await.is_err() || is_stop {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Map one SSE event (type and data payload) onto a StreamEvent.
fn parse_sse_event(event_type: &str, data: &str) -> Option<StreamEvent> {
    if data.trim().is_empty() {
        return None;
    }

    let json: serde_json::Value = serde_json::from_str(data).ok()?;

    match event_type {
        "content_block_start" => {
            let index = json["index"].as_u64()? as usize;
            let cb = &json["content_block"];
            match cb["type"].as_str()? {
                "text" => Some(StreamEvent::TextBlockStart {
                    index,
                    text: cb["text"].as_str().unwrap_or("").to_string(),
                }),
                other => {
                    debug!("Skipping {other} content block");
                    None
                }
            }
        }
        "content_block_delta" => {
            let index = json["index"].as_u64()? as usize;
            let delta = &json["delta"];
            match delta["type"].as_str()? {
                "text_delta" => Some(StreamEvent::TextDelta {
                    index,
                    text: delta["text"].as_str()?.to_string(),
                }),
                other => {
                    debug!("Unknown delta type: {other}");
                    None
                }
            }
        }
        "content_block_stop" => {
            let index = json["index"].as_u64()? as usize;
            Some(StreamEvent::ContentBlockStop { index })
        }
        "message_delta" => {
            let stop_reason = json["delta"]["stop_reason"]
                .as_str()
                .map(|s| s.to_string());
            Some(StreamEvent::MessageDelta { stop_reason })
        }
        "message_stop" => Some(StreamEvent::MessageStop),
        "error" => Some(StreamEvent::Error {
            message: json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        }),
        "message_start" | "ping" => None,
        other => {
            debug!("Unknown SSE event type: {other}");
            None
        }
    }
}
