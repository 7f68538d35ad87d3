use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ai::{AnthropicClient, CreateMessageRequest, StreamEvent};
use crate::channel::EventSink;
use crate::config::EngineConfig;
use crate::interrupt::InterruptInbox;
use crate::protocol::{Message, OutputEvent, assistant_message, user_message};

use super::Agent;

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant talking to a user through a streaming chat. \
A human operator watches the conversation and may interrupt you with \
corrections. Messages marked [Operator interrupt] come from the operator: \
take them into account and continue the task rather than starting over.";

const STOP_REASON_MAX_TOKENS: &str = "max_tokens";

/// Streams replies from an Anthropic-compatible Messages API. The conversation
/// is kept across turns.
pub struct AnthropicAgent {
    config: EngineConfig,
    client: AnthropicClient,
    messages: Mutex<Vec<Message>>,
}

impl AnthropicAgent {
    pub fn new(config: EngineConfig) -> Self {
        let client = AnthropicClient::new(&config.api_key, &config.base_url);
        Self {
            config,
            client,
            messages: Mutex::new(Vec::new()),
        }
    }

    fn system_prompt(&self) -> String {
        self.config
            .system_prompt
            .clone()
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string())
    }

    /// One request/response. Returns the reply text and any interrupts
    /// observed while it streamed.
    async fn step(
        &self,
        messages: &[Message],
        sink: &dyn EventSink,
        inbox: &mut InterruptInbox,
    ) -> Result<(String, Vec<String>)> {
        let request = CreateMessageRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: messages.to_vec(),
            stream: true,
            system: Some(self.system_prompt()),
        };

        let mut stream_rx = self.client.stream_message(request).await?;
        let mut reply = String::new();
        let mut injected = Vec::new();

        while let Some(event) = stream_rx.recv().await {
            match event {
                StreamEvent::TextBlockStart { text, .. } => {
                    if !reply.is_empty() {
                        reply.push_str("\n\n");
                    }
                    reply.push_str(&text);
                    sink.emit(OutputEvent::open(text)).await?;
                }
                StreamEvent::TextDelta { text, .. } => {
                    reply.push_str(&text);
                    sink.emit(OutputEvent::text(text)).await?;
                }
                StreamEvent::ContentBlockStop { .. } => {
                    injected.extend(inbox.checkpoint().await);
                }
                StreamEvent::MessageDelta { stop_reason } => {
                    if stop_reason.as_deref() == Some(STOP_REASON_MAX_TOKENS) {
                        warn!("Reply truncated at {} tokens", self.config.max_tokens);
                    }
                }
                StreamEvent::MessageStop => break,
                StreamEvent::Error { message } => anyhow::bail!("AI stream error: {message}"),
            }
        }
        injected.extend(inbox.checkpoint().await);
        Ok((reply, injected))
    }
}

#[async_trait]
impl Agent for AnthropicAgent {
    fn name(&self) -> &str {
        "Anthropic"
    }

    async fn run_turn(
        &self,
        prompt: &str,
        sink: &dyn EventSink,
        inbox: &mut InterruptInbox,
    ) -> Result<()> {
        let mut messages = self.messages.lock().await;
        info!("AnthropicAgent received message: {}", truncate(prompt, 100));
        messages.push(user_message(prompt));

        let mut pending: Vec<String> = inbox.checkpoint().await.into_iter().collect();
        loop {
            if !pending.is_empty() {
                info!("Applying {} operator interrupt(s)", pending.len());
                messages.push(interrupt_message(&pending));
            }
            let (reply, injected) = self.step(&messages, sink, inbox).await?;
            if !reply.is_empty() {
                messages.push(assistant_message(&reply));
            }
            if injected.is_empty() {
                debug!("AnthropicAgent turn completed");
                return Ok(());
            }
            pending = injected;
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        match self.messages.try_lock() {
            Ok(messages) => serde_json::json!({
                "model": self.config.model,
                "messages": &*messages,
            }),
            Err(_) => serde_json::Value::Null,
        }
    }
}

fn interrupt_message(texts: &[String]) -> Message {
    user_message(&format!("[Operator interrupt] {}", texts.join("\n")))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::channel;
    use crate::interrupt::InterruptController;
    use crate::protocol::Action;

    fn sse(chunks: &[&str]) -> String {
        let mut body = String::new();
        body.push_str("event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        body.push_str(
            "event: content_block_start\n\
             data: {\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        );
        for chunk in chunks {
            body.push_str(&format!(
                "event: content_block_delta\n\
                 data: {{\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{chunk}\"}}}}\n\n"
            ));
        }
        body.push_str("event: content_block_stop\ndata: {\"index\":0}\n\n");
        body.push_str("event: message_delta\ndata: {\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n");
        body.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
        body
    }

    /// Serves the given SSE bodies in order, recording each request body.
    async fn serve(bodies: Vec<String>) -> (String, Arc<StdMutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(StdMutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{addr}"), requests)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + length {
                    return text[head_end + 4..].to_string();
                }
            }
            if n == 0 {
                return String::new();
            }
        }
    }

    fn agent(base_url: &str) -> Arc<AnthropicAgent> {
        Arc::new(AnthropicAgent::new(EngineConfig {
            api_key: "test".to_string(),
            base_url: base_url.to_string(),
            ..EngineConfig::default()
        }))
    }

    #[tokio::test]
    async fn streams_reply_as_events() {
        let (url, requests) = serve(vec![sse(&["Hel", "lo"])]).await;
        let agent = agent(&url);
        let (tx, mut rx) = channel::channel(16).unwrap();
        let ctl = InterruptController::new();
        let mut inbox = ctl.subscribe();

        agent.run_turn("Hello", &tx, &mut inbox).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.pop().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].action, Some(Action::Open));
        assert_eq!(events[1].text, "Hel");
        assert_eq!(events[2].text, "lo");

        let snapshot = agent.snapshot();
        assert_eq!(snapshot["messages"].as_array().unwrap().len(), 2);
        assert_eq!(snapshot["messages"][1]["content"][0]["text"], "Hello");

        let body: serde_json::Value =
            serde_json::from_str(&requests.lock().unwrap()[0]).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hello");
    }

    #[tokio::test]
    async fn interrupt_mid_stream_triggers_follow_up_step() {
        let (url, requests) = serve(vec![sse(&["Roses ", "are red"]), sse(&["Short."])]).await;
        let agent = agent(&url);
        // Capacity 1 keeps the engine in lockstep with this consumer.
        let (tx, mut rx) = channel::channel(1).unwrap();
        let ctl = InterruptController::new();
        let mut inbox = ctl.subscribe();

        let engine = agent.clone();
        let task = tokio::spawn(async move {
            engine.run_turn("draft a poem", &tx, &mut inbox).await
        });

        let mut texts = Vec::new();
        while let Some(event) = rx.pop().await {
            if texts.is_empty() {
                ctl.lock();
                ctl.submit("make it shorter");
            }
            texts.push(event.text);
            if texts.len() == 3 {
                ctl.unlock();
            }
        }
        task.await.unwrap().unwrap();

        assert_eq!(texts, vec!["", "Roses ", "are red", "", "Short."]);
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second: serde_json::Value = serde_json::from_str(&requests[1]).unwrap();
        let messages = second["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["text"], "Roses are red");
        assert_eq!(
            messages[2]["content"][0]["text"],
            "[Operator interrupt] make it shorter"
        );
    }

    #[tokio::test]
    async fn multibyte_text_split_across_reads_survives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut socket).await;
            let body = sse(&["café"]);
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            // Cut between the two bytes of 'é'.
            let cut = body.find('é').unwrap() + 1;
            let bytes = body.as_bytes();
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&bytes[..cut]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            socket.write_all(&bytes[cut..]).await.unwrap();
            socket.shutdown().await.ok();
        });

        let agent = agent(&format!("http://{addr}"));
        let (tx, mut rx) = channel::channel(16).unwrap();
        let mut inbox = InterruptController::new().subscribe();
        agent.run_turn("hi", &tx, &mut inbox).await.unwrap();
        drop(tx);

        let mut text = String::new();
        while let Some(event) = rx.pop().await {
            text.push_str(&event.text);
        }
        assert_eq!(text, "café");
    }

    #[tokio::test]
    async fn http_error_propagates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut socket).await;
            let body = "overloaded";
            let response = format!(
                "HTTP/1.1 529 Overloaded\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let agent = agent(&format!("http://{addr}"));
        let (tx, _rx) = channel::channel(4).unwrap();
        let mut inbox = InterruptController::new().subscribe();
        let err = agent.run_turn("hi", &tx, &mut inbox).await.unwrap_err();
        assert!(err.to_string().contains("529"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo", 2), "h...");
    }
}
