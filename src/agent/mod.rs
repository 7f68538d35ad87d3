pub mod anthropic;

use async_trait::async_trait;

use crate::channel::EventSink;
use crate::interrupt::InterruptInbox;

/// A reasoning engine. One call to [`Agent::run_turn`] is one turn; it runs on
/// a dedicated worker task and talks to the outside world only through the
/// sink and the interrupt inbox.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Human-readable name for this agent type.
    fn name(&self) -> &str;

    /// Drive one turn to completion.
    ///
    /// Implementations should call [`InterruptInbox::checkpoint`] at event
    /// boundaries; an injected message is extra context for the next step.
    /// Do not emit a terminal event: the worker does that.
    async fn run_turn(
        &self,
        prompt: &str,
        sink: &dyn EventSink,
        inbox: &mut InterruptInbox,
    ) -> anyhow::Result<()>;

    /// Structured snapshot of the engine's history, for trace files.
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::protocol::OutputEvent;

    /// One step of a scripted turn.
    #[derive(Debug, Clone)]
    pub enum Step {
        Emit(OutputEvent),
        /// Event-boundary interrupt check.
        Checkpoint,
        Sleep(Duration),
        Fail(String),
        Panic(String),
    }

    /// Plays back the same script every turn and records what it saw.
    pub struct ScriptedAgent {
        script: Vec<Step>,
        pub prompts: Mutex<Vec<String>>,
        pub injected: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        pub fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                prompts: Mutex::new(Vec::new()),
                injected: Mutex::new(Vec::new()),
            }
        }

        pub fn injected(&self) -> Vec<String> {
            self.injected.lock().unwrap().clone()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn run_turn(
            &self,
            prompt: &str,
            sink: &dyn EventSink,
            inbox: &mut InterruptInbox,
        ) -> anyhow::Result<()> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            for step in &self.script {
                match step {
                    Step::Emit(event) => sink.emit(event.clone()).await?,
                    Step::Checkpoint => {
                        if let Some(text) = inbox.checkpoint().await {
                            self.injected.lock().unwrap().push(text);
                        }
                    }
                    Step::Sleep(d) => tokio::time::sleep(*d).await,
                    Step::Fail(msg) => anyhow::bail!("{msg}"),
                    Step::Panic(msg) => panic!("{msg}"),
                }
            }
            Ok(())
        }

        fn snapshot(&self) -> serde_json::Value {
            serde_json::json!({ "prompts": self.prompts() })
        }
    }
}
