use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent::Agent;
use crate::channel::{EventSink, OutputSender};
use crate::interrupt::InterruptInbox;
use crate::protocol::{OutputEvent, TurnId};

/// A running execution worker: one turn of one engine on its own task.
pub struct WorkerHandle {
    turn_id: TurnId,
    task: JoinHandle<()>,
}

/// Spawn a worker that drives `prompt` through `agent` to completion.
///
/// Whatever happens inside the engine, exactly one terminal event is pushed
/// to `sender` before the task exits (unless the consumer already went away).
pub fn spawn(
    turn_id: TurnId,
    agent: Arc<dyn Agent>,
    prompt: String,
    sender: OutputSender,
    mut inbox: InterruptInbox,
) -> anyhow::Result<WorkerHandle> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| anyhow::anyhow!("No runtime to spawn worker on: {e}"))?;
    let tid = turn_id.clone();
    let task = runtime.spawn(async move {
        let name = agent.name().to_string();
        info!("[{tid}] Agent '{name}' started");
        let outcome = AssertUnwindSafe(agent.run_turn(&prompt, &sender, &mut inbox))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("Error: {e:#}")),
            Err(panic) => Some(format!("Error: agent panicked: {}", panic_message(&*panic))),
        };
        if let Some(text) = failure {
            error!("[{tid}] Agent '{name}' failed: {text}");
            if let Err(e) = sender.emit(OutputEvent::error(text)).await {
                warn!("[{tid}] Could not report failure: {e}");
            }
        }
        if let Err(e) = sender.finish().await {
            warn!("[{tid}] Could not deliver terminal event: {e}");
        }
        info!("[{tid}] Agent '{name}' stopped");
    });

    Ok(WorkerHandle { turn_id, task })
}

impl WorkerHandle {
    /// Wait for the worker task to exit. Safe to retry if the wait was
    /// cancelled, but not after it returned.
    pub async fn join(&mut self) -> anyhow::Result<()> {
        (&mut self.task)
            .await
            .map_err(|e| anyhow::anyhow!("[{}] Worker join error: {e}", self.turn_id))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
