//! Turn coordinator: starts one execution worker per turn, drains its output
//! channel, and seals the turn once the worker has been joined.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::audio::AudioRelay;
use crate::channel::{self, EQ_CAPACITY, OutputReceiver};
use crate::interrupt::InterruptController;
use crate::protocol::{OutputEvent, TurnId, TurnRecord, UserInput, image_prompt};
use crate::speech::SpeechService;
use crate::trace::TraceWriter;
use crate::worker::{self, WorkerHandle};

/// Turn lifecycle. `Sealed` goes back to `Running` on the next submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    /// Worker live; events are being consumed.
    Running,
    /// Terminal event seen; waiting for the worker to exit.
    Draining,
    Sealed,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a turn is already in progress")]
    TurnInProgress,
    #[error("input is locked while an interrupt is pending")]
    InputLocked,
    #[error("no turn is running")]
    NoTurn,
    #[error("could not prepare prompt: {0:#}")]
    Prompt(anyhow::Error),
    #[error("could not start turn: {0:#}")]
    Spawn(anyhow::Error),
}

/// Rendering side of a turn.
pub trait Surface: Send {
    /// Called for every non-terminal event, after it has been accumulated
    /// into `response`.
    fn on_event(&mut self, event: &OutputEvent, response: &str);
}

struct ActiveTurn {
    id: TurnId,
    rx: OutputReceiver,
    worker: Option<WorkerHandle>,
    /// Coordinator-generated events waiting to be handed out.
    notices: VecDeque<OutputEvent>,
    speech_failed: bool,
}

pub struct Coordinator {
    agent: Arc<dyn Agent>,
    interrupts: InterruptController,
    speech: Option<Arc<dyn SpeechService>>,
    audio: Option<AudioRelay>,
    trace: Option<TraceWriter>,
    output_capacity: usize,
    phase: TurnPhase,
    active: Option<ActiveTurn>,
    history: Vec<TurnRecord>,
}

impl Coordinator {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            interrupts: InterruptController::new(),
            speech: None,
            audio: None,
            trace: None,
            output_capacity: EQ_CAPACITY,
            phase: TurnPhase::Idle,
            active: None,
            history: Vec::new(),
        }
    }

    /// Enable speech. Without a relay, speech is only used to transcribe input.
    pub fn with_speech(mut self, speech: Arc<dyn SpeechService>, audio: Option<AudioRelay>) -> Self {
        self.speech = Some(speech);
        self.audio = audio;
        self
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Handle for the interrupt entry points (lock / submit / unlock).
    pub fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn history(&self) -> &[TurnRecord] {
        &self.history
    }

    /// Whether ordinary input would be accepted right now.
    pub fn accepts_input(&self) -> bool {
        !matches!(self.phase, TurnPhase::Running | TurnPhase::Draining)
            && !self.interrupts.is_locked()
    }

    /// Start a turn. Nothing is recorded unless the worker is running.
    pub async fn submit(&mut self, input: UserInput) -> Result<TurnId, TurnError> {
        if matches!(self.phase, TurnPhase::Running | TurnPhase::Draining) {
            return Err(TurnError::TurnInProgress);
        }
        if self.interrupts.is_locked() {
            return Err(TurnError::InputLocked);
        }

        let prompt = self.resolve_prompt(&input).await.map_err(TurnError::Prompt)?;
        self.write_trace();

        let id = TurnId::new();
        let (tx, rx) = channel::channel(self.output_capacity).map_err(TurnError::Spawn)?;
        let worker = worker::spawn(
            id.clone(),
            Arc::clone(&self.agent),
            prompt.clone(),
            tx,
            self.interrupts.subscribe(),
        )
        .map_err(TurnError::Spawn)?;

        info!("[{id}] Turn started");
        self.history.push(TurnRecord::new(id.clone(), input, prompt));
        self.active = Some(ActiveTurn {
            id: id.clone(),
            rx,
            worker: Some(worker),
            notices: VecDeque::new(),
            speech_failed: false,
        });
        self.phase = TurnPhase::Running;
        Ok(id)
    }

    /// Next event of the running turn. Returns `Ok(None)` once the terminal
    /// event has been consumed and the worker joined; the turn is sealed.
    pub async fn next_event(&mut self) -> Result<Option<OutputEvent>, TurnError> {
        let Some(active) = self.active.as_mut() else {
            return Err(TurnError::NoTurn);
        };

        if self.phase == TurnPhase::Running {
            if let Some(notice) = active.notices.pop_front() {
                return Ok(Some(notice));
            }
            let popped = active.rx.pop().await;
            match popped {
                Some(event) if !event.is_terminal() => {
                    self.accept(&event).await;
                    return Ok(Some(event));
                }
                Some(_) => debug!("[{}] Terminal event received", active.id),
                None => warn!("[{}] Worker exited without terminal event", active.id),
            }
            self.phase = TurnPhase::Draining;
        }

        self.seal().await;
        Ok(None)
    }

    /// Drive a whole turn, forwarding every event to `surface`.
    pub async fn run_turn(
        &mut self,
        input: UserInput,
        surface: &mut dyn Surface,
    ) -> Result<&TurnRecord, TurnError> {
        self.submit(input).await?;
        while let Some(event) = self.next_event().await? {
            let response = self.history.last().map_or("", |r| r.response.as_str());
            surface.on_event(&event, response);
        }
        self.history.last().ok_or(TurnError::NoTurn)
    }

    /// Stop audio playback after the queued frames have played.
    /// Blocks the calling thread.
    pub fn shutdown(self) -> anyhow::Result<()> {
        match self.audio {
            Some(audio) => audio.shutdown(),
            None => Ok(()),
        }
    }

    async fn resolve_prompt(&self, input: &UserInput) -> anyhow::Result<String> {
        match input {
            UserInput::Text { text } => Ok(text.clone()),
            UserInput::Image { path } => Ok(image_prompt(path)),
            UserInput::Speech { frame } => {
                let speech = self
                    .speech
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Speech input requires speech to be enabled"))?;
                let text = speech.recognize(frame).await?;
                info!("Recognized speech input: {} chars", text.len());
                Ok(text)
            }
        }
    }

    fn write_trace(&self) {
        let Some(trace) = &self.trace else {
            return;
        };
        if let Err(e) = trace.write(&self.history, self.agent.snapshot()) {
            warn!("Trace not written: {e:#}");
        }
    }

    /// Accumulate an event and, with speech on, voice it.
    async fn accept(&mut self, event: &OutputEvent) {
        if let Some(record) = self.history.last_mut() {
            record.append(event);
        }
        if event.text.is_empty() {
            return;
        }
        let (Some(speech), Some(audio), Some(active)) =
            (&self.speech, &self.audio, self.active.as_mut())
        else {
            return;
        };
        if active.speech_failed {
            return;
        }

        let result = match speech.synthesize(&event.text).await {
            Ok(frame) => audio.enqueue(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("[{}] Speech output failed: {e:#}", active.id);
            active.speech_failed = true;
            let notice = OutputEvent::error(format!(
                "Speech output failed, muted for this turn: {e:#}"
            ));
            if let Some(record) = self.history.last_mut() {
                record.append(&notice);
            }
            active.notices.push_back(notice);
        }
    }

    async fn seal(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Some(worker) = active.worker.as_mut() {
            if let Err(e) = worker.join().await {
                error!("{e:#}");
            }
            active.worker = None;
        }
        let id = active.id.clone();
        self.active = None;
        if let Some(record) = self.history.last_mut() {
            record.sealed = true;
        }
        self.phase = TurnPhase::Sealed;
        info!("[{id}] Turn sealed");
    }
}
