use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::audio::wav;
use crate::coordinator::{Coordinator, Surface, TurnError};
use crate::interrupt::InterruptController;
use crate::protocol::{Action, Channel, OutputEvent, UserInput};

/// Prints the transcript to stdout, diagnostics to stderr.
struct StdoutSurface;

impl Surface for StdoutSurface {
    fn on_event(&mut self, event: &OutputEvent, _response: &str) {
        if event.channel == Channel::Error {
            eprintln!("\n{}", event.text);
            return;
        }
        let mut out = std::io::stdout().lock();
        if event.action == Some(Action::Open) {
            let _ = write!(out, "\n\n");
        }
        let _ = write!(out, "{}", event.text);
        let _ = out.flush();
    }
}

/// Run a single turn and exit.
pub async fn run_oneshot(coordinator: &mut Coordinator, prompt: &str) -> Result<()> {
    coordinator
        .run_turn(UserInput::text(prompt), &mut StdoutSurface)
        .await?;
    println!();
    Ok(())
}

/// A line typed by the user, as seen by the turn loop.
enum Request {
    Turn(UserInput),
    Quit,
}

pub async fn run_interactive(coordinator: &mut Coordinator) -> Result<()> {
    eprintln!("agenthost interactive mode (type 'exit' to quit)");
    eprintln!("While the agent is answering, press Enter to interrupt it.");
    eprintln!("Commands: /image <path>, /voice <file.wav>");
    eprintln!();

    let (busy_tx, busy_rx) = watch::channel(false);
    let (req_tx, mut req_rx) = mpsc::channel::<Request>(8);
    let reader = tokio::spawn(read_input(
        coordinator.interrupts().clone(),
        busy_rx,
        req_tx,
    ));

    eprint!("> ");
    while let Some(request) = req_rx.recv().await {
        let input = match request {
            Request::Turn(input) => input,
            Request::Quit => break,
        };

        if !coordinator.accepts_input() {
            eprintln!("(input locked until the pending interrupt is sent)");
            eprint!("> ");
            continue;
        }
        busy_tx.send_replace(true);
        match coordinator.run_turn(input, &mut StdoutSurface).await {
            Ok(_) => println!(),
            Err(e @ (TurnError::InputLocked | TurnError::TurnInProgress)) => {
                eprintln!("(not accepted: {e})");
            }
            Err(e) => eprintln!("\nFailed: {e}"),
        }
        busy_tx.send_replace(false);
        eprint!("> ");
    }

    reader.abort();
    debug!("Session ended after {} turn(s)", coordinator.history().len());
    Ok(())
}

/// What one typed line means, given the interrupt gate and whether a turn
/// is running.
#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    /// Blank line at the interrupt prompt.
    Ignore,
    /// Deliver the line to the paused turn and resume it.
    SendInterrupt(String),
    /// The turn ended while the interrupt prompt was open.
    DiscardInterrupt,
    OpenInterrupt,
    Busy,
    Reprompt,
    Forward(String),
}

fn route_line(line: &str, locked: bool, busy: bool) -> LineAction {
    match (locked, busy, line.is_empty()) {
        (true, _, true) => LineAction::Ignore,
        (true, true, false) => LineAction::SendInterrupt(line.to_string()),
        (true, false, false) => LineAction::DiscardInterrupt,
        (false, true, true) => LineAction::OpenInterrupt,
        (false, true, false) => LineAction::Busy,
        (false, false, true) => LineAction::Reprompt,
        (false, false, false) => LineAction::Forward(line.to_string()),
    }
}

/// Drive the gate for one line. Returns the line if it belongs to the turn
/// loop.
fn handle_line(line: &str, interrupts: &InterruptController, busy: bool) -> Option<String> {
    match route_line(line, interrupts.is_locked(), busy) {
        LineAction::Ignore => {}
        LineAction::SendInterrupt(text) => {
            interrupts.submit(text);
            interrupts.unlock();
            eprintln!("(interrupt sent)");
        }
        LineAction::DiscardInterrupt => {
            interrupts.unlock();
            eprintln!("(no turn running; interrupt discarded)");
            eprint!("> ");
        }
        LineAction::OpenInterrupt => {
            interrupts.lock();
            eprint!("interrupt> ");
        }
        LineAction::Busy => eprintln!("(agent is busy; press Enter to interrupt)"),
        LineAction::Reprompt => eprint!("> "),
        LineAction::Forward(line) => return Some(line),
    }
    None
}

/// Reads stdin for the whole session. Ordinary lines go to the turn loop;
/// while a turn runs, an empty line opens the interrupt prompt and the next
/// line is delivered to the agent.
async fn read_input(
    interrupts: InterruptController,
    busy: watch::Receiver<bool>,
    requests: mpsc::Sender<Request>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let is_busy = *busy.borrow();
        let Some(line) = handle_line(line.trim(), &interrupts, is_busy) else {
            continue;
        };
        let request = match parse_line(&line).await {
            Ok(request) => request,
            Err(e) => {
                eprintln!("{e:#}");
                eprint!("> ");
                continue;
            }
        };
        let quit = matches!(request, Request::Quit);
        if requests.send(request).await.is_err() || quit {
            break;
        }
    }
    debug!("stdin closed");
    let _ = requests.send(Request::Quit).await;
    Ok(())
}

async fn parse_line(line: &str) -> Result<Request> {
    if line == "exit" || line == "quit" {
        return Ok(Request::Quit);
    }
    if let Some(path) = line.strip_prefix("/image ") {
        let path = PathBuf::from(path.trim());
        if !path.exists() {
            anyhow::bail!("No such file: {}", path.display());
        }
        return Ok(Request::Turn(UserInput::image(path)));
    }
    if let Some(path) = line.strip_prefix("/voice ") {
        let path = path.trim();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {path}"))?;
        let frame = wav::decode(&bytes).with_context(|| format!("Failed to decode {path}"))?;
        return Ok(Request::Turn(UserInput::speech(frame)));
    }
    Ok(Request::Turn(UserInput::text(line)))
}
