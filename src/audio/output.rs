use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use super::wav;
use crate::protocol::AudioFrame;

/// A blocking audio sink used by the playback thread.
pub trait AudioOutput: Send + 'static {
    /// Play one frame, returning once playback has finished.
    fn play(&mut self, frame: &AudioFrame) -> Result<()>;
}

/// Plays frames by piping a WAV file into an external player (e.g. `aplay -q`).
pub struct CommandOutput {
    program: String,
    args: Vec<String>,
}

impl CommandOutput {
    /// Build from a whitespace-separated command line.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty audio player command"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl AudioOutput for CommandOutput {
    fn play(&mut self, frame: &AudioFrame) -> Result<()> {
        let bytes = wav::encode(frame)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn audio player '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&bytes)
                .context("Failed to write audio to player")?;
        }
        let status = child.wait().context("Audio player did not exit cleanly")?;
        if !status.success() {
            anyhow::bail!("Audio player exited with {status}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_program_and_args() {
        let out = CommandOutput::parse("aplay -q -").unwrap();
        assert_eq!(out.program, "aplay");
        assert_eq!(out.args, vec!["-q", "-"]);
        assert!(CommandOutput::parse("   ").is_err());
    }

    #[test]
    fn bad_frame_rejected_before_player_starts() {
        let mut out = CommandOutput::parse("agenthost-no-such-player").unwrap();
        let frame = AudioFrame {
            sample_rate: 3_000_000_000,
            samples: vec![0.0; 4],
        };
        let err = out.play(&frame).unwrap_err();
        assert!(err.to_string().contains("sample rate"), "{err:#}");
    }
}
