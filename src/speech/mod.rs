pub mod remote;

use async_trait::async_trait;

use crate::protocol::AudioFrame;

pub use remote::RemoteSpeech;

/// Text-to-speech and speech-to-text provider.
#[async_trait]
pub trait SpeechService: Send + Sync + 'static {
    async fn synthesize(&self, text: &str) -> anyhow::Result<AudioFrame>;

    async fn recognize(&self, frame: &AudioFrame) -> anyhow::Result<String>;
}

/// Check a compute device string: `cpu`, `cuda`, optionally with `:<index>`.
pub fn is_valid_device(device: &str) -> bool {
    let (kind, index) = match device.split_once(':') {
        Some((kind, index)) => (kind, Some(index)),
        None => (device, None),
    };
    matches!(kind, "cpu" | "cuda")
        && index.is_none_or(|i| !i.is_empty() && i.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Deterministic speech: synthesis encodes the text length, recognition
    /// returns a fixed transcript.
    pub struct FakeSpeech {
        pub transcript: String,
        pub fail_on: Option<String>,
        pub synthesized: Mutex<Vec<String>>,
    }

    impl FakeSpeech {
        pub fn new(transcript: &str) -> Self {
            Self {
                transcript: transcript.to_string(),
                fail_on: None,
                synthesized: Mutex::new(Vec::new()),
            }
        }

        pub fn synthesized(&self) -> Vec<String> {
            self.synthesized.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeechService for FakeSpeech {
        async fn synthesize(&self, text: &str) -> anyhow::Result<AudioFrame> {
            if self.fail_on.as_deref() == Some(text) {
                anyhow::bail!("tts backend down");
            }
            self.synthesized.lock().unwrap().push(text.to_string());
            Ok(AudioFrame {
                sample_rate: 8_000,
                samples: vec![text.len() as f32; 4],
            })
        }

        async fn recognize(&self, _frame: &AudioFrame) -> anyhow::Result<String> {
            Ok(self.transcript.clone())
        }
    }
}
