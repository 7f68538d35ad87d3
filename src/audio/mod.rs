//! Audio relay: a bounded frame queue drained by one long-lived playback
//! thread, so blocking playback never stalls the coordinator unless the
//! queue fills up.

pub mod output;
pub mod wav;

use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::AudioFrame;

pub use output::{AudioOutput, CommandOutput};

/// Default bound of the audio queue.
pub const AUDIO_CAPACITY: usize = 100;

pub struct AudioRelay {
    tx: mpsc::Sender<AudioFrame>,
    player: JoinHandle<()>,
}

impl AudioRelay {
    /// Start the playback thread.
    pub fn start(capacity: usize, mut output: impl AudioOutput) -> Result<Self> {
        if capacity == 0 {
            anyhow::bail!("audio queue capacity must be non-zero");
        }
        let (tx, mut rx) = mpsc::channel::<AudioFrame>(capacity);
        let player = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                info!("Audio playback started");
                while let Some(frame) = rx.blocking_recv() {
                    debug!(
                        "Playing {:.2}s at {} Hz",
                        frame.duration_secs(),
                        frame.sample_rate
                    );
                    if let Err(e) = output.play(&frame) {
                        warn!("Audio playback failed: {e:#}");
                    }
                }
                info!("Audio playback stopped");
            })
            .context("Failed to spawn audio playback thread")?;
        Ok(Self { tx, player })
    }

    /// Queue a frame for playback, waiting while the queue is full.
    pub async fn enqueue(&self, frame: AudioFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("Audio playback thread stopped"))
    }

    /// Close the queue and wait for the remaining frames to play.
    /// Blocks the calling thread.
    pub fn shutdown(self) -> Result<()> {
        let Self { tx, player } = self;
        drop(tx);
        player
            .join()
            .map_err(|_| anyhow::anyhow!("Audio playback thread panicked"))
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn plays_in_order_without_overlap() {
        let output = RecordingOutput::new(Duration::from_millis(15));
        let relay = AudioRelay::start(AUDIO_CAPACITY, output.clone()).unwrap();

        // "A", "B", "C"
        for marker in [1.0, 2.0, 3.0] {
            relay.enqueue(marked_frame(marker)).await.unwrap();
        }
        relay.shutdown().unwrap();

        let played = output.played();
        let order: Vec<f32> = played.iter().map(|p| p.marker).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
        for pair in played.windows(2) {
            assert!(pair[0].end <= pair[1].start, "playback overlapped");
        }
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let output = RecordingOutput::new(Duration::from_millis(30));
        let relay = AudioRelay::start(1, output.clone()).unwrap();

        // First frame is taken by the player, second fills the queue.
        relay.enqueue(marked_frame(1.0)).await.unwrap();
        relay.enqueue(marked_frame(2.0)).await.unwrap();
        let third = tokio::time::timeout(
            Duration::from_millis(5),
            relay.enqueue(marked_frame(3.0)),
        )
        .await;
        assert!(third.is_err(), "enqueue should block on a full queue");

        relay.enqueue(marked_frame(4.0)).await.unwrap();
        relay.shutdown().unwrap();

        let order: Vec<f32> = output.played().iter().map(|p| p.marker).collect();
        assert_eq!(order, vec![1.0, 2.0, 4.0]);
    }

    /// Encodes like the real player before recording the frame.
    struct EncodingOutput(RecordingOutput);

    impl AudioOutput for EncodingOutput {
        fn play(&mut self, frame: &AudioFrame) -> Result<()> {
            wav::encode(frame)?;
            self.0.play(frame)
        }
    }

    #[tokio::test]
    async fn unplayable_frame_does_not_stop_playback() {
        let output = RecordingOutput::new(Duration::ZERO);
        let relay = AudioRelay::start(AUDIO_CAPACITY, EncodingOutput(output.clone())).unwrap();

        let mut bad = marked_frame(1.0);
        bad.sample_rate = 3_000_000_000;
        relay.enqueue(bad).await.unwrap();
        relay.enqueue(marked_frame(2.0)).await.unwrap();
        relay.shutdown().unwrap();

        let order: Vec<f32> = output.played().iter().map(|p| p.marker).collect();
        assert_eq!(order, vec![2.0]);
    }

    #[test]
    fn zero_capacity_rejected() {
        let output = RecordingOutput::new(Duration::ZERO);
        assert!(AudioRelay::start(0, output).is_err());
    }
}
