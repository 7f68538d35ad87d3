//! Bounded output channel between the execution worker and the coordinator.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{Channel, OutputEvent};

/// Default bound of the output channel.
pub const EQ_CAPACITY: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("output channel closed")]
    Closed,
    #[error("channel tag '{0}' is reserved")]
    ReservedChannel(Channel),
}

/// Anything that accepts output events. The engine only ever sees this.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event, waiting for capacity if needed.
    async fn emit(&self, event: OutputEvent) -> Result<(), SinkError>;
}

/// Producer half. Finishing consumes it, so no event can follow the terminal one.
#[derive(Debug)]
pub struct OutputSender {
    tx: mpsc::Sender<OutputEvent>,
}

/// Consumer half.
#[derive(Debug)]
pub struct OutputReceiver {
    rx: mpsc::Receiver<OutputEvent>,
}

/// Create a bounded output channel.
pub fn channel(capacity: usize) -> anyhow::Result<(OutputSender, OutputReceiver)> {
    if capacity == 0 {
        anyhow::bail!("output channel capacity must be non-zero");
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((OutputSender { tx }, OutputReceiver { rx }))
}

impl OutputSender {
    async fn push(&self, event: OutputEvent) -> Result<(), SinkError> {
        self.tx.send(event).await.map_err(|_| SinkError::Closed)
    }

    /// Push the terminal event and release the sender.
    pub async fn finish(self) -> Result<(), SinkError> {
        self.push(OutputEvent::terminal()).await
    }
}

#[async_trait]
impl EventSink for OutputSender {
    async fn emit(&self, event: OutputEvent) -> Result<(), SinkError> {
        if event.is_terminal() {
            return Err(SinkError::ReservedChannel(event.channel));
        }
        self.push(event).await
    }
}

impl OutputReceiver {
    /// Wait for the next event. `None` means the producer vanished
    /// without finishing.
    pub async fn pop(&mut self) -> Option<OutputEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn delivers_in_push_order() {
        let (tx, mut rx) = channel(8).unwrap();
        for i in 0..5 {
            tx.emit(OutputEvent::text(i.to_string())).await.unwrap();
        }
        tx.finish().await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = rx.pop().await {
            if event.is_terminal() {
                break;
            }
            seen.push(event.text);
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn terminal_tag_is_reserved() {
        let (tx, _rx) = channel(4).unwrap();
        let err = tx.emit(OutputEvent::new(">", "", None)).await.unwrap_err();
        assert_eq!(err, SinkError::ReservedChannel(Channel::Terminal));
    }

    #[tokio::test]
    async fn finish_is_last_event() {
        let (tx, mut rx) = channel(4).unwrap();
        tx.emit(OutputEvent::text("a")).await.unwrap();
        tx.finish().await.unwrap();
        assert_eq!(rx.pop().await.unwrap().text, "a");
        assert!(rx.pop().await.unwrap().is_terminal());
        // Sender is gone: nothing may follow the terminal event.
        assert!(rx.pop().await.is_none());
    }

    #[tokio::test]
    async fn zero_capacity_rejected() {
        assert!(channel(0).is_err());
    }

    #[tokio::test]
    async fn emit_after_receiver_drop_reports_closed() {
        let (tx, rx) = channel(1).unwrap();
        drop(rx);
        assert_eq!(
            tx.emit(OutputEvent::text("x")).await.unwrap_err(),
            SinkError::Closed
        );
    }

    #[tokio::test]
    async fn full_channel_blocks_producer_without_loss() {
        const TOTAL: usize = 200;
        let (tx, mut rx) = channel(4).unwrap();

        let producer = tokio::spawn(async move {
            for i in 0..TOTAL {
                tx.emit(OutputEvent::text(i.to_string())).await.unwrap();
            }
            tx.finish().await.unwrap();
        });

        // Producer must be parked on a full queue before we start draining.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let mut received = Vec::new();
        while let Some(event) = rx.pop().await {
            if event.is_terminal() {
                break;
            }
            if received.len() % 50 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            received.push(event.text.parse::<usize>().unwrap());
        }
        producer.await.unwrap();

        assert_eq!(received.len(), TOTAL);
        assert_eq!(received, (0..TOTAL).collect::<Vec<_>>());
    }
}
