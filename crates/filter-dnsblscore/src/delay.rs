//! Response emission.
//!
//! All output goes through a single writer task fed by an unbounded
//! queue, so lines from concurrently firing delayed responses never
//! interleave. Delayed responses are spawned as independent tasks and
//! only hold a weak handle on the queue: once the dispatcher has hung
//! up, anything still sleeping is abandoned.
use crate::config::SlowFactor;
use crate::error::FilterError;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;

/// `slow_factor * score / domain_count` milliseconds, or zero when
/// there is no slow factor or the score is zero or unknown.
pub fn compute_delay(slow_factor: SlowFactor, score: Option<u8>, domain_count: usize) -> Duration {
    match (slow_factor.millis(), score) {
        (Some(factor), Some(score)) if score > 0 && domain_count > 0 => {
            Duration::from_millis(factor.saturating_mul(score as u64) / domain_count as u64)
        }
        _ => Duration::ZERO,
    }
}

/// Spawn the task that owns the output stream.
///
/// The task finishes once every sender has been dropped and the queue
/// has been drained, handing back the output stream.
pub fn spawn_writer<W>(mut output: W) -> (UnboundedSender<Vec<u8>>, JoinHandle<std::io::Result<W>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = unbounded_channel::<Vec<u8>>();
    let handle = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        Ok(output)
    });
    (tx, handle)
}

pub struct Emitter {
    tx: UnboundedSender<Vec<u8>>,
    deterministic: bool,
}

impl Emitter {
    pub fn new(tx: UnboundedSender<Vec<u8>>, deterministic: bool) -> Self {
        Self { tx, deterministic }
    }

    /// Queue a line for output right away
    pub fn emit(&self, line: Vec<u8>) -> Result<(), FilterError> {
        self.tx.send(line).map_err(|_| FilterError::OutputClosed)
    }

    /// Queue a line once `delay` has elapsed, without waiting for it.
    /// In deterministic mode the delay is skipped entirely.
    pub fn emit_after(&self, delay: Duration, line: Vec<u8>) -> Result<(), FilterError> {
        if self.deterministic || delay.is_zero() {
            return self.emit(line);
        }

        let tx = self.tx.downgrade();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tx.upgrade() {
                Some(tx) => {
                    if tx.send(line).is_err() {
                        tracing::debug!("output closed before delayed response could be sent");
                    }
                }
                None => {
                    tracing::debug!(
                        "dropping delayed response after shutdown: {}",
                        String::from_utf8_lossy(&line)
                    );
                }
            }
        });
        Ok(())
    }

    #[cfg(test)]
    pub fn tx_for_test(&self) -> UnboundedSender<Vec<u8>> {
        self.tx.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn delay_computation() {
        let slow = SlowFactor::new(1000);
        assert_eq!(compute_delay(slow, Some(3), 1), Duration::from_millis(3000));
        assert_eq!(compute_delay(slow, Some(3), 2), Duration::from_millis(1500));
        // Integer division
        assert_eq!(
            compute_delay(SlowFactor::new(10), Some(1), 3),
            Duration::from_millis(3)
        );
        assert_eq!(compute_delay(slow, Some(0), 1), Duration::ZERO);
        assert_eq!(compute_delay(slow, None, 1), Duration::ZERO);
        assert_eq!(
            compute_delay(SlowFactor::DISABLED, Some(100), 1),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_emission_does_not_block() {
        let (tx, mut rx) = unbounded_channel();
        let emitter = Emitter::new(tx, false);

        emitter
            .emit_after(Duration::from_secs(2), b"slow".to_vec())
            .unwrap();
        emitter.emit(b"fast".to_vec()).unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"fast");
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        // The paused clock auto-advances to the pending sleep
        assert_eq!(rx.recv().await.unwrap(), b"slow");
    }

    #[tokio::test(start_paused = true)]
    async fn deterministic_mode_ignores_delay() {
        let (tx, mut rx) = unbounded_channel();
        let emitter = Emitter::new(tx, true);

        emitter
            .emit_after(Duration::from_secs(2), b"first".to_vec())
            .unwrap();
        emitter.emit(b"second".to_vec()).unwrap();

        assert_eq!(rx.try_recv().unwrap(), b"first");
        assert_eq!(rx.try_recv().unwrap(), b"second");
    }

    #[tokio::test(start_paused = true)]
    async fn pending_delays_are_abandoned_on_shutdown() {
        let (tx, mut rx) = unbounded_channel();
        let emitter = Emitter::new(tx, false);

        emitter
            .emit_after(Duration::from_secs(2), b"never".to_vec())
            .unwrap();
        emitter.emit(b"flushed".to_vec()).unwrap();
        drop(emitter);

        assert_eq!(rx.recv().await.unwrap(), b"flushed");
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn writer_terminates_lines() {
        let (tx, handle) = spawn_writer(Vec::<u8>::new());
        tx.send(b"one".to_vec()).unwrap();
        tx.send(b"caf\xE9".to_vec()).unwrap();
        drop(tx);
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output, b"one\ncaf\xE9\n");
    }
}
