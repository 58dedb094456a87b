//! Where received envelopes end up: the console and the speaker

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::MessageKind;
use crate::voice::Playback;

/// Displays text from the server
pub trait TextSink: Send + Sync {
    fn show(&self, kind: MessageKind, text: &str);
}

/// Prints server text to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl TextSink for ConsoleSink {
    fn show(&self, kind: MessageKind, text: &str) {
        match kind {
            MessageKind::AiResponse | MessageKind::Audio => println!("\nRobot: {text}\n"),
            MessageKind::Error => println!("Error: {text}"),
            MessageKind::Status | MessageKind::UserInput => println!("Server: {text}"),
        }
    }
}

/// One received clip awaiting playback
#[derive(Debug)]
struct Clip {
    audio: Vec<u8>,
    mime_type: String,
}

/// Handle to the single playback worker
///
/// Enqueueing never waits. Clips play strictly one at a time, in the order
/// they were enqueued.
#[derive(Clone)]
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<Clip>,
}

impl PlaybackQueue {
    /// Start the playback worker on `device`
    ///
    /// The worker exits once every queue handle is dropped and the backlog
    /// has played.
    #[must_use]
    pub fn spawn(device: Arc<dyn Playback>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(playback_worker(rx, device));
        (Self { tx }, worker)
    }

    /// Queue a clip; returns `false` if the worker is gone
    pub fn enqueue(&self, audio: Vec<u8>, mime_type: impl Into<String>) -> bool {
        self.tx
            .send(Clip {
                audio,
                mime_type: mime_type.into(),
            })
            .is_ok()
    }
}

async fn playback_worker(mut rx: mpsc::UnboundedReceiver<Clip>, device: Arc<dyn Playback>) {
    while let Some(clip) = rx.recv().await {
        let device = Arc::clone(&device);
        let bytes = clip.audio.len();
        let played =
            tokio::task::spawn_blocking(move || device.play(&clip.audio, &clip.mime_type)).await;

        match played {
            Ok(Ok(())) => tracing::debug!(bytes, "clip played"),
            Ok(Err(e)) => tracing::warn!(error = %e, bytes, "playback failed"),
            Err(e) => tracing::error!(error = %e, "playback task panicked"),
        }
    }
    tracing::debug!("playback worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::{Error, Result};

    /// Records clips, failing on a first byte of 0 and flagging overlap
    #[derive(Default)]
    struct RecordingPlayback {
        busy: AtomicBool,
        overlapped: AtomicBool,
        played: Mutex<Vec<u8>>,
    }

    impl Playback for RecordingPlayback {
        fn play(&self, audio: &[u8], _mime_type: &str) -> Result<()> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            // Earlier clips take longer, so a parallel worker would reorder them
            std::thread::sleep(Duration::from_millis(u64::from(40 - audio[0] * 10)));
            self.played.lock().unwrap().push(audio[0]);
            self.busy.store(false, Ordering::SeqCst);

            if audio[0] == 0 {
                Err(Error::Audio("device unplugged".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clips_play_one_at_a_time_in_order() {
        let device = Arc::new(RecordingPlayback::default());
        let (queue, worker) = PlaybackQueue::spawn(device.clone());

        for n in 0..4u8 {
            assert!(queue.enqueue(vec![n], "audio/mpeg"));
        }
        drop(queue);
        worker.await.unwrap();

        assert_eq!(*device.played.lock().unwrap(), vec![0, 1, 2, 3]);
        assert!(!device.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn enqueue_reports_stopped_worker() {
        let device = Arc::new(RecordingPlayback::default());
        let (queue, worker) = PlaybackQueue::spawn(device);
        worker.abort();
        let _ = worker.await;

        assert!(!queue.enqueue(vec![1], "audio/mpeg"));
    }
}
