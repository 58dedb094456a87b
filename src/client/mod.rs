//! Robot head client: connect, then send input and receive replies
//! concurrently
//!
//! ```text
//! stdin / microphone ──► inputs ──► send_loop ──► ConnectionWriter ──► server
//!                                                                        │
//! console ◄── TextSink ◄──┬── receive_loop ◄── ConnectionReader ◄────────┘
//! speaker ◄── worker ◄── PlaybackQueue
//! ```

mod output;
mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::tungstenite::Message;

pub use output::{ConsoleSink, PlaybackQueue, TextSink};
pub use retry::{
    Dialer, RetryPolicy, WsDialer, WsStream, connect_with_retry, delay_for_attempt,
};

use crate::protocol::{self, Envelope, MIME_PCM, MessageKind, Payload};
use crate::voice::record_pcm;
use crate::{Error, Result};

/// Status line sent right after connecting
pub const CONNECTED_MESSAGE: &str = "Robot head client connected";

/// How long a shutting-down session waits for the server's close reply
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause before retrying a failed microphone capture
const CAPTURE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One unit of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    /// A typed line
    Text(String),
    /// Raw 16 kHz mono PCM16 little-endian capture
    Audio(Vec<u8>),
}

impl ClientInput {
    /// Envelope to send, or `None` for blank text and empty captures
    #[must_use]
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            Self::Text(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| Envelope::user_input(text))
            }
            Self::Audio(pcm) => (!pcm.is_empty()).then(|| Envelope::audio("", pcm, MIME_PCM)),
        }
    }
}

/// Write half of a connection; clones share one serialized sink
#[derive(Clone)]
pub struct ConnectionWriter {
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
}

impl ConnectionWriter {
    /// Encode and write one envelope
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionTerminated`] if the write fails
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let json = String::from_utf8(protocol::encode(envelope)?)
            .map_err(|e| Error::SessionTerminated(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| Error::SessionTerminated(format!("write failed: {e}")))
    }

    /// Start the close handshake
    pub async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!(error = %e, "close failed");
        }
    }
}

/// Read half of a connection
pub struct ConnectionReader {
    stream: SplitStream<WsStream>,
}

/// Split an established connection into its two halves
#[must_use]
pub fn split(connection: WsStream) -> (ConnectionWriter, ConnectionReader) {
    let (sink, stream) = connection.split();
    (
        ConnectionWriter {
            sink: Arc::new(Mutex::new(sink)),
        },
        ConnectionReader { stream },
    )
}

/// Forward user input to the server until the input channel closes
///
/// # Errors
///
/// Returns [`Error::SessionTerminated`] on the first failed write
pub async fn send_loop(
    writer: ConnectionWriter,
    mut inputs: mpsc::Receiver<ClientInput>,
) -> Result<()> {
    while let Some(input) = inputs.recv().await {
        let Some(envelope) = input.into_envelope() else {
            continue;
        };
        writer.send(&envelope).await?;
        tracing::debug!(kind = %envelope.kind(), "sent");
    }

    tracing::info!("input closed");
    Ok(())
}

/// Dispatch server envelopes until the connection ends
///
/// Text goes to `sink`, audio to `playback`. A malformed envelope ends the
/// session.
///
/// # Errors
///
/// Always ends with [`Error::SessionTerminated`] describing why the
/// connection stopped
pub async fn receive_loop(
    mut reader: ConnectionReader,
    sink: Arc<dyn TextSink>,
    playback: PlaybackQueue,
) -> Result<()> {
    while let Some(frame) = reader.stream.next().await {
        let decoded = match frame {
            Ok(Message::Text(text)) => protocol::decode(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => protocol::decode(&data),
            Ok(Message::Close(_)) => {
                return Err(Error::SessionTerminated(
                    "server closed the connection".to_string(),
                ));
            }
            Ok(_) => continue,
            Err(e) => return Err(Error::SessionTerminated(format!("read failed: {e}"))),
        };

        let envelope = decoded.map_err(|e| {
            Error::SessionTerminated(format!("malformed envelope from server: {e}"))
        })?;
        dispatch(envelope, sink.as_ref(), &playback);
    }

    Err(Error::SessionTerminated("connection closed".to_string()))
}

fn dispatch(envelope: Envelope, sink: &dyn TextSink, playback: &PlaybackQueue) {
    tracing::debug!(kind = %envelope.kind(), "received");
    match envelope.payload {
        Payload::Audio(audio) => {
            if !audio.text.is_empty() {
                sink.show(MessageKind::Audio, &audio.text);
            }
            if audio.audio.is_empty() {
                return;
            }
            if !playback.enqueue(audio.audio, audio.mime_type) {
                tracing::warn!("playback worker stopped, dropping clip");
            }
        }
        Payload::AiResponse(text) => sink.show(MessageKind::AiResponse, &text),
        Payload::Error(text) => sink.show(MessageKind::Error, &text),
        Payload::Status(text) | Payload::UserInput(text) => {
            sink.show(MessageKind::Status, &text);
        }
    }
}

/// Run one session over an established connection
///
/// Announces the client, then runs the send and receive loops as separate
/// tasks and joins both before returning. When input runs out the
/// connection is closed so the receive loop can finish. When `shutdown`
/// resolves, input stops and the server gets [`SHUTDOWN_TIMEOUT`] to
/// acknowledge the close before the receive loop is aborted.
///
/// # Errors
///
/// Returns the send loop's error, or the error of the initial status write
pub async fn run_session<F>(
    connection: WsStream,
    inputs: mpsc::Receiver<ClientInput>,
    sink: Arc<dyn TextSink>,
    playback: PlaybackQueue,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (writer, reader) = split(connection);
    writer.send(&Envelope::status(CONNECTED_MESSAGE)).await?;
    tracing::info!("client connected and ready");

    let mut send = tokio::spawn({
        let writer = writer.clone();
        async move {
            let result = send_loop(writer.clone(), inputs).await;
            writer.close().await;
            result
        }
    });
    let mut receive = tokio::spawn(receive_loop(reader, sink, playback));

    tokio::pin!(shutdown);
    let mut sent = None;
    let finished = loop {
        tokio::select! {
            result = &mut send, if sent.is_none() => sent = Some(result),
            result = &mut receive => break Some(result),
            () = &mut shutdown => break None,
        }
    };
    let received = match finished {
        Some(result) => result,
        None => {
            tracing::info!("shutdown requested, closing connection");
            send.abort();
            close_and_drain(&writer, &mut receive).await
        }
    };

    match received {
        Ok(Err(e)) => tracing::info!(reason = %e, "receive loop ended"),
        Ok(Ok(())) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(error = %e, "receive task failed"),
    }

    // The connection is gone, so pending input has nowhere to go
    let sent = match sent {
        Some(result) => result,
        None => {
            send.abort();
            send.await
        }
    };
    match sent {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(Error::SessionTerminated(format!("send task failed: {e}"))),
    }
}

/// Send a close frame and wait a bounded time for the receive task
async fn close_and_drain(
    writer: &ConnectionWriter,
    receive: &mut JoinHandle<Result<()>>,
) -> std::result::Result<Result<()>, JoinError> {
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        writer.close().await;
        (&mut *receive).await
    })
    .await;

    match drained {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("server did not acknowledge close, abandoning connection");
            receive.abort();
            (&mut *receive).await
        }
    }
}

/// Read stdin lines into `inputs` until EOF
///
/// Lines are read on a plain thread; a read blocked on the terminal must
/// not hold up runtime shutdown.
pub fn spawn_stdin_reader(inputs: mpsc::Sender<ClientInput>) -> JoinHandle<()> {
    let (lines_tx, mut lines_rx) = mpsc::channel::<String>(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if lines_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = lines_rx.recv().await {
            if line.trim().is_empty() {
                continue;
            }
            if inputs.send(ClientInput::Text(line)).await.is_err() {
                break;
            }
        }
    })
}

/// Record fixed microphone windows into `inputs` until the channel closes
pub fn spawn_voice_capture(
    inputs: mpsc::Sender<ClientInput>,
    window: Duration,
) -> JoinHandle<()> {
    spawn_capture_loop(inputs, move || record_pcm(window))
}

/// Repeatedly run the blocking `record` and forward each capture
///
/// A failed capture is logged and retried after a short pause.
pub fn spawn_capture_loop<F>(inputs: mpsc::Sender<ClientInput>, record: F) -> JoinHandle<()>
where
    F: Fn() -> Result<Vec<u8>> + Send + Sync + 'static,
{
    let record = Arc::new(record);
    tokio::spawn(async move {
        while !inputs.is_closed() {
            let record = Arc::clone(&record);
            match tokio::task::spawn_blocking(move || record()).await {
                Ok(Ok(pcm)) if pcm.is_empty() => {}
                Ok(Ok(pcm)) => {
                    tracing::debug!(bytes = pcm.len(), "captured audio");
                    if inputs.send(ClientInput::Audio(pcm)).await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "audio capture failed, retrying");
                    tokio::time::sleep(CAPTURE_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "capture task failed, retrying");
                    tokio::time::sleep(CAPTURE_RETRY_DELAY).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::protocol::AudioPayload;

    #[test]
    fn blank_input_is_skipped() {
        assert!(ClientInput::Text("   \n".to_string()).into_envelope().is_none());
        assert!(ClientInput::Audio(Vec::new()).into_envelope().is_none());
    }

    #[test]
    fn text_input_becomes_user_input() {
        let envelope = ClientInput::Text("  hello \n".to_string()).into_envelope().unwrap();
        assert_eq!(envelope.payload, Payload::UserInput("hello".to_string()));
    }

    #[test]
    fn capture_becomes_pcm_audio() {
        let envelope = ClientInput::Audio(vec![1, 2, 3, 4]).into_envelope().unwrap();
        assert_eq!(
            envelope.payload,
            Payload::Audio(AudioPayload {
                text: String::new(),
                audio: vec![1, 2, 3, 4],
                mime_type: MIME_PCM.to_string(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failures_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(4);

        let counter = Arc::clone(&calls);
        let capture = spawn_capture_loop(tx, move || match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(Error::Audio("no microphone".to_string())),
            1 => Ok(Vec::new()),
            n => Ok(vec![u8::try_from(n).unwrap_or(u8::MAX); 2]),
        });

        assert_eq!(rx.recv().await, Some(ClientInput::Audio(vec![2, 2])));
        assert_eq!(rx.recv().await, Some(ClientInput::Audio(vec![3, 3])));
        drop(rx);
        capture.await.unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 4);
    }
}
