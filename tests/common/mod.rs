//! Shared test utilities

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use robot_head::api::ApiServerBuilder;
use robot_head::client::WsStream;
use robot_head::protocol::{self, MIME_MPEG};
use robot_head::voice::{
    LanguageModel, PcmFormat, SpeechToText, SynthesizedAudio, TextToSpeech,
};
use robot_head::{Envelope, Error, ResponsePipeline, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Bytes the stub TTS returns (an ID3 header prefix)
pub const SPEECH: [u8; 3] = [0x49, 0x44, 0x33];

/// How long a test waits for a frame before failing
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// "Transcribes" by reading the PCM bytes as UTF-8
pub struct Utf8Stt;

#[async_trait]
impl SpeechToText for Utf8Stt {
    async fn transcribe(&self, pcm: &[u8], _format: PcmFormat) -> Result<String> {
        Ok(String::from_utf8_lossy(pcm).into_owned())
    }
}

/// Answers "hello" with "hi there" and echoes anything else
pub struct EchoLlm {
    pub delay: Duration,
}

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn complete(&self, _system_prompt: &str, user_text: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(if user_text == "hello" {
            "hi there".to_string()
        } else {
            format!("echo: {user_text}")
        })
    }
}

/// Always returns [`SPEECH`] as MP3
pub struct FixedTts;

#[async_trait]
impl TextToSpeech for FixedTts {
    async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio> {
        Ok(SynthesizedAudio {
            audio: SPEECH.to_vec(),
            mime_type: MIME_MPEG.to_string(),
        })
    }
}

/// Always fails
pub struct BrokenTts;

#[async_trait]
impl TextToSpeech for BrokenTts {
    async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio> {
        Err(Error::Tts("voice service unavailable".to_string()))
    }
}

/// Pipeline with stub collaborators
pub fn pipeline(
    tts: Option<Arc<dyn TextToSpeech>>,
    llm_delay: Duration,
) -> Arc<ResponsePipeline> {
    Arc::new(ResponsePipeline::new(
        Arc::new(Utf8Stt),
        Arc::new(EchoLlm { delay: llm_delay }),
        tts,
        "be brief",
        Duration::from_secs(30),
    ))
}

/// Pipeline that speaks every reply
pub fn speaking_pipeline() -> Arc<ResponsePipeline> {
    pipeline(Some(Arc::new(FixedTts)), Duration::ZERO)
}

/// Pipeline whose TTS always fails
pub fn text_pipeline() -> Arc<ResponsePipeline> {
    pipeline(Some(Arc::new(BrokenTts)), Duration::ZERO)
}

/// A server running on an ephemeral port
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<()>>,
}

impl TestServer {
    /// WebSocket URL of the server
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Request shutdown and wait for the server to stop
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.expect("server task panicked")
    }

    /// Request shutdown without waiting
    pub fn trigger_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for a previously triggered shutdown to finish
    pub async fn stopped(self) -> Result<()> {
        self.handle.await.expect("server task panicked")
    }
}

/// Start a server with default settings
pub async fn start_server(pipeline: Arc<ResponsePipeline>) -> TestServer {
    start_with(ApiServerBuilder::new(pipeline)).await
}

/// Start a server from a configured builder on 127.0.0.1:0
pub async fn start_with(builder: ApiServerBuilder) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let server = builder.build();
    let handle = tokio::spawn(server.serve(listener, async move {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        shutdown: Some(tx),
        handle,
    }
}

/// Open a raw WebSocket connection
pub async fn connect(url: &str) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Text frame carrying one encoded envelope
pub fn frame(envelope: &Envelope) -> Message {
    let json = String::from_utf8(protocol::encode(envelope).unwrap()).unwrap();
    Message::Text(json.into())
}

/// Encode and send one envelope
pub async fn send(ws: &mut WsStream, envelope: &Envelope) {
    ws.send(frame(envelope)).await.unwrap();
}

/// A bare WebSocket peer for driving the client
///
/// Waits for the client's first frame, writes `frames`, then holds the
/// connection open without reading or answering a close.
pub async fn scripted_peer(frames: Vec<Message>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let _ = ws.next().await;
        for frame in frames {
            if ws.send(frame).await.is_err() {
                return;
            }
        }
        std::future::pending::<()>().await;
    });

    (url, handle)
}

/// Receive the next envelope, failing the test on timeout or close
pub async fn recv(ws: &mut WsStream) -> Envelope {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("read failed");
        match frame {
            Message::Text(text) => return protocol::decode(text.as_str().as_bytes()).unwrap(),
            Message::Binary(data) => return protocol::decode(&data).unwrap(),
            Message::Close(_) => panic!("server closed the connection"),
            _ => {}
        }
    }
}

/// Wait for the server to end the session, returning any data frames seen first
pub async fn expect_closed(ws: &mut WsStream) -> Vec<Envelope> {
    let mut seen = Vec::new();
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("session stayed open");
        match frame {
            None | Some(Err(_) | Ok(Message::Close(_))) => return seen,
            Some(Ok(Message::Text(text))) => {
                seen.push(protocol::decode(text.as_str().as_bytes()).unwrap());
            }
            Some(Ok(_)) => {}
        }
    }
}
