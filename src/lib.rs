//! Robot Head - voice terminal bridge to cloud AI services
//!
//! This library provides both ends of the robot head link:
//! - A duplex WebSocket envelope protocol
//! - The client: connect with backoff, concurrent send/receive, serialized playback
//! - The server: one read loop per connection feeding a response pipeline
//! - The pipeline: STT, completion, and TTS with a text fallback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │           Client             │
//! │  mic / stdin   │  speaker    │
//! └───────┬────────────────▲─────┘
//!         │ Envelope (JSON over WebSocket /ws)
//! ┌───────▼────────────────┴─────┐
//! │           Server             │
//! │  read loop ─► ResponsePipeline
//! └───────┬──────────────────────┘
//!         │
//! ┌───────▼──────────────────────┐
//! │       Cloud services         │
//! │  STT  │  LLM  │  TTS         │
//! └──────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::ResponsePipeline;
pub use protocol::{Envelope, MessageKind, Payload};
