//! VITA Gateway - resilience and realtime voice orchestration for interview training
//!
//! This library provides the core of the VITA gateway:
//! - Provider health tracking, selection and failover for chat tasks
//! - Rolling performance windows and automatic primary switching
//! - Speech engine availability and transcription/synthesis failover
//! - Realtime voice sessions over WebSocket
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  HTTP / WebSocket                    │
//! │   /api/providers  │  /api/switching  │  /ws/voice   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   AppContext                         │
//! │  Sessions │ ChatService │ SpeechOrchestrator         │
//! └──────┬─────────────┬──────────────┬─────────────────┘
//!        │             │              │
//! ┌──────▼──────┐ ┌────▼─────┐ ┌──────▼──────────────────┐
//! │  Selector   │ │ Monitor  │ │ EngineAvailability      │
//! │  Health     │ │ Switcher │ │ whisper │ tts │ espeak  │
//! └─────────────┘ └──────────┘ └─────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod monitor;
pub mod providers;
pub mod session;
pub mod speech;

pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
