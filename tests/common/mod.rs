//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;
use vita_gateway::chat::{ChatBackend, ChatMessage};
use vita_gateway::session::ServerEvent;
use vita_gateway::speech::{
    AudioFormat, Engine, EngineKind, SynthesisRequest, SynthesizedAudio, Synthesizer, Transcriber,
    Transcription,
};
use vita_gateway::{AppContext, Config, Error, Result};

pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes in one 100 ms PCM16 frame at 16 kHz
pub const FRAME_BYTES: usize = 3_200;

/// Chat backend that answers with its own id and model
#[derive(Default)]
pub struct FakeBackend {
    pub id: String,
    pub failing: AtomicBool,
    pub calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl FakeBackend {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            ..Self::default()
        })
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::ProviderUnavailable {
                provider: self.id.clone(),
                message: "HTTP 502".to_string(),
            });
        }
        Ok(format!("{} answered with {model}", self.id))
    }

    async fn ping(&self, _model: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::ProviderUnavailable {
                provider: self.id.clone(),
                message: "ping failed".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Transcriber with scripted probe, failure and latency
pub struct FakeTranscriber {
    pub id: String,
    pub probe_ok: bool,
    pub failing: AtomicBool,
    pub text: Mutex<String>,
    pub delay: Duration,
    /// Byte length of every payload received
    pub received: Mutex<Vec<usize>>,
}

impl FakeTranscriber {
    fn build(id: &str, text: &str, probe_ok: bool, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            probe_ok,
            failing: AtomicBool::new(false),
            text: Mutex::new(text.to_string()),
            delay,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn new(id: &str, text: &str) -> Arc<Self> {
        Arc::new(Self::build(id, text, true, Duration::ZERO))
    }

    pub fn broken(id: &str) -> Arc<Self> {
        Arc::new(Self::build(id, "", false, Duration::ZERO))
    }

    pub fn failing(id: &str) -> Arc<Self> {
        let t = Self::new(id, "");
        t.failing.store(true, Ordering::SeqCst);
        t
    }

    pub fn slow(id: &str, text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(id, text, true, delay))
    }

    pub fn received(&self) -> Vec<usize> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::LocalModel
    }

    async fn probe(&self) -> Result<()> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(Error::EngineUnavailable(format!("{} not found on PATH", self.id)))
        }
    }

    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcription> {
        self.received.lock().unwrap().push(pcm.len());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::TranscriptionFailed(format!("{} crashed", self.id)));
        }
        Ok(Transcription {
            text: self.text.lock().unwrap().clone(),
            duration: vita_gateway::audio::pcm16_duration(pcm.len(), sample_rate),
        })
    }
}

/// Synthesizer producing a fixed payload
pub struct FakeSynthesizer {
    pub id: String,
    pub failing: AtomicBool,
    pub bytes: Vec<u8>,
    pub calls: AtomicUsize,
    pub last_request: Mutex<Option<SynthesisRequest>>,
}

impl FakeSynthesizer {
    pub fn new(id: &str, len: usize) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failing: AtomicBool::new(false),
            bytes: vec![7; len],
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        let s = Self::new(id, 16);
        s.failing.store(true, Ordering::SeqCst);
        s
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Network
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::SynthesisFailed(format!("{} returned 500", self.id)));
        }
        Ok(SynthesizedAudio {
            bytes: self.bytes.clone(),
            format: AudioFormat::Mp3,
        })
    }
}

/// Backends for the three built-in providers
pub struct Backends {
    pub doubao: Arc<FakeBackend>,
    pub qwen: Arc<FakeBackend>,
    pub llama: Arc<FakeBackend>,
}

impl Backends {
    pub fn new() -> Self {
        Self {
            doubao: FakeBackend::new("doubao"),
            qwen: FakeBackend::new("qwen"),
            llama: FakeBackend::new("llama"),
        }
    }

    fn map(&self) -> HashMap<String, Arc<dyn ChatBackend>> {
        let mut map: HashMap<String, Arc<dyn ChatBackend>> = HashMap::new();
        map.insert("doubao".into(), self.doubao.clone());
        map.insert("qwen".into(), self.qwen.clone());
        map.insert("llama".into(), self.llama.clone());
        map
    }
}

/// Default configuration with a credential for every provider
pub fn test_config() -> Config {
    let mut config = Config::default();
    for provider in &mut config.providers {
        provider.api_key = Some(SecretString::from(format!("sk-test-{}", provider.id)));
    }
    config.server.system_prompt = "You are a test interviewer.".to_string();
    config
}

/// Build and warm up a context around fake backends and engines
pub async fn context(config: Config, backends: &Backends, engines: Vec<Engine>) -> Arc<AppContext> {
    let ctx = Arc::new(AppContext::assemble(config, backends.map(), engines));
    ctx.warm_up().await;
    ctx
}

pub fn transcriber(t: &Arc<FakeTranscriber>) -> Engine {
    Engine::Transcriber(t.clone())
}

pub fn synthesizer(s: &Arc<FakeSynthesizer>) -> Engine {
    Engine::Synthesizer(s.clone())
}

/// 100 ms of PCM16 at a constant amplitude
pub fn frame(amplitude: i16) -> Vec<u8> {
    std::iter::repeat_n(amplitude, FRAME_BYTES / 2)
        .flat_map(i16::to_le_bytes)
        .collect()
}

pub fn speech_frame() -> Vec<u8> {
    frame(8_000)
}

pub fn silent_frame() -> Vec<u8> {
    frame(0)
}

/// Receive events until one matches, returning everything seen
pub async fn events_until(
    rx: &mut mpsc::Receiver<ServerEvent>,
    mut done: impl FnMut(&ServerEvent) -> bool,
) -> Vec<ServerEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("outbound queue closed");
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

pub fn is_state(event: &ServerEvent, state: vita_gateway::session::SessionState) -> bool {
    matches!(event, ServerEvent::State { state: s } if *s == state)
}
