//! Realtime voice session turn cycle

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;
use vita_gateway::session::{
    AudioFrame, ServerEvent, SessionInput, SessionState, SessionUpdate,
};

mod common;
use common::{
    Backends, FRAME_BYTES, FakeSynthesizer, FakeTranscriber, context, events_until, is_state,
    silent_frame, speech_frame, synthesizer, test_config, transcriber,
};

fn audio(pcm: Vec<u8>) -> SessionInput {
    SessionInput::Audio(AudioFrame::raw(pcm))
}

async fn send_all(tx: &mpsc::Sender<SessionInput>, inputs: impl IntoIterator<Item = SessionInput>) {
    for input in inputs {
        tx.send(input).await.unwrap();
    }
}

fn count_state(events: &[ServerEvent], state: SessionState) -> usize {
    events.iter().filter(|e| is_state(e, state)).count()
}

fn position(events: &[ServerEvent], pred: impl Fn(&ServerEvent) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .expect("event not found")
}

#[tokio::test]
async fn test_silence_completes_one_utterance() {
    let stt = FakeTranscriber::new("whisper-local", "I led a team of five");
    let tts = FakeSynthesizer::new("espeak", 100);
    let backends = Backends::new();
    let ctx = context(
        test_config(),
        &backends,
        vec![transcriber(&stt), synthesizer(&tts)],
    )
    .await;

    let mut handle = ctx.sessions.open(None).await.unwrap();
    let mut seen = events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await;
    assert!(matches!(seen[0], ServerEvent::Connected { .. }));

    // 0.5 s of speech then 2 s of silence; 1.5 s of silence closes the utterance
    let frames = std::iter::repeat_with(speech_frame)
        .take(5)
        .chain(std::iter::repeat_with(silent_frame).take(20))
        .map(audio);
    send_all(&handle.inbound, frames).await;

    seen.extend(events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::AudioEnd { .. })).await);
    seen.extend(events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await);

    handle.inbound.send(SessionInput::End).await.unwrap();
    seen.extend(events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Closed)).await);

    assert_eq!(count_state(&seen, SessionState::Thinking), 1);
    assert_eq!(stt.received(), vec![20 * FRAME_BYTES]);

    let turns = handle.task.await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].user, "I led a team of five");
    assert_eq!(turns[0].provider, "doubao");
    assert_eq!(backends.doubao.call_count(), 1);
}

#[tokio::test]
async fn test_stop_audio_runs_turn_in_order() {
    let stt = FakeTranscriber::new("whisper-local", "my biggest weakness");
    let tts = FakeSynthesizer::new("espeak", 100);
    let mut config = test_config();
    config.session.chunk_size = 40;
    let ctx = context(
        config,
        &Backends::new(),
        vec![transcriber(&stt), synthesizer(&tts)],
    )
    .await;

    let mut handle = ctx.sessions.open(None).await.unwrap();
    events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await;

    handle.inbound.send(SessionInput::StartAudio).await.unwrap();
    events_until(&mut handle.outbound, |e| is_state(e, SessionState::Listening)).await;

    let mut inputs: Vec<SessionInput> = (0..4).map(|_| audio(speech_frame())).collect();
    inputs.push(SessionInput::StopAudio);
    send_all(&handle.inbound, inputs).await;

    let seen = events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await;
    assert_eq!(stt.received(), vec![4 * FRAME_BYTES]);

    let transcription = position(&seen, |e| {
        matches!(e, ServerEvent::Transcription { is_final: true, text, .. } if text == "my biggest weakness")
    });
    let response = position(&seen, |e| matches!(e, ServerEvent::AiResponse { .. }));
    let speaking = position(&seen, |e| is_state(e, SessionState::Speaking));
    let start = position(&seen, |e| {
        matches!(e, ServerEvent::AudioStart { engine, .. } if engine == "espeak")
    });
    let end = position(&seen, |e| matches!(e, ServerEvent::AudioEnd { bytes: 100 }));
    assert!(transcription < response);
    assert!(response < speaking);
    assert!(speaking < start);
    assert!(start < end);

    let chunks: Vec<(u64, usize)> = seen
        .iter()
        .filter_map(|e| match e {
            ServerEvent::AudioChunk { seq, data } => Some((*seq, data.len())),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![(0, 40), (1, 40), (2, 20)]);

    let request = tts.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.text, "doubao answered with Doubao-Seed-1.6-thinking");
}

#[tokio::test]
async fn test_interrupt_while_thinking_drops_turn() {
    let stt = FakeTranscriber::slow("whisper-local", "never heard", Duration::from_secs(30));
    let tts = FakeSynthesizer::new("espeak", 10);
    let backends = Backends::new();
    let ctx = context(
        test_config(),
        &backends,
        vec![transcriber(&stt), synthesizer(&tts)],
    )
    .await;

    let mut handle = ctx.sessions.open(None).await.unwrap();
    let mut inputs = vec![SessionInput::StartAudio];
    inputs.extend((0..4).map(|_| audio(speech_frame())));
    inputs.push(SessionInput::StopAudio);
    send_all(&handle.inbound, inputs).await;

    let mut seen =
        events_until(&mut handle.outbound, |e| is_state(e, SessionState::Thinking)).await;
    handle.inbound.send(SessionInput::Interrupt).await.unwrap();
    seen.extend(events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await);

    handle.inbound.send(SessionInput::End).await.unwrap();
    seen.extend(events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Closed)).await);

    assert!(!seen.iter().any(|e| matches!(e, ServerEvent::AiResponse { .. })));
    assert_eq!(backends.doubao.call_count(), 0);
    assert!(handle.task.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_failure_reports_error_and_recovers() {
    let stt = FakeTranscriber::new("whisper-local", "hello");
    let tts = FakeSynthesizer::new("espeak", 10);
    let backends = Backends::new();
    let ctx = context(
        test_config(),
        &backends,
        vec![transcriber(&stt), synthesizer(&tts)],
    )
    .await;
    backends.doubao.fail(true);
    backends.qwen.fail(true);
    backends.llama.fail(true);

    let mut handle = ctx.sessions.open(None).await.unwrap();
    let mut inputs = vec![SessionInput::StartAudio];
    inputs.extend((0..4).map(|_| audio(speech_frame())));
    inputs.push(SessionInput::StopAudio);
    send_all(&handle.inbound, inputs).await;

    let seen = events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Error { .. })).await;
    let Some(ServerEvent::Error { kind, .. }) = seen.last() else {
        unreachable!()
    };
    assert_eq!(kind, "all_providers_exhausted");
    events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await;

    // The session keeps going
    handle.inbound.send(SessionInput::Ping).await.unwrap();
    events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Pong)).await;

    handle.inbound.send(SessionInput::End).await.unwrap();
    events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Closed)).await;
    assert!(handle.task.await.unwrap().is_empty());
    assert_eq!(tts.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_transcript_skips_chat() {
    let stt = FakeTranscriber::new("whisper-local", "   ");
    let backends = Backends::new();
    let ctx = context(test_config(), &backends, vec![transcriber(&stt)]).await;

    let mut handle = ctx.sessions.open(None).await.unwrap();
    let mut inputs = vec![SessionInput::StartAudio];
    inputs.extend((0..4).map(|_| audio(speech_frame())));
    inputs.push(SessionInput::StopAudio);
    send_all(&handle.inbound, inputs).await;

    events_until(&mut handle.outbound, |e| is_state(e, SessionState::Thinking)).await;
    let seen = events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await;
    assert!(seen.iter().any(|e| {
        matches!(e, ServerEvent::Transcription { text, is_final: true, .. } if text.is_empty())
    }));
    assert_eq!(backends.doubao.call_count(), 0);
}

#[tokio::test]
async fn test_history_is_replayed_to_chat() {
    let stt = FakeTranscriber::new("whisper-local", "first answer");
    let tts = FakeSynthesizer::new("espeak", 10);
    let backends = Backends::new();
    let ctx = context(
        test_config(),
        &backends,
        vec![transcriber(&stt), synthesizer(&tts)],
    )
    .await;

    let mut handle = ctx.sessions.open(None).await.unwrap();
    for _ in 0..2 {
        let mut inputs = vec![SessionInput::StartAudio];
        inputs.extend((0..4).map(|_| audio(speech_frame())));
        inputs.push(SessionInput::StopAudio);
        send_all(&handle.inbound, inputs).await;
        events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::AudioEnd { .. })).await;
        events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await;
    }

    let calls = backends.doubao.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1.len(), 2);
    // system, first user, first assistant, second user
    assert_eq!(calls[1].1.len(), 4);
    assert_eq!(calls[1].1[0].content, "You are a test interviewer.");
}

#[tokio::test]
async fn test_ping_and_configure() {
    let ctx = context(test_config(), &Backends::new(), Vec::new()).await;
    let mut handle = ctx.sessions.open(None).await.unwrap();

    handle.inbound.send(SessionInput::Ping).await.unwrap();
    events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Pong)).await;

    handle
        .inbound
        .send(SessionInput::Configure(SessionUpdate {
            silence_threshold_ms: Some(800),
            voice: Some(" Echo ".to_string()),
            speed: Some(9.0),
            partial_interval_ms: Some(0),
            transcription_engine: Some("whisper-api".to_string()),
            ..SessionUpdate::default()
        }))
        .await
        .unwrap();
    let seen =
        events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Configured { .. })).await;
    let Some(ServerEvent::Configured { settings }) = seen.last() else {
        unreachable!()
    };
    assert_eq!(settings.silence_threshold_ms, 800);
    assert_eq!(settings.voice, "echo");
    assert!((settings.speed - 4.0).abs() < f32::EPSILON);
    assert_eq!(settings.partial_interval_ms, None);
    assert_eq!(settings.transcription_engine.as_deref(), Some("whisper-api"));
}

#[tokio::test]
async fn test_partial_transcripts_while_listening() {
    let stt = FakeTranscriber::new("whisper-local", "so far");
    let ctx = context(test_config(), &Backends::new(), vec![transcriber(&stt)]).await;
    let mut handle = ctx.sessions.open(None).await.unwrap();

    handle
        .inbound
        .send(SessionInput::Configure(SessionUpdate {
            partial_interval_ms: Some(200),
            ..SessionUpdate::default()
        }))
        .await
        .unwrap();
    send_all(&handle.inbound, (0..3).map(|_| audio(speech_frame()))).await;

    let seen = events_until(&mut handle.outbound, |e| {
        matches!(e, ServerEvent::Transcription { is_final: false, .. })
    })
    .await;
    assert!(!seen.iter().any(|e| is_state(e, SessionState::Thinking)));
}

#[tokio::test]
async fn test_disconnect_closes_and_deregisters() {
    let ctx = context(test_config(), &Backends::new(), Vec::new()).await;
    let handle = ctx.sessions.open(None).await.unwrap();
    assert_eq!(ctx.sessions.len().await, 1);

    let mut outbound = handle.outbound;
    drop(handle.inbound);
    events_until(&mut outbound, |e| matches!(e, ServerEvent::Closed)).await;

    handle.task.await.unwrap();
    assert!(ctx.sessions.is_empty().await);
}

#[tokio::test]
async fn test_end_by_id_and_duplicate_ids() {
    let ctx = context(test_config(), &Backends::new(), Vec::new()).await;
    let id = Uuid::new_v4();
    let mut handle = ctx.sessions.open(Some(id)).await.unwrap();
    assert_eq!(handle.id, id);

    let err = tokio_test::assert_err!(ctx.sessions.open(Some(id)).await);
    assert_eq!(err.kind(), "invalid_input");
    assert_eq!(ctx.sessions.list().await[0].id, id);

    ctx.sessions.end(id).await.unwrap();
    events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Closed)).await;
    handle.task.await.unwrap();

    let err = ctx.sessions.end(id).await.unwrap_err();
    assert_eq!(err.kind(), "session_not_found");
}

#[tokio::test]
async fn test_disconnect_mid_thinking_cancels_call() {
    let stt = FakeTranscriber::slow("whisper-local", "never heard", Duration::from_secs(30));
    let backends = Backends::new();
    let ctx = context(test_config(), &backends, vec![transcriber(&stt)]).await;

    let handle = ctx.sessions.open(None).await.unwrap();
    let mut outbound = handle.outbound;
    let mut inputs = vec![SessionInput::StartAudio];
    inputs.extend((0..4).map(|_| audio(speech_frame())));
    inputs.push(SessionInput::StopAudio);
    send_all(&handle.inbound, inputs).await;
    events_until(&mut outbound, |e| is_state(e, SessionState::Thinking)).await;

    // The transcriber would take 30 s; closing must not wait for it
    drop(handle.inbound);
    let seen = events_until(&mut outbound, |e| matches!(e, ServerEvent::Closed)).await;
    assert!(seen.iter().any(|e| is_state(e, SessionState::Closed)));
    assert!(!seen.iter().any(|e| matches!(e, ServerEvent::Transcription { .. })));

    assert!(handle.task.await.unwrap().is_empty());
    assert!(ctx.sessions.is_empty().await);
    assert_eq!(backends.doubao.call_count(), 0);
}

#[tokio::test]
async fn test_synthesis_exhaustion_reports_error_and_returns_idle() {
    let stt = FakeTranscriber::new("whisper-local", "I enjoy debugging");
    let tts = FakeSynthesizer::failing("espeak");
    let ctx = context(
        test_config(),
        &Backends::new(),
        vec![transcriber(&stt), synthesizer(&tts)],
    )
    .await;

    let mut handle = ctx.sessions.open(None).await.unwrap();
    let mut inputs = vec![SessionInput::StartAudio];
    inputs.extend((0..4).map(|_| audio(speech_frame())));
    inputs.push(SessionInput::StopAudio);
    send_all(&handle.inbound, inputs).await;

    let mut seen =
        events_until(&mut handle.outbound, |e| is_state(e, SessionState::Speaking)).await;
    seen.extend(events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Error { .. })).await);
    let Some(ServerEvent::Error { kind, .. }) = seen.last() else {
        unreachable!()
    };
    assert_eq!(kind, "all_engines_exhausted");
    seen.extend(events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await);
    assert!(!seen.iter().any(|e| matches!(e, ServerEvent::AudioStart { .. })));
    assert_eq!(tts.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    handle.inbound.send(SessionInput::Ping).await.unwrap();
    events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Pong)).await;

    handle.inbound.send(SessionInput::End).await.unwrap();
    events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Closed)).await;
    // The reply was produced, so the turn is kept
    assert_eq!(handle.task.await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_interrupt_while_speaking_ends_stream() {
    let stt = FakeTranscriber::new("whisper-local", "tell me more");
    let tts = FakeSynthesizer::new("espeak", 1000);
    let mut config = test_config();
    config.session.chunk_size = 1;
    let ctx = context(
        config,
        &Backends::new(),
        vec![transcriber(&stt), synthesizer(&tts)],
    )
    .await;

    let mut handle = ctx.sessions.open(None).await.unwrap();
    let mut inputs = vec![SessionInput::StartAudio];
    inputs.extend((0..4).map(|_| audio(speech_frame())));
    inputs.push(SessionInput::StopAudio);
    send_all(&handle.inbound, inputs).await;

    // A thousand chunks cannot all fit in the outbound queue, so streaming stalls
    events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::AudioStart { .. })).await;
    handle.inbound.send(SessionInput::Interrupt).await.unwrap();
    let seen = events_until(&mut handle.outbound, |e| is_state(e, SessionState::Idle)).await;

    let ends: Vec<usize> = seen
        .iter()
        .filter_map(|e| match e {
            ServerEvent::AudioEnd { bytes } => Some(*bytes),
            _ => None,
        })
        .collect();
    let chunks = seen
        .iter()
        .filter(|e| matches!(e, ServerEvent::AudioChunk { .. }))
        .count();
    assert_eq!(ends, vec![chunks]);
    assert!(chunks < 1000);
    assert!(
        position(&seen, |e| matches!(e, ServerEvent::AudioEnd { .. }))
            < position(&seen, |e| is_state(e, SessionState::Idle))
    );
}

#[tokio::test]
async fn test_configure_ignores_zero_timings() {
    let ctx = context(test_config(), &Backends::new(), Vec::new()).await;
    let mut handle = ctx.sessions.open(None).await.unwrap();

    handle
        .inbound
        .send(SessionInput::Configure(SessionUpdate {
            silence_threshold_ms: Some(0),
            min_speech_ms: Some(0),
            max_utterance_ms: Some(0),
            ..SessionUpdate::default()
        }))
        .await
        .unwrap();
    let seen =
        events_until(&mut handle.outbound, |e| matches!(e, ServerEvent::Configured { .. })).await;
    let Some(ServerEvent::Configured { settings }) = seen.last() else {
        unreachable!()
    };
    assert_eq!(settings.silence_threshold_ms, 1500);
    assert_eq!(settings.min_speech_ms, 300);
    assert!(settings.max_utterance_ms > 0);
}
