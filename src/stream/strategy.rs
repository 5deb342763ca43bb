//! Output strategies: per-channel emission policies
//!
//! A strategy consumes dialogue/thinking chunks and decides when outbound
//! frames leave the server:
//!
//! - `text_only` relays chunks as they arrive, no synthesis
//! - `char_stream_tts` relays chunks immediately and fans complete
//!   sentences out to the TTS pool; audio frames land whenever synthesis
//!   finishes, tied back to text by sentence id
//! - `sentence_sync` buffers the whole reply and drains it one sentence
//!   at a time, waiting for the client's playback-completed event between
//!   sentences so bubble and audio stay aligned
//!
//! A "mixed" configuration runs one strategy per channel against the same
//! stream; each arm keeps its own sentence buffer and order counter.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TtsError;
use crate::stream::sentence::SentenceBuffer;
use crate::tts::{TtsPool, TtsRequest};
use crate::types::{ChannelType, ChatMessage, Sentence};

/// Shared wiring every strategy needs
#[derive(Clone)]
pub struct StrategyEnv {
    pub session_id: String,
    pub outbound: mpsc::Sender<ChatMessage>,
    pub cancel: Arc<AtomicBool>,
}

impl StrategyEnv {
    async fn send(&self, msg: ChatMessage) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| anyhow!("outbound channel closed"))
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Synthesis parameters resolved from the user's preferences
#[derive(Clone)]
pub struct TtsSettings {
    pub pool: Arc<TtsPool>,
    pub speaker_id: String,
    pub speed: f32,
    pub format: String,
    /// Per-sentence synthesis deadline
    pub task_timeout: Duration,
}

impl TtsSettings {
    fn request(&self, sentence: &Sentence, cancel: Arc<AtomicBool>) -> TtsRequest {
        TtsRequest {
            session_id: sentence.session_id.clone(),
            sentence_order: sentence.order,
            text: sentence.text.clone(),
            speaker_id: self.speaker_id.clone(),
            speed: self.speed,
            format: self.format.clone(),
            timeout: self.task_timeout,
            cancel,
        }
    }
}

/// Chat-window pacing: re-chunk outgoing text into `chunk_size` characters
/// with `delay_ms` between pieces (0 disables)
#[derive(Debug, Clone, Copy, Default)]
pub struct Pacing {
    pub chunk_size: usize,
    pub delay_ms: u64,
}

/// Rough wall-clock estimate for speaking `text`, used to bound the wait
/// for the client's playback-completed event
pub fn estimate_speech_ms(text: &str, speed: f32) -> u64 {
    const MS_PER_CHAR: u64 = 150;
    let chars = text.chars().count() as u64;
    let base = chars.saturating_mul(MS_PER_CHAR);
    let speed = if speed > 0.1 { speed } else { 1.0 };
    ((base as f32 / speed) as u64).max(1000)
}

/// Policy governing when/what to emit per channel
#[async_trait]
pub trait OutputStrategy: Send {
    /// Consume one chunk of the LLM stream
    async fn process_chunk(&mut self, chunk: &str, thinking: bool) -> Result<()>;

    /// The LLM stream is done; drain whatever the strategy is holding and
    /// emit the terminal `streamComplete` marker for its channel(s)
    async fn on_stream_complete(&mut self) -> Result<()>;
}

// ─── text_only ───────────────────────────────────────────────

pub struct TextOnlyStrategy {
    env: StrategyEnv,
    channel: ChannelType,
    pacing: Pacing,
}

impl TextOnlyStrategy {
    pub fn new(env: StrategyEnv, channel: ChannelType, pacing: Pacing) -> Self {
        Self {
            env,
            channel,
            pacing,
        }
    }
}

#[async_trait]
impl OutputStrategy for TextOnlyStrategy {
    async fn process_chunk(&mut self, chunk: &str, thinking: bool) -> Result<()> {
        if thinking {
            return self
                .env
                .send(ChatMessage::thinking_chunk(
                    &self.env.session_id,
                    self.channel,
                    chunk,
                ))
                .await;
        }
        emit_text_paced(&self.env, self.channel, chunk, self.pacing).await
    }

    async fn on_stream_complete(&mut self) -> Result<()> {
        self.env
            .send(ChatMessage::stream_end(&self.env.session_id, self.channel))
            .await
    }
}

/// Emit a dialogue chunk, optionally re-chunked for display pacing
async fn emit_text_paced(
    env: &StrategyEnv,
    channel: ChannelType,
    chunk: &str,
    pacing: Pacing,
) -> Result<()> {
    if pacing.chunk_size == 0 || chunk.chars().count() <= pacing.chunk_size {
        return env
            .send(ChatMessage::text_chunk(&env.session_id, channel, chunk))
            .await;
    }

    let chars: Vec<char> = chunk.chars().collect();
    for (i, piece) in chars.chunks(pacing.chunk_size).enumerate() {
        if i > 0 && pacing.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(pacing.delay_ms)).await;
        }
        let piece: String = piece.iter().collect();
        env.send(ChatMessage::text_chunk(&env.session_id, channel, &piece))
            .await?;
    }
    Ok(())
}

// ─── char_stream_tts ─────────────────────────────────────────

pub struct CharStreamTtsStrategy {
    env: StrategyEnv,
    channel: ChannelType,
    pacing: Pacing,
    tts: TtsSettings,
    buffer: SentenceBuffer,
    next_order: u32,
    /// Audio forwarder tasks for this turn, with the sentence each owns
    pending: Vec<(Sentence, JoinHandle<()>)>,
    /// Deadline for the whole drain phase
    drain_timeout: Duration,
}

impl CharStreamTtsStrategy {
    pub fn new(
        env: StrategyEnv,
        channel: ChannelType,
        pacing: Pacing,
        tts: TtsSettings,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            env,
            channel,
            pacing,
            tts,
            buffer: SentenceBuffer::new(),
            next_order: 0,
            pending: Vec::new(),
            drain_timeout,
        }
    }

    /// Hand a complete sentence to the pool; audio is forwarded to the
    /// client as soon as synthesis resolves, out of order with text
    fn enqueue_sentence(&mut self, text: String) {
        let sentence = Sentence {
            text,
            order: self.next_order,
            session_id: self.env.session_id.clone(),
        };
        self.next_order += 1;

        let rx = self
            .tts
            .pool
            .submit(self.tts.request(&sentence, self.env.cancel.clone()));

        let env = self.env.clone();
        let channel = self.channel;
        let format = self.tts.format.clone();
        let forwarded = sentence.clone();
        let handle = tokio::spawn(async move {
            let msg = match rx.await {
                Ok(Ok(audio)) => ChatMessage::sentence_audio(
                    &env.session_id,
                    channel,
                    &forwarded,
                    audio,
                    &format,
                ),
                Ok(Err(TtsError::Cancelled)) => return,
                Ok(Err(e)) => {
                    warn!(
                        "TTS failed for sentence {} of session {}: {e}",
                        forwarded.order, env.session_id
                    );
                    ChatMessage::tts_error(&env.session_id, channel, &forwarded, &e.to_string())
                }
                Err(_) => {
                    ChatMessage::tts_error(&env.session_id, channel, &forwarded, "tts pool dropped")
                }
            };
            let _ = env.outbound.send(msg).await;
        });

        self.pending.push((sentence, handle));
    }
}

#[async_trait]
impl OutputStrategy for CharStreamTtsStrategy {
    async fn process_chunk(&mut self, chunk: &str, thinking: bool) -> Result<()> {
        if thinking {
            return self
                .env
                .send(ChatMessage::thinking_chunk(
                    &self.env.session_id,
                    self.channel,
                    chunk,
                ))
                .await;
        }

        emit_text_paced(&self.env, self.channel, chunk, self.pacing).await?;

        for sentence in self.buffer.push(chunk) {
            self.enqueue_sentence(sentence);
        }
        Ok(())
    }

    async fn on_stream_complete(&mut self) -> Result<()> {
        if let Some(tail) = self.buffer.finish() {
            if !self.env.cancelled() {
                self.enqueue_sentence(tail);
            }
        }

        // Wait for the in-flight syntheses of this turn, bounded by the
        // per-turn deadline; stragglers surface as tts_error
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        for (sentence, mut handle) in self.pending.drain(..) {
            if self.env.cancelled() {
                handle.abort();
                continue;
            }
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    // Abort the forwarder so a late frame can never land
                    // after the terminal marker
                    handle.abort();
                    let msg = ChatMessage::tts_error(
                        &self.env.session_id,
                        self.channel,
                        &sentence,
                        "synthesis did not finish before the turn deadline",
                    );
                    let _ = self.env.outbound.send(msg).await;
                }
            }
        }

        self.env
            .send(ChatMessage::stream_end(&self.env.session_id, self.channel))
            .await
    }
}

// ─── sentence_sync ───────────────────────────────────────────

pub struct SentenceSyncStrategy {
    env: StrategyEnv,
    channel: ChannelType,
    tts: TtsSettings,
    buffer: SentenceBuffer,
    sentences: Vec<Sentence>,
    next_order: u32,
    /// Client playback-completed events, routed in by the session
    playback_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Grace period added to the speech-duration estimate
    bubble_timeout: Duration,
}

impl SentenceSyncStrategy {
    pub fn new(
        env: StrategyEnv,
        channel: ChannelType,
        tts: TtsSettings,
        playback_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
        bubble_timeout: Duration,
    ) -> Self {
        Self {
            env,
            channel,
            tts,
            buffer: SentenceBuffer::new(),
            sentences: Vec::new(),
            next_order: 0,
            playback_rx,
            bubble_timeout,
        }
    }

    fn buffer_sentence(&mut self, text: String) {
        self.sentences.push(Sentence {
            text,
            order: self.next_order,
            session_id: self.env.session_id.clone(),
        });
        self.next_order += 1;
    }

    /// Block until the client confirms playback of `sentence_id`, up to
    /// `wait`. Stale ids from earlier sentences are discarded.
    async fn wait_for_playback(&self, sentence_id: &str, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        let mut rx = self.playback_rx.lock().await;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(id)) if id == sentence_id => return,
                Ok(Some(stale)) => {
                    debug!("Discarding stale playback event {stale}");
                }
                Ok(None) => return,
                Err(_) => {
                    warn!(
                        "No playback confirmation for {sentence_id} within {}ms, advancing",
                        wait.as_millis()
                    );
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl OutputStrategy for SentenceSyncStrategy {
    async fn process_chunk(&mut self, chunk: &str, thinking: bool) -> Result<()> {
        // Nothing leaves the server during streaming; the avatar track
        // only shows confirmed sentences, and never thinking content
        if thinking {
            return Ok(());
        }
        for sentence in self.buffer.push(chunk) {
            self.buffer_sentence(sentence);
        }
        Ok(())
    }

    async fn on_stream_complete(&mut self) -> Result<()> {
        if let Some(tail) = self.buffer.finish() {
            self.buffer_sentence(tail);
        }

        for sentence in std::mem::take(&mut self.sentences) {
            if self.env.cancelled() {
                break;
            }

            self.env
                .send(ChatMessage::sentence_text(
                    &self.env.session_id,
                    self.channel,
                    &sentence,
                ))
                .await?;

            let rx = self
                .tts
                .pool
                .submit(self.tts.request(&sentence, self.env.cancel.clone()));

            match rx.await {
                Ok(Ok(audio)) => {
                    let speech_ms = estimate_speech_ms(&sentence.text, self.tts.speed);
                    self.env
                        .send(ChatMessage::sentence_audio(
                            &self.env.session_id,
                            self.channel,
                            &sentence,
                            audio,
                            &self.tts.format,
                        ))
                        .await?;

                    let wait = self.bubble_timeout + Duration::from_millis(speech_ms);
                    self.wait_for_playback(&sentence.id_on(self.channel), wait)
                        .await;
                }
                Ok(Err(TtsError::Cancelled)) => break,
                Ok(Err(e)) => {
                    // Local failure: report it and advance immediately so a
                    // dead TTS backend never freezes the bubble track
                    self.env
                        .send(ChatMessage::tts_error(
                            &self.env.session_id,
                            self.channel,
                            &sentence,
                            &e.to_string(),
                        ))
                        .await?;
                }
                Err(_) => {
                    self.env
                        .send(ChatMessage::tts_error(
                            &self.env.session_id,
                            self.channel,
                            &sentence,
                            "tts pool dropped",
                        ))
                        .await?;
                }
            }
        }

        self.env
            .send(ChatMessage::stream_end(&self.env.session_id, self.channel))
            .await
    }
}

// ─── mixed (one strategy per channel) ────────────────────────

pub struct MixedStrategy {
    chat_window: Box<dyn OutputStrategy>,
    live2d: Box<dyn OutputStrategy>,
}

impl MixedStrategy {
    pub fn new(chat_window: Box<dyn OutputStrategy>, live2d: Box<dyn OutputStrategy>) -> Self {
        Self { chat_window, live2d }
    }
}

#[async_trait]
impl OutputStrategy for MixedStrategy {
    async fn process_chunk(&mut self, chunk: &str, thinking: bool) -> Result<()> {
        self.chat_window.process_chunk(chunk, thinking).await?;
        self.live2d.process_chunk(chunk, thinking).await
    }

    async fn on_stream_complete(&mut self) -> Result<()> {
        // The chat-window drain (awaiting TTS futures) and the avatar
        // drain (client-paced serial loop) run concurrently; each emits
        // the terminal marker for its own channel
        let (chat, avatar) = tokio::join!(
            self.chat_window.on_stream_complete(),
            self.live2d.on_stream_complete()
        );
        chat?;
        avatar
    }
}
