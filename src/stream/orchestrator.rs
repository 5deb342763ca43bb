//! Per-turn stream orchestrator
//!
//! Drives one chat turn end to end: context assembly, the LLM stream,
//! think filtering, strategy dispatch, the drain phase, and persistence.
//! Turn phases: Building -> Streaming -> Draining -> Done | Cancelled |
//! Failed. At most one turn runs per session; the session's turn lock
//! queues latecomers and `interrupt=true` cancels the one in flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::web_search::WebSearchFacade;
use crate::context::{build_context, ContextInput};
use crate::error::TurnError;
use crate::knowledge::{memory, KnowledgeFacade};
use crate::llm::{LlmAdapter, LlmRequest, StreamChunk};
use crate::prefs::OutputMode;
use crate::session::history::HistoryEntry;
use crate::session::{history::HistoryStore, Session};
use crate::stream::strategy::{
    CharStreamTtsStrategy, MixedStrategy, OutputStrategy, Pacing, SentenceSyncStrategy,
    StrategyEnv, TextOnlyStrategy, TtsSettings,
};
use crate::stream::think_filter::{StreamMode, ThinkFilter};
use crate::tts::TtsPool;
use crate::types::{ChannelType, ChatMessage};

/// Long-lived collaborators, constructed once at startup and passed as an
/// explicit bundle
pub struct TurnDeps {
    pub llm: Arc<dyn LlmAdapter>,
    pub tts_pool: Arc<TtsPool>,
    pub history: Arc<HistoryStore>,
    pub knowledge: Arc<KnowledgeFacade>,
    pub web_search: Arc<WebSearchFacade>,
    pub config: Arc<Config>,
}

/// One inbound user turn
pub struct TurnRequest {
    pub text: String,
    pub persona_name: Option<String>,
}

/// Final state of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Done,
    Cancelled,
    Failed,
}

pub struct StreamOrchestrator {
    deps: Arc<TurnDeps>,
}

impl StreamOrchestrator {
    pub fn new(deps: Arc<TurnDeps>) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &Arc<TurnDeps> {
        &self.deps
    }

    /// Run one turn to completion. Queues behind any turn already in
    /// flight for this session.
    pub async fn run_turn(
        &self,
        session: Arc<Session>,
        request: TurnRequest,
        outbound: mpsc::Sender<ChatMessage>,
    ) -> TurnOutcome {
        let turn_lock = session.turn_lock.clone();
        let _turn_guard = turn_lock.lock().await;
        session.reset_cancel();

        debug!("Turn for session {}: Building", session.id);

        if let Some(name) = &request.persona_name {
            *session.persona_name.lock().await = name.clone();
        }

        let built = match self.build(&session, &request).await {
            Ok(built) => built,
            Err(e) => {
                error!("Context building failed for {}: {e}", session.id);
                let _ = outbound
                    .send(ChatMessage::error(
                        &session.id,
                        ChannelType::ChatWindow,
                        e.code(),
                        &e.to_string(),
                    ))
                    .await;
                return TurnOutcome::Failed;
            }
        };

        debug!("Turn for session {}: Streaming", session.id);
        let outcome = self
            .stream(&session, &request, built, outbound.clone())
            .await;

        if outcome == TurnOutcome::Cancelled {
            info!("Turn cancelled for session {}", session.id);
        }
        outcome
    }

    /// Assemble the budgeted prompt for this turn
    async fn build(
        &self,
        session: &Session,
        request: &TurnRequest,
    ) -> Result<Vec<crate::llm::LlmMessage>, TurnError> {
        if request.text.trim().is_empty() {
            return Err(TurnError::InvalidRequest("empty message".into()));
        }

        let persona_name = session.persona_name.lock().await.clone();
        let system_prompt = self
            .deps
            .knowledge
            .system_prompt(&persona_name, &self.deps.config.ai.system_prompt)
            .await;

        let web_block = if session.prefs.web_search.enabled {
            self.deps
                .web_search
                .block_for(
                    self.deps.llm.as_ref(),
                    &self.deps.config.ollama.model,
                    &request.text,
                )
                .await
        } else {
            None
        };

        let knowledge_block = self
            .deps
            .knowledge
            .knowledge_block(&session.id, &request.text)
            .await;

        let history = session.history_snapshot().await;

        let built = build_context(&ContextInput {
            system_prompt: &system_prompt,
            web_search_block: web_block.as_deref(),
            knowledge_block: knowledge_block.as_deref(),
            history: &history,
            user_message: &request.text,
            max_tokens: self.deps.config.system.max_context_tokens,
        });
        if built.dropped_history > 0 {
            debug!(
                "Dropped {} oldest history messages to fit the context cap",
                built.dropped_history
            );
        }
        Ok(built.messages)
    }

    /// The Streaming and Draining phases
    async fn stream(
        &self,
        session: &Arc<Session>,
        request: &TurnRequest,
        messages: Vec<crate::llm::LlmMessage>,
        outbound: mpsc::Sender<ChatMessage>,
    ) -> TurnOutcome {
        let prefs = &session.prefs;
        let mut channels: Vec<ChannelType> =
            prefs.active_channels().iter().map(|(c, _)| *c).collect();
        if channels.is_empty() {
            // Degenerate config: fall back to a bare chat window
            channels.push(ChannelType::ChatWindow);
        }
        let mut strategy = self.build_strategy(session, outbound.clone());

        let llm_req = LlmRequest {
            messages,
            model: if prefs.llm.model.is_empty() {
                self.deps.config.ollama.model.clone()
            } else {
                prefs.llm.model.clone()
            },
            temperature: Some(if prefs.llm.temperature > 0.0 {
                prefs.llm.temperature
            } else {
                self.deps.config.ollama.temperature
            }),
            max_tokens: Some(if prefs.llm.max_tokens > 0 {
                prefs.llm.max_tokens
            } else {
                self.deps.config.ollama.max_tokens
            }),
            stream: true,
            options: None,
        };

        let (tx, mut rx) = mpsc::channel::<StreamChunk>(64);
        let llm = self.deps.llm.clone();
        let cancel = session.cancel.clone();
        let llm_task =
            tokio::spawn(async move { llm.generate_stream(&llm_req, tx, cancel).await });

        let mut filter = ThinkFilter::new();
        let mut dialogue_text = String::new();
        let mut saw_done = false;

        let mut cancelled_mid_stream = false;
        while let Some(chunk) = rx.recv().await {
            // Cancellation is polled before every dispatch
            if session.is_cancelled() {
                cancelled_mid_stream = true;
                break;
            }

            if chunk.done {
                saw_done = true;
                break;
            }

            for (text, mode) in filter.push(&chunk.content) {
                let thinking = mode == StreamMode::Thinking;
                if !thinking {
                    dialogue_text.push_str(&text);
                }
                if let Err(e) = strategy.process_chunk(&text, thinking).await {
                    // The client is gone; treat like a cancellation
                    debug!("Dispatch stopped for {}: {e}", session.id);
                    session.request_cancel();
                    llm_task.abort();
                    return TurnOutcome::Cancelled;
                }
            }
        }
        drop(rx);

        if cancelled_mid_stream {
            llm_task.abort();
            self.emit_terminals(session, &channels, &outbound).await;
            return TurnOutcome::Cancelled;
        }

        if !saw_done {
            // The stream ended without a done marker: adapter error or
            // cancellation inside the adapter
            match llm_task.await {
                Ok(Ok(())) if session.is_cancelled() => {
                    self.emit_terminals(session, &channels, &outbound).await;
                    return TurnOutcome::Cancelled;
                }
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("LLM stream failed for {}: {e}", session.id);
                    let turn_err: TurnError = e.into();
                    let _ = outbound
                        .send(ChatMessage::error(
                            &session.id,
                            ChannelType::ChatWindow,
                            turn_err.code(),
                            &turn_err.to_string(),
                        ))
                        .await;
                    self.emit_terminals(session, &channels, &outbound).await;
                    return TurnOutcome::Failed;
                }
                Err(e) => {
                    error!("LLM task panicked for {}: {e}", session.id);
                    self.emit_terminals(session, &channels, &outbound).await;
                    return TurnOutcome::Failed;
                }
            }
        }

        debug!("Turn for session {}: Draining", session.id);

        // Flush a partial tag held by the filter as literal dialogue
        if let Some((tail, mode)) = filter.finish() {
            let thinking = mode == StreamMode::Thinking;
            if !thinking {
                dialogue_text.push_str(&tail);
            }
            if strategy.process_chunk(&tail, thinking).await.is_err() {
                session.request_cancel();
                return TurnOutcome::Cancelled;
            }
        }

        if session.is_cancelled() {
            self.emit_terminals(session, &channels, &outbound).await;
            return TurnOutcome::Cancelled;
        }

        if let Err(e) = strategy.on_stream_complete().await {
            debug!("Drain aborted for {}: {e}", session.id);
            return TurnOutcome::Cancelled;
        }

        self.finish_turn(session, &request.text, dialogue_text).await;
        TurnOutcome::Done
    }

    /// Emit the terminal marker on every active channel (cancellation and
    /// failure paths; the strategies handle the happy path themselves)
    async fn emit_terminals(
        &self,
        session: &Session,
        channels: &[ChannelType],
        outbound: &mpsc::Sender<ChatMessage>,
    ) {
        for channel in channels {
            let _ = outbound
                .send(ChatMessage::stream_end(&session.id, *channel))
                .await;
        }
    }

    /// Persist the exchange and kick off background memory extraction
    async fn finish_turn(&self, session: &Arc<Session>, user_text: &str, assistant_text: String) {
        session.remember_turn(user_text, &assistant_text).await;

        let entries = [
            HistoryEntry::user(user_text),
            HistoryEntry::assistant(&assistant_text),
        ];
        if let Err(e) = self.deps.history.append(&session.id, &entries).await {
            // Best-effort persistence: the turn already succeeded
            warn!("History write failed for {}: {e}", session.id);
        }

        let deps = self.deps.clone();
        let session_id = session.id.clone();
        let user_text = user_text.to_string();
        tokio::spawn(async move {
            let _ = memory::extract_from_turn(
                deps.llm.as_ref(),
                &deps.config.ollama.model,
                &deps.knowledge.memory,
                &session_id,
                &user_text,
                &assistant_text,
            )
            .await;
        });
    }

    /// Assemble the strategy arms this session's preferences ask for
    fn build_strategy(
        &self,
        session: &Arc<Session>,
        outbound: mpsc::Sender<ChatMessage>,
    ) -> Box<dyn OutputStrategy> {
        let prefs = &session.prefs;
        let env = StrategyEnv {
            session_id: session.id.clone(),
            outbound,
            cancel: session.cancel.clone(),
        };

        let pacing = if prefs.streaming.chunk_size > 0 {
            Pacing {
                chunk_size: prefs.streaming.chunk_size,
                delay_ms: prefs.streaming.delay_ms,
            }
        } else {
            Pacing {
                chunk_size: self.deps.config.ai.streaming_chunk_size,
                delay_ms: self.deps.config.ai.streaming_delay_ms,
            }
        };
        let timeouts = &self.deps.config.python.timeout;

        let chat_arm: Option<Box<dyn OutputStrategy>> = if prefs.output_channel.chat_window.enabled
        {
            let cw = &prefs.output_channel.chat_window;
            if cw.mode == OutputMode::CharStreamTts && cw.auto_tts {
                let tts = TtsSettings {
                    pool: self.deps.tts_pool.clone(),
                    speaker_id: speaker_or_default(&cw.speaker_id, &prefs.tts.preferred_speaker),
                    speed: prefs.tts.speed,
                    format: prefs.tts.audio_format.clone(),
                    task_timeout: Duration::from_secs(timeouts.tts_task_seconds),
                };
                Some(Box::new(CharStreamTtsStrategy::new(
                    env.clone(),
                    ChannelType::ChatWindow,
                    pacing,
                    tts,
                    Duration::from_secs(timeouts.tts_task_seconds + 5),
                )))
            } else {
                Some(Box::new(TextOnlyStrategy::new(
                    env.clone(),
                    ChannelType::ChatWindow,
                    pacing,
                )))
            }
        } else {
            None
        };

        let avatar_arm: Option<Box<dyn OutputStrategy>> = if prefs.output_channel.live2d.enabled {
            let l2d = &prefs.output_channel.live2d;
            let tts = TtsSettings {
                pool: self.deps.tts_pool.clone(),
                speaker_id: speaker_or_default(&l2d.speaker_id, &prefs.tts.preferred_speaker),
                speed: l2d.speed,
                format: prefs.tts.audio_format.clone(),
                task_timeout: Duration::from_secs(timeouts.live2d_tts_task_seconds),
            };
            Some(Box::new(SentenceSyncStrategy::new(
                env.clone(),
                ChannelType::Live2d,
                tts,
                session.playback_rx.clone(),
                Duration::from_millis(l2d.bubble_timeout),
            )))
        } else {
            None
        };

        match (chat_arm, avatar_arm) {
            (Some(chat), Some(avatar)) => Box::new(MixedStrategy::new(chat, avatar)),
            (Some(chat), None) => chat,
            (None, Some(avatar)) => avatar,
            (None, None) => Box::new(TextOnlyStrategy::new(env, ChannelType::ChatWindow, pacing)),
        }
    }
}

fn speaker_or_default(channel_speaker: &str, preferred: &str) -> String {
    if channel_speaker.is_empty() {
        preferred.to_string()
    } else {
        channel_speaker.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::web_search::WebSearchFacade;
    use crate::error::LlmError;
    use crate::knowledge::{MemoryStore, PersonaStore, WorldBook};
    use crate::prefs::UserPreferences;
    use crate::session::SessionManager;
    use crate::tts::{TtsBackend, TtsPool};
    use crate::types::MessageType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted LLM: emits the given chunks, then done
    struct ScriptedLlm {
        chunks: Vec<&'static str>,
        /// Stop emitting after this many chunks and fail (usize::MAX = never)
        fail_after: usize,
        /// Gap between chunks so other tasks get scheduled
        delay_ms: u64,
        emitted: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(chunks: Vec<&'static str>) -> Self {
            Self {
                chunks,
                fail_after: usize::MAX,
                delay_ms: 0,
                emitted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmAdapter for ScriptedLlm {
        async fn generate(&self, _req: &LlmRequest) -> Result<String, LlmError> {
            Ok("no".to_string())
        }

        async fn generate_stream(
            &self,
            _req: &LlmRequest,
            tx: mpsc::Sender<StreamChunk>,
            cancel: Arc<AtomicBool>,
        ) -> Result<(), LlmError> {
            for (i, chunk) in self.chunks.iter().enumerate() {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(());
                }
                if i >= self.fail_after {
                    return Err(LlmError::Upstream {
                        status: 502,
                        body: "backend died".into(),
                    });
                }
                self.emitted.fetch_add(1, Ordering::SeqCst);
                if tx
                    .send(StreamChunk {
                        content: chunk.to_string(),
                        done: false,
                        chunk_index: i as u64,
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                if self.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
            let _ = tx
                .send(StreamChunk {
                    content: String::new(),
                    done: true,
                    chunk_index: self.chunks.len() as u64,
                })
                .await;
            Ok(())
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl TtsBackend for EchoBackend {
        async fn synthesize(
            &self,
            text: &str,
            _speaker_id: &str,
            _speed: f32,
            _format: &str,
        ) -> Result<Vec<u8>, crate::error::TtsError> {
            Ok(text.as_bytes().to_vec())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        orchestrator: StreamOrchestrator,
        sessions: Arc<SessionManager>,
    }

    fn harness(llm: Arc<dyn LlmAdapter>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::default());
        let history = Arc::new(HistoryStore::new(dir.path().join("sessions")));
        let knowledge = Arc::new(KnowledgeFacade::new(
            Arc::new(PersonaStore::new(dir.path().join("personas"))),
            Arc::new(MemoryStore::new(dir.path().join("memories"))),
            Arc::new(WorldBook::new(dir.path().join("memories/world_book.json"))),
        ));
        let web_search = Arc::new(
            WebSearchFacade::new(
                config.web_search.clone(),
                config.ai.web_search_decision.clone(),
            )
            .unwrap(),
        );
        let deps = Arc::new(TurnDeps {
            llm,
            tts_pool: Arc::new(TtsPool::new(Arc::new(EchoBackend), 3)),
            history: history.clone(),
            knowledge,
            web_search,
            config,
        });
        Harness {
            _dir: dir,
            orchestrator: StreamOrchestrator::new(deps),
            sessions: Arc::new(SessionManager::new(history, Duration::from_secs(60))),
        }
    }

    async fn run(
        harness: &Harness,
        prefs: UserPreferences,
        text: &str,
    ) -> (TurnOutcome, Vec<ChatMessage>) {
        let session = harness.sessions.get_or_create("s1", "default", prefs).await;
        let (tx, mut rx) = mpsc::channel::<ChatMessage>(1024);
        let outcome = harness
            .orchestrator
            .run_turn(
                session,
                TurnRequest {
                    text: text.to_string(),
                    persona_name: None,
                },
                tx,
            )
            .await;
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        (outcome, msgs)
    }

    #[tokio::test]
    async fn test_full_turn_char_stream() {
        let llm = Arc::new(ScriptedLlm::new(vec!["你好，", "很高兴见到你。", "再见。"]));
        let harness = harness(llm);
        let (outcome, msgs) = run(&harness, UserPreferences::default(), "hi").await;

        assert_eq!(outcome, TurnOutcome::Done);
        // Exactly one terminal marker, and it is last
        assert_eq!(msgs.iter().filter(|m| m.stream_complete).count(), 1);
        assert!(msgs.last().unwrap().stream_complete);
        // Audio arrived for both sentences
        let audio: Vec<_> = msgs.iter().filter(|m| m.kind == MessageType::Audio).collect();
        assert_eq!(audio.len(), 2);

        // The assistant reply was persisted without thinking content
        let persisted = harness.orchestrator.deps().history.load("s1").await.unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1].content, "你好，很高兴见到你。再见。");
    }

    #[tokio::test]
    async fn test_thinking_never_persisted_or_spoken() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "hi <thi",
            "nk>secret</think> there.\n",
        ]));
        let harness = harness(llm);
        let (outcome, msgs) = run(&harness, UserPreferences::default(), "hello").await;

        assert_eq!(outcome, TurnOutcome::Done);
        let thinking: Vec<_> = msgs
            .iter()
            .filter(|m| m.kind == MessageType::Thinking)
            .collect();
        assert_eq!(thinking.len(), 1);
        assert_eq!(thinking[0].thinking_content.as_deref(), Some("secret"));

        // Audio only carries the dialogue sentence
        let audio: Vec<_> = msgs.iter().filter(|m| m.kind == MessageType::Audio).collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].content, "hi  there.");

        let persisted = harness.orchestrator.deps().history.load("s1").await.unwrap();
        assert_eq!(persisted[1].content, "hi  there.\n");
    }

    #[tokio::test]
    async fn test_llm_failure_emits_error_and_terminal() {
        let mut llm = ScriptedLlm::new(vec!["a", "b", "c"]);
        llm.fail_after = 1;
        let harness = harness(Arc::new(llm));
        let (outcome, msgs) = run(&harness, UserPreferences::default(), "hello").await;

        assert_eq!(outcome, TurnOutcome::Failed);
        assert!(msgs.iter().any(|m| m.kind == MessageType::Error));
        assert!(msgs.last().unwrap().stream_complete);
        // Nothing was persisted
        let persisted = harness.orchestrator.deps().history.load("s1").await.unwrap();
        assert!(persisted.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_promptly() {
        // Seed scenario 5: cancel after the third chunk
        let mut scripted = ScriptedLlm::new(vec!["one ", "two ", "three ", "four ", "five."]);
        scripted.delay_ms = 10;
        let llm = Arc::new(scripted);
        let emitted_handle = llm.clone();
        let harness = harness(llm);
        let session = harness
            .sessions
            .get_or_create("s1", "default", UserPreferences::default())
            .await;

        let (tx, mut rx) = mpsc::channel::<ChatMessage>(1024);
        let watcher = session.clone();
        tokio::spawn(async move {
            let mut seen = 0;
            while let Some(msg) = rx.recv().await {
                if msg.kind == MessageType::Text && !msg.stream_complete {
                    seen += 1;
                    if seen == 3 {
                        watcher.request_cancel();
                    }
                }
            }
        });

        let outcome = harness
            .orchestrator
            .run_turn(
                session,
                TurnRequest {
                    text: "go".to_string(),
                    persona_name: None,
                },
                tx,
            )
            .await;

        assert_eq!(outcome, TurnOutcome::Cancelled);
        // The adapter stopped within one chunk of the cancel
        assert!(emitted_handle.emitted.load(Ordering::SeqCst) <= 4);
        // The partial reply was not persisted
        let persisted = harness.orchestrator.deps().history.load("s1").await.unwrap();
        assert!(persisted.is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_fails_building() {
        let llm = Arc::new(ScriptedLlm::new(vec!["x"]));
        let harness = harness(llm);
        let (outcome, msgs) = run(&harness, UserPreferences::default(), "   ").await;
        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageType::Error);
        assert_eq!(
            msgs[0].metadata.get("errorCode").map(String::as_str),
            Some("invalid_request")
        );
    }

    #[tokio::test]
    async fn test_mixed_channels_have_independent_terminals() {
        let llm = Arc::new(ScriptedLlm::new(vec!["A. B."]));
        let harness = harness(llm);
        let mut prefs = UserPreferences::default();
        prefs.output_channel.live2d.enabled = true;
        prefs.output_channel.live2d.bubble_timeout = 10;

        let session = harness.sessions.get_or_create("s1", "default", prefs).await;
        let (tx, mut rx) = mpsc::channel::<ChatMessage>(1024);

        // Confirm avatar playback instantly so the drain loop advances
        let playback = session.playback_tx.clone();
        let collector = tokio::spawn(async move {
            let mut msgs = Vec::new();
            let mut terminals = 0;
            while let Some(msg) = rx.recv().await {
                if msg.kind == MessageType::Audio
                    && msg.channel_type == ChannelType::Live2d
                {
                    let _ = playback.send(msg.sentence_id.clone().unwrap());
                }
                if msg.stream_complete {
                    terminals += 1;
                }
                msgs.push(msg);
                if terminals == 2 {
                    break;
                }
            }
            msgs
        });

        let outcome = harness
            .orchestrator
            .run_turn(
                session,
                TurnRequest {
                    text: "hi".to_string(),
                    persona_name: None,
                },
                tx,
            )
            .await;
        assert_eq!(outcome, TurnOutcome::Done);

        let msgs = collector.await.unwrap();
        for channel in [ChannelType::ChatWindow, ChannelType::Live2d] {
            let on_channel: Vec<_> = msgs.iter().filter(|m| m.channel_type == channel).collect();
            assert_eq!(
                on_channel.iter().filter(|m| m.stream_complete).count(),
                1,
                "exactly one terminal on {channel:?}"
            );
            assert!(on_channel.last().unwrap().stream_complete);
        }

        // Live2d ordering: everything for order N precedes order N+1
        let live2d_orders: Vec<_> = msgs
            .iter()
            .filter(|m| m.channel_type == ChannelType::Live2d)
            .filter_map(|m| m.sentence_order)
            .collect();
        let mut sorted = live2d_orders.clone();
        sorted.sort();
        assert_eq!(live2d_orders, sorted);
    }
}
