//! End-to-end turn pipeline tests against scripted LLM and TTS fakes

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use companion_chat::config::Config;
use companion_chat::context::web_search::WebSearchFacade;
use companion_chat::error::{LlmError, TtsError};
use companion_chat::knowledge::{KnowledgeFacade, MemoryStore, PersonaStore, WorldBook};
use companion_chat::llm::{LlmAdapter, LlmRequest, StreamChunk};
use companion_chat::session::history::HistoryStore;
use companion_chat::tts::{TtsBackend, TtsPool};
use companion_chat::{
    ChannelType, ChatMessage, MessageType, SessionManager, StreamOrchestrator, TurnDeps,
    TurnOutcome, TurnRequest, UserPreferences,
};

/// LLM fake that streams a fixed chunk script
struct ScriptedLlm {
    chunks: Vec<String>,
}

impl ScriptedLlm {
    fn new(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|s| s.to_string()).collect(),
        })
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
            if tx
                .send(StreamChunk {
                    content: chunk.clone(),
                    done: false,
                    chunk_index: i as u64,
                })
                .await
                .is_err()
            {
                return Ok(());
            }
            tokio::task::yield_now().await;
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

/// TTS fake that fails for sentences containing a marker substring
struct MarkedTts {
    fail_marker: Option<&'static str>,
}

#[async_trait]
impl TtsBackend for MarkedTts {
    async fn synthesize(
        &self,
        text: &str,
        _speaker_id: &str,
        _speed: f32,
        _format: &str,
    ) -> Result<Vec<u8>, TtsError> {
        if let Some(marker) = self.fail_marker {
            if text.contains(marker) {
                return Err(TtsError::Request("synthesis rejected".into()));
            }
        }
        Ok(text.as_bytes().to_vec())
    }
}

struct Rig {
    _dir: tempfile::TempDir,
    orchestrator: StreamOrchestrator,
    sessions: Arc<SessionManager>,
    history: Arc<HistoryStore>,
}

fn rig(llm: Arc<dyn LlmAdapter>, tts: Arc<dyn TtsBackend>) -> Rig {
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
        tts_pool: Arc::new(TtsPool::new(tts, 3)),
        history: history.clone(),
        knowledge,
        web_search,
        config,
    });
    Rig {
        _dir: dir,
        orchestrator: StreamOrchestrator::new(deps),
        sessions: Arc::new(SessionManager::new(history.clone(), Duration::from_secs(60))),
        history,
    }
}

/// Run a turn with an auto-confirming avatar client, collecting frames
async fn run_turn_collecting(
    rig: &Rig,
    prefs: UserPreferences,
    text: &str,
) -> (TurnOutcome, Vec<ChatMessage>) {
    let session = rig.sessions.get_or_create("sess", "default", prefs).await;
    let (tx, mut rx) = mpsc::channel::<ChatMessage>(1024);

    let playback = session.playback_tx.clone();
    let collector = tokio::spawn(async move {
        let mut msgs: Vec<ChatMessage> = Vec::new();
        while let Some(msg) = rx.recv().await {
            if msg.kind == MessageType::Audio && msg.channel_type == ChannelType::Live2d {
                if let Some(id) = &msg.sentence_id {
                    let _ = playback.send(id.clone());
                }
            }
            msgs.push(msg);
        }
        msgs
    });

    let outcome = rig
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

    let msgs = collector.await.unwrap();
    (outcome, msgs)
}

fn on_channel(msgs: &[ChatMessage], channel: ChannelType) -> Vec<&ChatMessage> {
    msgs.iter().filter(|m| m.channel_type == channel).collect()
}

#[tokio::test]
async fn char_stream_turn_matches_seed_expectations() {
    // Seed scenario 2
    let llm = ScriptedLlm::new(&["你好", "，很", "高兴见到你。今", "天天气不错。"]);
    let rig = rig(llm, Arc::new(MarkedTts { fail_marker: None }));

    let (outcome, msgs) = run_turn_collecting(&rig, UserPreferences::default(), "你好").await;
    assert_eq!(outcome, TurnOutcome::Done);

    let chat = on_channel(&msgs, ChannelType::ChatWindow);
    let texts: Vec<_> = chat
        .iter()
        .filter(|m| m.kind == MessageType::Text && !m.stream_complete)
        .collect();
    assert_eq!(texts.len(), 4, "one text frame per LLM chunk");

    let mut audio: Vec<_> = chat
        .iter()
        .filter(|m| m.kind == MessageType::Audio)
        .collect();
    audio.sort_by_key(|m| m.sentence_order);
    assert_eq!(audio.len(), 2);
    assert_eq!(audio[0].content, "你好，很高兴见到你。");
    assert_eq!(audio[0].sentence_order, Some(0));
    assert_eq!(audio[1].content, "今天天气不错。");
    assert_eq!(audio[1].sentence_order, Some(1));

    // Terminal marker arrives after both syntheses settle, exactly once
    assert!(chat.last().unwrap().stream_complete);
    assert_eq!(chat.iter().filter(|m| m.stream_complete).count(), 1);
}

#[tokio::test]
async fn sentence_sync_is_client_paced_and_ordered() {
    // Seed scenario 3: avatar-only output
    let llm = ScriptedLlm::new(&["A. B. C."]);
    let rig = rig(llm, Arc::new(MarkedTts { fail_marker: None }));

    let mut prefs = UserPreferences::default();
    prefs.output_channel.chat_window.enabled = false;
    prefs.output_channel.live2d.enabled = true;
    prefs.output_channel.live2d.bubble_timeout = 100;

    let (outcome, msgs) = run_turn_collecting(&rig, prefs, "go").await;
    assert_eq!(outcome, TurnOutcome::Done);

    let live = on_channel(&msgs, ChannelType::Live2d);
    let shape: Vec<_> = live
        .iter()
        .map(|m| (m.kind, m.sentence_order, m.stream_complete))
        .collect();
    assert_eq!(
        shape,
        vec![
            (MessageType::Text, Some(0), false),
            (MessageType::Audio, Some(0), false),
            (MessageType::Text, Some(1), false),
            (MessageType::Audio, Some(1), false),
            (MessageType::Text, Some(2), false),
            (MessageType::Audio, Some(2), false),
            (MessageType::Text, None, true),
        ]
    );
    assert_eq!(live[0].content, "A.");
    assert_eq!(live[2].content, "B.");
    assert_eq!(live[4].content, "C.");
}

#[tokio::test]
async fn sentence_sync_tts_failure_skips_waiting() {
    // Seed scenario 6: order 1 fails, order 2 still follows in order
    let llm = ScriptedLlm::new(&["First. Bad one. Third."]);
    let rig = rig(
        llm,
        Arc::new(MarkedTts {
            fail_marker: Some("Bad"),
        }),
    );

    let mut prefs = UserPreferences::default();
    prefs.output_channel.chat_window.enabled = false;
    prefs.output_channel.live2d.enabled = true;
    prefs.output_channel.live2d.bubble_timeout = 100;

    let (outcome, msgs) = run_turn_collecting(&rig, prefs, "go").await;
    assert_eq!(outcome, TurnOutcome::Done);

    let live = on_channel(&msgs, ChannelType::Live2d);
    let shape: Vec<_> = live.iter().map(|m| (m.kind, m.sentence_order)).collect();
    assert_eq!(
        shape,
        vec![
            (MessageType::Text, Some(0)),
            (MessageType::Audio, Some(0)),
            (MessageType::Text, Some(1)),
            (MessageType::Error, Some(1)),
            (MessageType::Text, Some(2)),
            (MessageType::Audio, Some(2)),
            (MessageType::Text, None),
        ]
    );
    assert_eq!(
        live[3].metadata.get("errorCode").map(String::as_str),
        Some("tts_error")
    );
}

#[tokio::test]
async fn thinking_regions_stay_out_of_audio_and_history() {
    // Seed scenario 1 driven through the whole pipeline
    let llm = ScriptedLlm::new(&["hi <thi", "nk>secret</think> there.\n"]);
    let rig = rig(llm, Arc::new(MarkedTts { fail_marker: None }));

    let (outcome, msgs) = run_turn_collecting(&rig, UserPreferences::default(), "hello").await;
    assert_eq!(outcome, TurnOutcome::Done);

    // The thinking chunk is surfaced as its own message type
    let thinking: Vec<_> = msgs
        .iter()
        .filter(|m| m.kind == MessageType::Thinking)
        .collect();
    assert_eq!(thinking.len(), 1);
    assert_eq!(thinking[0].thinking_content.as_deref(), Some("secret"));

    // Exactly one sentence was synthesized, with the thinking removed
    let audio: Vec<_> = msgs
        .iter()
        .filter(|m| m.kind == MessageType::Audio)
        .collect();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].content, "hi  there.");

    // Persisted history holds the dialogue only
    let persisted = rig.history.load("sess").await.unwrap();
    assert_eq!(persisted.len(), 2);
    assert!(!persisted[1].content.contains("secret"));
    assert_eq!(persisted[1].content.trim(), "hi  there.");
}

#[tokio::test]
async fn queued_turns_run_serially() {
    let llm = ScriptedLlm::new(&["reply."]);
    let rig = rig(llm, Arc::new(MarkedTts { fail_marker: None }));
    let session = rig
        .sessions
        .get_or_create("sess", "default", UserPreferences::default())
        .await;

    let (tx, mut rx) = mpsc::channel::<ChatMessage>(1024);
    let orchestrator = Arc::new(rig.orchestrator);

    let mut handles = Vec::new();
    for i in 0..3 {
        let orchestrator = orchestrator.clone();
        let session = session.clone();
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .run_turn(
                    session,
                    TurnRequest {
                        text: format!("question {i}"),
                        persona_name: None,
                    },
                    tx,
                )
                .await
        }));
    }
    drop(tx);

    for handle in handles {
        assert_eq!(handle.await.unwrap(), TurnOutcome::Done);
    }

    // Three turns, three terminal markers, never interleaved mid-turn
    let mut msgs = Vec::new();
    while let Some(msg) = rx.recv().await {
        msgs.push(msg);
    }
    assert_eq!(msgs.iter().filter(|m| m.stream_complete).count(), 3);

    // Each terminal is preceded by that turn's audio frame
    let mut audio_since_terminal = 0;
    for msg in &msgs {
        if msg.kind == MessageType::Audio {
            audio_since_terminal += 1;
        }
        if msg.stream_complete {
            assert_eq!(audio_since_terminal, 1, "one sentence per turn");
            audio_since_terminal = 0;
        }
    }

    // All six history entries landed (three exchanges)
    let persisted = rig.history.load("sess").await.unwrap();
    assert_eq!(persisted.len(), 6);
}

#[tokio::test]
async fn history_survives_round_trip_across_sessions() {
    let llm = ScriptedLlm::new(&["nice to meet you."]);
    let rig = rig(llm, Arc::new(MarkedTts { fail_marker: None }));

    let (outcome, _) = run_turn_collecting(&rig, UserPreferences::default(), "hi").await;
    assert_eq!(outcome, TurnOutcome::Done);

    // A fresh manager seeds its window from the persisted file
    let manager = SessionManager::new(rig.history.clone(), Duration::from_secs(60));
    let revived = manager
        .get_or_create("sess", "default", UserPreferences::default())
        .await;
    let window = revived.history_snapshot().await;
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].1, "hi");
    assert_eq!(window[1].1, "nice to meet you.");
}
