//! Per-connection session state
//!
//! A session is created on the first inbound message of a WebSocket
//! connection and torn down after disconnect plus an idle timeout. It
//! holds the preference snapshot, the bounded recent-history window, the
//! cancellation flag, the inbound event log, and the playback-event
//! channel that sentence-sync drains.

pub mod history;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use crate::prefs::UserPreferences;
use crate::types::Role;

use history::{HistoryEntry, HistoryStore};

/// Messages of recent history kept in memory; older turns stay on disk
const RECENT_HISTORY_CAP: usize = 40;

/// Inbound events remembered per session
const INBOUND_LOG_CAP: usize = 100;

/// A logged inbound event (frame type plus arrival time)
#[derive(Debug, Clone, Serialize)]
pub struct InboundRecord {
    pub frame_type: String,
    pub received_at: DateTime<Utc>,
}

/// State owned by the server for one client connection
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Active persona, switchable per turn
    pub persona_name: Mutex<String>,
    /// Preference snapshot taken at session creation
    pub prefs: UserPreferences,
    /// Set to interrupt the in-flight turn
    pub cancel: Arc<AtomicBool>,
    /// Bounded recent history window `(role, content)`
    pub recent_history: Mutex<VecDeque<(Role, String)>>,
    /// Rolling log of inbound frames
    pub inbound_log: Mutex<VecDeque<InboundRecord>>,
    /// Playback-completed events from the client
    pub playback_tx: mpsc::UnboundedSender<String>,
    pub playback_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Serializes turns: at most one assistant turn in flight
    pub turn_lock: Arc<Mutex<()>>,
    last_activity: Mutex<Instant>,
}

impl Session {
    fn new(id: String, user_id: String, prefs: UserPreferences) -> Self {
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        Self {
            id,
            user_id,
            persona_name: Mutex::new(String::new()),
            prefs,
            cancel: Arc::new(AtomicBool::new(false)),
            recent_history: Mutex::new(VecDeque::new()),
            inbound_log: Mutex::new(VecDeque::new()),
            playback_tx,
            playback_rx: Arc::new(Mutex::new(playback_rx)),
            turn_lock: Arc::new(Mutex::new(())),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Record an inbound frame and refresh the idle clock
    pub async fn note_inbound(&self, frame_type: &str) {
        let mut log = self.inbound_log.lock().await;
        if log.len() >= INBOUND_LOG_CAP {
            log.pop_front();
        }
        log.push_back(InboundRecord {
            frame_type: frame_type.to_string(),
            received_at: Utc::now(),
        });
        *self.last_activity.lock().await = Instant::now();
    }

    /// Append a finished exchange to the in-memory window, evicting the
    /// oldest entries past the cap (disk history is untouched)
    pub async fn remember_turn(&self, user_text: &str, assistant_text: &str) {
        let mut history = self.recent_history.lock().await;
        history.push_back((Role::User, user_text.to_string()));
        history.push_back((Role::Assistant, assistant_text.to_string()));
        while history.len() > RECENT_HISTORY_CAP {
            history.pop_front();
        }
    }

    /// Snapshot of the recent history window, oldest first
    pub async fn history_snapshot(&self) -> Vec<(Role, String)> {
        self.recent_history.lock().await.iter().cloned().collect()
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Clear the flag at the start of a fresh turn
    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    async fn idle_for(&self) -> Duration {
        self.last_activity.lock().await.elapsed()
    }
}

/// Registry of live sessions with idle reaping
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    history: Arc<HistoryStore>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(history: Arc<HistoryStore>, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history,
            idle_timeout,
        }
    }

    /// Fetch an existing session or create one, seeding the in-memory
    /// history window from the persisted file
    pub async fn get_or_create(
        &self,
        session_id: &str,
        user_id: &str,
        prefs: UserPreferences,
    ) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return session.clone();
        }

        let session = Arc::new(Session::new(
            session_id.to_string(),
            user_id.to_string(),
            prefs,
        ));

        match self.history.load(session_id).await {
            Ok(entries) => {
                let mut window = session.recent_history.lock().await;
                for entry in seed_window(&entries) {
                    window.push_back(entry);
                }
            }
            Err(e) => debug!("No usable history for {session_id}: {e}"),
        }

        info!("Session {session_id} created for user '{user_id}'");
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        session
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Drop a session from memory (its history file survives)
    pub async fn remove(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            info!("Session {session_id} removed");
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Evict sessions idle past the configured timeout. Run periodically.
    pub async fn reap_idle(&self) -> usize {
        let mut stale = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.idle_for().await > self.idle_timeout {
                    stale.push(id.clone());
                }
            }
        }
        let mut sessions = self.sessions.write().await;
        for id in &stale {
            sessions.remove(id);
            info!("Session {id} reaped after idle timeout");
        }
        stale.len()
    }

    /// Spawn the periodic reaper task
    pub fn start_reaper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.idle_timeout.max(Duration::from_secs(60)) / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                self.reap_idle().await;
            }
        })
    }
}

/// Last `RECENT_HISTORY_CAP` persisted entries as window pairs
fn seed_window(entries: &[HistoryEntry]) -> Vec<(Role, String)> {
    let skip = entries.len().saturating_sub(RECENT_HISTORY_CAP);
    entries
        .iter()
        .skip(skip)
        .map(|e| (e.role, e.content.clone()))
        .collect()
}
