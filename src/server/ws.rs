//! Chat WebSocket handler
//!
//! One JSON frame per message. The read loop parses inbound frames and
//! routes them; all outbound frames funnel through a single writer task
//! so message frames never interleave. Turns run on their own tasks so
//! playback-completed events keep flowing while a reply is streaming.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::stream::TurnRequest;
use crate::types::{decode_audio, ChatMessage};

use super::ServerState;

/// Inbound frame shapes
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Text {
        #[serde(rename = "sessionId")]
        session_id: String,
        content: String,
        #[serde(rename = "personaName", default)]
        persona_name: Option<String>,
        #[serde(default)]
        interrupt: bool,
    },
    AudioPlaybackCompleted {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "sentenceId")]
        sentence_id: String,
    },
    AsrAudioChunk {
        #[serde(rename = "sessionId")]
        session_id: String,
        audio: String,
        #[serde(default)]
        format: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Ping,
}

/// Frames the writer task serializes to the socket
enum Outbound {
    Message(Box<ChatMessage>),
    Pong,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<ServerState>,
) -> Response {
    // The connecting client names its user; "default" otherwise. The
    // session snapshot loads that user's preferences.
    let user_id = params
        .get("user")
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    ws.on_upgrade(move |socket| handle_chat_session(socket, state, user_id))
}

async fn handle_chat_session(ws: WebSocket, state: ServerState, user_id: String) {
    info!("Chat WebSocket connected (user '{user_id}')");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(128);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let payload = match frame {
                Outbound::Message(msg) => serde_json::to_string(&msg).unwrap_or_default(),
                Outbound::Pong => r#"{"type":"pong"}"#.to_string(),
            };
            if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Chat messages flow through an adapter channel into the writer so
    // turn tasks only need a plain ChatMessage sender
    let (msg_tx, mut msg_rx) = mpsc::channel::<ChatMessage>(128);
    let writer_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            if writer_tx.send(Outbound::Message(Box::new(msg))).await.is_err() {
                break;
            }
        }
    });

    // Suggest a session id the client may adopt
    let default_session_id = uuid::Uuid::new_v4().to_string();
    let welcome = ChatMessage::system(
        &default_session_id,
        "welcome",
        "connected; send a text frame to start chatting",
    );
    let _ = tx.send(Outbound::Message(Box::new(welcome))).await;

    // Sessions this connection has touched, for cancel-on-disconnect
    let mut touched: HashSet<String> = HashSet::new();

    while let Some(Ok(frame)) = ws_rx.next().await {
        match frame {
            Message::Text(text) => {
                let parsed: ClientFrame = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        debug!("Unparseable inbound frame: {e}");
                        let err = ChatMessage::error(
                            &default_session_id,
                            crate::types::ChannelType::ChatWindow,
                            "invalid_request",
                            "malformed frame",
                        );
                        let _ = tx.send(Outbound::Message(Box::new(err))).await;
                        continue;
                    }
                };

                match parsed {
                    ClientFrame::Text {
                        session_id,
                        content,
                        persona_name,
                        interrupt,
                    } => {
                        let session = resolve_session(&state, &session_id, &user_id).await;
                        touched.insert(session.id.clone());
                        session.note_inbound("text").await;

                        if interrupt {
                            session.request_cancel();
                            let confirm = ChatMessage::system(
                                &session.id,
                                "interrupt_confirm",
                                "current reply interrupted",
                            );
                            let _ = tx.send(Outbound::Message(Box::new(confirm))).await;
                        }

                        spawn_turn(&state, session, content, persona_name, msg_tx.clone());
                    }
                    ClientFrame::AudioPlaybackCompleted {
                        session_id,
                        sentence_id,
                    } => {
                        if let Some(session) = state.sessions.get(&session_id).await {
                            session.note_inbound("audio_playback_completed").await;
                            let _ = session.playback_tx.send(sentence_id);
                        } else {
                            debug!("Playback event for unknown session {session_id}");
                        }
                    }
                    ClientFrame::AsrAudioChunk {
                        session_id,
                        audio,
                        format,
                        timestamp: _,
                    } => {
                        let session = resolve_session(&state, &session_id, &user_id).await;
                        touched.insert(session.id.clone());
                        session.note_inbound("asr_audio_chunk").await;

                        match transcribe(&state, &audio, &format).await {
                            Ok(text) if !text.trim().is_empty() => {
                                spawn_turn(&state, session, text, None, msg_tx.clone());
                            }
                            Ok(_) => debug!("Empty transcription for {session_id}"),
                            Err(e) => {
                                warn!("ASR failed for {session_id}: {e}");
                                let err = ChatMessage::error(
                                    &session.id,
                                    crate::types::ChannelType::ChatWindow,
                                    "upstream_unavailable",
                                    &format!("speech recognition failed: {e}"),
                                );
                                let _ = tx.send(Outbound::Message(Box::new(err))).await;
                            }
                        }
                    }
                    ClientFrame::Ping => {
                        let _ = tx.send(Outbound::Pong).await;
                    }
                }
            }
            Message::Close(_) => {
                info!("Chat WebSocket disconnected (user '{user_id}')");
                break;
            }
            _ => {}
        }
    }

    // Closing the socket interrupts whatever is still streaming
    for session_id in &touched {
        if let Some(session) = state.sessions.get(session_id).await {
            session.request_cancel();
        }
    }
    forward_task.abort();
    writer_task.abort();
}

/// Sessions are created on the first inbound message that names them
async fn resolve_session(state: &ServerState, session_id: &str, user_id: &str) -> Arc<Session> {
    if let Some(session) = state.sessions.get(session_id).await {
        return session;
    }
    let prefs = state.prefs.load(user_id).await;
    state.sessions.get_or_create(session_id, user_id, prefs).await
}

/// Run one turn on its own task; the session's turn lock queues it when
/// another turn is already in flight
fn spawn_turn(
    state: &ServerState,
    session: Arc<Session>,
    content: String,
    persona_name: Option<String>,
    outbound: mpsc::Sender<ChatMessage>,
) {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let request = TurnRequest {
            text: content,
            persona_name,
        };
        orchestrator.run_turn(session, request, outbound).await;
    });
}

/// Forward one audio chunk to the external ASR service
async fn transcribe(state: &ServerState, audio_b64: &str, format: &str) -> anyhow::Result<String> {
    // The service takes base64; decoding here just rejects bad payloads
    // before they cross the network
    decode_audio(audio_b64)?;

    #[derive(serde::Serialize)]
    struct AsrRequest<'a> {
        audio: &'a str,
        format: &'a str,
    }
    #[derive(Deserialize)]
    struct AsrResponse {
        #[serde(default)]
        text: String,
    }

    let response = state
        .http
        .post(&state.config.python.services.asr_url)
        .json(&AsrRequest {
            audio: audio_b64,
            format,
        })
        .send()
        .await?
        .error_for_status()?;

    let parsed: AsrResponse = response.json().await?;
    Ok(parsed.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_decoding() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"text","sessionId":"s1","content":"hi","interrupt":true}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Text {
                session_id,
                content,
                interrupt,
                persona_name,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(content, "hi");
                assert!(interrupt);
                assert!(persona_name.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_playback_frame_decoding() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"audio_playback_completed","sessionId":"s1","sentenceId":"live2d:s1:0"}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            ClientFrame::AudioPlaybackCompleted { sentence_id, .. } if sentence_id == "live2d:s1:0"
        ));
    }

    #[test]
    fn test_ping_frame_decoding() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping));
    }

    #[test]
    fn test_unknown_frame_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"mystery"}"#).is_err());
    }
}
