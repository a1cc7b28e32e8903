//! Stream bridge: the per-call orchestrator.
//!
//! One bridge instance owns one accepted telephony WebSocket and one LLM
//! realtime WebSocket for the lifetime of a call. A single event loop
//! (`select!` over the telephony stream, the LLM event channel, the tool
//! result channel, and the two duration deadlines) serializes all per-call
//! state; audio-path work runs to completion between frames, and the only
//! suspension points on the audio path are the socket reads and writes.
//! Tools run on spawned workers so a database call never stalls audio.

pub mod session;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until, timeout};
use uuid::Uuid;

use crate::cache::{CacheOp, CallRecord, CallStatus, TranscriptEntry, TranscriptRole};
use crate::core::audio;
use crate::core::realtime::{ClientEvent, RealtimeClient, ServerEvent};
use crate::state::AppState;
use crate::telephony::{OutboundFrame, TelephonyEvent};
use crate::tools::{self, ToolContext};

pub use session::{Action, CallSession, ConversationState, EndReason, MAX_LLM_RECONNECTS};

/// Buffer sizes for the per-call channels.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Grace period between the wrap-up prompt and the hard cut.
const HARD_CUT_DELAY_SECS: u64 = 12;

/// Synthetic user message injected when the duration ceiling fires.
const WRAP_UP_PROMPT: &str = "We are almost out of time for this call. Please say a brief, \
     polite goodbye and finish the conversation now.";

/// Routed message for the telephony sender task.
enum TeleRoute {
    Frame(OutboundFrame),
    Close,
}

/// Result of one tool dispatch, delivered back into the event loop.
struct ToolOutcome {
    call_id: String,
    result: serde_json::Value,
}

/// Drive one call to completion on an already-accepted telephony socket.
pub async fn run_call(socket: WebSocket, app: Arc<AppState>) {
    let (mut tele_sink, tele_stream) = socket.split();
    let (tele_tx, mut tele_rx) = mpsc::channel::<TeleRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task: the only writer on the telephony socket, so outbound
    // frames keep their queue order.
    let sender_task = tokio::spawn(async move {
        while let Some(route) = tele_rx.recv().await {
            let result = match route {
                TeleRoute::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => tele_sink.send(Message::Text(json.into())).await,
                    Err(e) => {
                        tracing::error!("failed to serialize telephony frame: {e}");
                        continue;
                    }
                },
                TeleRoute::Close => {
                    let _ = tele_sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let (llm, llm_events) = match RealtimeClient::connect(&app.realtime).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!("could not open LLM socket: {e}");
            let _ = tele_tx.send(TeleRoute::Close).await;
            drop(tele_tx);
            let _ = timeout(Duration::from_secs(5), sender_task).await;
            return;
        }
    };

    let session = CallSession::new(format!("local-{}", Uuid::new_v4()));
    let (tool_tx, tool_rx) = mpsc::channel::<ToolOutcome>(CHANNEL_BUFFER_SIZE);

    let mut bridge = CallBridge {
        app,
        session,
        tele_tx,
        llm,
        tool_tx,
        wrap_up_at: None,
        hard_cut_at: None,
        end: None,
        torn_down: false,
    };

    if let Err(e) = bridge.send_session_config().await {
        tracing::error!("could not configure LLM session: {e}");
        bridge.end = Some(EndReason::Fatal);
    }

    bridge.run(tele_stream, llm_events, tool_rx).await;
    // Dropping the bridge closes the sender channel; give the sender task a
    // moment to flush the close frame.
    drop(bridge);
    let _ = timeout(Duration::from_secs(5), sender_task).await;
}

struct CallBridge {
    app: Arc<AppState>,
    session: CallSession,
    tele_tx: mpsc::Sender<TeleRoute>,
    llm: RealtimeClient,
    tool_tx: mpsc::Sender<ToolOutcome>,
    wrap_up_at: Option<Instant>,
    hard_cut_at: Option<Instant>,
    end: Option<EndReason>,
    torn_down: bool,
}

impl CallBridge {
    async fn run(
        &mut self,
        mut tele_stream: futures_util::stream::SplitStream<WebSocket>,
        mut llm_events: mpsc::Receiver<ServerEvent>,
        mut tool_rx: mpsc::Receiver<ToolOutcome>,
    ) {
        while self.end.is_none() {
            tokio::select! {
                frame = tele_stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_telephony_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => {
                        self.end = Some(EndReason::TelephonyClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("telephony socket error: {e}");
                        self.end = Some(EndReason::TelephonyClosed);
                    }
                },

                event = llm_events.recv() => match event {
                    Some(event) => self.on_llm_event(event).await,
                    None => {
                        if let Some(events) = self.reconnect_llm().await {
                            llm_events = events;
                        }
                    }
                },

                Some(outcome) = tool_rx.recv() => self.on_tool_outcome(outcome).await,

                _ = deadline(self.wrap_up_at), if self.wrap_up_at.is_some() => {
                    self.begin_wrap_up().await;
                }

                _ = deadline(self.hard_cut_at), if self.hard_cut_at.is_some() => {
                    self.end = Some(EndReason::DurationCeiling);
                }
            }
        }
        self.teardown().await;
    }

    async fn send_session_config(&self) -> crate::core::realtime::RealtimeResult<()> {
        let config = self.app.realtime.session_config(tools::definitions());
        self.llm.send(ClientEvent::SessionUpdate { session: config }).await
    }

    // -------------------------------------------------------------------------
    // Telephony -> LLM
    // -------------------------------------------------------------------------

    async fn on_telephony_text(&mut self, text: &str) {
        let event: TelephonyEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("dropping malformed telephony frame: {e}");
                return;
            }
        };

        match event {
            TelephonyEvent::Connected => {
                tracing::debug!("telephony stream connected");
            }

            TelephonyEvent::Start { start } => {
                let caller = start.caller().map(str::to_string);
                tracing::info!(
                    call_sid = %start.call_sid,
                    stream_sid = %start.stream_sid,
                    caller = caller.as_deref().unwrap_or("unknown"),
                    "call started"
                );
                self.session.begin(start.call_sid, start.stream_sid, caller);
                self.app.cache.enqueue(CacheOp::UpsertCall(self.call_record()));
                self.wrap_up_at = Some(Instant::now() + self.app.config.max_call_duration);
            }

            TelephonyEvent::Media { media } => {
                let mulaw = match BASE64_STANDARD.decode(&media.payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!("dropping media frame with bad base64: {e}");
                        return;
                    }
                };
                self.session.stats.in_frames += 1;
                self.session.stats.in_bytes += mulaw.len() as u64;

                let pcm = audio::upsample_8k_to_24k(&audio::decode_mulaw(&mulaw));
                let append = ClientEvent::audio_append(&audio::pcm_to_le_bytes(&pcm));
                if self.llm.send(append).await.is_err() {
                    // The socket is down; the closed event channel drives the
                    // reconnect policy, this frame is simply lost.
                    tracing::debug!("LLM socket down, dropping caller audio frame");
                }
            }

            TelephonyEvent::Mark { mark } => {
                tracing::debug!(
                    name = %mark.map(|m| m.name).unwrap_or_default(),
                    "telephony mark received"
                );
            }

            TelephonyEvent::Stop => {
                tracing::info!(call_sid = %self.session.call_sid, "telephony stop received");
                self.end = Some(EndReason::TelephonyClosed);
            }

            TelephonyEvent::Unknown => {
                tracing::debug!("ignoring unrecognized telephony frame");
            }
        }
    }

    // -------------------------------------------------------------------------
    // LLM -> telephony
    // -------------------------------------------------------------------------

    async fn on_llm_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                tracing::info!(session_id = %session.id, "LLM session created");
                self.session.on_session_created();
            }

            ServerEvent::SessionUpdated { .. } => {
                let actions = self.session.on_session_updated();
                self.apply(actions).await;
            }

            ServerEvent::SpeechStarted { .. } => {
                let actions = self.session.on_speech_started();
                self.apply(actions).await;
            }

            ServerEvent::SpeechStopped { .. } => {
                self.session.on_speech_stopped();
            }

            ServerEvent::AudioDelta { item_id, delta, .. } => {
                let pcm_bytes = match BASE64_STANDARD.decode(&delta) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!("dropping audio delta with bad base64: {e}");
                        return;
                    }
                };
                self.session.on_audio_delta(&item_id, pcm_bytes.len());

                let Some(stream_sid) = self.session.stream_sid.clone() else {
                    // Audio before the telephony start frame has nowhere to go.
                    return;
                };
                let mulaw =
                    audio::encode_mulaw(&audio::downsample_24k_to_8k(&audio::le_bytes_to_pcm(
                        &pcm_bytes,
                    )));
                self.session.stats.out_frames += 1;
                self.session.stats.out_bytes += mulaw.len() as u64;
                let frame =
                    OutboundFrame::media(&stream_sid, BASE64_STANDARD.encode(&mulaw));
                let _ = self.tele_tx.send(TeleRoute::Frame(frame)).await;
            }

            ServerEvent::AudioDone { .. } => {
                self.session.on_audio_done();
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.append_transcript(TranscriptRole::Assistant, transcript);
            }

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                self.append_transcript(TranscriptRole::User, transcript);
            }

            ServerEvent::OutputItemAdded { item } => {
                self.session.on_output_item_added(&item);
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id, arguments, ..
            } => {
                let actions = self.session.on_function_call_done(call_id, arguments);
                self.apply(actions).await;
            }

            ServerEvent::ResponseDone { response } => {
                tracing::debug!(response_id = %response.id, "response done");
            }

            ServerEvent::Error { error } => {
                // Transient by contract: log and keep the call alive.
                tracing::warn!(
                    error_type = %error.error_type,
                    "LLM error event: {}",
                    error.message
                );
            }

            ServerEvent::RateLimitsUpdated { rate_limits } => {
                tracing::debug!(?rate_limits, "rate limits updated");
            }

            ServerEvent::Unknown => {
                tracing::trace!("ignoring unconsumed LLM event");
            }
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::ClearTelephony => {
                    if let Some(stream_sid) = self.session.stream_sid.as_deref() {
                        let frame = OutboundFrame::clear(stream_sid);
                        let _ = self.tele_tx.send(TeleRoute::Frame(frame)).await;
                    }
                }
                Action::CancelResponse => {
                    let _ = self.llm.send(ClientEvent::ResponseCancel).await;
                }
                Action::TruncateItem {
                    item_id,
                    audio_end_ms,
                } => {
                    tracing::debug!(%item_id, audio_end_ms, "truncating interrupted item");
                    let _ = self
                        .llm
                        .send(ClientEvent::ConversationItemTruncate {
                            item_id,
                            content_index: 0,
                            audio_end_ms,
                        })
                        .await;
                }
                Action::CreateResponse => {
                    let _ = self.llm.send(ClientEvent::ResponseCreate).await;
                }
                Action::RunTool {
                    call_id,
                    name,
                    arguments,
                } => {
                    let ctx = ToolContext {
                        db: self.app.db.clone(),
                        cache: self.app.cache.clone(),
                        call_sid: self.session.call_sid.clone(),
                    };
                    let tool_tx = self.tool_tx.clone();
                    tokio::spawn(async move {
                        let result = tools::run_tool(&ctx, &name, &arguments).await;
                        let _ = tool_tx.send(ToolOutcome { call_id, result }).await;
                    });
                }
            }
        }
    }

    async fn on_tool_outcome(&mut self, outcome: ToolOutcome) {
        let output = outcome.result.to_string();
        let _ = self
            .llm
            .send(ClientEvent::function_output(&outcome.call_id, &output))
            .await;
        let _ = self.llm.send(ClientEvent::ResponseCreate).await;
        self.session.on_tool_result();
    }

    // -------------------------------------------------------------------------
    // Reconnection and timers
    // -------------------------------------------------------------------------

    /// The LLM event channel closed. Attempt up to [`MAX_LLM_RECONNECTS`]
    /// reconnects with linear backoff from the moment of the close; each new
    /// socket re-issues the session configuration. The attempt counter only
    /// resets once `session.created` arrives, so a connection that dies
    /// before then still counts against the ceiling.
    async fn reconnect_llm(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        if self.end.is_some() {
            return None;
        }
        tracing::warn!(call_sid = %self.session.call_sid, "LLM socket closed mid-call");
        let closed_at = Instant::now();

        loop {
            if self.session.reconnect_attempts >= MAX_LLM_RECONNECTS {
                tracing::error!(
                    call_sid = %self.session.call_sid,
                    "LLM reconnect ceiling exhausted"
                );
                self.end = Some(EndReason::LlmReconnectExhausted);
                return None;
            }
            self.session.reconnect_attempts += 1;
            let attempt = self.session.reconnect_attempts;

            sleep_until(closed_at + Duration::from_secs(attempt as u64)).await;
            tracing::info!(attempt, max = MAX_LLM_RECONNECTS, "reconnecting LLM socket");

            match RealtimeClient::connect(&self.app.realtime).await {
                Ok((client, events)) => {
                    self.llm = client;
                    if let Err(e) = self.send_session_config().await {
                        tracing::warn!("failed to re-send session config: {e}");
                        continue;
                    }
                    return Some(events);
                }
                Err(e) => {
                    tracing::warn!(attempt, "reconnect attempt failed: {e}");
                }
            }
        }
    }

    /// The duration ceiling fired: ask the model to say goodbye, then
    /// schedule the hard cut.
    async fn begin_wrap_up(&mut self) {
        tracing::info!(call_sid = %self.session.call_sid, "duration ceiling reached, wrapping up");
        self.wrap_up_at = None;
        let _ = self.llm.send(ClientEvent::user_text(WRAP_UP_PROMPT)).await;
        let _ = self.llm.send(ClientEvent::ResponseCreate).await;
        self.hard_cut_at = Some(Instant::now() + Duration::from_secs(HARD_CUT_DELAY_SECS));
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    fn call_record(&self) -> CallRecord {
        CallRecord {
            call_sid: self.session.call_sid.clone(),
            stream_sid: self.session.stream_sid.clone().unwrap_or_default(),
            caller: self.session.caller.clone(),
            status: if self.end.is_some() {
                CallStatus::Ended
            } else {
                CallStatus::Active
            },
            started_at: self.session.started_at,
            stats: self.session.stats,
        }
    }

    fn append_transcript(&self, role: TranscriptRole, text: String) {
        self.app.cache.enqueue(CacheOp::Transcript {
            call_sid: self.session.call_sid.clone(),
            entry: TranscriptEntry::now(role, text),
        });
    }

    /// Release everything exactly once: cancel timers, close both sockets,
    /// and append the end-of-call record. Safe to call again; the second run
    /// is a no-op.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let reason = self.end.unwrap_or(EndReason::TelephonyClosed);
        tracing::info!(
            call_sid = %self.session.call_sid,
            reason = reason.as_str(),
            in_frames = self.session.stats.in_frames,
            out_frames = self.session.stats.out_frames,
            "call ended"
        );

        self.wrap_up_at = None;
        self.hard_cut_at = None;

        // The audio path is already stopped, so the final cache writes may
        // wait for queue space instead of being droppable.
        if self.session.started() {
            self.app
                .cache
                .enqueue_final(CacheOp::UpsertCall(self.call_record()))
                .await;
            self.app
                .cache
                .enqueue_final(CacheOp::CallEnded {
                    call_sid: self.session.call_sid.clone(),
                    reason: reason.as_str().to_string(),
                })
                .await;
        }

        let _ = self.tele_tx.send(TeleRoute::Close).await;
        // Dropping the client aborts its connection task and closes the
        // socket, even mid-handshake.
    }
}

/// Sleep until `at`, or forever when there is no deadline. The select guard
/// keeps the `None` branch from being polled.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
