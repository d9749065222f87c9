//! Connection state machine.
//!
//! One `Connection` per call attempt. It owns the transport, every mailbox
//! subscription and relay task, and is the only thing allowed to touch them.
//! There is no partial reconnect: any failure after the transport exists is
//! recovered by `teardown` plus a fresh `Connection`.

use crate::config::CallConfig;
use crate::error::CallError;
use crate::events::{dump_selected_pair, CallEvent, EventSink};
use crate::media::{MediaSource, RemoteMedia, RenderSurface};
use crate::peer::exchange;
use crate::peer::ice::{self, RemoteCandidateSink};
use crate::peer::state::{CallState, StateCell, GRACE_PERIOD};
use crate::signaling::{Role, SignalingMailbox, SubscriptionHandle};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// A single call attempt.
pub struct Connection {
    mailbox: Arc<dyn SignalingMailbox>,
    media: Arc<dyn MediaSource>,
    render: Arc<dyn RenderSurface>,
    events: Arc<dyn EventSink>,
    config: CallConfig,

    state: StateCell,
    closed: AtomicBool,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    remote_media: Arc<RemoteMedia>,
    remote_sink: Arc<RemoteCandidateSink>,
    session_id: Mutex<Option<String>>,

    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnect_watch: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(
        mailbox: Arc<dyn SignalingMailbox>,
        media: Arc<dyn MediaSource>,
        render: Arc<dyn RenderSurface>,
        events: Arc<dyn EventSink>,
        config: CallConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            mailbox,
            media,
            render,
            events,
            config,
            state: StateCell::new(),
            closed: AtomicBool::new(false),
            pc: Mutex::new(None),
            remote_media: RemoteMedia::new(),
            remote_sink: RemoteCandidateSink::new(),
            session_id: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            disconnect_watch: Mutex::new(None),
        })
    }

    pub fn state(&self) -> CallState {
        self.state.get()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    /// Starts the call attempt: media, transport, session, relay, exchange.
    /// Returns the session id. Errors from any step leave the connection in
    /// a state where `teardown` is the required next move.
    pub async fn start(
        self: &Arc<Self>,
        role: Role,
        session_id: Option<String>,
    ) -> Result<String, CallError> {
        if self.closed.load(Ordering::SeqCst) || self.state.get() != CallState::Idle {
            return Err(CallError::InvalidState(
                "connection already used; create a new one".into(),
            ));
        }
        self.events.emit(CallEvent::Status(match role {
            Role::Initiator => "Creating room...".into(),
            Role::Joiner => "Joining room...".into(),
        }));

        let tracks = self.media.acquire().map_err(|e| {
            self.events.emit(CallEvent::Status(
                "Error accessing camera/mic. Please allow permissions.".into(),
            ));
            e
        })?;
        self.state.advance(CallState::MediaAcquired);

        // bound once; tracks added later surface without rebinding
        self.render.bind(self.remote_media.clone());

        let pc = self.new_transport().await.map_err(|e| {
            self.events.emit(CallEvent::Status(format!(
                "Failed to set up the connection: {e}"
            )));
            e
        })?;
        // candidate observer before anything else runs on the transport:
        // discovery may begin before the session write finishes, and the
        // channel buffers until the relay task drains it
        let local_candidates = ice::observe_local_candidates(&pc);
        self.register_observers(&pc);
        for track in tracks {
            if let Err(e) = pc.add_track(track).await {
                self.events
                    .emit(CallEvent::Status(format!("Failed to attach local media: {e}")));
                return Err(e.into());
            }
        }
        *self.pc.lock().unwrap() = Some(pc.clone());
        self.state.advance(CallState::TransportCreated);

        let (session_id, joiner_doc) = match (role, session_id) {
            (Role::Initiator, _) => (self.mailbox.create_session().await?, None),
            (Role::Joiner, Some(id)) => {
                let doc = self.mailbox.get_session(&id).await.map_err(|e| {
                    self.events
                        .emit(CallEvent::Status("Room not found. Check the ID.".into()));
                    e
                })?;
                (id, Some(doc))
            }
            (Role::Joiner, None) => {
                self.events
                    .emit(CallEvent::Status("Please enter a valid Room ID.".into()));
                return Err(CallError::InvalidState("joiner requires a session id".into()));
            }
        };
        *self.session_id.lock().unwrap() = Some(session_id.clone());

        // a hang-up may have landed while the session step was in flight;
        // bail before creating anything teardown would have had to find
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::InvalidState("connection torn down".into()));
        }

        // candidate relay, both directions, for the life of the session
        let relay_task = ice::spawn_local_relay(
            local_candidates,
            self.mailbox.clone(),
            session_id.clone(),
            role,
            self.events.clone(),
        );
        let (candidate_rx, candidate_handle) = self
            .mailbox
            .subscribe_candidates(&session_id, role.other())
            .await?
            .split();
        let apply_task = ice::spawn_remote_apply(
            pc.clone(),
            candidate_rx,
            self.remote_sink.clone(),
            self.events.clone(),
        );
        self.register_subscription(candidate_handle);
        self.register_task(relay_task);
        self.register_task(apply_task);

        match joiner_doc {
            None => {
                let (handle, task) = exchange::run_initiator(
                    pc.clone(),
                    self.mailbox.clone(),
                    &session_id,
                    self.remote_sink.clone(),
                    self.events.clone(),
                )
                .await
                .map_err(|e| {
                    self.events
                        .emit(CallEvent::Status(format!("Failed to start the call: {e}")));
                    e
                })?;
                self.register_subscription(handle);
                self.register_task(task);
                self.state
                    .advance_from(CallState::TransportCreated, CallState::OfferSent);
            }
            Some(doc) => {
                exchange::run_joiner(
                    &pc,
                    &self.mailbox,
                    &session_id,
                    doc,
                    &self.remote_sink,
                    &self.events,
                )
                .await
                .map_err(|e| {
                    self.events
                        .emit(CallEvent::Status(format!("Failed to join the call: {e}")));
                    e
                })?;
                self.state
                    .advance_from(CallState::TransportCreated, CallState::AnswerSent);
            }
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::InvalidState("connection torn down".into()));
        }
        self.events
            .emit(CallEvent::CallScreenShown(session_id.clone()));
        Ok(session_id)
    }

    /// Hang-up. Idempotent from any state, including before a transport
    /// exists; the only recovery path from a fatal error.
    pub async fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("tearing down connection");
        self.state.close();
        for handle in self.subscriptions.lock().unwrap().drain(..) {
            handle.cancel();
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        if let Some(task) = self.disconnect_watch.lock().unwrap().take() {
            task.abort();
        }
        self.media.release();
        self.remote_media.clear();
        let pc = self.pc.lock().unwrap().take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                warn!("transport close failed: {e}");
            }
        }
        self.render.clear();
        self.events.emit(CallEvent::CallScreenHidden);
        self.events.emit(CallEvent::Closed);
    }

    /// Registers a mailbox subscription so teardown can cancel it. A
    /// registration racing a hang-up is cancelled on the spot instead; the
    /// check and the push share the list lock, and teardown drains under the
    /// same lock after setting `closed`, so no registration can slip past.
    fn register_subscription(&self, handle: SubscriptionHandle) {
        let mut subs = self.subscriptions.lock().unwrap();
        if self.closed.load(Ordering::SeqCst) {
            drop(subs);
            handle.cancel();
        } else {
            subs.push(handle);
        }
    }

    fn register_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap();
        if self.closed.load(Ordering::SeqCst) {
            drop(tasks);
            task.abort();
        } else {
            tasks.push(task);
        }
    }

    /// One `Connected` report from the transport. The first one is the call
    /// connecting; one arriving while a disconnect watch is pending is a
    /// recovery; a repeat with neither is ignored, since the transport may
    /// re-report its state.
    fn note_transport_connected(&self) {
        let had_watch = {
            let mut watch = self.disconnect_watch.lock().unwrap();
            match watch.take() {
                Some(task) => {
                    debug!("aborting pending disconnect watch");
                    task.abort();
                    true
                }
                None => false,
            }
        };
        let was_connected = self.state.get() == CallState::Connected;
        if self.state.advance(CallState::Connected) {
            if had_watch && was_connected {
                self.events.emit(CallEvent::ConnectionRecovered);
            } else if !was_connected {
                self.events.emit(CallEvent::Connected);
            }
        }
    }

    async fn new_transport(&self) -> Result<Arc<RTCPeerConnection>, CallError> {
        self.config.validate()?;
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = api.new_peer_connection(self.config.rtc_config()).await?;
        Ok(Arc::new(pc))
    }

    fn register_observers(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>) {
        let remote_media = self.remote_media.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                debug!("remote track added: kind={} id={}", track.kind(), track.id());
                remote_media.add_track(track);
                Box::pin(async {})
            },
        ));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        let conn_weak = Arc::downgrade(self);
        let pc_weak = Arc::downgrade(pc);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("peer connection state changed to: {state}");
            let Some(conn) = conn_weak.upgrade() else {
                return Box::pin(async {});
            };
            match state {
                RTCPeerConnectionState::Connected => conn.note_transport_connected(),
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                    let mut watch = conn.disconnect_watch.lock().unwrap();
                    if watch.is_some() {
                        debug!("disconnect watch already pending");
                    } else {
                        if state == RTCPeerConnectionState::Disconnected {
                            // advisory only: the platform may recover from
                            // transient disconnects, so no teardown here
                            conn.events.emit(CallEvent::RemoteDisconnected);
                            conn.events.emit(CallEvent::Status(
                                "Remote user disconnected.".into(),
                            ));
                        }
                        conn.events.emit(CallEvent::ConnectionProblem);
                        *watch = Some(tokio::spawn(run_grace_watch(
                            conn.clone(),
                            pc_weak.clone(),
                            GRACE_PERIOD,
                        )));
                    }
                }
                RTCPeerConnectionState::Closed => {
                    if let Some(task) = conn.disconnect_watch.lock().unwrap().take() {
                        task.abort();
                    }
                }
                _ => {}
            }
            Box::pin(async {})
        }));
    }
}

/// Waits out the grace period after a disconnect report. If the transport is
/// still not connected when it ends, the call is declared failed and torn
/// down.
async fn run_grace_watch(
    conn: Arc<Connection>,
    pc: Weak<RTCPeerConnection>,
    grace: Duration,
) {
    if let Some(pc) = pc.upgrade() {
        dump_selected_pair(&pc, "BEFORE-FAIL").await;
    }
    conn.events.emit(CallEvent::ConnectionRecovering);
    sleep(grace).await;
    if pc.upgrade().map(|pc| pc.connection_state())
        == Some(RTCPeerConnectionState::Connected)
    {
        debug!("connection recovered during grace period");
        return;
    }
    conn.events.emit(CallEvent::ConnectionFailed);
    // drop our own handle first so teardown does not abort the task
    // running it
    conn.disconnect_watch.lock().unwrap().take();
    conn.teardown().await;
}
