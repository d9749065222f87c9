//! Signaling mailbox: the shared out-of-band store two peers use to exchange
//! session descriptions and ICE candidates before any direct path exists.
//!
//! The mailbox keys everything by an opaque session id. Each session carries
//! one document (offer + answer) and two append-only candidate collections,
//! one per role. Subscriptions replay current state first and then stream
//! changes, so a late subscriber misses nothing.

use crate::error::CallError;
use crate::peer::types::IceCandidate;
use crate::utils::random_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// The two parties of a call. The initiator creates the session and produces
/// the offer; the joiner attaches to it and produces the answer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Joiner,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Initiator => Role::Joiner,
            Role::Joiner => Role::Initiator,
        }
    }

    fn index(self) -> usize {
        match self {
            Role::Initiator => 0,
            Role::Joiner => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description as stored in the mailbox: its kind plus the SDP blob,
/// carried opaque and round-tripped byte-identical.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub payload: String,
}

impl SessionDescription {
    pub fn offer(payload: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            payload: payload.into(),
        }
    }

    pub fn answer(payload: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            payload: payload.into(),
        }
    }

    pub fn from_rtc(desc: &RTCSessionDescription) -> Result<Self, CallError> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            other => {
                return Err(CallError::InvalidDescription(format!(
                    "unsupported sdp type \"{other}\""
                )))
            }
        };
        Ok(Self {
            kind,
            payload: desc.sdp.clone(),
        })
    }

    pub fn to_rtc(&self) -> Result<RTCSessionDescription, CallError> {
        match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(self.payload.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(self.payload.clone()),
        }
        .map_err(|e| CallError::InvalidDescription(e.to_string()))
    }
}

/// The per-session document. Offer is written once by the initiator, answer
/// once by the joiner; the offer always lands first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDoc {
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    pub created_at: i64,
}

type Canceller = Box<dyn FnOnce() + Send>;

/// Cancels one mailbox subscription. Cancelling is idempotent and also
/// happens on drop, so a torn-down connection leaves nothing registered.
pub struct SubscriptionHandle {
    canceller: Option<Canceller>,
}

impl SubscriptionHandle {
    pub fn new(canceller: impl FnOnce() + Send + 'static) -> Self {
        Self {
            canceller: Some(Box::new(canceller)),
        }
    }

    pub fn cancel(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.fire();
    }
}

/// A live stream of mailbox entries plus its cancellation handle.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    handle: SubscriptionHandle,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, handle: SubscriptionHandle) -> Self {
        Self { rx, handle }
    }

    pub fn split(self) -> (mpsc::UnboundedReceiver<T>, SubscriptionHandle) {
        (self.rx, self.handle)
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// The signaling store interface both roles consume.
#[async_trait]
pub trait SignalingMailbox: Send + Sync {
    /// Creates a session and returns its mailbox-assigned identifier.
    async fn create_session(&self) -> Result<String, CallError>;

    /// Fetches the session document, or `SessionNotFound`.
    async fn get_session(&self, session_id: &str) -> Result<SessionDoc, CallError>;

    async fn set_offer(
        &self,
        session_id: &str,
        offer: SessionDescription,
    ) -> Result<(), CallError>;

    async fn set_answer(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> Result<(), CallError>;

    /// Streams the session document: the current snapshot first, then every
    /// update.
    async fn subscribe_session(
        &self,
        session_id: &str,
    ) -> Result<Subscription<SessionDoc>, CallError>;

    /// Appends to `role`'s candidate collection. Entries are never mutated
    /// or removed.
    async fn append_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: IceCandidate,
    ) -> Result<(), CallError>;

    /// Streams `role`'s candidate collection: existing entries are replayed
    /// first, each as its own notification, then new appends follow.
    async fn subscribe_candidates(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<Subscription<IceCandidate>, CallError>;
}

struct Session {
    doc: SessionDoc,
    candidates: [Vec<IceCandidate>; 2],
    doc_subs: HashMap<u64, mpsc::UnboundedSender<SessionDoc>>,
    candidate_subs: [HashMap<u64, mpsc::UnboundedSender<IceCandidate>>; 2],
}

impl Session {
    fn new() -> Self {
        Self {
            doc: SessionDoc {
                offer: None,
                answer: None,
                created_at: chrono::Utc::now().timestamp(),
            },
            candidates: [Vec::new(), Vec::new()],
            doc_subs: HashMap::new(),
            candidate_subs: [HashMap::new(), HashMap::new()],
        }
    }

    fn notify_doc(&mut self) {
        let doc = self.doc.clone();
        self.doc_subs.retain(|_, tx| tx.send(doc.clone()).is_ok());
    }
}

#[derive(Default)]
struct MailboxInner {
    sessions: HashMap<String, Session>,
    next_sub_id: u64,
}

/// Process-local mailbox. Backs the tests and co-located peers; a remote
/// deployment would put a real document store behind the same trait.
#[derive(Default)]
pub struct InMemoryMailbox {
    inner: Arc<Mutex<MailboxInner>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session under a caller-chosen id. Ids are normally
    /// mailbox-assigned; this exists for fixtures that need a known id.
    pub fn create_session_with_id(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
    }

    /// Number of live subscriptions on a session, across the document and
    /// both candidate collections.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(session_id)
            .map(|s| {
                s.doc_subs.len() + s.candidate_subs[0].len() + s.candidate_subs[1].len()
            })
            .unwrap_or(0)
    }

    fn unsubscriber(
        &self,
        session_id: &str,
        sub_id: u64,
        collection: Option<Role>,
    ) -> SubscriptionHandle {
        let weak: Weak<Mutex<MailboxInner>> = Arc::downgrade(&self.inner);
        let session_id = session_id.to_string();
        SubscriptionHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap();
                if let Some(session) = inner.sessions.get_mut(&session_id) {
                    match collection {
                        None => {
                            session.doc_subs.remove(&sub_id);
                        }
                        Some(role) => {
                            session.candidate_subs[role.index()].remove(&sub_id);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SignalingMailbox for InMemoryMailbox {
    async fn create_session(&self) -> Result<String, CallError> {
        let session_id = random_id();
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(session_id.clone(), Session::new());
        Ok(session_id)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDoc, CallError> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(session_id)
            .map(|s| s.doc.clone())
            .ok_or_else(|| CallError::SessionNotFound(session_id.to_string()))
    }

    async fn set_offer(
        &self,
        session_id: &str,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CallError::SessionNotFound(session_id.to_string()))?;
        session.doc.offer = Some(offer);
        session.notify_doc();
        Ok(())
    }

    async fn set_answer(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> Result<(), CallError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CallError::SessionNotFound(session_id.to_string()))?;
        session.doc.answer = Some(answer);
        session.notify_doc();
        Ok(())
    }

    async fn subscribe_session(
        &self,
        session_id: &str,
    ) -> Result<Subscription<SessionDoc>, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = {
            let mut inner = self.inner.lock().unwrap();
            let sub_id = inner.next_sub_id;
            inner.next_sub_id += 1;
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CallError::SessionNotFound(session_id.to_string()))?;
            // snapshot replay before streaming updates
            let _ = tx.send(session.doc.clone());
            session.doc_subs.insert(sub_id, tx);
            sub_id
        };
        Ok(Subscription::new(
            rx,
            self.unsubscriber(session_id, sub_id, None),
        ))
    }

    async fn append_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: IceCandidate,
    ) -> Result<(), CallError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CallError::SessionNotFound(session_id.to_string()))?;
        session.candidates[role.index()].push(candidate.clone());
        session.candidate_subs[role.index()]
            .retain(|_, tx| tx.send(candidate.clone()).is_ok());
        Ok(())
    }

    async fn subscribe_candidates(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<Subscription<IceCandidate>, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = {
            let mut inner = self.inner.lock().unwrap();
            let sub_id = inner.next_sub_id;
            inner.next_sub_id += 1;
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CallError::SessionNotFound(session_id.to_string()))?;
            for existing in &session.candidates[role.index()] {
                let _ = tx.send(existing.clone());
            }
            session.candidate_subs[role.index()].insert(sub_id, tx);
            sub_id
        };
        Ok(Subscription::new(
            rx,
            self.unsubscriber(session_id, sub_id, Some(role)),
        ))
    }
}
