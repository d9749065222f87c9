//! Candidate relay.
//!
//! Local candidates discovered by the transport are pumped into this role's
//! mailbox collection; the other role's collection is streamed back and
//! applied to the transport. Both directions run from transport creation
//! until teardown, independent of the description exchange.

use crate::events::{dump_candidate, CallEvent, EventSink};
use crate::peer::types::IceCandidate;
use crate::signaling::{Role, SignalingMailbox};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

/// Remote-candidate bookkeeping for one connection: entries queued while the
/// remote description is unset, plus the identity set that makes every entry
/// apply at most once even if the mailbox stream re-delivers.
#[derive(Default)]
pub struct RemoteCandidateSink {
    pending: Mutex<Vec<IceCandidate>>,
    seen: Mutex<HashSet<IceCandidate>>,
}

impl RemoteCandidateSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records the candidate's identity; false means it was seen before.
    pub fn first_seen(&self, candidate: &IceCandidate) -> bool {
        self.seen.lock().unwrap().insert(candidate.clone())
    }

    pub fn push_pending(&self, candidate: IceCandidate) {
        self.pending.lock().unwrap().push(candidate);
    }

    pub fn drain_pending(&self) -> Vec<IceCandidate> {
        self.pending.lock().unwrap().drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Registers the candidate-discovered observer. Must run at transport
/// creation: discovery can begin before the session write completes, and the
/// channel buffers whatever arrives until the relay task drains it.
pub fn observe_local_candidates(
    pc: &RTCPeerConnection,
) -> mpsc::UnboundedReceiver<IceCandidate> {
    let (tx, rx) = mpsc::unbounded_channel();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            match candidate {
                Some(c) => {
                    if let Some(candidate) = IceCandidate::from_rtc(&c) {
                        dump_candidate("LOCAL", &candidate);
                        let _ = tx.send(candidate);
                    }
                }
                // null candidate marks end of gathering and is not relayed
                None => debug!("local candidate gathering complete"),
            }
        })
    }));
    rx
}

/// Appends every locally discovered candidate to this role's collection,
/// exactly once each.
pub fn spawn_local_relay(
    mut rx: mpsc::UnboundedReceiver<IceCandidate>,
    mailbox: Arc<dyn SignalingMailbox>,
    session_id: String,
    role: Role,
    events: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            if let Err(e) = mailbox
                .append_candidate(&session_id, role, candidate)
                .await
            {
                warn!("failed to relay local candidate: {e}");
                events.emit(CallEvent::Status(format!(
                    "Failed to publish a network candidate: {e}"
                )));
            }
        }
    })
}

/// Applies the other role's candidate stream to the transport.
pub fn spawn_remote_apply(
    pc: Arc<RTCPeerConnection>,
    mut rx: mpsc::UnboundedReceiver<IceCandidate>,
    sink: Arc<RemoteCandidateSink>,
    events: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            accept_remote_candidate(&pc, &sink, &events, candidate).await;
        }
    })
}

/// One remote candidate: dedup, then apply now or queue until the remote
/// description exists. Applying before the remote description is set is a
/// transport-level error, hence the queue.
pub async fn accept_remote_candidate(
    pc: &RTCPeerConnection,
    sink: &RemoteCandidateSink,
    events: &Arc<dyn EventSink>,
    candidate: IceCandidate,
) {
    if !sink.first_seen(&candidate) {
        debug!("duplicate remote candidate ignored: {}", candidate.candidate);
        return;
    }
    dump_candidate("REMOTE", &candidate);
    if pc.remote_description().await.is_some() {
        apply(pc, events, candidate).await;
    } else {
        debug!("remote description not set yet, queuing candidate");
        sink.push_pending(candidate);
        // the description may have landed while we queued; re-check so the
        // entry cannot be stranded after the one-time flush
        if pc.remote_description().await.is_some() {
            apply_pending_candidates(pc, sink, events).await;
        }
    }
}

/// Flushes candidates queued before the remote description was set. Called
/// right after the description is applied, on both paths.
pub async fn apply_pending_candidates(
    pc: &RTCPeerConnection,
    sink: &RemoteCandidateSink,
    events: &Arc<dyn EventSink>,
) {
    for candidate in sink.drain_pending() {
        debug!("applying queued candidate: {}", candidate.candidate);
        apply(pc, events, candidate).await;
    }
}

async fn apply(pc: &RTCPeerConnection, events: &Arc<dyn EventSink>, candidate: IceCandidate) {
    if let Err(e) = pc.add_ice_candidate(candidate.to_init()).await {
        warn!("failed to add remote candidate: {e}");
        events.emit(CallEvent::Status(format!(
            "Failed to apply a remote network candidate: {e}"
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::InMemoryMailbox;

    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&self, _event: CallEvent) {}
    }

    fn candidate(s: &str) -> IceCandidate {
        IceCandidate {
            candidate: s.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    async fn transport() -> RTCPeerConnection {
        use webrtc::api::APIBuilder;
        let api = APIBuilder::new().build();
        api.new_peer_connection(Default::default()).await.unwrap()
    }

    #[test]
    fn identity_dedup_is_at_most_once() {
        let sink = RemoteCandidateSink::default();
        assert!(sink.first_seen(&candidate("c1")));
        assert!(!sink.first_seen(&candidate("c1")));
        assert!(sink.first_seen(&candidate("c2")));
    }

    #[test]
    fn pending_queue_preserves_arrival_order() {
        let sink = RemoteCandidateSink::default();
        sink.push_pending(candidate("c1"));
        sink.push_pending(candidate("c2"));
        let drained = sink.drain_pending();
        assert_eq!(drained[0].candidate, "c1");
        assert_eq!(drained[1].candidate, "c2");
        assert_eq!(sink.pending_len(), 0);
    }

    #[tokio::test]
    async fn early_remote_candidates_are_queued_not_applied() {
        let pc = transport().await;
        let sink = RemoteCandidateSink::default();
        let events: Arc<dyn EventSink> = Arc::new(NullSink);

        // no remote description yet
        accept_remote_candidate(&pc, &sink, &events, candidate("c1")).await;
        accept_remote_candidate(&pc, &sink, &events, candidate("c1")).await; // duplicate
        accept_remote_candidate(&pc, &sink, &events, candidate("c2")).await;

        assert_eq!(sink.pending_len(), 2);
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn every_discovered_candidate_is_relayed_exactly_once() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        let session_id = mailbox.create_session().await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let events: Arc<dyn EventSink> = Arc::new(NullSink);
        let relay = spawn_local_relay(
            rx,
            mailbox.clone() as Arc<dyn SignalingMailbox>,
            session_id.clone(),
            Role::Initiator,
            events,
        );

        let total = 5;
        for i in 0..total {
            tx.send(candidate(&format!("c{i}"))).unwrap();
        }
        drop(tx);
        relay.await.unwrap();

        let mut sub = mailbox
            .subscribe_candidates(&session_id, Role::Initiator)
            .await
            .unwrap();
        let mut received = Vec::new();
        while let Some(c) = sub.try_recv() {
            received.push(c.candidate);
        }
        assert_eq!(
            received,
            (0..total).map(|i| format!("c{i}")).collect::<Vec<_>>()
        );
    }
}
