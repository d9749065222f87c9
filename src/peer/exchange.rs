//! Session description exchange.
//!
//! Two symmetric procedures keyed by role. The initiator publishes the offer
//! and watches the session document for the answer; the joiner consumes the
//! offer and publishes the answer. On both paths the local description is in
//! place before any candidate leaves the relay, because the transport only
//! starts discovery once a local description exists.

use crate::error::CallError;
use crate::events::{CallEvent, EventSink};
use crate::peer::ice::{apply_pending_candidates, RemoteCandidateSink};
use crate::signaling::{
    SessionDescription, SessionDoc, SignalingMailbox, SubscriptionHandle,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::peer_connection::RTCPeerConnection;

/// Initiator path: offer out, then wait for the first answer-bearing session
/// update. Returns the subscription handle and the watch task so the
/// connection can cancel both at teardown.
pub async fn run_initiator(
    pc: Arc<RTCPeerConnection>,
    mailbox: Arc<dyn SignalingMailbox>,
    session_id: &str,
    sink: Arc<RemoteCandidateSink>,
    events: Arc<dyn EventSink>,
) -> Result<(SubscriptionHandle, JoinHandle<()>), CallError> {
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;
    let local = pc.local_description().await.ok_or_else(|| {
        CallError::InvalidDescription("local description missing after set".into())
    })?;
    mailbox
        .set_offer(session_id, SessionDescription::from_rtc(&local)?)
        .await?;
    info!("offer published for session {session_id}");

    let (rx, handle) = mailbox.subscribe_session(session_id).await?.split();
    let task = tokio::spawn(watch_for_answer(pc, rx, sink, events));
    Ok((handle, task))
}

async fn watch_for_answer(
    pc: Arc<RTCPeerConnection>,
    mut rx: mpsc::UnboundedReceiver<SessionDoc>,
    sink: Arc<RemoteCandidateSink>,
    events: Arc<dyn EventSink>,
) {
    while let Some(doc) = rx.recv().await {
        match apply_answer_once(&pc, &doc, &sink, &events).await {
            Ok(true) => {
                events.emit(CallEvent::Status("Answer received".into()));
                break;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("failed to apply remote answer: {e}");
                events.emit(CallEvent::Status(format!("Failed to apply answer: {e}")));
            }
        }
    }
}

/// Applies the document's answer if one is present and the transport has no
/// remote description yet. Returns true only for the update that actually
/// applied, so duplicate or rapid notifications are ignored.
pub async fn apply_answer_once(
    pc: &RTCPeerConnection,
    doc: &SessionDoc,
    sink: &RemoteCandidateSink,
    events: &Arc<dyn EventSink>,
) -> Result<bool, CallError> {
    let Some(answer) = &doc.answer else {
        return Ok(false);
    };
    if pc.remote_description().await.is_some() {
        debug!("remote description already set, ignoring session update");
        return Ok(false);
    }
    pc.set_remote_description(answer.to_rtc()?).await?;
    apply_pending_candidates(pc, sink, events).await;
    Ok(true)
}

/// Joiner path: consume the offer from the fetched document, publish the
/// answer as an update.
pub async fn run_joiner(
    pc: &RTCPeerConnection,
    mailbox: &Arc<dyn SignalingMailbox>,
    session_id: &str,
    doc: SessionDoc,
    sink: &RemoteCandidateSink,
    events: &Arc<dyn EventSink>,
) -> Result<(), CallError> {
    let offer = doc
        .offer
        .ok_or_else(|| CallError::OfferMissing(session_id.to_string()))?;
    pc.set_remote_description(offer.to_rtc()?).await?;
    apply_pending_candidates(pc, sink, events).await;

    let answer = pc.create_answer(None).await?;
    pc.set_local_description(answer).await?;
    let local = pc.local_description().await.ok_or_else(|| {
        CallError::InvalidDescription("local description missing after set".into())
    })?;
    mailbox
        .set_answer(session_id, SessionDescription::from_rtc(&local)?)
        .await?;
    info!("answer published for session {session_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::InMemoryMailbox;
    use webrtc::api::APIBuilder;

    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&self, _event: CallEvent) {}
    }

    async fn transport() -> RTCPeerConnection {
        let api = APIBuilder::new().build();
        api.new_peer_connection(Default::default()).await.unwrap()
    }

    /// Produces a matching offer/answer pair using a data channel to force an
    /// m-line into the SDP.
    async fn negotiated_pair() -> (RTCPeerConnection, SessionDescription) {
        let initiator = transport().await;
        initiator.create_data_channel("probe", None).await.unwrap();
        let offer = initiator.create_offer(None).await.unwrap();
        initiator.set_local_description(offer.clone()).await.unwrap();

        let joiner = transport().await;
        joiner.set_remote_description(offer).await.unwrap();
        let answer = joiner.create_answer(None).await.unwrap();
        joiner.set_local_description(answer).await.unwrap();
        let local = joiner.local_description().await.unwrap();
        let desc = SessionDescription::from_rtc(&local).unwrap();
        joiner.close().await.unwrap();
        (initiator, desc)
    }

    #[tokio::test]
    async fn answer_applies_exactly_once_across_duplicate_updates() {
        let (pc, answer) = negotiated_pair().await;
        let sink = RemoteCandidateSink::default();
        let events: Arc<dyn EventSink> = Arc::new(NullSink);

        let doc = SessionDoc {
            offer: None,
            answer: Some(answer),
            created_at: 0,
        };

        let mut applied = 0;
        for _ in 0..5 {
            if apply_answer_once(&pc, &doc, &sink, &events).await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert!(pc.remote_description().await.is_some());
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn update_without_answer_is_ignored() {
        let pc = transport().await;
        let sink = RemoteCandidateSink::default();
        let events: Arc<dyn EventSink> = Arc::new(NullSink);

        let doc = SessionDoc {
            offer: Some(SessionDescription::offer("irrelevant")),
            answer: None,
            created_at: 0,
        };
        assert!(!apply_answer_once(&pc, &doc, &sink, &events).await.unwrap());
        assert!(pc.remote_description().await.is_none());
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn joiner_fails_on_missing_offer() {
        let pc = transport().await;
        let mailbox: Arc<dyn SignalingMailbox> = Arc::new(InMemoryMailbox::new());
        let sink = RemoteCandidateSink::default();
        let events: Arc<dyn EventSink> = Arc::new(NullSink);

        let doc = SessionDoc {
            offer: None,
            answer: None,
            created_at: 0,
        };
        let err = run_joiner(&pc, &mailbox, "room-x", doc, &sink, &events)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::OfferMissing(id) if id == "room-x"));
        pc.close().await.unwrap();
    }
}
