//! End-to-end call establishment over the in-memory mailbox.

use duocall::{
    CallConfig, CallError, CallEvent, CallState, Connection, EventSink, IceCandidate,
    InMemoryMailbox, MediaSource, RemoteMedia, RenderSurface, Role, SessionDescription,
    SignalingMailbox,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

struct FakeCamera;

impl MediaSource for FakeCamera {
    fn acquire(&self) -> Result<Vec<Arc<dyn TrackLocal + Send + Sync>>, CallError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "duocall".to_owned(),
        ));
        Ok(vec![track])
    }

    fn release(&self) {}
}

#[derive(Default)]
struct Screen {
    bound: Mutex<Option<Arc<RemoteMedia>>>,
}

impl RenderSurface for Screen {
    fn bind(&self, media: Arc<RemoteMedia>) {
        *self.bound.lock().unwrap() = Some(media);
    }

    fn clear(&self) {
        *self.bound.lock().unwrap() = None;
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<CallEvent>>,
}

impl Recorder {
    fn snapshot(&self) -> Vec<CallEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for Recorder {
    fn emit(&self, event: CallEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn connection(
    mailbox: Arc<InMemoryMailbox>,
) -> (Arc<Connection>, Arc<Screen>, Arc<Recorder>) {
    let screen = Arc::new(Screen::default());
    let recorder = Arc::new(Recorder::default());
    let conn = Connection::new(
        mailbox,
        Arc::new(FakeCamera),
        screen.clone(),
        recorder.clone(),
        CallConfig::default(),
    );
    (conn, screen, recorder)
}

async fn wait_for_connected(conn: &Arc<Connection>) {
    tokio::time::timeout(Duration::from_secs(20), async {
        while conn.state() != CallState::Connected {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("peers did not reach Connected in time");
}

#[tokio::test]
async fn initiator_and_joiner_reach_connected() {
    let mailbox = Arc::new(InMemoryMailbox::new());

    let (initiator, init_screen, init_events) = connection(mailbox.clone());
    let (joiner, _join_screen, join_events) = connection(mailbox.clone());

    let session_id = initiator.start(Role::Initiator, None).await.unwrap();
    assert_eq!(initiator.state(), CallState::OfferSent);
    assert!(init_screen.bound.lock().unwrap().is_some());

    let joined_id = joiner
        .start(Role::Joiner, Some(session_id.clone()))
        .await
        .unwrap();
    assert_eq!(joined_id, session_id);

    wait_for_connected(&initiator).await;
    wait_for_connected(&joiner).await;

    assert!(init_events.snapshot().contains(&CallEvent::Connected));
    assert!(join_events.snapshot().contains(&CallEvent::Connected));
    // no samples were written, so the remote aggregate stays empty even
    // though the transport is up
    let bound = init_screen.bound.lock().unwrap().as_ref().unwrap().clone();
    assert!(bound.tracks().is_empty());
    assert!(init_events
        .snapshot()
        .contains(&CallEvent::CallScreenShown(session_id.clone())));

    // both sides relayed at least one candidate into their collections
    let mut init_cands = mailbox
        .subscribe_candidates(&session_id, Role::Initiator)
        .await
        .unwrap();
    let mut join_cands = mailbox
        .subscribe_candidates(&session_id, Role::Joiner)
        .await
        .unwrap();
    assert!(init_cands.try_recv().is_some());
    assert!(join_cands.try_recv().is_some());
    drop(init_cands);
    drop(join_cands);

    initiator.teardown().await;
    joiner.teardown().await;
    assert_eq!(initiator.state(), CallState::Closed);
    assert_eq!(joiner.state(), CallState::Closed);
    assert_eq!(mailbox.subscriber_count(&session_id), 0);
}

#[tokio::test]
async fn teardown_is_idempotent_and_leaves_no_subscriptions() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let (conn, _screen, recorder) = connection(mailbox.clone());

    let session_id = conn.start(Role::Initiator, None).await.unwrap();
    assert!(mailbox.subscriber_count(&session_id) > 0);

    conn.teardown().await;
    conn.teardown().await;
    conn.teardown().await;
    assert_eq!(conn.state(), CallState::Closed);
    assert_eq!(mailbox.subscriber_count(&session_id), 0);

    // a candidate appended after teardown must not reach the connection
    let before = recorder.snapshot().len();
    mailbox
        .append_candidate(
            &session_id,
            Role::Joiner,
            IceCandidate {
                candidate: "candidate:1 1 udp 1 198.51.100.7 9 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.snapshot().len(), before);
}

/// Signaling flow at the mailbox level, no transport involved: offer written
/// first, answer written as an update, and the initiator's subscription sees
/// exactly one answer-bearing document.
#[tokio::test]
async fn room_42_offer_answer_scenario() {
    let mailbox = InMemoryMailbox::new();
    mailbox.create_session_with_id("room-42");

    mailbox
        .set_offer("room-42", SessionDescription::offer("O1"))
        .await
        .unwrap();

    // joiner side reads the offer back, byte-identical
    let doc = mailbox.get_session("room-42").await.unwrap();
    assert_eq!(doc.offer.as_ref().unwrap().payload, "O1");
    assert!(doc.answer.is_none());

    // initiator subscribes after writing the offer
    let mut updates = mailbox.subscribe_session("room-42").await.unwrap();

    mailbox
        .set_answer("room-42", SessionDescription::answer("A1"))
        .await
        .unwrap();

    let mut answers = Vec::new();
    while let Some(doc) = updates.try_recv() {
        if let Some(answer) = doc.answer {
            answers.push(answer);
        }
    }
    assert_eq!(answers, vec![SessionDescription::answer("A1")]);
}
