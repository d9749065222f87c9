//! Call lifecycle events surfaced to the UI shell.
//!
//! The connection never talks to a screen directly; it emits `CallEvent`s
//! into a caller-provided sink and the shell decides what to show.

use crate::peer::types::IceCandidate;
use log::debug;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallEvent {
    /// Free-form status text for the status sink.
    Status(String),
    /// The call screen should be shown for this session id.
    CallScreenShown(String),
    CallScreenHidden,
    Connected,
    /// Advisory: the transport reported a disconnected network state. The
    /// platform may still recover; no teardown is performed.
    RemoteDisconnected,
    ConnectionProblem,
    ConnectionRecovering,
    ConnectionRecovered,
    ConnectionFailed,
    Closed,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: CallEvent);
}

/// Logs an ICE candidate as it trickles in or out.
pub fn dump_candidate(label: &str, candidate: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        candidate.candidate, candidate.sdp_mid, candidate.sdp_mline_index
    );
}

/// Snapshot of the nominated candidate pair, for diagnosing connectivity
/// trouble.
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                debug!(
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
