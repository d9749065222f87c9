//! Boundary traits for the capture/render surfaces.
//!
//! Camera and microphone acquisition, and the actual pixels/audio sinks, are
//! platform concerns. The connection only needs local tracks to send and a
//! place to hand the remote aggregate.

use crate::error::CallError;
use std::sync::{Arc, Mutex};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Local capture surface. `acquire` runs once per call attempt; a permission
/// refusal surfaces as `MediaAccessDenied` and is never retried here.
pub trait MediaSource: Send + Sync {
    fn acquire(&self) -> Result<Vec<Arc<dyn TrackLocal + Send + Sync>>, CallError>;

    /// Stops the local tracks. Called on teardown; must tolerate being
    /// called without a prior successful `acquire`.
    fn release(&self);
}

/// Render surface for the remote side. Bound once, at call start, to the
/// [`RemoteMedia`] aggregate.
pub trait RenderSurface: Send + Sync {
    fn bind(&self, media: Arc<RemoteMedia>);
    fn clear(&self);
}

/// Aggregate of remote tracks. Incoming tracks are appended as the transport
/// reports them, so a surface bound early sees later additions without
/// rebinding.
#[derive(Default)]
pub struct RemoteMedia {
    tracks: Mutex<Vec<Arc<TrackRemote>>>,
}

impl RemoteMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_track(&self, track: Arc<TrackRemote>) {
        self.tracks.lock().unwrap().push(track);
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.tracks.lock().unwrap().clear();
    }
}
