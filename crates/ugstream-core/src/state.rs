//! Published session state.
//!
//! `SessionCore` is the only writer.  The socket and HTTP surfaces hold an
//! `Arc<StateManager>` and read the latest view whenever a
//! `BroadcastMessage::StateUpdated` arrives.

use std::sync::Arc;

use tokio::sync::RwLock;
use ugstream_proto::protocol::SessionView;
use ugstream_proto::station::{Station, StationId};

use crate::recording::RecordingBuffer;

pub struct StateManager {
    catalog: Vec<Station>,
    view: RwLock<SessionView>,
    recording: RwLock<Option<Arc<RecordingBuffer>>>,
}

impl StateManager {
    pub fn new(catalog: Vec<Station>, mut initial: SessionView) -> Self {
        initial.rev = 1;
        Self {
            catalog,
            view: RwLock::new(initial),
            recording: RwLock::new(None),
        }
    }

    /// The catalog never changes after startup.
    pub fn catalog(&self) -> &[Station] {
        &self.catalog
    }

    pub fn has_station(&self, id: &StationId) -> bool {
        self.catalog.iter().any(|s| &s.id == id)
    }

    pub async fn get_view(&self) -> SessionView {
        self.view.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.view.read().await.rev
    }

    /// Replace the view.  `rev` is bumped only when something other than the
    /// revision differs; returns whether it was.
    pub async fn publish(&self, mut view: SessionView) -> bool {
        let mut current = self.view.write().await;
        view.rev = current.rev;
        if *current == view {
            return false;
        }
        view.rev = current.rev + 1;
        *current = view;
        true
    }

    pub async fn set_recording(&self, buffer: Option<Arc<RecordingBuffer>>) {
        *self.recording.write().await = buffer;
    }

    /// The completed recording, if any.
    pub async fn recording(&self) -> Option<Arc<RecordingBuffer>> {
        self.recording.read().await.clone()
    }
}
