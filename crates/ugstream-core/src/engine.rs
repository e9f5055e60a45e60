//! Audio engine boundary.
//!
//! An engine turns a stream URL into a playable handle and later reports what
//! happened to it.  Every call is fire-and-forget: `create` never fails on the
//! spot, failures arrive afterwards as [`EngineSignal::LoadError`] or
//! [`EngineSignal::PlayError`] tagged with the handle they belong to.

use std::fmt;

/// Generation tag of one engine handle.  Handles are numbered in creation
/// order and never reused, so a signal can always be traced back to the
/// handle that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    Buffering,
    Started,
    /// The stream was closed by the server or the engine, not by the user.
    Ended,
    LoadError(String),
    PlayError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub handle: HandleId,
    pub signal: EngineSignal,
}

impl EngineEvent {
    pub fn new(handle: HandleId, signal: EngineSignal) -> Self {
        Self { handle, signal }
    }
}

pub trait PlaybackEngine {
    /// Start loading `url`.  The returned handle is live until `destroy`.
    fn create(&mut self, url: &str, volume: f32) -> HandleId;
    fn pause(&mut self, handle: HandleId);
    fn resume(&mut self, handle: HandleId);
    /// Release the handle.  Calling it again, or on a handle that already
    /// ended, has no effect.
    fn destroy(&mut self, handle: HandleId);
    fn set_volume(&mut self, handle: HandleId, volume: f32);
    /// Release everything on application teardown.
    fn shutdown(&mut self) {}
}

/// Monotonic handle allocator shared by engine implementations.
#[derive(Debug, Default)]
pub struct HandleCounter {
    last: u64,
}

impl HandleCounter {
    pub fn next_id(&mut self) -> HandleId {
        self.last += 1;
        HandleId(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_ids_are_monotonic() {
        let mut counter = HandleCounter::default();
        let a = counter.next_id();
        let b = counter.next_id();
        assert!(b > a);
        assert_eq!(a.to_string(), "h1");
    }
}
