pub mod capture;
pub mod controller;
pub mod core;
pub mod engine;
pub mod favorites;
pub mod mpv;
pub mod mpv_engine;
pub mod recording;
pub mod state;

/// What the SessionCore broadcasts to the socket and HTTP surfaces.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The published view changed; receivers should fetch it from StateManager.
    StateUpdated,
    /// An intent was rejected.
    Error(String),
    /// A WARN/ERROR log line from anywhere in the process.
    Log(String),
}
