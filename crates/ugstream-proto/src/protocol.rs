use serde::{Deserialize, Serialize};

use crate::navigation::StationFilter;
use crate::station::{Station, StationId};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body a peer may send.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Total size (header included) of the frame starting at `data`, once its
/// 4-byte length header has arrived.
pub fn frame_len(data: &[u8]) -> Option<usize> {
    let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some((u32::from_be_bytes(header) as usize).saturating_add(4))
}

/// Intents sent from a client to the daemon.  Every variant is handled by a
/// single exhaustive dispatcher in the session core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Intent {
    SelectStation { id: StationId },
    Next,
    Previous,
    Stop,
    SetVolume { value: f32 },
    ToggleFavorite { id: StationId },
    /// Replace the visible-list filter that next/previous navigate over.
    SetFilter { filter: StationFilter },
    StartRecording,
    StopRecording,
    /// Write the completed recording as WAV to `path` on the daemon host.
    ExportRecording { path: String },
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version, catalog and full view.
    Hello {
        protocol_version: u32,
        rev: u64,
        catalog: Vec<Station>,
        view: SessionView,
    },
    State {
        view: SessionView,
    },
    /// An intent was rejected (unknown station, recording failure, ...).
    Error {
        message: String,
    },
    Log {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Stream URL unreachable or unsupported.
    Load,
    /// Playback start rejected after the stream loaded.
    Play,
}

/// What the single playback session is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading {
        station: StationId,
    },
    Playing {
        station: StationId,
    },
    Paused {
        station: StationId,
    },
    Errored {
        station: StationId,
        kind: ErrorKind,
        reason: String,
    },
}

impl PlaybackState {
    /// The station this state is about, if any.
    pub fn station(&self) -> Option<&StationId> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Loading { station }
            | PlaybackState::Playing { station }
            | PlaybackState::Paused { station }
            | PlaybackState::Errored { station, .. } => Some(station),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading { .. } => "loading",
            PlaybackState::Playing { .. } => "playing",
            PlaybackState::Paused { .. } => "paused",
            PlaybackState::Errored { .. } => "errored",
        }
    }
}

/// Read-only view of the playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    /// Survives transitions to Idle/Errored so "resume last station" works.
    pub last_played: Option<StationId>,
    pub volume: f32,
    pub is_buffering: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            last_played: None,
            volume: 0.5,
            is_buffering: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordingView {
    #[default]
    Idle,
    /// Waiting for the input device.
    Starting {
        id: u64,
    },
    Capturing {
        id: u64,
        /// Unix epoch seconds.
        started_at: i64,
    },
    Stopping {
        id: u64,
    },
    Completed {
        id: u64,
        sample_rate: u32,
        channels: u16,
        frames: usize,
        duration_secs: f64,
    },
}

/// Everything a client renders from.  `rev` is a monotonically increasing
/// counter incremented every time the view changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(default)]
    pub rev: u64,
    pub snapshot: SessionSnapshot,
    /// Favorites in insertion order.
    pub favorites: Vec<StationId>,
    pub recording: RecordingView,
    pub filter: StationFilter,
    /// Ids of the visible list, in display order.
    pub visible: Vec<StationId>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Intent(Intent),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        let Some(total) = frame_len(data) else {
            anyhow::bail!("Insufficient data for length header");
        };
        if total - 4 > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds limit", total - 4);
        }
        if data.len() < total {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..total])?;
        Ok((msg, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_encode_decode() {
        let msg = Message::Intent(Intent::SelectStation {
            id: StationId::from("Sanyu FM"),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Intent(Intent::SelectStation { id }) => assert_eq!(id.as_str(), "sanyu-fm"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_unit_intent_wire_shape() {
        let json = serde_json::to_string(&Intent::Next).unwrap();
        assert_eq!(json, r#"{"cmd":"Next"}"#);
        let parsed: Message = serde_json::from_str(r#"{"cmd":"SetVolume","value":0.25}"#).unwrap();
        assert!(matches!(parsed, Message::Intent(Intent::SetVolume { value }) if value == 0.25));
    }

    #[test]
    fn test_hello_encode_decode() {
        let view = SessionView {
            rev: 42,
            snapshot: SessionSnapshot {
                state: PlaybackState::Errored {
                    station: StationId::from("A"),
                    kind: ErrorKind::Load,
                    reason: "404".into(),
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 42,
            catalog: vec![Station::new("A", "http://a")],
            view,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                catalog,
                view,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 42);
                assert_eq!(catalog.len(), 1);
                assert_eq!(view.snapshot.state.label(), "errored");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_needs_full_frame() {
        let encoded = Message::Intent(Intent::GetState).encode().unwrap();
        assert!(Message::decode(&encoded[..3]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert_eq!(frame_len(&encoded[..3]), None);
        assert_eq!(frame_len(&encoded), Some(encoded.len()));
    }

    #[test]
    fn test_decode_rejects_unknown_command_and_oversized_frame() {
        let body = br#"{"cmd":"Bogus"}"#;
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(body);
        assert!(Message::decode(&frame).is_err());

        let huge = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(Message::decode(&huge).is_err());
    }

    #[test]
    fn test_state_station() {
        let id = StationId::from("B");
        assert_eq!(PlaybackState::Idle.station(), None);
        assert_eq!(PlaybackState::Paused { station: id.clone() }.station(), Some(&id));
    }
}
