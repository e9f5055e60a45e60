//! SessionController — the one owner of "what is playing".
//!
//! The controller holds the catalog, the favorites, the visible-list filter
//! and at most one live engine handle.  Every transition runs to completion
//! inside a single call; the caller (the session core loop) feeds it user
//! intents and engine events one at a time.
//!
//! Replacing a session always destroys the old handle before the new one is
//! created, and every engine event is checked against the live handle's id so
//! late signals from a superseded handle cannot move the state.

use tracing::{debug, info, warn};
use ugstream_proto::catalog::Catalog;
use ugstream_proto::navigation::{neighbor, visible_stations, Direction, StationFilter};
use ugstream_proto::protocol::{ErrorKind, PlaybackState, SessionSnapshot};
use ugstream_proto::station::{Station, StationId};

use crate::engine::{EngineEvent, EngineSignal, HandleId, PlaybackEngine};
use crate::favorites::Favorites;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ControllerError {
    #[error("unknown station '{0}'")]
    UnknownStation(StationId),
    #[error("volume must be a number")]
    InvalidVolume,
}

#[derive(Debug)]
struct LiveHandle {
    id: HandleId,
    station: StationId,
}

enum Shortcut {
    Pause(HandleId),
    Resume(HandleId),
}

pub struct SessionController<E: PlaybackEngine> {
    catalog: Catalog,
    favorites: Favorites,
    filter: StationFilter,
    engine: E,
    live: Option<LiveHandle>,
    state: PlaybackState,
    last_played: Option<StationId>,
    volume: f32,
    buffering: bool,
}

impl<E: PlaybackEngine> SessionController<E> {
    pub fn new(catalog: Catalog, engine: E, volume: f32) -> Self {
        Self {
            catalog,
            favorites: Favorites::new(),
            filter: StationFilter::default(),
            engine,
            live: None,
            state: PlaybackState::Idle,
            last_played: None,
            volume: if volume.is_nan() { 0.5 } else { volume.clamp(0.0, 1.0) },
            buffering: false,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn favorites(&self) -> &Favorites {
        &self.favorites
    }

    pub fn filter(&self) -> &StationFilter {
        &self.filter
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn live_handle(&self) -> Option<HandleId> {
        self.live.as_ref().map(|l| l.id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            last_played: self.last_played.clone(),
            volume: self.volume,
            is_buffering: self.buffering,
        }
    }

    pub fn visible(&self) -> Vec<&Station> {
        visible_stations(&self.catalog, &self.filter, |id| self.favorites.contains(id))
    }

    pub fn visible_ids(&self) -> Vec<StationId> {
        self.visible().into_iter().map(|s| s.id.clone()).collect()
    }

    // ── intents ───────────────────────────────────────────────────────────────

    pub fn select_station(&mut self, id: &StationId) -> Result<(), ControllerError> {
        let station = self
            .catalog
            .get(id)
            .ok_or_else(|| ControllerError::UnknownStation(id.clone()))?;
        let url = station.stream_url.clone();
        let name = station.name.clone();

        let same_handle = self
            .live
            .as_ref()
            .filter(|l| &l.station == id)
            .map(|l| l.id);
        let shortcut = match (&self.state, same_handle) {
            (PlaybackState::Playing { station }, Some(h)) if station == id => {
                Some(Shortcut::Pause(h))
            }
            (PlaybackState::Paused { station }, Some(h)) if station == id => {
                Some(Shortcut::Resume(h))
            }
            _ => None,
        };

        match shortcut {
            Some(Shortcut::Pause(h)) => {
                info!("Pausing '{}' ({})", name, h);
                self.engine.pause(h);
                self.state = PlaybackState::Paused { station: id.clone() };
                self.buffering = false;
            }
            Some(Shortcut::Resume(h)) => {
                info!("Resuming '{}' ({})", name, h);
                self.engine.resume(h);
                self.state = PlaybackState::Playing { station: id.clone() };
            }
            None => {
                self.teardown();
                let h = self.engine.create(&url, self.volume);
                info!("Loading '{}' ({}) from {}", name, h, url);
                self.live = Some(LiveHandle {
                    id: h,
                    station: id.clone(),
                });
                self.state = PlaybackState::Loading { station: id.clone() };
                self.buffering = true;
            }
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<(), ControllerError> {
        self.navigate(Direction::Next)
    }

    pub fn previous(&mut self) -> Result<(), ControllerError> {
        self.navigate(Direction::Previous)
    }

    fn navigate(&mut self, direction: Direction) -> Result<(), ControllerError> {
        let Some(anchor) = self.state.station().or(self.last_played.as_ref()).cloned() else {
            debug!("{:?}: nothing playing and nothing played yet", direction);
            return Ok(());
        };

        let target = {
            let visible = self.visible();
            if !visible.iter().any(|s| s.id == anchor) {
                debug!(
                    "{:?}: '{}' not in the visible list, wrapping in the full catalog",
                    direction, anchor
                );
            }
            neighbor(&self.catalog, &visible, &anchor, direction).map(|s| s.id.clone())
        };
        let Some(target) = target else {
            warn!("{:?}: '{}' is not in the catalog", direction, anchor);
            return Ok(());
        };

        if target == anchor && self.live.is_some() {
            debug!("{:?}: '{}' is the only candidate, nothing to do", direction, anchor);
            return Ok(());
        }
        self.select_station(&target)
    }

    /// Tear the live handle down and go idle.  `last_played` is kept.
    pub fn stop(&mut self) {
        if self.live.is_some() {
            info!("Stopping playback");
        }
        self.teardown();
        self.state = PlaybackState::Idle;
        self.buffering = false;
    }

    pub fn set_volume(&mut self, value: f32) -> Result<f32, ControllerError> {
        if value.is_nan() {
            return Err(ControllerError::InvalidVolume);
        }
        let volume = value.clamp(0.0, 1.0);
        self.volume = volume;
        if let Some(live) = self.live.as_ref() {
            self.engine.set_volume(live.id, volume);
        }
        debug!("Volume set to {:.2}", volume);
        Ok(volume)
    }

    pub fn toggle_favorite(&mut self, id: &StationId) -> Result<bool, ControllerError> {
        if !self.catalog.contains(id) {
            return Err(ControllerError::UnknownStation(id.clone()));
        }
        let now = self.favorites.toggle(id);
        info!("Favorite '{}' → {}", id, now);
        Ok(now)
    }

    pub fn set_filter(&mut self, filter: StationFilter) {
        debug!("Filter set to {:?}", filter);
        self.filter = filter;
    }

    /// Release the live handle and the engine on application teardown.
    pub fn shutdown(&mut self) {
        self.stop();
        self.engine.shutdown();
    }

    // ── engine events ─────────────────────────────────────────────────────────

    /// Apply an engine event.  Returns `true` when the snapshot changed.
    pub fn on_engine_event(&mut self, event: EngineEvent) -> bool {
        let station = match self.live.as_ref() {
            Some(live) if live.id == event.handle => live.station.clone(),
            Some(live) => {
                debug!(
                    "Ignoring {:?} from superseded handle {} (live: {})",
                    event.signal, event.handle, live.id
                );
                return false;
            }
            None => {
                debug!(
                    "Ignoring {:?} from released handle {}",
                    event.signal, event.handle
                );
                return false;
            }
        };

        match event.signal {
            EngineSignal::Buffering => {
                let changed = !self.buffering;
                self.buffering = true;
                changed
            }
            EngineSignal::Started => {
                if !matches!(self.state, PlaybackState::Loading { .. }) {
                    debug!("Duplicate start for '{}' in state {}", station, self.state.label());
                    return false;
                }
                info!("Playing '{}'", station);
                self.last_played = Some(station.clone());
                self.state = PlaybackState::Playing { station };
                self.buffering = false;
                true
            }
            EngineSignal::Ended => {
                info!("Stream for '{}' ended", station);
                self.teardown();
                self.state = PlaybackState::Idle;
                self.buffering = false;
                true
            }
            EngineSignal::LoadError(reason) => {
                self.fail(station, ErrorKind::Load, reason);
                true
            }
            EngineSignal::PlayError(reason) => {
                self.fail(station, ErrorKind::Play, reason);
                true
            }
        }
    }

    fn fail(&mut self, station: StationId, kind: ErrorKind, reason: String) {
        warn!("Playback of '{}' failed ({:?}): {}", station, kind, reason);
        self.teardown();
        self.state = PlaybackState::Errored {
            station,
            kind,
            reason,
        };
        self.buffering = false;
    }

    fn teardown(&mut self) {
        if let Some(live) = self.live.take() {
            debug!("Destroying {} for '{}'", live.id, live.station);
            self.engine.destroy(live.id);
        }
    }
}
