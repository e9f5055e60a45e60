use std::collections::HashMap;
use std::path::Path;

use crate::station::{Station, StationId};

/// The station table the app ships with.  Used when neither a user TOML file
/// nor an m3u source is available.
pub const BUILTIN_STATIONS_TOML: &str = include_str!("../../../stations.toml");

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CatalogError {
    #[error("station #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("station '{name}' has no stream url")]
    MissingUrl { name: String },
    #[error("stations '{first}' and '{second}' share the id '{id}'")]
    DuplicateStation {
        id: StationId,
        first: String,
        second: String,
    },
}

/// Immutable, ordered station list.  Every id is unique.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    stations: Vec<Station>,
    index: HashMap<StationId, usize>,
}

impl Catalog {
    pub fn new(stations: Vec<Station>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(stations.len());
        for (i, station) in stations.iter().enumerate() {
            if station.id.is_empty() {
                return Err(CatalogError::EmptyName { index: i });
            }
            if station.stream_url.trim().is_empty() {
                return Err(CatalogError::MissingUrl {
                    name: station.name.clone(),
                });
            }
            if let Some(&prev) = index.get(&station.id) {
                let first: &Station = &stations[prev];
                return Err(CatalogError::DuplicateStation {
                    id: station.id.clone(),
                    first: first.name.clone(),
                    second: station.name.clone(),
                });
            }
            index.insert(station.id.clone(), i);
        }
        Ok(Self { stations, index })
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Ok(Self::new(parse_stations_from_toml_str(BUILTIN_STATIONS_TOML)?)?)
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn get(&self, id: &StationId) -> Option<&Station> {
        self.position(id).map(|i| &self.stations[i])
    }

    pub fn position(&self, id: &StationId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &StationId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

// ── m3u loader ────────────────────────────────────────────────────────────────

pub fn parse_m3u_from_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let mut stations = Vec::new();
    let mut pending: Option<(String, Vec<(String, String)>)> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some((attrs, name)) = split_extinf(rest) {
                pending = Some((name.trim().to_string(), parse_attributes(attrs)));
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let (name, attrs) = pending.take().unwrap_or_else(|| (url.clone(), Vec::new()));

        let mut station = Station::new(name, url);
        for (key, value) in attrs {
            match key.as_str() {
                "tvg-logo" => station = station.with_logo(value),
                "group-title" => station = station.with_category(value),
                "tvg-country" => station = station.with_country(value),
                _ => {}
            }
        }
        stations.push(station);
    }

    Ok(stations)
}

pub fn load_stations_from_m3u(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_m3u_from_str(&content)
}

/// Split `-1 tvg-logo="a,b" group-title="x",Name` at the first comma that is
/// not inside a quoted attribute value.
fn split_extinf(rest: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (i, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some((&rest[..i], &rest[i + 1..])),
            _ => {}
        }
    }
    None
}

fn parse_attributes(attrs: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = attrs;
    while let Some(eq) = rest.find("=\"") {
        let key = rest[..eq]
            .rsplit(char::is_whitespace)
            .next()
            .unwrap_or_default()
            .to_string();
        let after = &rest[eq + 2..];
        let Some(close) = after.find('"') else {
            break;
        };
        out.push((key, after[..close].to_string()));
        rest = &after[close + 1..];
    }
    out
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[station]]` table.
/// The id is never written by hand; it is derived from `name`.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    name: String,
    url: String,
    #[serde(default)]
    logo: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    recommended: bool,
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let stations = file
        .station
        .into_iter()
        .map(|s| {
            Station::new(s.name, s.url)
                .with_logo(s.logo)
                .with_category(s.category)
                .with_country(s.country)
                .recommended(s.recommended)
        })
        .collect();
    Ok(stations)
}
