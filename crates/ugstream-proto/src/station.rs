use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a station, derived from its display name.
///
/// `"Radio CBS Emmanduso"` → `radio-cbs-emmanduso`.  Two stations whose names
/// slug to the same id cannot live in one catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn from_name(name: &str) -> Self {
        let mut slug = String::with_capacity(name.len());
        let mut pending_dash = false;
        for ch in name.trim().chars() {
            if ch.is_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.extend(ch.to_lowercase());
            } else {
                pending_dash = true;
            }
        }
        Self(slug)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    /// Accepts either an id or a display name; both slug to the same value.
    fn from(value: &str) -> Self {
        Self::from_name(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub logo_url: String,
    /// Genre / grouping used by the category filter.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub recommended: bool,
}

impl Station {
    pub fn new(name: impl Into<String>, stream_url: impl Into<String>) -> Self {
        let name = name.into().trim().to_string();
        Self {
            id: StationId::from_name(&name),
            name,
            stream_url: stream_url.into().trim().to_string(),
            logo_url: String::new(),
            category: None,
            country: None,
            recommended: false,
        }
    }

    pub fn with_logo(mut self, logo_url: impl Into<String>) -> Self {
        self.logo_url = logo_url.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        self.category = (!category.trim().is_empty()).then(|| category.trim().to_string());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        let country = country.into();
        self.country = (!country.trim().is_empty()).then(|| country.trim().to_string());
        self
    }

    pub fn recommended(mut self, recommended: bool) -> Self {
        self.recommended = recommended;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_slug() {
        assert_eq!(StationId::from_name("Sanyu FM").as_str(), "sanyu-fm");
        assert_eq!(StationId::from_name("Radio City ").as_str(), "radio-city");
        assert_eq!(
            StationId::from_name("Radio Pacis (Arua)").as_str(),
            "radio-pacis-arua"
        );
        assert_eq!(StationId::from_name("91.2 Crooze FM").as_str(), "91-2-crooze-fm");
        assert!(StationId::from_name("  --  ").is_empty());
    }

    #[test]
    fn test_id_from_id_is_stable() {
        let id = StationId::from_name("X FM");
        assert_eq!(StationId::from(id.as_str()), id);
    }

    #[test]
    fn test_station_builder_trims() {
        let s = Station::new(" K FM ", " http://radio.kfm.co.ug:8000/stream ")
            .with_category("  ")
            .with_country("Uganda");
        assert_eq!(s.name, "K FM");
        assert_eq!(s.stream_url, "http://radio.kfm.co.ug:8000/stream");
        assert_eq!(s.category, None);
        assert_eq!(s.country.as_deref(), Some("Uganda"));
    }
}
