//! Visible-list filtering and next/previous resolution.
//!
//! The visible list is the catalog, in catalog order, narrowed by a
//! [`StationFilter`].  Navigation wraps circularly inside the visible list.
//! When the anchor station is not part of the visible list (filtered out, or
//! the list is empty) navigation wraps inside the full catalog instead.

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::station::{Station, StationId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationFilter {
    /// Case-insensitive substring matched against the station name.
    #[serde(default)]
    pub query: String,
    /// Case-insensitive exact match against the station category.
    #[serde(default)]
    pub category: Option<String>,
    /// Only stations in the favorites set.
    #[serde(default)]
    pub favorites_only: bool,
}

impl StationFilter {
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn favorites() -> Self {
        Self {
            favorites_only: true,
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn matches(&self, station: &Station, is_favorite: impl Fn(&StationId) -> bool) -> bool {
        let q = self.query.trim();
        if !q.is_empty() && !station.name.to_lowercase().contains(&q.to_lowercase()) {
            return false;
        }
        if let Some(wanted) = self.category.as_deref() {
            let hit = station
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(wanted.trim()));
            if !hit {
                return false;
            }
        }
        !self.favorites_only || is_favorite(&station.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    fn step(self, i: usize, n: usize) -> usize {
        match self {
            Direction::Next => (i + 1) % n,
            Direction::Previous => (i + n - 1) % n,
        }
    }
}

pub fn visible_stations<'a>(
    catalog: &'a Catalog,
    filter: &StationFilter,
    is_favorite: impl Fn(&StationId) -> bool,
) -> Vec<&'a Station> {
    catalog
        .stations()
        .iter()
        .filter(|s| filter.matches(s, &is_favorite))
        .collect()
}

/// Station after/before `anchor`.  `None` only when `anchor` is unknown to
/// the catalog.
pub fn neighbor<'a>(
    catalog: &'a Catalog,
    visible: &[&'a Station],
    anchor: &StationId,
    direction: Direction,
) -> Option<&'a Station> {
    if let Some(i) = visible.iter().position(|s| &s.id == anchor) {
        return Some(visible[direction.step(i, visible.len())]);
    }
    let i = catalog.position(anchor)?;
    catalog
        .stations()
        .get(direction.step(i, catalog.len()))
}
