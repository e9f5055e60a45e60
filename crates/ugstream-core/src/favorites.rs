use ugstream_proto::station::StationId;

/// In-memory favorites, kept in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct Favorites {
    ids: Vec<StationId>,
}

impl Favorites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership.  Returns `true` when the station is now a favorite.
    pub fn toggle(&mut self, id: &StationId) -> bool {
        if let Some(pos) = self.ids.iter().position(|f| f == id) {
            self.ids.remove(pos);
            false
        } else {
            self.ids.push(id.clone());
            true
        }
    }

    pub fn contains(&self, id: &StationId) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationId> {
        self.ids.iter()
    }

    pub fn to_vec(&self) -> Vec<StationId> {
        self.ids.clone()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_twice_restores() {
        let mut favs = Favorites::new();
        let a = StationId::from("A");
        let b = StationId::from("B");
        favs.toggle(&b);
        let before = favs.to_vec();

        assert!(favs.toggle(&a));
        assert!(favs.contains(&a));
        assert!(!favs.toggle(&a));
        assert_eq!(favs.to_vec(), before);
    }

    #[test]
    fn test_insertion_order() {
        let mut favs = Favorites::new();
        for name in ["C", "A", "B"] {
            favs.toggle(&StationId::from(name));
        }
        favs.toggle(&StationId::from("A"));
        let order: Vec<&str> = favs.iter().map(|id| id.as_str()).collect();
        assert_eq!(order, vec!["c", "b"]);
        assert_eq!(favs.len(), 2);
    }
}
