//! Stable name→id registration, used for block, facet, and focus identifiers.
//!
//! The original assigns ids via a bidirectional name mapper; `bimap`
//! (already in the teacher's dependency set) is a direct fit.

use bimap::BiMap;

#[derive(Debug, Default)]
pub struct NameIdMapper {
    map: BiMap<String, u32>,
    next_id: u32,
}

impl NameIdMapper {
    pub fn new() -> Self {
        NameIdMapper::default()
    }

    /// Returns the id for `name`, registering it with a freshly allocated id
    /// on first occurrence.
    pub fn register_name(&mut self, name: &str) -> u32 {
        if let Some(id) = self.map.get_by_left(name) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.map.insert(name.to_string(), id);
        id
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.map.get_by_left(name).copied()
    }

    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.map.get_by_right(&id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_same_name_twice_returns_same_id() {
        let mut mapper = NameIdMapper::new();
        let a = mapper.register_name("http");
        let b = mapper.register_name("dns");
        let a2 = mapper.register_name("http");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(mapper.get_name(a), Some("http"));
        assert_eq!(mapper.get_id("dns"), Some(b));
    }
}
