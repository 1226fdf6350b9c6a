//! Per-flow fixed-width tag vector with final-mask semantics.
//!
//! A standalone value type rather than a mixin base class, so it can be
//! embedded directly in `Flow` and merged without any inheritance dance.

/// A facet slot's provenance-bearing focus assignment, or unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    focus_id: u32,
    block_id: u32,
}

/// Fixed-width per-flow tag vector: one optional `(focus_id, block_id)` per facet.
#[derive(Debug, Clone)]
pub struct TagContainer {
    slots: Vec<Option<Slot>>,
}

impl TagContainer {
    pub fn new(num_facets: usize) -> Self {
        TagContainer {
            slots: vec![None; num_facets],
        }
    }

    pub fn num_facets(&self) -> usize {
        self.slots.len()
    }

    /// Writes the slot unconditionally, recording provenance.
    pub fn set_tag(&mut self, facet_id: u32, focus_id: u32, block_id: u32) {
        let idx = facet_id as usize;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, None);
        }
        self.slots[idx] = Some(Slot { focus_id, block_id });
    }

    pub fn get_tag(&self, facet_id: u32) -> Option<u32> {
        self.slots
            .get(facet_id as usize)
            .and_then(|s| s.map(|slot| slot.focus_id))
    }

    /// Returns the block that last set `facet_id`, if any.
    pub fn provenance(&self, facet_id: u32) -> Option<u32> {
        self.slots
            .get(facet_id as usize)
            .and_then(|s| s.map(|slot| slot.block_id))
    }

    /// Merges `other` into `self`: for each facet set in `other`, writes it
    /// locally, overriding only when the local slot is unset OR the
    /// incoming assignment is marked `final` (final assignments are sticky:
    /// once written, a later non-final merge can never displace them,
    /// because the slot is no longer unset).
    pub fn merge(&mut self, other: &TagContainer, block_id: u32, is_final: bool) {
        if other.slots.len() > self.slots.len() {
            self.slots.resize(other.slots.len(), None);
        }
        for (facet_id, incoming) in other.slots.iter().enumerate() {
            let Some(incoming) = incoming else { continue };
            let local_unset = self.slots[facet_id].is_none();
            if local_unset || is_final {
                self.slots[facet_id] = Some(Slot {
                    focus_id: incoming.focus_id,
                    block_id,
                });
            }
        }
    }

    /// `true` iff every bit set in `final_mask` names a facet that is filled.
    pub fn is_final(&self, final_mask: u64) -> bool {
        for facet_id in 0..64u32 {
            if final_mask & (1 << facet_id) == 0 {
                continue;
            }
            if self.get_tag(facet_id).is_none() {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_only_when_unset_or_final() {
        let mut flow_tags = TagContainer::new(2);
        let mut incoming = TagContainer::new(2);
        incoming.set_tag(0, 1, 10);
        flow_tags.merge(&incoming, 10, false);
        assert_eq!(flow_tags.get_tag(0), Some(1));

        // non-final incoming cannot override an already-set slot
        let mut incoming2 = TagContainer::new(2);
        incoming2.set_tag(0, 2, 11);
        flow_tags.merge(&incoming2, 11, false);
        assert_eq!(flow_tags.get_tag(0), Some(1));

        // final incoming overrides regardless
        let mut incoming3 = TagContainer::new(2);
        incoming3.set_tag(0, 3, 12);
        flow_tags.merge(&incoming3, 12, true);
        assert_eq!(flow_tags.get_tag(0), Some(3));
        assert_eq!(flow_tags.provenance(0), Some(12));
    }

    #[test]
    fn is_final_requires_every_required_facet() {
        let mut tags = TagContainer::new(3);
        let mask = 0b101; // facets 0 and 2 required
        assert!(!tags.is_final(mask));
        tags.set_tag(0, 1, 0);
        assert!(!tags.is_final(mask));
        tags.set_tag(2, 1, 0);
        assert!(tags.is_final(mask));
        // facet 1 (not required) never matters
        assert!(tags.get_tag(1).is_none());
    }

    #[test]
    fn is_empty() {
        let mut tags = TagContainer::new(2);
        assert!(tags.is_empty());
        tags.set_tag(1, 0, 0);
        assert!(!tags.is_empty());
    }
}
