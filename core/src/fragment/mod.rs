//! IPv4 reassembly: holes-based fragment groups (RFC 815) with an upper
//! bound on in-flight groups and time-based eviction.

use crate::buffer::ByteBuffer;

use hashlink::LinkedHashMap;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

const INITIAL_PAYLOAD_CAPACITY: usize = 65536;

/// Identifies all IP fragments sharing (src, dst, id, proto).
///
/// Equality considers all four fields, but the `Hash` impl only mixes in
/// `id` — adequate because the IP identification field already provides
/// collision avoidance across groups sharing a host pair and protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentGroupId {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub id: u16,
    pub protocol: u8,
}

impl Hash for FragmentGroupId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A contiguous range of bytes not yet received (RFC 815).
/// `last` is the offset one past the hole's final byte; `MAX_END` stands in for infinity.
#[derive(Debug, Clone, Copy)]
struct Hole {
    first: u32,
    last: u32,
}

const MAX_END: u32 = u32::MAX;

/// State for one in-flight fragmented IP datagram.
#[derive(Debug)]
pub struct FragmentGroup {
    first_timestamp_secs: i64,
    total_length: Option<u32>,
    payload: ByteBuffer,
    holes: Vec<Hole>,
}

impl FragmentGroup {
    fn new(first_timestamp_secs: i64) -> Self {
        FragmentGroup {
            first_timestamp_secs,
            total_length: None,
            payload: ByteBuffer::with_capacity(INITIAL_PAYLOAD_CAPACITY),
            holes: vec![Hole {
                first: 0,
                last: MAX_END,
            }],
        }
    }

    pub fn first_timestamp_secs(&self) -> i64 {
        self.first_timestamp_secs
    }

    /// Adds one fragment's payload at `offset`. Returns `false` only on
    /// allocator failure (here: a configured capacity cap on the
    /// reassembly buffer); the fragment is then silently dropped and the
    /// group left untouched.
    pub fn add_fragment(&mut self, payload: &[u8], offset: u32, more_fragments: bool) -> bool {
        if !self.payload.copy_at(offset as usize, payload) {
            return false;
        }

        let last = offset + payload.len() as u32;
        if !more_fragments {
            self.total_length = Some(last);
        }

        let mut new_holes = Vec::new();
        self.holes.retain(|hole| {
            // no interaction with this hole
            if offset > hole.last || last < hole.first {
                return true;
            }
            if offset > hole.first {
                new_holes.push(Hole {
                    first: hole.first,
                    last: offset,
                });
            }
            if last < hole.last && more_fragments {
                new_holes.push(Hole {
                    first: last,
                    last: hole.last,
                });
            }
            false
        });
        self.holes.extend(new_holes);

        true
    }

    /// `true` once every byte offset in `[0, total_length)` has arrived
    /// and `total_length` is known.
    pub fn is_completed(&self) -> bool {
        self.holes.is_empty()
    }

    pub fn assembled_payload(&self) -> &[u8] {
        self.payload.as_slice()
    }
}

/// Outcome of handing one IP fragment to the store.
pub enum IngestResult {
    /// The group is now complete; carries the reassembled payload. The
    /// group has already been evicted from the store.
    Assembled(Vec<u8>),
    /// The group is still missing data.
    Incomplete,
    /// The fragment could not be tracked: either the store is at
    /// capacity and this is a new group, or the fragment failed to copy
    /// into the group's buffer.
    Dropped,
}

/// Per-fragment-group state keyed by (src, dst, id, proto), with a cap on
/// concurrently tracked groups and time-based eviction.
///
/// Uses `hashlink::LinkedHashMap` rather than `std::HashMap` so cleanup
/// ticks and diagnostics walk groups in arrival order.
pub struct FragmentStore {
    table: LinkedHashMap<FragmentGroupId, FragmentGroup>,
    max_groups: usize,
    timeout_secs: u32,
}

impl FragmentStore {
    pub fn new(max_groups: usize, timeout_secs: u32) -> Self {
        FragmentStore {
            table: LinkedHashMap::new(),
            max_groups,
            timeout_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Adds one fragment to its group, creating the group if this is its
    /// first-seen fragment.
    pub fn ingest(
        &mut self,
        key: FragmentGroupId,
        timestamp_secs: i64,
        payload: &[u8],
        offset: u32,
        more_fragments: bool,
    ) -> IngestResult {
        if !self.table.contains_key(&key) {
            if self.table.len() >= self.max_groups {
                log::trace!("maximum fragmented IP packet count reached; dropping this fragment");
                return IngestResult::Dropped;
            }
            self.table.insert(key, FragmentGroup::new(timestamp_secs));
        }

        let group = self.table.get_mut(&key).expect("just inserted or present");
        if !group.add_fragment(payload, offset, more_fragments) {
            log::trace!("fragment failed to copy into reassembly buffer; dropping fragment");
            return IngestResult::Dropped;
        }

        if group.is_completed() {
            let assembled = group.assembled_payload().to_vec();
            self.table.remove(&key);
            IngestResult::Assembled(assembled)
        } else {
            IngestResult::Incomplete
        }
    }

    /// Evicts every group whose first fragment arrived more than
    /// `timeout_secs` before `now_secs`.
    pub fn cleanup(&mut self, now_secs: i64) {
        let timeout = self.timeout_secs as i64;
        let expired: Vec<FragmentGroupId> = self
            .table
            .iter()
            .filter(|(_, group)| group.first_timestamp_secs + timeout < now_secs)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.table.remove(key);
        }
        if !expired.is_empty() {
            log::trace!("fragment cleanup evicted {} group(s)", expired.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FragmentGroupId {
        FragmentGroupId {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            id: 42,
            protocol: 6,
        }
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut store = FragmentStore::new(10, 1);
        let a = vec![b'A'; 1480];
        let b = vec![b'B'; 1480];
        let c = vec![b'C'; 40];

        assert!(matches!(
            store.ingest(key(), 0, &a, 0, true),
            IngestResult::Incomplete
        ));
        assert!(matches!(
            store.ingest(key(), 0, &c, 2960, false),
            IngestResult::Incomplete
        ));
        let result = store.ingest(key(), 0, &b, 1480, true);
        match result {
            IngestResult::Assembled(payload) => {
                let mut expected = a.clone();
                expected.extend_from_slice(&b);
                expected.extend_from_slice(&c);
                assert_eq!(payload, expected);
            }
            _ => panic!("expected assembled payload"),
        }
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn dropped_fragment_leaves_group_incomplete_until_evicted() {
        let mut store = FragmentStore::new(10, 1);
        let a = vec![b'A'; 100];
        let c = vec![b'C'; 40];
        store.ingest(key(), 0, &a, 0, true);
        store.ingest(key(), 0, &c, 300, false); // middle hole [100, 300) remains
        assert_eq!(store.len(), 1);

        store.cleanup(1);
        assert_eq!(store.len(), 1, "not yet past timeout");
        store.cleanup(2);
        assert_eq!(store.len(), 0, "evicted once timeout elapsed");
    }

    #[test]
    fn capacity_cap_drops_new_groups() {
        let mut store = FragmentStore::new(1, 1);
        let k1 = key();
        let mut k2 = key();
        k2.id = 99;
        let payload = vec![0u8; 10];
        assert!(matches!(
            store.ingest(k1, 0, &payload, 0, true),
            IngestResult::Incomplete
        ));
        assert!(matches!(
            store.ingest(k2, 0, &payload, 0, true),
            IngestResult::Dropped
        ));
    }
}
