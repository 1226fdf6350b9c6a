//! Flow identity and per-flow state.
//!
//! Packet/byte counters, a per-block hint set, and tag-container finality
//! are flattened into `Flow`'s own fields rather than split across mixin
//! base types.

use crate::classification::tag::TagContainer;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;

/// Non-owning handle into a `FlowTracker`'s table. A `Packet` carries one
/// of these — a numeric id into a central table owned by the tracker —
/// rather than a pointer or `Rc` into the flow it belongs to.
pub type FlowHandle = u64;

/// Canonical 5-tuple-ish identity. Ports are filled in by later (transport) decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId {
    pub lower: IpAddr,
    pub higher: IpAddr,
    pub protocol: u8,
    pub lower_port: u16,
    pub higher_port: u16,
}

impl Default for FlowId {
    fn default() -> Self {
        FlowId {
            lower: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            higher: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            protocol: 0,
            lower_port: 0,
            higher_port: 0,
        }
    }
}

/// Which of the two arrival addresses the caller presented as `src`, relative to the canonical ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Direction {
    /// `src` sorted below `dst`; arrival address matches the canonical `lower`.
    Upload,
    /// Arrival `src` matches the canonical `higher`.
    Download,
}

impl FlowId {
    /// Resets to the zero identity.
    pub fn reset(&mut self) {
        *self = FlowId::default();
    }

    /// Sets the IP-layer identity, canonicalizing (src, dst) into (lower, higher)
    /// so that both directions of a flow share one record.
    ///
    /// Returns the direction of this packet relative to the canonical ordering.
    pub fn set_ip(&mut self, src: IpAddr, dst: IpAddr, protocol: u8) -> Direction {
        self.protocol = protocol;
        if src <= dst {
            self.lower = src;
            self.higher = dst;
            Direction::Upload
        } else {
            self.lower = dst;
            self.higher = src;
            Direction::Download
        }
    }

    /// Sets the transport ports, canonicalizing alongside whatever endpoint
    /// ordering `set_ip` already established.
    pub fn set_ports(&mut self, src_port: u16, dst_port: u16, direction: Direction) {
        match direction {
            Direction::Upload => {
                self.lower_port = src_port;
                self.higher_port = dst_port;
            }
            Direction::Download => {
                self.lower_port = dst_port;
                self.higher_port = src_port;
            }
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{} proto={}",
            self.lower, self.lower_port, self.higher, self.higher_port, self.protocol
        )
    }
}

/// Opaque identity for a user or piece of equipment attributed to a flow.
pub type Identity = String;

/// A tracked flow: canonical identity, bidirectional counters, and classification state.
#[derive(Debug, Clone)]
pub struct Flow {
    pub flow_id: FlowId,
    pub upload_packets: u64,
    pub download_packets: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub tags: TagContainer,
    hints: HashSet<(u32, u32)>,
    pub user_id: Option<Identity>,
    pub equipment_id: Option<Identity>,
    pub last_hinted_packet_index: Option<u64>,
    pub first_final_classified_packet_index: Option<u64>,
    final_mask: u64,
}

impl Flow {
    pub fn new(flow_id: FlowId, num_facets: usize, final_mask: u64) -> Self {
        Flow {
            flow_id,
            upload_packets: 0,
            download_packets: 0,
            upload_bytes: 0,
            download_bytes: 0,
            tags: TagContainer::new(num_facets),
            hints: HashSet::new(),
            user_id: None,
            equipment_id: None,
            last_hinted_packet_index: None,
            first_final_classified_packet_index: None,
            final_mask,
        }
    }

    fn packet_index(&self) -> u64 {
        self.upload_packets + self.download_packets
    }

    pub fn record_packet(&mut self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Upload => {
                self.upload_packets += 1;
                self.upload_bytes += bytes;
            }
            Direction::Download => {
                self.download_packets += 1;
                self.download_bytes += bytes;
            }
        }
    }

    /// Records a signature-match hint. Returns `true` only on the first
    /// occurrence of this `(block_id, hint_id)` pair for this flow, at
    /// which point `last_hinted_packet_index` is updated.
    pub fn set_hint(&mut self, block_id: u32, hint_id: u32) -> bool {
        let first_occurrence = self.hints.insert((block_id, hint_id));
        if first_occurrence {
            self.last_hinted_packet_index = Some(self.packet_index());
        }
        first_occurrence
    }

    /// Merges `tags` into the flow's tag container. If this transitions
    /// `is_final` from `false` to `true`, records
    /// `first_final_classified_packet_index`.
    pub fn set_tags(&mut self, tags: &TagContainer, block_id: u32, is_final: bool) {
        let was_final = self.tags.is_final(self.final_mask);
        self.tags.merge(tags, block_id, is_final);
        let now_final = self.tags.is_final(self.final_mask);
        if !was_final && now_final {
            self.first_final_classified_packet_index = Some(self.packet_index());
        }
    }

    pub fn is_final(&self) -> bool {
        self.tags.is_final(self.final_mask)
    }

    pub fn set_user_id(&mut self, id: Identity) {
        self.user_id = Some(id);
    }

    pub fn set_equipment_id(&mut self, id: Identity) {
        self.equipment_id = Some(id);
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} up={}/{}B down={}/{}B|{}|{}",
            self.flow_id,
            self.upload_packets,
            self.upload_bytes,
            self.download_packets,
            self.download_bytes,
            self.user_id.as_deref().unwrap_or("na"),
            self.equipment_id.as_deref().unwrap_or("na"),
        )
    }
}

/// The central flow table: owns every `Flow`, indexed by canonical
/// identity, and vends `FlowHandle`s to packets.
#[derive(Debug, Default)]
pub struct FlowTracker {
    by_id: HashMap<FlowId, FlowHandle>,
    flows: HashMap<FlowHandle, Flow>,
    next_handle: FlowHandle,
}

impl FlowTracker {
    pub fn new() -> Self {
        FlowTracker::default()
    }

    /// Returns the handle for `flow_id`, creating a fresh `Flow` on first sight.
    pub fn get_or_create(&mut self, flow_id: FlowId, num_facets: usize, final_mask: u64) -> FlowHandle {
        if let Some(&handle) = self.by_id.get(&flow_id) {
            return handle;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.by_id.insert(flow_id, handle);
        self.flows.insert(handle, Flow::new(flow_id, num_facets, final_mask));
        handle
    }

    pub fn get(&self, handle: FlowHandle) -> Option<&Flow> {
        self.flows.get(&handle)
    }

    pub fn get_mut(&mut self, handle: FlowHandle) -> Option<&mut Flow> {
        self.flows.get_mut(&handle)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn set_ip_canonicalizes_endpoints() {
        let mut id = FlowId::default();
        let dir = id.set_ip(addr(10, 0, 0, 2), addr(10, 0, 0, 1), 6);
        assert_eq!(dir, Direction::Download);
        assert_eq!(id.lower, addr(10, 0, 0, 1));
        assert_eq!(id.higher, addr(10, 0, 0, 2));

        let mut id2 = FlowId::default();
        let dir2 = id2.set_ip(addr(10, 0, 0, 1), addr(10, 0, 0, 2), 6);
        assert_eq!(dir2, Direction::Upload);
        assert_eq!(id2.lower, id.lower);
        assert_eq!(id2.higher, id.higher);
    }

    #[test]
    fn is_final_transitions_once() {
        let mut flow = Flow::new(FlowId::default(), 2, 0b01);
        assert!(!flow.is_final());

        let mut partial = TagContainer::new(2);
        partial.set_tag(1, 5, 0);
        flow.set_tags(&partial, 0, false);
        assert!(!flow.is_final());
        assert!(flow.first_final_classified_packet_index.is_none());

        flow.record_packet(Direction::Upload, 100);
        let mut required = TagContainer::new(2);
        required.set_tag(0, 9, 0);
        flow.set_tags(&required, 0, true);
        assert!(flow.is_final());
        assert_eq!(flow.first_final_classified_packet_index, Some(1));

        // reclassification permitted but finality cannot flip back to false
        let mut more = TagContainer::new(2);
        more.set_tag(0, 11, 1);
        flow.set_tags(&more, 1, false);
        assert!(flow.is_final());
        assert_eq!(flow.first_final_classified_packet_index, Some(1));
    }

    #[test]
    fn set_hint_reports_first_occurrence_only() {
        let mut flow = Flow::new(FlowId::default(), 1, 0);
        assert!(flow.set_hint(0, 42));
        assert!(!flow.set_hint(0, 42));
        assert!(flow.set_hint(0, 43));
    }

    #[test]
    fn tracker_reuses_handle_for_same_identity() {
        let mut tracker = FlowTracker::new();
        let mut id = FlowId::default();
        id.set_ip(addr(10, 0, 0, 1), addr(10, 0, 0, 2), 6);
        let h1 = tracker.get_or_create(id, 1, 0);
        let h2 = tracker.get_or_create(id, 1, 0);
        assert_eq!(h1, h2);
        assert_eq!(tracker.len(), 1);

        let mut other = FlowId::default();
        other.set_ip(addr(10, 0, 0, 3), addr(10, 0, 0, 4), 6);
        let h3 = tracker.get_or_create(other, 1, 0);
        assert_ne!(h1, h3);
        assert_eq!(tracker.len(), 2);
    }
}
