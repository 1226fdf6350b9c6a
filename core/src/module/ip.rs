//! IPv4 header decoder: validation, optional reassembly, per-protocol
//! traffic accounting, and next-module selection by protocol number.

use super::{Module, ModuleId, Registry};
use crate::config::Config;
use crate::error::ConfigError;
use crate::fragment::{FragmentGroupId, FragmentStore, IngestResult};
use crate::packet::Packet;

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

const MIN_HEADER_LEN: usize = 20;
const MORE_FRAGMENTS_FLAG: u16 = 0x2000;
const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;
/// `LINKTYPE_RAW`: the module's output is a bare IP datagram, no link framing.
const DATALINK_RAW: u32 = 101;

/// Truncates an address to its top 16 bits (Class-B-sized) — applied only
/// to the source address, never the destination.
fn anonymize(addr: Ipv4Addr) -> Ipv4Addr {
    let o = addr.octets();
    Ipv4Addr::new(o[0], o[1], 0, 0)
}

fn ones_complement_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    // An odd trailing byte is silently ignored, matching the source's
    // undefined behavior for malformed (odd-length) IPv4 headers.
    for chunk in data.chunks_exact(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

pub struct IpModule {
    id: ModuleId,
    name: String,
    id_flows: bool,
    defrag: bool,
    filter_fragments: bool,
    anonymize: bool,
    connections: HashMap<u8, ModuleId>,
    out_default: Option<ModuleId>,
    ipv6_module: Option<ModuleId>,
    fragment_store: FragmentStore,
    cleanup_interval: u64,
    packets_since_cleanup: u64,
    traffic_bytes: [u64; 256],
    total_traffic: u64,
}

impl IpModule {
    pub fn new(name: impl Into<String>) -> Self {
        IpModule {
            id: ModuleId::default(),
            name: name.into(),
            id_flows: false,
            defrag: true,
            filter_fragments: false,
            anonymize: false,
            connections: HashMap::new(),
            out_default: None,
            ipv6_module: None,
            fragment_store: FragmentStore::new(10_000, 1),
            cleanup_interval: 10_000,
            packets_since_cleanup: 0,
            traffic_bytes: [0u64; 256],
            total_traffic: 0,
        }
    }
}

impl Module for IpModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_id(&mut self, id: ModuleId) {
        self.id = id;
    }

    fn init(&mut self, config: &Config, registry: &Registry) -> Result<(), ConfigError> {
        let module_config = config.module(&self.name).cloned().unwrap_or_default();

        self.id_flows = module_config.id_flows;
        self.defrag = module_config.defrag;
        self.filter_fragments = module_config.filter_fragments;
        self.anonymize = config.security_manager.anonymize;
        self.cleanup_interval = module_config.cleanup_interval;
        self.packets_since_cleanup = 0;
        self.fragment_store =
            FragmentStore::new(module_config.max_fragmented, module_config.fragment_timeout);

        self.connections.clear();
        for conn in &module_config.connections {
            let target = registry
                .id_by_name(&conn.module)
                .ok_or_else(|| ConfigError::UnknownModule(conn.module.clone()))?;
            self.connections.insert(conn.protocol, target);
        }

        self.out_default = module_config
            .out_default
            .as_ref()
            .map(|name| {
                registry
                    .id_by_name(name)
                    .ok_or_else(|| ConfigError::UnknownModule(name.clone()))
            })
            .transpose()?;

        self.ipv6_module = module_config
            .ipv6_module
            .as_ref()
            .map(|name| {
                registry
                    .id_by_name(name)
                    .ok_or_else(|| ConfigError::UnknownModule(name.clone()))
            })
            .transpose()?;

        Ok(())
    }

    fn process(&mut self, packet: &mut Packet) -> Option<ModuleId> {
        let payload = packet.get_payload();
        if payload.is_empty() {
            log::debug!("{}: empty payload, nothing to decode", self.name);
            return None;
        }

        let version = payload[0] >> 4;
        if version != 4 {
            if version == 6 {
                if let Some(ipv6_module) = self.ipv6_module {
                    let span = payload.len();
                    if !packet.save_segment(self.id, span) {
                        return None;
                    }
                    return Some(ipv6_module);
                }
                if !self.id_flows {
                    log::warn!("{}: IPv6 packet with no ipv6Module configured", self.name);
                }
                return None;
            }
            log::info!("{}: unsupported IP version {version}", self.name);
            return None;
        }

        let header_length = ((payload[0] & 0x0f) as usize) * 4;
        if payload.len() < header_length || header_length < MIN_HEADER_LEN {
            log::info!("{}: malformed header length {header_length}", self.name);
            return None;
        }

        let total_length = BigEndian::read_u16(&payload[2..4]) as usize;
        if total_length < header_length {
            log::info!(
                "{}: total_length {total_length} shorter than header {header_length}",
                self.name
            );
            return None;
        }

        let ident = BigEndian::read_u16(&payload[4..6]);
        let flags_frag = BigEndian::read_u16(&payload[6..8]);
        let more_fragments = flags_frag & MORE_FRAGMENTS_FLAG != 0;
        let fragment_offset = (flags_frag & FRAGMENT_OFFSET_MASK) as u32 * 8;
        let protocol = payload[9];
        let src = Ipv4Addr::new(payload[12], payload[13], payload[14], payload[15]);
        let dst = Ipv4Addr::new(payload[16], payload[17], payload[18], payload[19]);

        if src.is_unspecified() || dst.is_unspecified() || protocol == 0 {
            log::info!("{}: invalid src/dst/protocol fields", self.name);
            return None;
        }

        if !packet.save_segment(self.id, header_length) {
            log::info!("{}: failed to save header segment", self.name);
            return None;
        }

        if more_fragments || fragment_offset != 0 {
            if self.defrag {
                self.packets_since_cleanup += 1;
                if self.packets_since_cleanup >= self.cleanup_interval {
                    self.packets_since_cleanup = 0;
                    self.fragment_store.cleanup(packet.capture_header.ts_secs);
                }

                let fragment_len = (total_length - header_length).min(packet.payload_len());
                let fragment_bytes = packet.get_payload()[..fragment_len].to_vec();
                let key = FragmentGroupId {
                    src,
                    dst,
                    id: ident,
                    protocol,
                };
                match self.fragment_store.ingest(
                    key,
                    packet.capture_header.ts_secs,
                    &fragment_bytes,
                    fragment_offset,
                    more_fragments,
                ) {
                    IngestResult::Incomplete | IngestResult::Dropped => return None,
                    IngestResult::Assembled(bytes) => {
                        if !packet.change_payload(&bytes) {
                            log::info!("{}: failed to install reassembled payload", self.name);
                            return None;
                        }
                    }
                }
            } else if self.filter_fragments && fragment_offset != 0 {
                return None;
            }
        }

        if self.id_flows {
            let effective_src = if self.anonymize { anonymize(src) } else { src };
            let direction = packet
                .flow_id
                .set_ip(IpAddr::V4(effective_src), IpAddr::V4(dst), protocol);
            packet.direction = Some(direction);
        }

        self.traffic_bytes[protocol as usize] += total_length as u64;
        self.total_traffic += total_length as u64;

        match self.connections.get(&protocol) {
            Some(module) => Some(*module),
            None => self.out_default,
        }
    }

    fn fix_header(&self, packet: &mut Packet) {
        let Some(header_length) = packet.segment_header_length(self.id) else {
            return;
        };
        let payload_remaining = packet
            .segment_payload_length_at_entry(self.id)
            .unwrap_or(0);
        let total_length = (header_length + payload_remaining) as u16;

        let Some(header) = packet.segment_bytes_mut(self.id) else {
            return;
        };
        header[6] = 0;
        header[7] = 0; // clear fragment flags/offset
        header[2..4].copy_from_slice(&total_length.to_be_bytes());
        header[10] = 0;
        header[11] = 0;
        let checksum = ones_complement_checksum(header);
        header[10..12].copy_from_slice(&checksum.to_be_bytes());
    }

    fn describe(&self, packet: &Packet) -> String {
        match packet.get_segment(self.id) {
            Some((_, len)) => format!("{}: header_length={len}", self.name),
            None => format!("{}: no segment recorded", self.name),
        }
    }

    fn get_status(&mut self, elapsed_secs: u64, period_secs: u64) -> String {
        let mut out = format!(
            "{}: {} bytes over {elapsed_secs}s (period {period_secs}s)\n",
            self.name, self.total_traffic
        );
        if self.total_traffic > 0 {
            for (protocol, bytes) in self.traffic_bytes.iter().enumerate() {
                if *bytes == 0 {
                    continue;
                }
                let pct = (*bytes as f64 / self.total_traffic as f64) * 100.0;
                out.push_str(&format!("  protocol {protocol}: {bytes} bytes ({pct:.2}%)\n"));
            }
        }
        self.traffic_bytes = [0u64; 256];
        self.total_traffic = 0;
        out
    }

    fn datalink_type(&self) -> u32 {
        DATALINK_RAW
    }
}
