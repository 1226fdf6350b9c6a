//! The pipeline driver: composes the registry, packet pool, flow
//! tracker, and classification catalog, and walks each captured frame
//! through its module graph to completion.

use crate::classification::ClassificationMetadata;
use crate::config::Config;
use crate::error::{ClassificationError, ConfigError};
use crate::flow::FlowTracker;
use crate::module::{ModuleId, Registry};
use crate::packet::{CaptureHeader, Packet};
use crate::pool::ObjectPool;

/// Owns every long-lived pipeline resource and drives the per-packet walk.
pub struct Pipeline {
    registry: Registry,
    entry_module: Option<ModuleId>,
    packet_pool: ObjectPool<Packet>,
    pub flows: FlowTracker,
    pub classification: Option<ClassificationMetadata>,
    next_packet_number: u64,
}

impl Pipeline {
    /// Builds a pipeline from a caller-assembled `Registry` (module
    /// construction is external; individual leaf protocol decoders are
    /// out of scope here) and initializes every module against `config`.
    pub fn new(registry: Registry, config: &Config) -> Result<Self, ConfigError> {
        registry.init_all(config)?;
        let entry_module = config
            .entry_module
            .as_ref()
            .map(|name| {
                registry
                    .id_by_name(name)
                    .ok_or_else(|| ConfigError::UnknownModule(name.clone()))
            })
            .transpose()?;

        Ok(Pipeline {
            registry,
            entry_module,
            packet_pool: ObjectPool::default(),
            flows: FlowTracker::new(),
            classification: None,
            next_packet_number: 0,
        })
    }

    /// Loads the classification catalog named by `config`, if any.
    /// Fatal on any schema violation — callers should log and terminate
    /// rather than continue with a partially loaded catalog.
    pub fn load_classification(&mut self, config: &Config) -> Result<(), ClassificationError> {
        self.classification = ClassificationMetadata::load_from_config(config)?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn packets_processed(&self) -> u64 {
        self.next_packet_number
    }

    /// Walks one captured frame through the pipeline to completion:
    /// `initialize`, then `current = current.process(packet)` until a
    /// module returns `None`. `data` need only remain valid for the
    /// duration of this call — the packet's raw-frame pointer is
    /// cleared before returning.
    pub fn process_frame(&mut self, header: CaptureHeader, data: &[u8]) {
        let mut packet = self.packet_pool.acquire();

        // Safety: `data` outlives this call by virtue of its borrow, and
        // `packet.reset()` below clears the raw pointer before the
        // packet is returned to the pool, so no dangling pointer escapes.
        unsafe {
            packet.bind_raw_frame(data.as_ptr(), data.len(), header);
        }
        packet.initialize(self.next_packet_number);
        self.next_packet_number += 1;

        let mut current = self.entry_module;
        while let Some(module_id) = current {
            current = self.registry.process(module_id, &mut packet);
        }

        // Resolve the flow handle lazily, once a module has set
        // `packet.direction` by identifying `flow_id` (spec.md §3: "assigned
        // lazily"), and roll this packet's bytes into that flow's
        // bidirectional counters. A packet with no module claiming flow
        // identity (e.g. `idFlows` disabled) is never attributed to a flow.
        if let Some(direction) = packet.direction {
            let num_facets = self.classification.as_ref().map_or(0, |c| c.num_facets());
            let final_mask = self.classification.as_ref().map_or(0, |c| c.final_mask());
            let handle = self.flows.get_or_create(packet.flow_id, num_facets, final_mask);
            packet.flow_handle = Some(handle);
            if let Some(flow) = self.flows.get_mut(handle) {
                flow.record_packet(direction, packet.capture_header.wire_len as u64);
            }
        }

        packet.reset();
        self.packet_pool.release(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::DumpModule;

    #[test]
    fn walks_entry_module_until_none() {
        let mut registry = Registry::new();
        let sink = registry.register(Box::new(DumpModule::new("sink")));
        let _ = sink;

        let toml = r#"entryModule = "sink""#;
        let config: Config = toml::from_str(toml).unwrap();

        let mut pipeline = Pipeline::new(registry, &config).unwrap();
        let frame = [0u8; 16];
        let header = CaptureHeader {
            ts_secs: 1,
            ts_usecs: 0,
            wire_len: 16,
            captured_len: 16,
        };
        pipeline.process_frame(header, &frame);
        assert_eq!(pipeline.packets_processed(), 1);
    }

    #[test]
    fn unknown_entry_module_is_rejected_at_construction() {
        let registry = Registry::new();
        let toml = r#"entryModule = "missing""#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = Pipeline::new(registry, &config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModule(name) if name == "missing"));
    }

    #[test]
    fn identified_packets_are_rolled_into_flow_counters() {
        use crate::module::ip::IpModule;
        use byteorder::{BigEndian, ByteOrder};
        use std::net::Ipv4Addr;

        let mut registry = Registry::new();
        let ip = registry.register(Box::new(IpModule::new("ip")));
        registry.register(Box::new(DumpModule::new("tcp")));

        let toml = r#"
            entryModule = "ip"

            [modules.ip]
            idFlows = true

            [[modules.ip.connections]]
            protocol = 6
            module = "tcp"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let mut pipeline = Pipeline::new(registry, &config).unwrap();
        let _ = ip;

        let mut frame = vec![0u8; 30];
        frame[0] = 0x45;
        BigEndian::write_u16(&mut frame[2..4], 30);
        frame[9] = 6;
        frame[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        frame[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 2).octets());

        let header = CaptureHeader {
            ts_secs: 1,
            ts_usecs: 0,
            wire_len: 30,
            captured_len: 30,
        };
        pipeline.process_frame(header, &frame);

        assert_eq!(pipeline.flows.len(), 1);
        let mut flow_id = crate::flow::FlowId::default();
        flow_id.set_ip(
            std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            6,
        );
        // `get_or_create` is idempotent for an already-tracked identity, so
        // this just looks the flow back up rather than creating a second one.
        let handle = pipeline.flows.get_or_create(flow_id, 0, 0);
        assert_eq!(pipeline.flows.len(), 1);
        let flow = pipeline.flows.get(handle).unwrap();
        assert_eq!(flow.upload_packets, 1);
        assert_eq!(flow.upload_bytes, 30);
    }
}
