//! The decoder contract every pipeline stage implements, and the
//! name→module registry that resolves configured connections between them.
//!
//! `Module` is a flat trait — a capability set of the operations a decoder
//! stage needs — rather than a base-class hierarchy, and `Registry` is a
//! value the driver builds and owns rather than a process-wide singleton,
//! so pipeline construction stays free of global mutable state.

pub mod ip;

use crate::classification::name_id::NameIdMapper;
use crate::config::Config;
use crate::error::ConfigError;
use crate::packet::Packet;

use std::cell::RefCell;

/// A stable numeric handle to a registered module. Modules never hand each
/// other raw references — only this opaque id, resolved back through a
/// `Registry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

/// One decoder stage in the pipeline.
pub trait Module {
    /// Stable identifier used in configuration and by the registry.
    fn name(&self) -> &str;

    /// Called once by `Registry::register`, immediately after the id is
    /// allocated — lets a module stash its own handle for use in
    /// `save_segment`/`get_segment` calls against itself.
    fn set_id(&mut self, id: ModuleId);

    /// Binds configuration and resolves downstream module references by
    /// name against `registry`. Called once per module, after every
    /// module has been registered.
    fn init(&mut self, config: &Config, registry: &Registry) -> Result<(), ConfigError>;

    /// Consumes a prefix of the packet's payload cursor via
    /// `save_segment`, updates any side effects (flow identification,
    /// counters), and returns the next module to run, or `None` to stop.
    fn process(&mut self, packet: &mut Packet) -> Option<ModuleId>;

    /// Recomputes length/checksum fields in the segment this module owns.
    /// Called top-down during `Packet::to_byte_array` serialization.
    fn fix_header(&self, packet: &mut Packet);

    /// Diagnostic text for this module's segment of `packet`.
    fn describe(&self, packet: &Packet) -> String;

    /// Periodic status text; resets whatever counters it reports.
    fn get_status(&mut self, elapsed_secs: u64, period_secs: u64) -> String;

    /// The link-layer code this module's output belongs to, for sinks.
    fn datalink_type(&self) -> u32;
}

/// Name→module table populated during pipeline construction and read
/// only (through `RefCell`, for `process`'s `&mut self`) during packet
/// processing.
pub struct Registry {
    name_ids: NameIdMapper,
    modules: Vec<RefCell<Box<dyn Module>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            name_ids: NameIdMapper::new(),
            modules: Vec::new(),
        }
    }

    /// Registers `module` under its own `name()`, assigns it a `ModuleId`,
    /// and informs it of that id via `set_id`.
    pub fn register(&mut self, mut module: Box<dyn Module>) -> ModuleId {
        let name = module.name().to_string();
        let raw_id = self.name_ids.register_name(&name);
        let id = ModuleId(raw_id);
        module.set_id(id);
        self.modules.push(RefCell::new(module));
        id
    }

    /// Runs `init` on every registered module, in registration order.
    pub fn init_all(&self, config: &Config) -> Result<(), ConfigError> {
        for module in &self.modules {
            module.borrow_mut().init(config, self)?;
        }
        Ok(())
    }

    pub fn process(&self, id: ModuleId, packet: &mut Packet) -> Option<ModuleId> {
        self.modules.get(id.0 as usize)?.borrow_mut().process(packet)
    }

    pub fn fix_header(&self, id: ModuleId, packet: &mut Packet) {
        if let Some(cell) = self.modules.get(id.0 as usize) {
            cell.borrow().fix_header(packet);
        }
    }

    pub fn describe(&self, id: ModuleId, packet: &Packet) -> Option<String> {
        self.modules.get(id.0 as usize).map(|c| c.borrow().describe(packet))
    }

    pub fn get_status(&self, id: ModuleId, elapsed_secs: u64, period_secs: u64) -> Option<String> {
        self.modules
            .get(id.0 as usize)
            .map(|c| c.borrow_mut().get_status(elapsed_secs, period_secs))
    }

    pub fn datalink_type(&self, id: ModuleId) -> Option<u32> {
        self.modules.get(id.0 as usize).map(|c| c.borrow().datalink_type())
    }

    pub fn id_by_name(&self, name: &str) -> Option<ModuleId> {
        self.name_ids.get_id(name).map(ModuleId)
    }

    pub fn name_of(&self, id: ModuleId) -> Option<&str> {
        self.name_ids.get_name(id.0)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

/// A minimal terminal node: consumes nothing, always ends the walk. Gives
/// the module graph a real sink without reimplementing a PCAP writer in
/// the core — `demos/pcap_dump` supplies the actual on-disk format.
#[derive(Debug, Default)]
pub struct DumpModule {
    id: ModuleId,
    name: String,
    packets_seen: u64,
}

impl DumpModule {
    pub fn new(name: impl Into<String>) -> Self {
        DumpModule {
            id: ModuleId(0),
            name: name.into(),
            packets_seen: 0,
        }
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        ModuleId(0)
    }
}

impl Module for DumpModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_id(&mut self, id: ModuleId) {
        self.id = id;
    }

    fn init(&mut self, _config: &Config, _registry: &Registry) -> Result<(), ConfigError> {
        Ok(())
    }

    fn process(&mut self, _packet: &mut Packet) -> Option<ModuleId> {
        self.packets_seen += 1;
        None
    }

    fn fix_header(&self, _packet: &mut Packet) {}

    fn describe(&self, _packet: &Packet) -> String {
        format!("{}: dump sink", self.name)
    }

    fn get_status(&mut self, elapsed_secs: u64, _period_secs: u64) -> String {
        format!(
            "{}: {} packets dumped in {}s",
            self.name, self.packets_seen, elapsed_secs
        )
    }

    fn datalink_type(&self) -> u32 {
        1 // LINKTYPE_ETHERNET, matching the sink's expected framing
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ModuleId;

    pub fn module_id(n: u32) -> ModuleId {
        ModuleId(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_sequential_ids_and_resolves_by_name() {
        let mut registry = Registry::new();
        let a = registry.register(Box::new(DumpModule::new("a")));
        let b = registry.register(Box::new(DumpModule::new("b")));
        assert_ne!(a, b);
        assert_eq!(registry.id_by_name("a"), Some(a));
        assert_eq!(registry.name_of(b), Some("b"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn dump_module_always_terminates_walk() {
        let mut registry = Registry::new();
        let id = registry.register(Box::new(DumpModule::new("sink")));
        let config = Config::default();
        registry.init_all(&config).unwrap();
        let mut packet = Packet::default();
        packet.initialize(1);
        assert_eq!(registry.process(id, &mut packet), None);
    }
}
