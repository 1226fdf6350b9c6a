//! `retina-core` — the packet-processing core of a passive traffic
//! profiling and classification pipeline.
//!
//! The crate is organized bottom-up, mirroring the dependency order of
//! the system it implements: a growable byte buffer and object pool at
//! the bottom, a zero-copy packet representation built on top of them,
//! a module/pipeline driver that walks packets through protocol
//! decoders, an IPv4 reassembly engine and IP decoder module, flow
//! identity, and a classification engine that tags flows from a
//! validated signature catalog.
//!
//! Capture-file parsing, the CLI, leaf protocol decoders (UDP, TCP,
//! GTP, ...), and PCAP sinks are external collaborators; see `demos/`
//! for example wiring against the `pcap-file` crate.

pub mod buffer;
pub mod classification;
pub mod config;
pub mod crypt;
pub mod error;
pub mod flow;
pub mod fragment;
pub mod module;
pub mod packet;
pub mod pipeline;
pub mod pool;

pub use config::{load_config, Config};
pub use error::{ClassificationError, ConfigError};
pub use pipeline::Pipeline;
