//! Terminal sink binary: walks every pcap record through an `IpModule`
//! and writes the (optionally header-fixed) result back out with
//! `pcap-file`, anonymizing addresses if the config asks for it.
//!
//! Drives the module walk directly rather than through `Pipeline`,
//! since it needs the processed `Packet` back afterward to serialize it
//! — `Pipeline::process_frame` releases the packet to its pool before
//! returning.

use retina_core::config::load_config;
use retina_core::module::ip::IpModule;
use retina_core::module::{DumpModule, Registry};
use retina_core::packet::{CaptureHeader, Packet};
use retina_core::pool::ObjectPool;

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pcap_file::pcap::{PcapReader, PcapWriter};

#[derive(Parser, Debug)]
struct Args {
    #[clap(short, long, value_name = "FILE")]
    config: PathBuf,
    #[clap(short, long, value_name = "FILE")]
    infile: PathBuf,
    #[clap(short, long, value_name = "FILE", default_value = "dump.pcap")]
    outfile: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args.config).context("loading configuration")?;

    let mut registry = Registry::new();
    registry.register(Box::new(IpModule::new("ip")));
    registry.register(Box::new(DumpModule::new("tcp")));
    registry.register(Box::new(DumpModule::new("udp")));
    registry.init_all(&config).context("initializing modules")?;
    let entry = registry.id_by_name("ip").expect("ip module registered above");

    let infile = File::open(&args.infile).with_context(|| format!("opening {:?}", args.infile))?;
    let reader = PcapReader::new(infile).context("reading pcap header")?;

    let outfile = File::create(&args.outfile)
        .with_context(|| format!("creating {:?}", args.outfile))?;
    let mut writer = PcapWriter::new(outfile).context("writing pcap header")?;

    let mut pool: ObjectPool<Packet> = ObjectPool::default();
    let mut packets_written = 0u64;

    for record in reader {
        let record = record.context("corrupt pcap record")?;
        let header = CaptureHeader {
            ts_secs: record.header.ts_sec as i64,
            ts_usecs: record.header.ts_nsec as i64 / 1000,
            wire_len: record.header.orig_len,
            captured_len: record.data.len() as u32,
        };

        let mut packet = pool.acquire();
        // Safety: `record.data` outlives this block, and `packet.reset()`
        // below clears the raw pointer before the packet returns to the pool.
        unsafe {
            packet.bind_raw_frame(record.data.as_ptr(), record.data.len(), header);
        }
        packet.initialize(packets_written);

        let mut current = Some(entry);
        while let Some(id) = current {
            current = registry.process(id, &mut packet);
        }

        let (out_header, bytes) = packet.to_byte_array(&registry, None, 0, true);
        writer
            .write(
                out_header.ts_secs as u32,
                (out_header.ts_usecs * 1000) as u32,
                bytes,
                out_header.wire_len,
            )
            .context("writing pcap record")?;
        packets_written += 1;

        packet.reset();
        pool.release(packet);
    }

    println!("wrote {packets_written} packets to {:?}", &args.outfile);
    Ok(())
}
