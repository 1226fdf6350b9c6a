//! Pipeline driver against a pcap file: wires an `IpModule` and a pair
//! of `DumpModule` sinks per the config's `connections`, feeds every
//! record through `Pipeline::process_frame`, and prints periodic
//! per-module status plus a final classification summary.

use retina_core::config::load_config;
use retina_core::module::ip::IpModule;
use retina_core::module::{DumpModule, Registry};
use retina_core::packet::CaptureHeader;
use retina_core::Pipeline;

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pcap_file::pcap::PcapReader;

#[derive(Parser, Debug)]
struct Args {
    #[clap(short, long, value_name = "FILE")]
    config: PathBuf,
    #[clap(short, long, value_name = "FILE")]
    infile: PathBuf,
    /// Seconds of capture time between periodic status reports.
    #[clap(long, default_value_t = 10)]
    status_period: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args.config).context("loading configuration")?;

    let mut registry = Registry::new();
    registry.register(Box::new(IpModule::new("ip")));
    let tcp = registry.register(Box::new(DumpModule::new("tcp")));
    registry.register(Box::new(DumpModule::new("udp")));

    let mut pipeline = Pipeline::new(registry, &config).context("initializing pipeline")?;
    if config.classification.file_name.is_some() {
        pipeline
            .load_classification(&config)
            .context("loading classification catalog")?;
    }

    let infile = File::open(&args.infile).with_context(|| format!("opening {:?}", args.infile))?;
    let reader = PcapReader::new(infile).context("reading pcap header")?;

    let mut first_ts: Option<i64> = None;
    let mut last_status_ts = 0i64;

    for record in reader {
        let record = record.context("corrupt pcap record")?;
        let ts_secs = record.header.ts_sec as i64;
        let header = CaptureHeader {
            ts_secs,
            ts_usecs: record.header.ts_nsec as i64 / 1000,
            wire_len: record.header.orig_len,
            captured_len: record.data.len() as u32,
        };
        pipeline.process_frame(header, &record.data);

        let first = *first_ts.get_or_insert(ts_secs);
        if ts_secs - last_status_ts >= args.status_period as i64 {
            last_status_ts = ts_secs;
            if let Some(status) = pipeline
                .registry()
                .get_status(tcp, (ts_secs - first) as u64, args.status_period)
            {
                print!("{status}");
            }
        }
    }

    println!("processed {} packets", pipeline.packets_processed());
    if let Some(classification) = &pipeline.classification {
        println!(
            "loaded classification catalog: {} facet(s)",
            classification.num_facets()
        );
    } else {
        log::info!("no classification catalog loaded");
    }
    Ok(())
}
