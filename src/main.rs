use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{self, eyre, WrapErr};

use skewsim::cache::remap::CacheRemap;
use skewsim::cache::skewed::CacheSkewed;
use skewsim::coherence::msi::MsiPolicy;
use skewsim::coherence::port::{CoherentCache, CoreInterface, MemoryModel};
use skewsim::config::HierarchySettings;
use skewsim::delay::FixedDelay;
use skewsim::monitor::{AccessMonitor, ZsEvRemapper};

/// Trace-driven cache hierarchy simulation: private L1s over a shared,
/// dynamically randomized last-level cache.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Options {
    /// Hierarchy configuration (JSON).
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Memory trace, one `<core> <r|w> <hex-addr> [hex-value]` per line.
    #[arg(short, long, value_name = "FILE")]
    trace: PathBuf,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let options = Options::parse();

    let settings: HierarchySettings = serde_json::from_reader(
        File::open(&options.config)
            .wrap_err_with(|| format!("opening config {:?}", options.config))?,
    )
    .wrap_err("parsing hierarchy configuration")?;
    settings.validate()?;

    let memory = Arc::new(MemoryModel::new());
    let llc = CoherentCache::new(
        CacheRemap::build(&settings.llc, 0)?,
        MsiPolicy::<false, true>::default(),
    );
    llc.set_outer(memory.clone(), 0);
    if let Some(remapper) = &settings.remapper {
        let nset = settings.llc.sets();
        let monitor = ZsEvRemapper::new(
            nset,
            remapper.factor,
            remapper.access_period,
            remapper.evict_period,
            remapper.threshold,
            true,
        );
        llc.with_cache(|cache| cache.attach_monitor(Box::new(monitor)));
    }
    llc.with_cache(|cache| {
        cache.attach_monitor(Box::new(AccessMonitor::new()));
        cache.set_delay(Box::new(FixedDelay {
            access: 2,
            replace: 8,
            writeback: 24,
        }));
    });

    let mut cores = Vec::with_capacity(settings.cores);
    for core in 0..settings.cores {
        let mut l1_settings = settings.l1.clone();
        l1_settings.name = format!("{}{core}", settings.l1.name);
        l1_settings.seed = settings.l1.seed.wrapping_add(core as u64);
        let l1 = CoherentCache::new(
            CacheSkewed::build_linear(&l1_settings, 1 + core as u64)?,
            MsiPolicy::<true, false>::default(),
        );
        let coh_id = llc.attach_inner(l1.clone());
        l1.set_outer(llc.clone(), coh_id);
        cores.push(CoreInterface::new(l1));
    }

    let trace = BufReader::new(
        File::open(&options.trace).wrap_err_with(|| format!("opening trace {:?}", options.trace))?,
    );
    let mut reads = 0u64;
    let mut writes = 0u64;
    for (lineno, line) in trace.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let core: usize = fields
            .next()
            .ok_or_else(|| eyre!("trace line {}: missing core id", lineno + 1))?
            .parse()?;
        let op = fields
            .next()
            .ok_or_else(|| eyre!("trace line {}: missing operation", lineno + 1))?;
        let addr = fields
            .next()
            .ok_or_else(|| eyre!("trace line {}: missing address", lineno + 1))?;
        let addr = u64::from_str_radix(addr.trim_start_matches("0x"), 16)?;
        let core = cores
            .get(core)
            .ok_or_else(|| eyre!("trace line {}: core {core} not configured", lineno + 1))?;
        match op {
            "r" => {
                core.read(addr);
                reads += 1;
            }
            "w" => {
                let value = match fields.next() {
                    Some(value) => u64::from_str_radix(value.trim_start_matches("0x"), 16)?,
                    None => 0,
                };
                core.write(addr, value);
                writes += 1;
            }
            other => return Err(eyre!("trace line {}: unknown op {other:?}", lineno + 1)),
        }
    }

    println!("trace:  {reads} reads, {writes} writes");
    println!(
        "memory: {} line fetches, {} line writebacks",
        memory.reads(),
        memory.writes()
    );
    println!("llc:    {} cycles of modeled latency", llc.cycles());
    Ok(())
}
