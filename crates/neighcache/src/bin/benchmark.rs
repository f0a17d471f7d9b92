//! Neighbor cache benchmark tool
//!
//! Drives an ARP cache against an in-process switch state pipeline and
//! reports throughput for:
//! - Programming new neighbors
//! - Re-programming unchanged neighbors (discarded updates)
//! - Port-down re-resolution
//! - Flushing neighbors
//!
//! # Usage
//!
//! ```bash
//! # Run all benchmarks
//! cargo run --release -p sonic-neighcache --bin neighcache-bench
//!
//! # Run one benchmark with more neighbors and dump the cache afterwards
//! cargo run --release -p sonic-neighcache --bin neighcache-bench -- --events 20000 --test program --dump
//! ```

use clap::{Parser, ValueEnum};
use sonic_neighcache::{
    ArpCache, CacheContext, EventBase, Interface, InterfaceId, IpPrefix, MacAddress,
    NeighCacheError, NeighborCacheConfig, NeighborEntryState, NeighborProber, PortId, Result,
    StateUpdater, SwitchState, SwitchStateUpdater, Vlan, VlanId,
};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Neighbors fit in the benchmark VLAN's /16
const MAX_EVENTS: usize = 65_000;
const PORTS: u32 = 32;

#[derive(Parser, Debug)]
#[command(name = "neighcache-bench")]
#[command(about = "Benchmark neighbor cache operations", long_about = None)]
struct Args {
    /// Number of neighbors to program
    #[arg(long, default_value = "1000")]
    events: usize,

    /// Which benchmark test to run
    #[arg(long, value_enum, default_value = "all")]
    test: BenchmarkTest,

    /// Neighbor cache config file (defaults used if absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the cache contents as JSON when done
    #[arg(long)]
    dump: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BenchmarkTest {
    /// All tests
    All,
    /// Programming new neighbors
    Program,
    /// Re-programming unchanged neighbors
    Reprogram,
    /// Port-down re-resolution
    PortDown,
    /// Flushing neighbors
    Flush,
}

#[derive(Default)]
struct CountingProber {
    probes: AtomicU64,
}

impl NeighborProber<Ipv4Addr> for CountingProber {
    fn probe_for(&self, _ip: Ipv4Addr, _vlan_id: VlanId, _interface_id: InterfaceId) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }
}

struct Bench {
    sw: Arc<SwitchStateUpdater>,
    cache: Arc<ArpCache>,
    events: usize,
    verbose: bool,
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = match &args.config {
        Some(path) => NeighborCacheConfig::load_or_default(path)?,
        None => NeighborCacheConfig::default(),
    };
    let events = args.events.min(MAX_EVENTS);

    println!("neighcache Performance Benchmark");
    println!("================================");
    println!("Neighbor count: {}", events);
    println!("Test: {:?}", args.test);
    println!();

    let bench = Bench::new(config, events, args.verbose)?;
    let run = |test: BenchmarkTest| args.test == BenchmarkTest::All || args.test == test;

    if run(BenchmarkTest::Program) {
        bench.program()?;
    }
    if run(BenchmarkTest::Reprogram) {
        bench.ensure_programmed()?;
        bench.reprogram()?;
    }
    if run(BenchmarkTest::PortDown) {
        bench.ensure_programmed()?;
        bench.port_down()?;
    }
    if args.dump {
        println!("{}", serde_json::to_string_pretty(&bench.cache.get_cache_data())?);
    }
    if run(BenchmarkTest::Flush) {
        bench.ensure_programmed()?;
        bench.flush()?;
    }

    let stats = bench.sw.stats();
    println!("Pipeline totals");
    println!("---------------");
    println!("  Submitted: {}", stats.submitted());
    println!("  Applied:   {}", stats.applied());
    println!("  Discarded: {}", stats.discarded());
    println!("  Failed:    {}", stats.failed());
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if verbose { Level::DEBUG } else { Level::WARN })
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| NeighCacheError::Config(format!("Failed to set logger: {}", e)))?;

    Ok(())
}

impl Bench {
    fn new(config: NeighborCacheConfig, events: usize, verbose: bool) -> Result<Self> {
        let vlan_id = VlanId::new(100)?;
        let interface_id = InterfaceId(100);
        let state = Arc::new(SwitchState::new())
            .with_vlan(Vlan::new(vlan_id, "Vlan100", interface_id))
            .with_interface(Interface::new(
                interface_id,
                "Vlan100",
                vlan_id,
                vec!["10.0.0.1/16".parse::<IpPrefix>()?],
            ));

        let sw = Arc::new(SwitchStateUpdater::new(state)?);
        let ctx = CacheContext {
            sw: sw.clone(),
            background: EventBase::new("neigh-bg")?,
            prober: Arc::new(CountingProber::default()),
            config: Arc::new(config),
        };
        let cache = ArpCache::new(&ctx, vlan_id, "Vlan100", interface_id);
        info!(events, "Benchmark switch state ready");

        Ok(Self {
            sw,
            cache,
            events,
            verbose,
        })
    }

    fn neighbor(i: usize) -> (Ipv4Addr, MacAddress, PortId) {
        // Skip the network and interface addresses
        let offset = u32::try_from(i).unwrap_or(u32::MAX - 2) + 2;
        let ip = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) + offset);
        let [a, b, c, d] = offset.to_be_bytes();
        let mac = MacAddress::new([0x02, 0x00, a, b, c, d]);
        (ip, mac, PortId(offset % PORTS))
    }

    fn ensure_programmed(&self) -> Result<()> {
        if self.cache.len() < self.events {
            self.program()?;
        }
        Ok(())
    }

    fn program(&self) -> Result<()> {
        println!("📊 Program Benchmark");
        println!("--------------------");
        let elapsed = self.timed(|bench| {
            for i in 0..bench.events {
                let (ip, mac, port) = Self::neighbor(i);
                bench.cache.set_entry(ip, mac, port, NeighborEntryState::Reachable);
                if bench.verbose && (i + 1) % 1000 == 0 {
                    println!("  Submitted {} neighbors...", i + 1);
                }
            }
        })?;
        self.report("neighbors programmed", elapsed);
        Ok(())
    }

    fn reprogram(&self) -> Result<()> {
        println!("📊 Reprogram Benchmark");
        println!("----------------------");
        let discarded_before = self.sw.stats().discarded();
        let elapsed = self.timed(|bench| {
            for i in 0..bench.events {
                let (ip, mac, port) = Self::neighbor(i);
                bench.cache.set_entry(ip, mac, port, NeighborEntryState::Reachable);
            }
        })?;
        self.report("neighbors reprogrammed", elapsed);
        println!(
            "  Discarded as unchanged: {}",
            self.sw.stats().discarded() - discarded_before
        );
        println!();
        Ok(())
    }

    fn port_down(&self) -> Result<()> {
        println!("📊 Port Down Benchmark");
        println!("----------------------");
        let elapsed = self.timed(|bench| {
            for port in 0..PORTS {
                bench.cache.port_down(PortId(port));
            }
        })?;
        self.report("neighbors re-resolved", elapsed);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        println!("📊 Flush Benchmark");
        println!("------------------");
        let elapsed = self.timed(|bench| {
            for i in 0..bench.events {
                let (ip, _, _) = Self::neighbor(i);
                bench.cache.flush_entry(ip, false);
            }
        })?;
        self.report("neighbors flushed", elapsed);

        let remaining = self
            .sw
            .state()
            .get_vlans()
            .iter()
            .map(|vlan| vlan.arp_table().len())
            .sum::<usize>();
        println!("  Neighbors left in switch state: {}", remaining);
        println!();
        Ok(())
    }

    /// Runs `f` and waits for the pipeline to drain.
    fn timed(&self, f: impl FnOnce(&Self)) -> Result<Duration> {
        let start = Instant::now();
        f(self);
        self.sw.wait_for_updates()?;
        Ok(start.elapsed())
    }

    fn report(&self, what: &str, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        println!("  {}: {}", what, self.events);
        println!("  Total time: {:.2}ms", secs * 1000.0);
        println!("  Throughput: {:.0} ops/sec", self.events as f64 / secs);
        println!("  Switch state generation: {}", self.sw.state().generation());
        println!();
    }
}
