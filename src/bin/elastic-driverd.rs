//! `elastic-driverd` — binary entrypoint wiring configuration, logging
//! and the driver together.
//!
//! Host discovery and worker launching are external collaborators (spec
//! §6); this binary supplies the simplest viable concrete
//! implementations rather than shipping with none: a hostfile re-read on
//! every poll, and a subprocess per slot.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use elastic_driver::cli::Cli;
use elastic_driver::discovery::HostDiscovery;
use elastic_driver::error::DriverError;
use elastic_driver::host::HostEvent;
use elastic_driver::launcher::WorkerLauncher;
use elastic_driver::logging;
use elastic_driver::rendezvous::InMemoryRendezvous;
use elastic_driver::types::SlotInfo;
use elastic_driver::ElasticDriver;

/// Re-reads `host slots` pairs, one per line, from a hostfile on every
/// poll, so an operator can shrink or grow the pool by editing it.
struct HostfileDiscovery {
    path: String,
}

impl HostDiscovery for HostfileDiscovery {
    fn discover(&self) -> Result<HashMap<String, u32>, DriverError> {
        let contents = fs::read_to_string(&self.path)?;
        let mut hosts = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(host) = parts.next() else { continue };
            let slots: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(1);
            hosts.insert(host.to_string(), slots);
        }
        Ok(hosts)
    }
}

/// Runs `command` as a subprocess per slot, passing rank metadata through
/// the environment, and tears the child down promptly once either
/// cancellation signal fires.
struct ProcessLauncher {
    command: String,
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, slot: &SlotInfo, shutdown: Arc<HostEvent>, host_event: Arc<HostEvent>) -> (i32, u64) {
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("RANK", slot.rank.to_string())
            .env("LOCAL_RANK", slot.local_rank.to_string())
            .env("CROSS_RANK", slot.cross_rank.to_string())
            .env("WORLD_SIZE", slot.size.to_string())
            .env("LOCAL_SIZE", slot.local_size.to_string())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("failed to launch worker {}[{}]: {e}", slot.hostname, slot.local_rank);
                return (-1, epoch_seconds());
            }
        };

        loop {
            if shutdown.is_fired() || host_event.is_fired() {
                let _ = child.kill();
                let _ = child.wait();
                return (-1, epoch_seconds());
            }
            match child.try_wait() {
                Ok(Some(status)) => return (status.code().unwrap_or(-1), epoch_seconds()),
                Ok(None) => std::thread::sleep(Duration::from_millis(200)),
                Err(e) => {
                    error!("error waiting on worker {}[{}]: {e}", slot.hostname, slot.local_rank);
                    return (-1, epoch_seconds());
                }
            }
        }
    }
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.is_debug());

    let hostfile = env::var("ELASTIC_DRIVER_HOSTFILE")
        .context("ELASTIC_DRIVER_HOSTFILE must name a hostfile to discover workers from")?;
    let command = env::var("ELASTIC_DRIVER_COMMAND")
        .context("ELASTIC_DRIVER_COMMAND must name the command each worker runs")?;

    let config = cli.to_driver_config();
    let discovery: Arc<dyn HostDiscovery> = Arc::new(HostfileDiscovery { path: hostfile });
    let rendezvous = Arc::new(InMemoryRendezvous::new());
    let launcher: Arc<dyn WorkerLauncher> = Arc::new(ProcessLauncher { command });

    let driver = ElasticDriver::new(config, discovery, rendezvous);
    driver.start(cli.target_np(), launcher)?;
    info!("job started with world_size={}", driver.world_size());

    info!("press enter to stop the driver and print results");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    driver.stop();
    for (worker, (exit_code, timestamp)) in driver.get_results() {
        println!("{worker}: exit_code={exit_code} at {timestamp}");
    }

    Ok(())
}
