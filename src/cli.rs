//! Command-line entrypoint configuration.

use std::time::Duration;

use clap::Parser;

use crate::config::DriverConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Minimum number of workers required to start or resume a round
    #[arg(long)]
    min_np: u32,

    /// Maximum number of workers the assigner may place
    #[arg(long)]
    max_np: u32,

    /// Discovery polling period, in seconds
    #[arg(long, default_value_t = 1)]
    poll_interval_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn target_np(&self) -> u32 {
        self.max_np
    }

    /// Builds the driver config this invocation describes. `start_timeout`
    /// still honors `HOROVOD_ELASTIC_START_TIMEOUT` (see
    /// [`DriverConfig::new`]); only `poll_interval` is overridden here.
    pub fn to_driver_config(&self) -> DriverConfig {
        let mut config = DriverConfig::new(self.min_np, self.max_np);
        config.poll_interval = Duration::from_secs(self.poll_interval_secs);
        config
    }
}
