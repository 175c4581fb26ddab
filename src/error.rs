use thiserror::Error;

/// Error taxonomy for the elastic driver.
///
/// `NotificationFailure` and stale-round reports are deliberately absent
/// from this enum: per policy they are swallowed and logged at the call
/// site rather than surfaced as errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The discovery provider failed on its very first invocation.
    /// Misconfiguration — fatal.
    #[error("host discovery failed on first call: {0}")]
    DiscoveryFatal(String),

    /// The slot assigner could not place at least `min_np` workers.
    #[error("insufficient capacity: need at least {min_np} slots, have {available}")]
    InsufficientCapacity { min_np: u32, available: u32 },

    /// `start_timeout` elapsed while waiting for enough hosts.
    #[error("timed out after {0:?} waiting for available hosts")]
    Timeout(std::time::Duration),

    /// No host survived between two consecutive rounds; there is no
    /// source of training state to broadcast from.
    #[error("state broadcast lost: no host survived from the previous round")]
    StateBroadcastLost,

    /// Bubbled up from an external collaborator (discovery, rendezvous,
    /// launcher) via `#[from]`.
    #[error("system error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
