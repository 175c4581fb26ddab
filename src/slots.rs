//! Pure slot assignment.
//!
//! `assign` is a free function, not a method on some stateful type —
//! this keeps it trivially deterministic and makes the stability
//! contract easy to property-test.

use std::sync::Arc;

use crate::error::DriverError;
use crate::types::{HostInfo, SlotInfo};

/// Emits at most `max_np` slots, at least `min_np` (else
/// `DriverError::InsufficientCapacity`).
///
/// Packing order: hosts are walked in input order; within a host,
/// `local_rank` runs `0..slots_used_on_host`. Global `rank` is emission
/// order. `cross_rank` equals `local_rank`; `cross_size` is the maximum
/// `local_size` across all hosts that received at least one slot.
///
/// Stability: removing a host from the input leaves the relative order
/// of remaining slots unchanged (their ranks shift down but stay
/// contiguous and ordered); appending a host only appends slots after
/// the existing ones.
pub fn assign(hosts: &[HostInfo], min_np: u32, max_np: u32) -> Result<Vec<SlotInfo>, DriverError> {
    let mut per_host_local_size: Vec<(Arc<str>, u32)> = Vec::with_capacity(hosts.len());
    let mut remaining = max_np;

    for host in hosts {
        if remaining == 0 {
            break;
        }
        let used = host.slots.min(remaining);
        if used == 0 {
            continue;
        }
        per_host_local_size.push((host.hostname.clone(), used));
        remaining -= used;
    }

    let total: u32 = per_host_local_size.iter().map(|(_, n)| *n).sum();
    if total < min_np {
        return Err(DriverError::InsufficientCapacity {
            min_np,
            available: hosts.iter().map(|h| h.slots).sum(),
        });
    }

    let cross_size = per_host_local_size
        .iter()
        .map(|(_, n)| *n)
        .max()
        .unwrap_or(0);

    let mut slots = Vec::with_capacity(total as usize);
    let mut rank = 0u32;
    for (hostname, local_size) in per_host_local_size {
        for local_rank in 0..local_size {
            slots.push(SlotInfo {
                hostname: hostname.clone(),
                rank,
                local_rank,
                cross_rank: local_rank,
                size: total,
                local_size,
                cross_size,
            });
            rank += 1;
        }
    }

    Ok(slots)
}
