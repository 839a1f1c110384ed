//! Small arithmetic helpers shared by the attribution engine.
//!
//! Kept as pure functions rather than a stateful counter-diffing struct:
//! invariant 5 of the data model already guarantees that the previous
//! absolute counter value is always available from the previous snapshot,
//! so there is no separate state to carry between ticks.

/// Computes the energy delta between two absolute counter readings,
/// correcting for a single wrap-around.
///
/// `e_prev` is treated as `0` when there is no previous reading (the first
/// tick), which makes the first interval's delta equal to the counter's
/// current absolute value, per §4.1's first-read policy.
///
/// If the counter appears to have gone backwards (`e_now < e_prev`) and no
/// `max_energy_uj` is known to correct for a wrap, the delta is clamped to
/// zero and a warning is logged (§7, structural error): this preserves
/// monotonicity of `EnergyTotal` at the cost of under-counting that interval.
pub fn wrap_aware_delta(e_prev: u64, e_now: u64, max_energy_uj: Option<u64>) -> u64 {
    if e_now >= e_prev {
        e_now - e_prev
    } else {
        match max_energy_uj {
            Some(max) => (max - e_prev) + e_now,
            None => {
                log::warn!(
                    "energy counter decreased from {e_prev} to {e_now} with no known wrap maximum; clamping delta to zero"
                );
                0
            }
        }
    }
}

/// Multiplies an integer quantity by a `[0, 1]` ratio and rounds to the
/// nearest integer. Used for the CPU-side attribution, which tolerates only
/// small rounding from the float-ratio intermediate (§8, invariant 1).
pub fn scale_round(value: u64, ratio: f64) -> u64 {
    (value as f64 * ratio).round() as u64
}

/// Splits `total` across `shares` (e.g. per-process SM utilization values)
/// using exact integer arithmetic, so that the parts sum to `total` exactly
/// (§8, invariant 2 demands exact equality for GPU power, unlike the CPU
/// case). Any integer-division remainder is assigned to the last share.
pub fn distribute_exact(total: u64, shares: &[u64]) -> Vec<u64> {
    let denom: u64 = shares.iter().sum();
    if denom == 0 || shares.is_empty() {
        return vec![0; shares.len()];
    }
    let mut parts = Vec::with_capacity(shares.len());
    let mut assigned: u64 = 0;
    for (i, &share) in shares.iter().enumerate() {
        let part = if i + 1 == shares.len() {
            total - assigned
        } else {
            let part = (share as u128 * total as u128 / denom as u128) as u64;
            assigned += part;
            part
        };
        parts.push(part);
    }
    parts
}
