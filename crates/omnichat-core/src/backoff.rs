//! Capped exponential backoff shared by retry and reconnection scheduling

use core::time::Duration;

/// Delay before the `attempt`-th retry (1-based)
///
/// `initial * multiplier^(attempt - 1)`, capped at `max`. Attempt 0 is treated
/// like attempt 1 so the first delay always equals `initial`.
pub fn exponential_delay(
    initial: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = initial.as_secs_f64() * multiplier.powi(exponent);
    let cap = max.as_secs_f64();

    // f64::min returns the non-NaN operand, and an infinite product folds to the cap
    let bounded = raw.min(cap);
    if bounded.is_finite() && bounded >= 0.0 {
        Duration::from_secs_f64(bounded)
    } else {
        max
    }
}
