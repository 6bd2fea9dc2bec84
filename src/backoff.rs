//! Backoff policies for reconnection and statement retry.
//!
//! Both policies are pure functions of the attempt number, so callers own the
//! sleeping and the code stays trivially testable.

use std::time::Duration;

/// Delay before the next connection attempt: `base * 2^(attempt - 1)`, capped.
///
/// `attempt` is one-based; a value of zero is treated as the first attempt.
pub fn reconnect_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// Delay before the next statement retry: linear in the attempt number.
pub fn retry_delay(step: Duration, attempt: u32) -> Duration {
    step.saturating_mul(attempt.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(5);
    const CAP: Duration = Duration::from_secs(60);

    #[test]
    fn test_reconnect_delay_doubles_per_attempt() {
        assert_eq!(reconnect_delay(BASE, CAP, 1), Duration::from_secs(5));
        assert_eq!(reconnect_delay(BASE, CAP, 2), Duration::from_secs(10));
        assert_eq!(reconnect_delay(BASE, CAP, 3), Duration::from_secs(20));
        assert_eq!(reconnect_delay(BASE, CAP, 4), Duration::from_secs(40));
    }

    #[test]
    fn test_reconnect_delay_caps() {
        assert_eq!(reconnect_delay(BASE, CAP, 5), CAP);
        assert_eq!(reconnect_delay(BASE, CAP, 10), CAP);
        assert_eq!(reconnect_delay(BASE, CAP, u32::MAX), CAP);
    }

    #[test]
    fn test_reconnect_delay_zero_attempt_is_first() {
        assert_eq!(reconnect_delay(BASE, CAP, 0), BASE);
    }

    #[test]
    fn test_reconnect_delay_cap_below_base() {
        let cap = Duration::from_secs(2);
        assert_eq!(reconnect_delay(BASE, cap, 1), cap);
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let step = Duration::from_secs(1);
        assert_eq!(retry_delay(step, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(step, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(step, 3), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_delay_zero_attempt_is_first() {
        assert_eq!(retry_delay(Duration::from_secs(1), 0), Duration::from_secs(1));
    }
}
