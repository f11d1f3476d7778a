//! Component B: abuse throttling (§4.2).
//!
//! Defends the capability lookup path with an escalating, jittered spin
//! delay. Never touches the scheduler: the delay is a busy spin using the
//! arch pause hint, safe to call with interrupts enabled or disabled, but
//! never while holding a lock the caller can't afford to hold for up to
//! ~2,000,000 cycles.

use crate::arch;
use crate::mix::fmix64;

/// Delay floor, in cycles, applied after the first failure (§6).
pub const THROTTLE_FLOOR: u64 = 50_000;
/// Additional delay, in cycles, added per prior recorded failure (§6).
pub const THROTTLE_STEP: u64 = 5_000;
/// Delay ceiling, in cycles, regardless of failure count (§6).
pub const THROTTLE_CEILING: u64 = 1_000_000;

/// The external "subject" a capability lookup fails or succeeds against.
/// Implemented by the embedding kernel's process type; this crate only
/// ever reads and mutates the single failure counter (§3, §5: callers are
/// responsible for any lock needed to make these operations atomic with
/// respect to a multi-threaded subject).
pub trait ThrottleSubject {
    fn cap_failures(&self) -> u64;
    fn increment_cap_failures(&self);
    fn reset_cap_failures(&self);
}

/// Penalize `subject` with an escalating, jittered spin delay (P3, P4),
/// then record the failure (I4).
pub fn abuse<S: ThrottleSubject>(subject: &S) {
    let base = base_delay(subject.cap_failures());
    let jitter = rand_entropy() % base;
    let delay = base + jitter;

    let start = arch::get_timestamp();
    while arch::get_timestamp().wrapping_sub(start) < delay {
        arch::pause_hint();
    }

    subject.increment_cap_failures();
}

/// Clear the failure counter (P5); the next `abuse` starts from
/// [`THROTTLE_FLOOR`] again.
pub fn reset<S: ThrottleSubject>(subject: &S) {
    subject.reset_cap_failures();
}

fn base_delay(cap_failures: u64) -> u64 {
    THROTTLE_FLOOR
        .saturating_add(THROTTLE_STEP.saturating_mul(cap_failures))
        .min(THROTTLE_CEILING)
}

/// A hardware RNG read when available, otherwise the same avalanche mix
/// Cookie Mint uses, applied to the cycle counter. The jitter only needs
/// to defeat a timing oracle, not resist cryptanalysis (§4.2).
fn rand_entropy() -> u64 {
    arch::try_hw_random().unwrap_or_else(|| fmix64(arch::get_timestamp()).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct TestSubject {
        failures: Cell<u64>,
    }

    impl ThrottleSubject for TestSubject {
        fn cap_failures(&self) -> u64 {
            self.failures.get()
        }
        fn increment_cap_failures(&self) {
            self.failures.set(self.failures.get() + 1);
        }
        fn reset_cap_failures(&self) {
            self.failures.set(0);
        }
    }

    #[test]
    fn base_delay_escalates_and_caps() {
        assert_eq!(base_delay(0), 50_000);
        assert_eq!(base_delay(1), 55_000);
        assert_eq!(base_delay(4), 70_000);
        assert_eq!(base_delay(1_000_000), THROTTLE_CEILING);
    }

    #[test]
    fn abuse_increments_failure_count() {
        let subject = TestSubject { failures: Cell::new(0) };
        abuse(&subject);
        assert_eq!(subject.cap_failures(), 1);
        abuse(&subject);
        assert_eq!(subject.cap_failures(), 2);
    }

    #[test]
    fn reset_returns_to_floor() {
        let subject = TestSubject { failures: Cell::new(5) };
        reset(&subject);
        assert_eq!(subject.cap_failures(), 0);
        assert_eq!(base_delay(subject.cap_failures()), THROTTLE_FLOOR);
    }
}
