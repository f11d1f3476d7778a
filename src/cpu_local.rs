//! The global per-CPU state table.
//!
//! Per `SPEC_FULL.md` §9's "Global per-CPU state table" redesign note, this
//! is deliberately *not* the GS-segment/thread-local pattern Hermit's own
//! `core_local.rs` uses (`CoreLocal::get()` reading a swizzled base
//! register) — the spec calls for a plain array indexed by dense `cpu_id`,
//! populated once at boot and then touched only through `&SLOTS[cpu_id]`.
//! That single access pattern is simple enough that a thread-local fast
//! path buys nothing here and would hide the per-slot lifecycle the spec
//! describes (uninitialized until `init_this_cpu`, live until shutdown).

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hermit_sync::InterruptTicketMutex;

use crate::ipwi::{WorkItem, IPWI_QUEUE_CAPACITY};

/// Compile-time ceiling on dense CPU ids (§3, §6). 16 under the `smp`
/// feature (matching Hermit's own `smp = ["acpi"]` split), 1 otherwise.
#[cfg(feature = "smp")]
pub const N_CPU: usize = 16;
#[cfg(not(feature = "smp"))]
pub const N_CPU: usize = 1;

/// One per active hart. `ipwi_queue`/`ipwi_queue_lock` back Component C;
/// `cookie_counter` backs Component A. Both live in the same slot because
/// they share a lifetime, not because they share a lock — the cookie
/// counter is a bare relaxed atomic and is valid before `init_this_cpu`
/// ever runs, preserving Cookie Mint's "blocks on no other subsystem"
/// contract.
pub(crate) struct CpuSlot {
    pub(crate) initialized: AtomicBool,
    pub(crate) cookie_counter: AtomicU64,
    pub(crate) ipwi_queue: InterruptTicketMutex<heapless::Deque<WorkItem, IPWI_QUEUE_CAPACITY>>,
}

impl CpuSlot {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            cookie_counter: AtomicU64::new(0),
            ipwi_queue: InterruptTicketMutex::new(heapless::Deque::new()),
        }
    }
}

const EMPTY_SLOT: CpuSlot = CpuSlot::new();
static SLOTS: [CpuSlot; N_CPU] = [EMPTY_SLOT; N_CPU];

pub(crate) fn slot(cpu_id: usize) -> Option<&'static CpuSlot> {
    SLOTS.get(cpu_id)
}

pub(crate) fn slot_count() -> usize {
    N_CPU
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_start_uninitialized() {
        assert!(!slot(0).unwrap().initialized.load(Ordering::Relaxed));
    }

    #[test]
    fn out_of_range_cpu_is_none() {
        assert!(slot(N_CPU).is_none());
    }
}
