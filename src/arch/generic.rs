//! Host-target fallback used when running the crate's test suite off the
//! bare-metal targets (`cargo test` on an ordinary x86_64/aarch64 dev
//! machine still selects this module only if neither arch-specific module
//! matched `target_arch`; in practice the x86_64 module covers CI).
use super::IrqState;
use std::sync::atomic::{AtomicU64, Ordering};

static FAKE_CLOCK: AtomicU64 = AtomicU64::new(0);

pub fn get_timestamp() -> u64 {
    FAKE_CLOCK.fetch_add(1, Ordering::Relaxed)
}

pub fn core_id() -> usize {
    0
}

pub fn try_hw_random() -> Option<u64> {
    None
}

pub fn save_disable_interrupts() -> IrqState {
    IrqState(false)
}

pub fn restore_saved_interrupts(_state: IrqState) {}

pub fn pause_hint() {
    core::hint::spin_loop();
}

pub fn phys_to_virt_ptr(phys: u64, phys_mem_offset: u64) -> Option<*mut u8> {
    if phys == 0 {
        None
    } else {
        Some((phys + phys_mem_offset) as *mut u8)
    }
}

pub fn invalidate_tlb_range(_start_vaddr: u64, _page_count: u64) {}

pub fn send_ipi_all_except_current() {}

pub fn halt_and_catch_fire() -> ! {
    panic!("halt_and_catch_fire called on host test target");
}
