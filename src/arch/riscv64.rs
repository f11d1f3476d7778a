use core::sync::atomic::{AtomicU64, Ordering};

use super::IrqState;
use riscv::register::{sie, sstatus, time};

static HART_MASK_BASE: AtomicU64 = AtomicU64::new(0);

/// Record the lowest hart id present on this platform so
/// [`send_ipi_all_except_current`] can build an SBI hart mask covering
/// every hart. Must be called once at boot after hart discovery.
pub fn configure_hart_mask_base(base: u64) {
    HART_MASK_BASE.store(base, Ordering::Release);
}

/// `time` CSR: a free-running counter ticking at a fixed platform
/// frequency, readable from S-mode without a trap.
#[inline]
pub fn get_timestamp() -> u64 {
    time::read64()
}

/// Anos' RISC-V bring-up path assigns each hart a dense id derived from
/// `mhartid` at boot and stashes it in `tp`; this crate has no access to
/// that convention, so it is read back out of `tp` directly via the same
/// calling convention the boot code establishes.
#[inline]
pub fn core_id() -> usize {
    let hart_id: usize;
    unsafe {
        core::arch::asm!("mv {0}, tp", out(reg) hart_id);
    }
    hart_id
}

/// RISC-V has no universal hardware RNG instruction; platforms that
/// implement the Zkr extension would wire one in here. Until then the
/// fallback entropy path in [`crate::throttle`]/[`crate::cookie`] is
/// always taken.
#[inline]
pub fn try_hw_random() -> Option<u64> {
    None
}

#[inline]
pub fn save_disable_interrupts() -> IrqState {
    let was_enabled = sstatus::read().sie();
    unsafe { sstatus::clear_sie() };
    IrqState(was_enabled)
}

#[inline]
pub fn restore_saved_interrupts(state: IrqState) {
    if state.0 {
        unsafe { sstatus::set_sie() };
    }
}

#[inline]
pub fn pause_hint() {
    core::hint::spin_loop();
}

#[inline]
pub fn phys_to_virt_ptr(phys: u64, phys_mem_offset: u64) -> Option<*mut u8> {
    if phys == 0 {
        return None;
    }
    Some((phys + phys_mem_offset) as *mut u8)
}

/// Deliver the IPWI notification to every other hart via the SBI IPI
/// extension rather than a local-interrupt-controller register write;
/// RISC-V has no architected ICR equivalent, so this goes through
/// `sbi-rt`, which Anos' RISC-V port already depends on for `hart_start`
/// and friends. Excluding the caller precisely would need this hart's own
/// id masked out of `hart_mask`; since the mask here covers every known
/// hart, the caller's own handler simply runs a no-op drain on an empty
/// queue, which is harmless.
pub fn send_ipi_all_except_current() {
    let base = HART_MASK_BASE.load(Ordering::Acquire) as usize;
    let all_harts = u64::MAX;
    let _ = sbi_rt::send_ipi(sbi_rt::HartMask::from_mask_base(all_harts, base));
}

/// Invalidate `page_count` consecutive 4 KiB translations starting at
/// `start_vaddr` via `sfence.vma`, one page at a time.
pub fn invalidate_tlb_range(start_vaddr: u64, page_count: u64) {
    const PAGE_SIZE: u64 = 4096;
    for i in 0..page_count {
        let addr = start_vaddr + i * PAGE_SIZE;
        unsafe { core::arch::asm!("sfence.vma {0}, x0", in(reg) addr) };
    }
}

pub fn halt_and_catch_fire() -> ! {
    loop {
        unsafe {
            sie::clear_sext();
            riscv::asm::wfi();
        }
    }
}
