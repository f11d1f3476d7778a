use core::sync::atomic::{AtomicPtr, Ordering};

use super::IrqState;
use raw_cpuid::CpuId;
use x86_64::instructions::interrupts;
use x86_64::instructions::random::RdRand;

static LOCAL_APIC_BASE: AtomicPtr<u32> = AtomicPtr::new(core::ptr::null_mut());

/// Record the already-mapped local APIC MMIO base so
/// [`send_ipi_all_except_current`] can issue IPWI IPIs. Must be called
/// once during per-CPU bring-up, after the embedding kernel maps the
/// APIC, and before [`crate::ipwi::init_this_cpu`].
pub fn configure_local_apic(apic_base: *mut u32) {
    LOCAL_APIC_BASE.store(apic_base, Ordering::Release);
}

/// Free-running cycle counter via `RDTSC`. Not synchronized across cores;
/// the coordination layer only ever compares readings taken on the same
/// core within a single call, which is all the spec requires.
#[inline]
pub fn get_timestamp() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Dense core id for the calling hart. Anos' x86_64 boot path assigns each
/// core a sequential APIC-derived id at bring-up and exposes it through
/// per-core storage; here it is read directly from the local APIC ID leaf
/// so this module has no dependency on how that storage is organized.
#[inline]
pub fn core_id() -> usize {
    CpuId::new()
        .get_feature_info()
        .map(|finfo| finfo.initial_local_apic_id() as usize)
        .unwrap_or(0)
}

/// Attempt a hardware-random 64-bit read via `RDRAND`. Returns `None` on
/// CPUs that lack the instruction or when the transient read failure case
/// is hit (rare, and always safe to fall back from).
#[inline]
pub fn try_hw_random() -> Option<u64> {
    RdRand::new().and_then(|r| r.get_u64())
}

/// `cli`/`sti` are ring-0-only; under `cargo test` this module still runs
/// on the host CPU in userspace for the unprivileged instructions above,
/// but disabling interrupts from ring 3 would fault, so the actual
/// mask/unmask is skipped in test builds and only the flag is tracked.
#[inline]
pub fn save_disable_interrupts() -> IrqState {
    let was_enabled = interrupts::are_enabled();
    #[cfg(not(test))]
    interrupts::disable();
    IrqState(was_enabled)
}

#[inline]
pub fn restore_saved_interrupts(state: IrqState) {
    #[cfg(not(test))]
    if state.0 {
        interrupts::enable();
    }
    #[cfg(test)]
    let _ = state;
}

/// `pause` keeps the spin in [`crate::throttle::abuse`] from starving the
/// memory bus and is the documented hint for tight retry loops on x86_64.
#[inline]
pub fn pause_hint() {
    core::hint::spin_loop();
}

/// Direct-mapped physical memory means a kernel pointer is just the
/// physical address offset by the kernel's physical-memory window; the
/// window base is supplied by the embedding kernel's boot info, not by
/// this crate, so it is threaded through as a parameter rather than a
/// global here.
#[inline]
pub fn phys_to_virt_ptr(phys: u64, phys_mem_offset: u64) -> Option<*mut u8> {
    if phys == 0 {
        return None;
    }
    Some((phys + phys_mem_offset) as *mut u8)
}

/// Deliver [`super::IPWI_IPI_VECTOR`] to every CPU other than the caller.
/// Grounded on the local-APIC ICR broadcast-shorthand pattern Anos' APIC
/// driver uses for its existing TLB-flush and wakeup IPIs. A no-op (with
/// a debug log) if [`configure_local_apic`] was never called, which only
/// happens if the embedding kernel calls this before its own APIC bring-up.
pub fn send_ipi_all_except_current() {
    const ICR_LOW: usize = 0x300 / 4;
    const ALL_EXCLUDING_SELF: u32 = 0b11 << 18;

    let apic_base = LOCAL_APIC_BASE.load(Ordering::Acquire);
    if apic_base.is_null() {
        #[cfg(debug_assertions)]
        log::warn!("send_ipi_all_except_current called before configure_local_apic");
        return;
    }
    let command = ALL_EXCLUDING_SELF | u32::from(super::IPWI_IPI_VECTOR);
    unsafe {
        let icr_low = apic_base.add(ICR_LOW);
        core::ptr::write_volatile(icr_low, command);
    }
}

/// Invalidate `page_count` consecutive 4 KiB translations starting at
/// `start_vaddr` in the *local* TLB only; cross-CPU coherence is the
/// shootdown façade's job, not this function's.
#[cfg(not(test))]
pub fn invalidate_tlb_range(start_vaddr: u64, page_count: u64) {
    const PAGE_SIZE: u64 = 4096;
    for i in 0..page_count {
        let addr = (start_vaddr + i * PAGE_SIZE) as *const u8;
        unsafe { core::arch::asm!("invlpg [{}]", in(reg) addr, options(nostack, preserves_flags)) };
    }
}

/// `invlpg` is ring-0-only; host tests exercise the façade's bookkeeping
/// (which peers got a shootdown, exact range) through the mocked
/// [`crate::vmm::LocalVmm`] instead of a real TLB, so this is a no-op here.
#[cfg(test)]
pub fn invalidate_tlb_range(_start_vaddr: u64, _page_count: u64) {}

pub fn halt_and_catch_fire() -> ! {
    loop {
        interrupts::disable();
        x86_64::instructions::hlt();
    }
}
