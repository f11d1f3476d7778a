//! Component D: the shootdown-coherent VMM façade (§4.4).
//!
//! The only place in the kernel that mutates a *running* process's
//! address space: every `map_*`/`unmap_*` here performs the local
//! page-table edit and then publishes a [`crate::ipwi::TlbShootdownPayload`]
//! to every other CPU before returning, so no peer can keep running
//! against a stale translation once this call has returned (§4.4, I5).

use bitflags::bitflags;

use crate::arch;
use crate::error::CoordError;
use crate::ipwi::{self, TlbShootdownPayload, WorkItem};

bitflags! {
    /// Mapping access flags, passed straight through to [`LocalVmm`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MapFlags: u32 {
        const READ    = 0b0001;
        const WRITE   = 0b0010;
        const EXECUTE = 0b0100;
        const USER    = 0b1000;
    }
}

/// The process-level view the façade needs: just enough to identify a
/// victim address space for the shootdown payload (§3 Subject). Owned and
/// implemented by the embedding kernel's process type.
pub trait Process {
    fn pid(&self) -> u64;
    fn root_table_phys(&self) -> u64;
}

/// The local, single-CPU page-table primitives this façade wraps (§6).
/// Implementations are expected to leave the *local* TLB coherent (e.g.
/// via `invlpg`/`sfence.vma` for the mutating CPU) but make no promise
/// about other CPUs — that promise is this façade's job.
pub trait LocalVmm {
    /// Returns `true` on success.
    fn map_page_in(&self, root_table_kernel_ptr: *mut u8, vaddr: u64, phys: u64, flags: MapFlags) -> bool;
    /// Returns `true` on success.
    fn map_pages_in(
        &self,
        root_table_kernel_ptr: *mut u8,
        vaddr: u64,
        phys: u64,
        flags: MapFlags,
        page_count: u64,
    ) -> bool;
    /// Returns the previously mapped physical address, or 0 if nothing
    /// was mapped there.
    fn unmap_page_in(&self, root_table_kernel_ptr: *mut u8, vaddr: u64) -> u64;
    /// Returns `true` on success.
    fn unmap_pages_in(&self, root_table_kernel_ptr: *mut u8, vaddr: u64, page_count: u64) -> bool;
}

/// Physical-memory window used to turn a root-table physical address
/// into a kernel-dereferenceable pointer (§6 `phys_to_virt_ptr`). Set once
/// at boot by the embedding kernel.
pub fn set_phys_mem_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, core::sync::atomic::Ordering::Release);
}

static PHYS_MEM_OFFSET: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

fn translate_root(root_table_phys: u64) -> Result<*mut u8, CoordError> {
    let offset = PHYS_MEM_OFFSET.load(core::sync::atomic::Ordering::Acquire);
    arch::phys_to_virt_ptr(root_table_phys, offset).ok_or(CoordError::TranslationFailed)
}

fn publish_shootdown(payload: TlbShootdownPayload) {
    debug_assert!(payload.is_well_formed());
    let item = WorkItem::tlb_shootdown(payload);
    ipwi::enqueue_all_except_current(item);
    ipwi::notify_all_except_current();
}

/// §4.4 steps 2–6, parameterized over the local edit and the shootdown
/// payload it implies. Runs with interrupts disabled from just before the
/// local edit until just after the shootdown is enqueued on every peer
/// (I5, P10).
fn with_shootdown<R>(payload: TlbShootdownPayload, local_edit: impl FnOnce() -> R) -> R {
    let irq = arch::save_disable_interrupts();
    let result = local_edit();
    publish_shootdown(payload);
    arch::restore_saved_interrupts(irq);
    result
}

/// Invoked by [`crate::ipwi::ipwi_ipi_handler`] on every peer that
/// receives a `TLB_SHOOTDOWN` work item.
pub(crate) fn invalidate_local(payload: &TlbShootdownPayload) {
    arch::invalidate_tlb_range(payload.start_vaddr, payload.page_count.max(1));
}

pub fn map_page_in_process<V: LocalVmm, P: Process>(
    vmm: &V,
    proc: &P,
    vaddr: u64,
    phys: u64,
    flags: MapFlags,
) -> bool {
    let Ok(root_ptr) = translate_root(proc.root_table_phys()) else {
        return false;
    };
    let payload = TlbShootdownPayload::by_pid(vaddr, 1, proc.pid());
    with_shootdown(payload, || vmm.map_page_in(root_ptr, vaddr, phys, flags))
}

pub fn map_page_in_root<V: LocalVmm>(
    vmm: &V,
    root_table_phys: u64,
    vaddr: u64,
    phys: u64,
    flags: MapFlags,
) -> bool {
    let Ok(root_ptr) = translate_root(root_table_phys) else {
        return false;
    };
    let payload = TlbShootdownPayload::by_root_table(vaddr, 1, root_table_phys);
    with_shootdown(payload, || vmm.map_page_in(root_ptr, vaddr, phys, flags))
}

pub fn map_pages_in_process<V: LocalVmm, P: Process>(
    vmm: &V,
    proc: &P,
    vaddr: u64,
    phys: u64,
    flags: MapFlags,
    page_count: u64,
) -> bool {
    let Ok(root_ptr) = translate_root(proc.root_table_phys()) else {
        return false;
    };
    let payload = TlbShootdownPayload::by_pid(vaddr, page_count, proc.pid());
    with_shootdown(payload, || {
        vmm.map_pages_in(root_ptr, vaddr, phys, flags, page_count)
    })
}

pub fn map_pages_in_root<V: LocalVmm>(
    vmm: &V,
    root_table_phys: u64,
    vaddr: u64,
    phys: u64,
    flags: MapFlags,
    page_count: u64,
) -> bool {
    let Ok(root_ptr) = translate_root(root_table_phys) else {
        return false;
    };
    let payload = TlbShootdownPayload::by_root_table(vaddr, page_count, root_table_phys);
    with_shootdown(payload, || {
        vmm.map_pages_in(root_ptr, vaddr, phys, flags, page_count)
    })
}

pub fn unmap_page_in_process<V: LocalVmm, P: Process>(vmm: &V, proc: &P, vaddr: u64) -> u64 {
    let Ok(root_ptr) = translate_root(proc.root_table_phys()) else {
        return 0;
    };
    let payload = TlbShootdownPayload::by_pid(vaddr, 1, proc.pid());
    with_shootdown(payload, || vmm.unmap_page_in(root_ptr, vaddr))
}

pub fn unmap_page_in_root<V: LocalVmm>(vmm: &V, root_table_phys: u64, vaddr: u64) -> u64 {
    let Ok(root_ptr) = translate_root(root_table_phys) else {
        return 0;
    };
    let payload = TlbShootdownPayload::by_root_table(vaddr, 1, root_table_phys);
    with_shootdown(payload, || vmm.unmap_page_in(root_ptr, vaddr))
}

pub fn unmap_pages_in_process<V: LocalVmm, P: Process>(
    vmm: &V,
    proc: &P,
    vaddr: u64,
    page_count: u64,
) -> bool {
    let Ok(root_ptr) = translate_root(proc.root_table_phys()) else {
        return false;
    };
    let payload = TlbShootdownPayload::by_pid(vaddr, page_count, proc.pid());
    with_shootdown(payload, || vmm.unmap_pages_in(root_ptr, vaddr, page_count))
}

pub fn unmap_pages_in_root<V: LocalVmm>(
    vmm: &V,
    root_table_phys: u64,
    vaddr: u64,
    page_count: u64,
) -> bool {
    let Ok(root_ptr) = translate_root(root_table_phys) else {
        return false;
    };
    let payload = TlbShootdownPayload::by_root_table(vaddr, page_count, root_table_phys);
    with_shootdown(payload, || vmm.unmap_pages_in(root_ptr, vaddr, page_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use std::collections::BTreeMap;

    struct FakeVmm {
        mappings: RefCell<BTreeMap<u64, u64>>,
    }

    impl FakeVmm {
        fn new() -> Self {
            Self { mappings: RefCell::new(BTreeMap::new()) }
        }
    }

    impl LocalVmm for FakeVmm {
        fn map_page_in(&self, _root: *mut u8, vaddr: u64, phys: u64, _flags: MapFlags) -> bool {
            self.mappings.borrow_mut().insert(vaddr, phys);
            true
        }
        fn map_pages_in(
            &self,
            _root: *mut u8,
            vaddr: u64,
            phys: u64,
            _flags: MapFlags,
            page_count: u64,
        ) -> bool {
            let mut mappings = self.mappings.borrow_mut();
            for i in 0..page_count {
                mappings.insert(vaddr + i * 4096, phys + i * 4096);
            }
            true
        }
        fn unmap_page_in(&self, _root: *mut u8, vaddr: u64) -> u64 {
            self.mappings.borrow_mut().remove(&vaddr).unwrap_or(0)
        }
        fn unmap_pages_in(&self, _root: *mut u8, vaddr: u64, page_count: u64) -> bool {
            let mut mappings = self.mappings.borrow_mut();
            for i in 0..page_count {
                mappings.remove(&(vaddr + i * 4096));
            }
            true
        }
    }

    struct FakeProcess {
        pid: u64,
        root_table_phys: u64,
    }

    impl Process for FakeProcess {
        fn pid(&self) -> u64 {
            self.pid
        }
        fn root_table_phys(&self) -> u64 {
            self.root_table_phys
        }
    }

    #[test]
    fn map_then_unmap_round_trips() {
        set_phys_mem_offset(0);
        let vmm = FakeVmm::new();
        let proc = FakeProcess { pid: 7, root_table_phys: 0x1000 };

        assert!(map_page_in_process(&vmm, &proc, 0x2000, 0x4000, MapFlags::READ | MapFlags::WRITE));
        assert_eq!(unmap_page_in_process(&vmm, &proc, 0x2000), 0x4000);
        assert_eq!(vmm.mappings.borrow().get(&0x2000), None);
    }

    #[test]
    fn translation_failure_maps_nothing() {
        set_phys_mem_offset(0);
        let vmm = FakeVmm::new();
        let proc = FakeProcess { pid: 7, root_table_phys: 0 };

        assert!(!map_page_in_process(&vmm, &proc, 0x2000, 0x4000, MapFlags::READ));
        assert!(vmm.mappings.borrow().is_empty());
    }

    #[test]
    fn shootdown_payload_targets_the_right_process() {
        let proc = FakeProcess { pid: 42, root_table_phys: 0x3000 };
        let payload = TlbShootdownPayload::by_pid(0x5000, 1, proc.pid());
        assert_eq!(payload.target_pid, 42);
        assert_eq!(payload.target_root_table_phys, 0);
        assert!(payload.is_well_formed());
    }
}
