//! Architecture-dispatched platform services consumed by the coordination
//! layer (§6): cycle counter, hart id, hardware RNG probe, interrupt
//! save/restore, IPI delivery and the kernel-pointer-from-physical-address
//! lookup used by the shootdown façade.
//!
//! Every function here is a thin, arch-specific wrapper; none of them
//! encode kernel policy, which is why they live outside the four
//! components instead of behind a trait like [`crate::vmm::LocalVmm`].

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::*;

#[cfg(target_arch = "riscv64")]
mod riscv64;
#[cfg(target_arch = "riscv64")]
pub use self::riscv64::*;

#[cfg(not(any(target_arch = "x86_64", target_arch = "riscv64")))]
mod generic;
#[cfg(not(any(target_arch = "x86_64", target_arch = "riscv64")))]
pub use self::generic::*;

/// Opaque token returned by [`save_disable_interrupts`]; pass it unchanged
/// to [`restore_saved_interrupts`].
#[derive(Clone, Copy)]
pub struct IrqState(pub(crate) bool);

/// Reserved IPI vector used to notify peers of new IPWI work. Matches the
/// vector Anos' x86_64 port reserves (0x02) for the same purpose; other
/// architectures pick whatever their interrupt controller exposes as an
/// equivalent software-triggerable vector.
pub const IPWI_IPI_VECTOR: u8 = 0x02;
