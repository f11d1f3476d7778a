//! Core coordination layer for the Anos microkernel.
//!
//! This crate owns the four pieces of kernel-internal state that must stay
//! correct across CPUs for a capability-based microkernel to be sound on SMP
//! hardware: capability cookie minting ([`cookie`]), abuse throttling
//! ([`throttle`]), the inter-processor work-item bus ([`ipwi`]) and the
//! shootdown-coherent VMM façade ([`vmm`]).
//!
//! Everything outside of these four modules — boot, page-table bootstrap,
//! drivers, user-mode servers, the scheduler itself — is a collaborator that
//! this crate only reaches through the trait objects and `arch` functions in
//! [`vmm::LocalVmm`], [`throttle::ThrottleSubject`] and [`arch`].
#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), allow(dead_code))]

pub mod arch;
pub mod cookie;
pub mod cpu_local;
pub mod error;
pub mod ipwi;
mod mix;
pub mod throttle;
pub mod vmm;

pub use cpu_local::N_CPU;
pub use error::CoordError;

/// Re-exported so callers wiring up the IPI vector don't need to reach into
/// [`ipwi`] directly.
pub use ipwi::ipwi_ipi_handler;
