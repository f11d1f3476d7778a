//! Internal error taxonomy for the coordination layer.
//!
//! Public entry points keep the `bool`/`u64`/`Option` contracts described by
//! the design (so existing call sites don't have to match on an enum for a
//! yes/no answer), but every fallible path is implemented in terms of
//! [`CoordError`] so the reason is never lost before a `debug!`/`warn!` call.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("cpu id {0} is out of range (N_CPU = {1})")]
    CpuOutOfRange(usize, usize),

    #[error("cpu {0} has not called init_this_cpu yet")]
    CpuNotInitialized(usize),

    #[error("ipwi queue on cpu {0} is full")]
    QueueFull(usize),

    #[error("failed to translate a root page-table physical address to a kernel pointer")]
    TranslationFailed,
}
