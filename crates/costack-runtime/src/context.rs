//! Symmetric context transfer types
//!
//! A context is the stack pointer of a suspended execution; all callee-saved
//! state lives on that stack. `switch_ctx` suspends the caller, enters the
//! target and hands over one word of payload. The suspended side resumes
//! when somebody later switches back into the context it produced.
//!
//! Contexts are one-shot: every switch consumes the target and produces a
//! fresh context for the side that was just suspended.

use crate::current_arch;

/// A saved execution context (stack pointer into its stack region).
/// Null means "never ran".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RawCtx(pub *mut u8);

impl RawCtx {
    pub const NULL: RawCtx = RawCtx(core::ptr::null_mut());

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

// Safety: a RawCtx is only ever dereferenced (jumped into) from the owning
// scheduler thread; the pointer itself may travel inside the record.
unsafe impl Send for RawCtx {}

/// Result of a context switch: the context of the side that jumped to us,
/// and the payload it passed.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Transfer {
    pub ctx: RawCtx,
    pub data: *mut u8,
}

/// Entry function of a fresh context. Receives the suspended jumper's
/// context and the payload of the first switch into this context.
///
/// An entry function never returns through normal control flow; it must
/// leave by switching to another context, passing a null payload to signal
/// termination.
pub type EntryFn = extern "C" fn(from: RawCtx, data: *mut u8);

/// Build a fresh context on `[base, base + size)` that will begin executing
/// `entry` on first switch.
///
/// # Safety
///
/// `base` must point to at least `size` writable bytes that stay alive and
/// untouched (except through context switches) while the context exists.
#[inline]
pub unsafe fn init_stack(base: *mut u8, size: usize, entry: EntryFn) -> RawCtx {
    current_arch::init_stack(base, size, entry)
}

/// Switch to `to`, handing it `data`. Returns when some context switches
/// back into the context this call produced.
///
/// # Safety
///
/// `to` must be a live context produced by `init_stack` or a previous
/// switch, not yet consumed, and belonging to the current thread's runtime.
#[inline]
pub unsafe fn switch_ctx(to: RawCtx, data: *mut u8) -> Transfer {
    current_arch::switch_ctx(to, data)
}
