//! aarch64 (AAPCS64) context switching
//!
//! Same symmetric-transfer contract as the x86_64 backend. The saved frame
//! holds x19-x28, the frame pointer, the link register and the callee-saved
//! SIMD registers d8-d15.
//!
//! Frame layout, low to high:
//!
//! ```text
//! sp + 0x00  x19, x20   (first entry: x19 = the EntryFn)
//! sp + 0x10  x21, x22
//! sp + 0x20  x23, x24
//! sp + 0x30  x25, x26
//! sp + 0x40  x27, x28
//! sp + 0x50  x29, x30   (first entry: x30 = co_boot)
//! sp + 0x60  d8  .. d15
//! ```

use crate::context::{EntryFn, RawCtx, Transfer};
use std::arch::naked_asm;

const FRAME_SIZE: usize = 0xa0;
const SLOT_ENTRY: usize = 0; // x19
const SLOT_LR: usize = 11; // x30

/// Build the initial frame so that the first switch into the context lands
/// in `co_boot`.
///
/// # Safety
///
/// See `context::init_stack`.
pub unsafe fn init_stack(base: *mut u8, size: usize, entry: EntryFn) -> RawCtx {
    let top = (base as usize + size) & !0xF;
    let frame = (top - FRAME_SIZE) as *mut u64;
    core::ptr::write_bytes(frame, 0, FRAME_SIZE / 8);
    *frame.add(SLOT_ENTRY) = entry as usize as u64;
    *frame.add(SLOT_LR) = co_boot as usize as u64;
    RawCtx(frame as *mut u8)
}

/// First-entry thunk. The switch left the jumper's context in x0 and the
/// payload in x1 — already the argument registers — so just call the entry
/// function restored into x19.
#[unsafe(naked)]
unsafe extern "C" fn co_boot() {
    naked_asm!(
        "mov x29, xzr",
        "mov x30, xzr",
        "blr x19",
        "brk #0x1",
    );
}

/// Suspend the current execution, enter `to` and pass `data` along.
///
/// `(from, data)` travels in x0:x1, the AAPCS return slot of this function
/// and the input `co_boot` sees on first entry.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_ctx(_to: RawCtx, _data: *mut u8) -> Transfer {
    naked_asm!(
        // Save our frame.
        "sub sp, sp, #0xa0",
        "stp x19, x20, [sp, #0x00]",
        "stp x21, x22, [sp, #0x10]",
        "stp x23, x24, [sp, #0x20]",
        "stp x25, x26, [sp, #0x30]",
        "stp x27, x28, [sp, #0x40]",
        "stp x29, x30, [sp, #0x50]",
        "stp d8,  d9,  [sp, #0x60]",
        "stp d10, d11, [sp, #0x70]",
        "stp d12, d13, [sp, #0x80]",
        "stp d14, d15, [sp, #0x90]",
        // Hand out our context, adopt the target's.
        "mov x9, sp",
        "mov sp, x0",
        "ldp x19, x20, [sp, #0x00]",
        "ldp x21, x22, [sp, #0x10]",
        "ldp x23, x24, [sp, #0x20]",
        "ldp x25, x26, [sp, #0x30]",
        "ldp x27, x28, [sp, #0x40]",
        "ldp x29, x30, [sp, #0x50]",
        "ldp d8,  d9,  [sp, #0x60]",
        "ldp d10, d11, [sp, #0x70]",
        "ldp d12, d13, [sp, #0x80]",
        "ldp d14, d15, [sp, #0x90]",
        "add sp, sp, #0xa0",
        // Transfer { ctx: x0, data: x1 }; x1 already holds the payload.
        "mov x0, x9",
        "ret",
    );
}
