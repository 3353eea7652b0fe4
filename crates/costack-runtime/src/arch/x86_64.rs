//! x86_64 (System V) context switching
//!
//! Symmetric transfer: the saved frame lives on the suspended stack and
//! holds the six callee-saved registers plus the resume address. A context
//! is just the stack pointer to that frame.
//!
//! Frame layout, low to high:
//!
//! ```text
//! sp + 0x00  r12        (first entry: the EntryFn)
//! sp + 0x08  r13
//! sp + 0x10  r14
//! sp + 0x18  r15
//! sp + 0x20  rbx
//! sp + 0x28  rbp
//! sp + 0x30  rip        (first entry: co_boot)
//! sp + 0x38  pad        (keeps the boot stack 16-byte aligned)
//! ```

use crate::context::{EntryFn, RawCtx, Transfer};
use std::arch::naked_asm;

const FRAME_SIZE: usize = 0x40;
const SLOT_ENTRY: usize = 0; // r12
const SLOT_RIP: usize = 6;

/// Build the initial frame so that the first switch into the context lands
/// in `co_boot`, which forwards the incoming transfer to `entry`.
///
/// # Safety
///
/// See `context::init_stack`.
pub unsafe fn init_stack(base: *mut u8, size: usize, entry: EntryFn) -> RawCtx {
    let top = (base as usize + size) & !0xF;
    let frame = (top - FRAME_SIZE) as *mut u64;
    core::ptr::write_bytes(frame, 0, FRAME_SIZE / 8);
    *frame.add(SLOT_ENTRY) = entry as usize as u64;
    *frame.add(SLOT_RIP) = co_boot as usize as u64;
    RawCtx(frame as *mut u8)
}

/// First-entry thunk. The switch that got us here left the jumper's context
/// in rax and the payload in rdx; move them into the argument registers and
/// call the entry function (restored into r12 from the initial frame).
///
/// The entry function terminates by switching away, never by returning.
#[unsafe(naked)]
unsafe extern "C" fn co_boot() {
    naked_asm!(
        "mov rdi, rax",
        "mov rsi, rdx",
        "sub rsp, 8",
        "call r12",
        "ud2",
    );
}

/// Suspend the current execution, enter `to` and pass `data` along.
///
/// Saves the callee-saved registers on the current stack, records the resume
/// address, then adopts the target frame. The `(from, data)` pair travels in
/// rax:rdx, which is simultaneously the C ABI return slot of this function
/// and the input `co_boot` forwards on first entry.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_ctx(_to: RawCtx, _data: *mut u8) -> Transfer {
    naked_asm!(
        // Save our frame.
        "push rbp",
        "push rbx",
        "push r15",
        "push r14",
        "push r13",
        "push r12",
        // Hand out our context, adopt the target's.
        "mov rax, rsp",
        "mov rsp, rdi",
        "pop r12",
        "pop r13",
        "pop r14",
        "pop r15",
        "pop rbx",
        "pop rbp",
        // Transfer { ctx: rax, data: rdx }
        "mov rdx, rsi",
        "ret",
    );
}
