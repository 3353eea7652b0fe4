//! Architecture-specific context switching
//!
//! Each backend provides `init_stack` and `switch_ctx` with identical
//! contracts (see `context.rs`). The saved frame layout is private to the
//! backend; the rest of the runtime only sees opaque stack pointers.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
