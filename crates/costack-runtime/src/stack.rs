//! Shared-stack slots
//!
//! Every scheduler owns a small array of stack slots. Each coroutine is
//! pinned to one slot for life and executes on the slot's buffer; only the
//! incumbent's frames occupy the buffer, every other coroutine on the slot
//! holds a byte-exact copy of its live span in `saved`.
//!
//! The copy works without relocation because a pinned coroutine's saved
//! context always points into its slot's buffer, at the same address the
//! bytes will be restored to.

use crate::copool::Coroutine;
use costack_core::coerror;
use costack_core::id::CoroId;

/// One shared stack slot. The buffer is mapped lazily on first use and
/// released when the scheduler is destroyed.
pub struct StackSlot {
    base: *mut u8,
    top: *mut u8,
    size: usize,
    /// The coroutine whose frames currently occupy the buffer.
    pub holder: Option<CoroId>,
}

unsafe impl Send for StackSlot {}

impl StackSlot {
    pub const fn new() -> Self {
        StackSlot {
            base: core::ptr::null_mut(),
            top: core::ptr::null_mut(),
            size: 0,
            holder: None,
        }
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn top(&self) -> *mut u8 {
        self.top
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        !self.base.is_null()
    }

    /// Map the buffer if this is the slot's first use.
    pub fn ensure(&mut self, size: usize) {
        if self.is_mapped() {
            return;
        }
        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            coerror!("stack slot mmap of {} bytes failed", size);
            std::process::abort();
        }
        self.base = base as *mut u8;
        self.size = size;
        // 16-byte alignment for the context frames; mmap is page-aligned.
        self.top = ((base as usize + size) & !0xF) as *mut u8;
    }

    /// Copy the incumbent's live span `[co.ctx, top)` into its save buffer.
    ///
    /// A record whose context is null has nothing live on the slot (never
    /// ran, or already terminated and recycled); saving it is a no-op.
    pub fn save(&self, co: &mut Coroutine) {
        if co.ctx.is_null() {
            return;
        }
        let sp = co.ctx.0 as usize;
        let top = self.top as usize;
        if sp < self.base as usize || sp > top {
            coerror!("coroutine {} context outside its stack slot", co.id);
            std::process::abort();
        }
        let len = top - sp;
        co.saved.clear();
        co.saved.reserve(len);
        unsafe {
            core::ptr::copy_nonoverlapping(sp as *const u8, co.saved.as_mut_ptr(), len);
            co.saved.set_len(len);
        }
    }

    /// Copy a suspended coroutine's saved bytes back onto the slot.
    ///
    /// The saved length must agree with the slot geometry; a mismatch means
    /// the buffer was overrun or corrupted externally, which is fatal.
    pub fn restore(&self, co: &Coroutine) {
        let sp = co.ctx.0 as usize;
        if sp + co.saved.len() != self.top as usize {
            coerror!(
                "stack geometry mismatch restoring coroutine {}: sp {:#x} + saved {} != top {:#x}",
                co.id,
                sp,
                co.saved.len(),
                self.top as usize
            );
            std::process::abort();
        }
        unsafe {
            core::ptr::copy_nonoverlapping(co.saved.as_ptr(), sp as *mut u8, co.saved.len());
        }
    }

    /// Whether `p` points into this slot's buffer.
    #[inline]
    pub fn contains(&self, p: *const u8) -> bool {
        !self.base.is_null() && (self.base as usize) <= (p as usize) && (p as usize) < (self.top as usize)
    }
}

impl Drop for StackSlot {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.size);
            }
            self.base = core::ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RawCtx;

    #[test]
    fn test_lazy_mapping() {
        let mut slot = StackSlot::new();
        assert!(!slot.is_mapped());
        slot.ensure(64 * 1024);
        assert!(slot.is_mapped());
        assert!(slot.top() as usize % 16 == 0);
        // Second ensure is a no-op.
        let base = slot.base();
        slot.ensure(64 * 1024);
        assert_eq!(slot.base(), base);
    }

    #[test]
    fn test_save_restore_roundtrip() {
        let mut pool = crate::copool::CoroPool::new(0);
        let id = pool.alloc(Box::new(|| {}), 0, 0);

        let mut slot = StackSlot::new();
        slot.ensure(64 * 1024);

        // Pretend the coroutine suspended 256 bytes below the top and left a
        // recognizable pattern there.
        let sp = (slot.top() as usize - 256) as *mut u8;
        unsafe {
            for i in 0..256 {
                *sp.add(i) = (i % 251) as u8;
            }
        }
        let co = pool.get_mut(id).unwrap();
        co.ctx = RawCtx(sp);
        slot.save(co);
        assert_eq!(co.saved.len(), 256);

        // Clobber the slot, then restore.
        unsafe { core::ptr::write_bytes(sp, 0xEE, 256) };
        slot.restore(pool.get(id).unwrap());
        unsafe {
            for i in 0..256 {
                assert_eq!(*sp.add(i), (i % 251) as u8);
            }
        }
    }

    #[test]
    fn test_save_never_ran_is_noop() {
        let mut pool = crate::copool::CoroPool::new(0);
        let id = pool.alloc(Box::new(|| {}), 0, 0);
        let slot = StackSlot::new();
        let co = pool.get_mut(id).unwrap();
        slot.save(co);
        assert!(co.saved.is_empty());
    }

    #[test]
    fn test_contains() {
        let mut slot = StackSlot::new();
        assert!(!slot.contains(0x1000 as *const u8));
        slot.ensure(16 * 1024);
        let inside = unsafe { slot.base().add(100) };
        assert!(slot.contains(inside));
        assert!(!slot.contains(slot.top()));
    }
}
