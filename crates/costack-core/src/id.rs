//! Coroutine identifier type

use core::fmt;

/// Dense identifier of a coroutine within its owning scheduler.
///
/// Ids index directly into the scheduler's coroutine pool. Id 0 is
/// permanently reserved for the scheduler's main context, so every user
/// coroutine has a non-zero id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoroId(u32);

impl CoroId {
    /// The scheduler's main context.
    pub const MAIN: CoroId = CoroId(0);

    #[inline]
    pub const fn new(id: u32) -> Self {
        CoroId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get as usize for pool indexing.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether this id names a scheduler's main context.
    #[inline]
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for CoroId {
    #[inline]
    fn from(id: u32) -> Self {
        CoroId(id)
    }
}

impl From<CoroId> for u32 {
    #[inline]
    fn from(id: CoroId) -> Self {
        id.0
    }
}

impl fmt::Debug for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroId({})", self.0)
    }
}

impl fmt::Display for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coro_id_basics() {
        let id = CoroId::new(7);
        assert_eq!(id.as_u32(), 7);
        assert_eq!(id.as_usize(), 7);
        assert!(!id.is_main());
    }

    #[test]
    fn test_main_sentinel() {
        assert!(CoroId::MAIN.is_main());
        assert_eq!(CoroId::MAIN.as_u32(), 0);
        assert_eq!(CoroId::new(0), CoroId::MAIN);
    }

    #[test]
    fn test_conversions() {
        let id: CoroId = 42u32.into();
        let raw: u32 = id.into();
        assert_eq!(raw, 42);
    }
}
