// src/engine/tokens.rs

/// Concurrency tokens gating ALL_VALUES_READY -> EXECUTING.
///
/// Owned by the scheduler core, so acquire and release never interleave
/// with a promotion from the ready queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPool {
    /// `None` means unbounded.
    limit: Option<usize>,
    in_use: usize,
    granted: u64,
    released: u64,
}

impl TokenPool {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            in_use: 0,
            granted: 0,
            released: 0,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn has_free(&self) -> bool {
        self.limit.map(|l| self.in_use < l).unwrap_or(true)
    }

    pub fn try_acquire(&mut self) -> bool {
        if !self.has_free() {
            return false;
        }
        self.in_use += 1;
        self.granted += 1;
        true
    }

    pub fn release(&mut self) {
        debug_assert!(self.in_use > 0, "token released twice");
        if self.in_use > 0 {
            self.in_use -= 1;
            self.released += 1;
        }
    }

    /// Tokens ever handed out.
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Tokens ever given back.
    pub fn released(&self) -> u64 {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_pool_refuses_past_limit() {
        let mut pool = TokenPool::new(Some(2));
        assert!(pool.try_acquire());
        assert!(pool.try_acquire());
        assert!(!pool.try_acquire());

        pool.release();
        assert!(pool.try_acquire());
        assert_eq!(pool.granted(), 3);
        assert_eq!(pool.released(), 1);
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn unbounded_pool_always_grants() {
        let mut pool = TokenPool::new(None);
        for _ in 0..100 {
            assert!(pool.try_acquire());
        }
        assert_eq!(pool.in_use(), 100);
    }
}
