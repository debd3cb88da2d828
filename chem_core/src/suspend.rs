//! Reentrancy counter that keeps the periodic poll off a controller while
//! operator commands or service mode are mutating it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Default)]
pub struct SuspendCounter(Arc<AtomicU32>);

impl SuspendCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment; the returned guard decrements on drop, including on early
    /// return or panic unwind.
    #[must_use = "the suspension ends when the guard is dropped"]
    pub fn hold(&self) -> SuspendGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        SuspendGuard(self.0.clone())
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.count() > 0
    }
}

#[derive(Debug)]
pub struct SuspendGuard(Arc<AtomicU32>);

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        // Never wraps: each guard owns exactly one increment.
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_release() {
        let c = SuspendCounter::new();
        assert!(!c.is_suspended());
        let a = c.hold();
        {
            let _b = c.clone().hold();
            assert_eq!(c.count(), 2);
        }
        assert_eq!(c.count(), 1);
        drop(a);
        assert!(!c.is_suspended());
    }

    #[test]
    fn released_on_unwind() {
        let c = SuspendCounter::new();
        let c2 = c.clone();
        let r = std::panic::catch_unwind(move || {
            let _g = c2.hold();
            panic!("boom");
        });
        assert!(r.is_err());
        assert_eq!(c.count(), 0);
    }
}
