//! Dormancy flag shared between consolidation and the generation gate

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set while consolidation runs. Trigger generation is refused while dormant.
#[derive(Debug, Clone, Default)]
pub struct Dormancy {
    flag: Arc<AtomicBool>,
}

impl Dormancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dormant(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Enter dormancy. Returns `None` when already dormant.
    pub fn try_enter(&self) -> Option<DormancyGuard> {
        self.flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DormancyGuard { flag: self.flag.clone() })
    }
}

/// Clears the flag when dropped, including on unwind.
#[derive(Debug)]
pub struct DormancyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for DormancyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_enter_refused_until_guard_dropped() {
        let d = Dormancy::new();
        let guard = d.try_enter().unwrap();
        assert!(d.is_dormant());
        assert!(d.clone().try_enter().is_none());
        drop(guard);
        assert!(!d.is_dormant());
        assert!(d.try_enter().is_some());
    }

    #[test]
    fn guard_released_on_panic() {
        let d = Dormancy::new();
        let inner = d.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.try_enter().unwrap();
            panic!("phase blew up");
        });
        assert!(result.is_err());
        assert!(!d.is_dormant());
    }
}
