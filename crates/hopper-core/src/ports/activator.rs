//! Activator port: decides whether this process should be polling right now.
//!
//! The queue itself never looks at activation. Only the processor loops do.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait Activator: Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Always enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysActive;

impl Activator for AlwaysActive {
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Enabled or disabled from outside, e.g. by a discovery status listener.
#[derive(Debug, Default)]
pub struct ToggleActivator {
    enabled: AtomicBool,
}

impl ToggleActivator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Activator for ToggleActivator {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_activator_follows_its_flag() {
        let activator = ToggleActivator::new(false);
        assert!(!activator.is_enabled());

        activator.set_enabled(true);
        assert!(activator.is_enabled());
        assert!(AlwaysActive.is_enabled());
    }
}
