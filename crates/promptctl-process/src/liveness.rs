//! Liveness tracking and cross-thread cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

/// Shared liveness flag for one process.
///
/// Starts `true` and transitions to `false` exactly once.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// Create a flag for a live process.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Latest known liveness.
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Flip the flag to dead.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn mark_dead(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

type Signal = Arc<dyn Fn() -> std::io::Result<()> + Send + Sync>;

/// Handle that can kill a process from any thread.
///
/// Killing flips the shared [`Liveness`] flag before delivering the signal,
/// so a watcher blocked on the process output notices on its next poll.
#[derive(Clone)]
pub struct KillSwitch {
    liveness: Liveness,
    signal: Signal,
}

impl KillSwitch {
    /// Create a kill switch that runs `signal` on the first kill.
    pub fn new<F>(liveness: Liveness, signal: F) -> Self
    where
        F: Fn() -> std::io::Result<()> + Send + Sync + 'static,
    {
        Self {
            liveness,
            signal: Arc::new(signal),
        }
    }

    /// Kill the process.
    ///
    /// Returns `false` when the process was already marked dead; the signal is
    /// only delivered once.
    pub fn kill(&self) -> bool {
        if !self.liveness.mark_dead() {
            debug!("Kill requested for a process that is already dead");
            return false;
        }

        if let Err(e) = (self.signal)() {
            warn!("Failed to signal process: {}", e);
        }
        true
    }

    /// Whether the process is still considered alive.
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// The shared liveness flag.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }
}

impl fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillSwitch")
            .field("alive", &self.liveness.is_alive())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_liveness_starts_alive() {
        assert!(Liveness::new().is_alive());
    }

    #[test]
    fn test_liveness_transitions_once() {
        let liveness = Liveness::new();
        let shared = liveness.clone();

        assert!(shared.mark_dead());
        assert!(!liveness.is_alive());
        assert!(!liveness.mark_dead());
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_kill_switch_signals_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let switch = KillSwitch::new(Liveness::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(switch.is_alive());
        assert!(switch.kill());
        assert!(!switch.kill());
        assert!(!switch.clone().kill());
        assert!(!switch.is_alive());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kill_switch_signal_error_still_marks_dead() {
        let switch = KillSwitch::new(Liveness::new(), || {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such process"))
        });

        assert!(switch.kill());
        assert!(!switch.is_alive());
    }

    #[test]
    fn test_kill_switch_across_threads() {
        let liveness = Liveness::new();
        let switch = KillSwitch::new(liveness.clone(), || Ok(()));

        std::thread::spawn(move || switch.kill()).join().unwrap();
        assert!(!liveness.is_alive());
    }
}
