//! Wall-clock timers for node execution.
//!
//! ```rust
//! use snippetforge::profiling::NodeTimer;
//!
//! let mut timer = NodeTimer::for_node("add_relu");
//! timer.start();
//! // ... execute node ...
//! timer.stop();
//! assert!(timer.elapsed().is_some());
//! ```

use std::time::{Duration, Instant};

/// Start/stop timer for one node.
#[derive(Debug, Clone)]
pub struct NodeTimer {
    name: String,
    start: Option<Instant>,
    elapsed: Option<Duration>,
}

impl NodeTimer {
    pub fn for_node(name: impl Into<String>) -> Self {
        NodeTimer {
            name: name.into(),
            start: None,
            elapsed: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Restarts the timer if it was already running.
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
        self.elapsed = None;
    }

    /// No effect on a timer that was never started.
    pub fn stop(&mut self) {
        if let Some(start) = self.start {
            self.elapsed = Some(start.elapsed());
        }
    }

    /// `None` until `stop` has been called after `start`.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn elapsed_or_zero(&self) -> Duration {
        self.elapsed.unwrap_or_default()
    }

    pub fn is_started(&self) -> bool {
        self.start.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.elapsed.is_some()
    }
}

/// Logs the time from creation to drop at debug level.
#[derive(Debug)]
pub struct ScopedTimer {
    name: String,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: impl Into<String>) -> Self {
        ScopedTimer {
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        tracing::debug!(
            timer = %self.name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "scoped timer finished"
        );
    }
}
