use std::fmt;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfilingStatus {
    NotRun,
    OptimizedOut,
    Executed,
}

impl fmt::Display for ProfilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProfilingStatus::NotRun => "NOT_RUN",
            ProfilingStatus::OptimizedOut => "OPTIMIZED_OUT",
            ProfilingStatus::Executed => "EXECUTED",
        };
        f.write_str(s)
    }
}

/// Timing record of one network node for the last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfilingInfo {
    /// Position in execution order
    pub exec_index: usize,
    pub node_name: String,
    /// Implementation that ran, e.g. the kernel name
    pub exec_type: String,
    pub node_type: String,
    pub status: ProfilingStatus,
    pub real_time: Duration,
    /// Kernel time summed over workers
    pub cpu_time: Duration,
}

impl ProfilingInfo {
    pub fn new(
        exec_index: usize,
        node_name: impl Into<String>,
        exec_type: impl Into<String>,
        node_type: impl Into<String>,
        status: ProfilingStatus,
    ) -> Self {
        ProfilingInfo {
            exec_index,
            node_name: node_name.into(),
            exec_type: exec_type.into(),
            node_type: node_type.into(),
            status,
            real_time: Duration::ZERO,
            cpu_time: Duration::ZERO,
        }
    }

    /// Forget the previous run's timings; optimized-out nodes keep their status.
    pub fn reset(&mut self) {
        if self.status == ProfilingStatus::Executed {
            self.status = ProfilingStatus::NotRun;
        }
        self.real_time = Duration::ZERO;
        self.cpu_time = Duration::ZERO;
    }

    pub fn record(&mut self, real_time: Duration, cpu_time: Duration) {
        self.status = ProfilingStatus::Executed;
        self.real_time = real_time;
        self.cpu_time = cpu_time;
    }
}

impl fmt::Display for ProfilingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<24} {:<12} {:<24} {:<14} real {:>10.3} ms  cpu {:>10.3} ms",
            self.node_name,
            self.node_type,
            self.exec_type,
            self.status,
            self.real_time.as_secs_f64() * 1000.0,
            self.cpu_time.as_secs_f64() * 1000.0
        )
    }
}
