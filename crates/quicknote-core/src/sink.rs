use crate::Error;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Receives faults that the repository swallows at its public boundary.
pub trait FaultSink {
    fn report(&self, operation: &'static str, fault: &Error);
}

/// Default sink: forwards to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl FaultSink for LogSink {
    fn report(&self, operation: &'static str, fault: &Error) {
        match fault {
            Error::NotFound(_) => log::warn!("{}: {}", operation, fault),
            _ => log::error!("{}: {}", operation, fault),
        }
    }
}

/// Sink that records every report.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<(&'static str, Error)>>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far, oldest first.
    pub fn reports(&self) -> Vec<(&'static str, Error)> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl FaultSink for RecordingSink {
    fn report(&self, operation: &'static str, fault: &Error) {
        LogSink.report(operation, fault);
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((operation, fault.clone()));
        }
    }
}
