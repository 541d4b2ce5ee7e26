//! Single reporting surface for command and sync outcomes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DispatchError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    Success,
    Info,
    Failure(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub level: ReportLevel,
    pub message: String,
}

impl Report {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: ReportLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: ReportLevel::Info,
            message: message.into(),
        }
    }

    pub fn failure(err: &DispatchError) -> Self {
        Self {
            level: ReportLevel::Failure(err.kind()),
            message: err.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.level, ReportLevel::Failure(_))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self.level {
            ReportLevel::Failure(kind) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            ReportLevel::Success => write!(f, "OK: {}", self.message),
            ReportLevel::Info => write!(f, "{}", self.message),
            ReportLevel::Failure(kind) => write!(f, "ERROR [{kind}]: {}", self.message),
        }
    }
}

pub trait ReportSink: Send + Sync {
    fn report(&self, report: Report);
}

/// Logs every report through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn report(&self, report: Report) {
        match report.level {
            ReportLevel::Failure(kind) => tracing::warn!(
                target: "dispatch::engine",
                kind = %kind,
                message = %report.message,
                "report.failure"
            ),
            ReportLevel::Success => tracing::info!(
                target: "dispatch::engine",
                message = %report.message,
                "report.success"
            ),
            ReportLevel::Info => tracing::info!(
                target: "dispatch::engine",
                message = %report.message,
                "report.info"
            ),
        }
    }
}

/// Collects reports in memory and forwards them to an optional inner sink.
#[derive(Clone, Default)]
pub struct MemoryReportSink {
    reports: Arc<Mutex<Vec<Report>>>,
    forward: Option<Arc<dyn ReportSink>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarding_to(inner: Arc<dyn ReportSink>) -> Self {
        Self {
            reports: Arc::default(),
            forward: Some(inner),
        }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Take everything collected so far.
    pub fn drain(&self) -> Vec<Report> {
        std::mem::take(&mut *self.reports.lock())
    }

    pub fn failures(&self) -> Vec<Report> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.is_failure())
            .cloned()
            .collect()
    }
}

impl fmt::Debug for MemoryReportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryReportSink")
            .field("reports", &self.reports.lock().len())
            .field("forwarding", &self.forward.is_some())
            .finish()
    }
}

impl ReportSink for MemoryReportSink {
    fn report(&self, report: Report) {
        if let Some(inner) = &self.forward {
            inner.report(report.clone());
        }
        self.reports.lock().push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TransportError;

    #[test]
    fn memory_sink_collects_and_drains() {
        let sink = MemoryReportSink::new();
        sink.report(Report::success("M1 D 26-0023"));
        sink.report(Report::failure(&DispatchError::Transport(
            TransportError::Network("down".into()),
        )));
        assert_eq!(sink.failures().len(), 1);
        assert_eq!(sink.failures()[0].kind(), Some(ErrorKind::Transport));
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.reports().is_empty());
    }

    #[test]
    fn display_tags_failures_with_their_kind() {
        let report = Report::failure(&DispatchError::Rejected {
            verb: "closeIncident",
            message: "incident 26-0099 not found".into(),
        });
        insta::assert_snapshot!(
            report.to_string(),
            @"ERROR [rejected]: closeIncident rejected: incident 26-0099 not found"
        );
    }
}
