//! Per-window reports for the operator

use crate::{config::class_label, flow::FlowKey, tracker::PredictionTracker, FlowResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::io::Write;

/// Classification of one active flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowReport {
    pub flow: FlowKey,
    pub class_index: usize,
    pub class_label: String,
    pub probabilities: Vec<f64>,
    pub observations: u64,
}

/// Everything the operator sees after one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowReport {
    /// Window sequence number, starting at 0
    pub window: u64,
    pub reported_at: DateTime<Utc>,
    /// Packets that fell into this window
    pub packets: usize,
    /// Active flows, ordered by key
    pub flows: Vec<FlowReport>,
}

impl WindowReport {
    /// Build from the tracker's current state, resolving labels against
    /// `classes`.
    pub fn from_tracker(window: u64, packets: usize, tracker: &PredictionTracker, classes: &[String]) -> Self {
        let flows = tracker
            .snapshot()
            .into_iter()
            .filter_map(|(flow, class_index)| {
                let state = tracker.state(&flow)?;
                Some(FlowReport {
                    flow,
                    class_index,
                    class_label: class_label(classes, class_index).to_owned(),
                    probabilities: state.running_probabilities.clone(),
                    observations: state.observation_count,
                })
            })
            .collect();

        Self {
            window,
            reported_at: Utc::now(),
            packets,
            flows,
        }
    }

    /// Label of a flow in this report
    pub fn label_of(&self, flow: &FlowKey) -> Option<&str> {
        self.flows
            .iter()
            .find(|f| &f.flow == flow)
            .map(|f| f.class_label.as_str())
    }
}

/// Where window reports go
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &WindowReport) -> FlowResult<()>;
}

/// Logs one line per flow through `tracing`
pub struct LogSink;

impl ReportSink for LogSink {
    fn emit(&self, report: &WindowReport) -> FlowResult<()> {
        for flow in &report.flows {
            tracing::info!(
                window = report.window,
                flow = %flow.flow,
                class = %flow.class_label,
                observations = flow.observations,
                "prediction"
            );
        }
        tracing::info!(window = report.window, flows = report.flows.len(), packets = report.packets, "window reported");
        Ok(())
    }
}

/// Writes each report as one JSON line
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ReportSink for JsonLinesSink<W> {
    fn emit(&self, report: &WindowReport) -> FlowResult<()> {
        let line = serde_json::to_string(report)?;
        let mut out = self.out.lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Keeps the most recent report for readers that poll
#[derive(Default)]
pub struct LatestReport {
    report: RwLock<Option<WindowReport>>,
}

impl LatestReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent report, if any window has closed
    pub fn get(&self) -> Option<WindowReport> {
        self.report.read().clone()
    }
}

impl ReportSink for LatestReport {
    fn emit(&self, report: &WindowReport) -> FlowResult<()> {
        *self.report.write() = Some(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn key(port: u16) -> FlowKey {
        FlowKey::new(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)), IpAddr::V4(Ipv4Addr::new(10, 2, 2, 2)), port, 443, 6)
    }

    fn classes() -> Vec<String> {
        vec!["Chat".into(), "Streaming".into()]
    }

    #[test]
    fn test_from_tracker() {
        let mut tracker = PredictionTracker::new(2);
        tracker.update(key(2), &[0.2, 0.8]);
        tracker.update(key(1), &[0.9, 0.1]);

        let report = WindowReport::from_tracker(7, 42, &tracker, &classes());
        assert_eq!(report.window, 7);
        assert_eq!(report.packets, 42);
        assert_eq!(report.flows.len(), 2);
        assert_eq!(report.flows[0].flow, key(1));
        assert_eq!(report.label_of(&key(1)), Some("Chat"));
        assert_eq!(report.label_of(&key(2)), Some("Streaming"));
        assert_eq!(report.flows[1].probabilities, vec![0.2, 0.8]);

        // Index past the class table
        let mut wide = PredictionTracker::new(3);
        wide.update(key(4), &[0.1, 0.1, 0.8]);
        let report = WindowReport::from_tracker(8, 1, &wide, &classes());
        assert_eq!(report.label_of(&key(4)), Some("unknown"));
        assert_eq!(report.label_of(&key(3)), None);
    }

    #[test]
    fn test_json_lines_sink() {
        let mut tracker = PredictionTracker::new(2);
        tracker.update(key(1), &[0.0, 1.0]);
        let sink = JsonLinesSink::new(Vec::new());

        sink.emit(&WindowReport::from_tracker(0, 1, &tracker, &classes())).unwrap();
        sink.emit(&WindowReport::from_tracker(1, 0, &PredictionTracker::new(2), &classes())).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["window"], 0);
        assert_eq!(first["flows"][0]["class_label"], "Streaming");
        assert_eq!(first["flows"][0]["flow"]["src_port"], 1);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["flows"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_latest_report_keeps_last() {
        let latest = LatestReport::new();
        assert!(latest.get().is_none());

        let tracker = PredictionTracker::new(2);
        latest.emit(&WindowReport::from_tracker(0, 3, &tracker, &classes())).unwrap();
        latest.emit(&WindowReport::from_tracker(1, 5, &tracker, &classes())).unwrap();
        let last = latest.get().unwrap();
        assert_eq!((last.window, last.packets), (1, 5));
    }

    #[test]
    fn test_log_sink_never_fails() {
        let tracker = PredictionTracker::new(2);
        assert!(LogSink.emit(&WindowReport::from_tracker(0, 0, &tracker, &classes())).is_ok());
    }
}
