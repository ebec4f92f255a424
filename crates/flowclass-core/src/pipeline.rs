//! Window pipeline
//!
//! ```text
//!   PacketSource ──► ingest ──► FlowAggregator
//!                      │ window closes (packet time)
//!                      ▼
//!               mpsc<WindowBatch> ──► WindowProcessor
//!                                       extract → [standardize] → score (timeout)
//!                                       → update → prune → report
//! ```
//!
//! Ingestion and processing run as two tasks. The aggregator is the only
//! state they share; a closed window travels to the processor as a drained
//! map, so scoring never blocks ingestion into the next window and windows
//! are processed strictly one at a time.

use crate::{
    aggregator::{FlowAggregator, WindowBuckets},
    config::ClassifierConfig,
    features::{FeatureExtractor, FeatureScaler, Features},
    flow::{FlowKey, Timestamp},
    inference::{ScoreMap, Scorer},
    report::{ReportSink, WindowReport},
    source::PacketSource,
    stats::{PipelineStats, PipelineStatsSnapshot},
    tracker::PredictionTracker,
    FlowError, FlowResult,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn secs_to_micros(secs: f64) -> u64 {
    (secs * 1_000_000.0).round().max(1.0) as u64
}

/// Tracks window boundaries on packet timestamps
#[derive(Debug, Clone)]
pub struct WindowClock {
    duration_us: u64,
    start: Option<Timestamp>,
}

impl WindowClock {
    pub fn new(window_secs: f64) -> Self {
        Self {
            duration_us: secs_to_micros(window_secs),
            start: None,
        }
    }

    /// Start of the open window, if a packet has been seen
    pub fn start(&self) -> Option<Timestamp> {
        self.start
    }

    /// Observe a packet timestamp. Returns `true` when `ts` falls outside the
    /// open window; the clock has then reopened at `ts` and the caller must
    /// close the previous window before adding the packet.
    pub fn observe(&mut self, ts: Timestamp) -> bool {
        match self.start {
            None => {
                self.start = Some(ts);
                false
            }
            Some(start) if ts.as_micros().saturating_sub(start.as_micros()) >= self.duration_us => {
                self.start = Some(ts);
                true
            }
            Some(_) => false,
        }
    }
}

/// Packet-count log, reset every interval of packet time
#[derive(Debug)]
struct ThroughputLog {
    interval_us: u64,
    interval_secs: f64,
    start: Option<Timestamp>,
    count: u64,
}

impl ThroughputLog {
    fn new(interval_secs: f64) -> Self {
        Self {
            interval_us: secs_to_micros(interval_secs),
            interval_secs,
            start: None,
            count: 0,
        }
    }

    /// Count one packet; returns the count for the interval that just ended
    fn observe(&mut self, ts: Timestamp) -> Option<u64> {
        self.count += 1;
        let start = *self.start.get_or_insert(ts);
        if ts.as_micros().saturating_sub(start.as_micros()) >= self.interval_us {
            let count = std::mem::take(&mut self.count);
            self.start = Some(ts);
            Some(count)
        } else {
            None
        }
    }
}

/// A closed window on its way to the processor
#[derive(Debug)]
pub struct WindowBatch {
    pub index: u64,
    pub buckets: WindowBuckets,
}

/// Processing half: owns the tracker and runs one window at a time
pub struct WindowProcessor {
    tracker: PredictionTracker,
    scorer: Arc<dyn Scorer>,
    extractor: FeatureExtractor,
    classes: Vec<String>,
    timeout: Duration,
    standardize: bool,
    sinks: Vec<Arc<dyn ReportSink>>,
    stats: Arc<PipelineStats>,
}

impl WindowProcessor {
    /// Fails if the scorer's class count disagrees with the class table
    pub fn new(config: &ClassifierConfig, scorer: Arc<dyn Scorer>, stats: Arc<PipelineStats>) -> FlowResult<Self> {
        if scorer.class_count() != config.class_count() {
            return Err(FlowError::Config(format!(
                "scorer '{}' produces {} classes but {} class names are configured",
                scorer.name(),
                scorer.class_count(),
                config.class_count()
            )));
        }

        Ok(Self {
            tracker: PredictionTracker::new(config.class_count()),
            scorer,
            extractor: FeatureExtractor::new(config.epsilon),
            classes: config.classes.clone(),
            timeout: config.inference_timeout(),
            standardize: config.standardize,
            sinks: Vec::new(),
            stats,
        })
    }

    /// Add a report sink
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn tracker(&self) -> &PredictionTracker {
        &self.tracker
    }

    pub fn into_tracker(self) -> PredictionTracker {
        self.tracker
    }

    /// Run one closed window through extract, score, smooth and report
    pub async fn process_window(&mut self, index: u64, buckets: WindowBuckets) -> WindowReport {
        let packets: usize = buckets.values().map(Vec::len).sum();

        let mut batch: Vec<(FlowKey, Features)> = buckets
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(key, records)| (*key, self.extractor.extract(records)))
            .collect();
        batch.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        if self.standardize {
            FeatureScaler::standardize(&mut batch);
        }

        let scores = self.score(index, &batch).await;
        let skipped = batch.iter().filter(|(key, _)| !scores.contains_key(key)).count();
        self.stats.record_scored(scores.len() as u64, skipped as u64);

        for (key, probabilities) in &scores {
            self.tracker.update(*key, probabilities);
        }
        let active: HashSet<FlowKey> = scores.keys().copied().collect();
        let pruned = self.tracker.prune(&active);
        self.stats.record_pruned(pruned as u64);

        tracing::debug!(
            window = index,
            flows = batch.len(),
            scored = scores.len(),
            skipped,
            pruned,
            "window processed"
        );

        let report = WindowReport::from_tracker(index, packets, &self.tracker, &self.classes);
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&report) {
                tracing::warn!(window = index, error = %e, "report sink failed");
            }
        }
        self.stats.record_window();
        report
    }

    /// Bounded scorer call. Errors and timeouts yield an empty result.
    async fn score(&self, index: u64, batch: &[(FlowKey, Features)]) -> ScoreMap {
        if batch.is_empty() {
            return ScoreMap::new();
        }

        let mut scores = match tokio::time::timeout(self.timeout, self.scorer.score(batch)).await {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                tracing::warn!(window = index, scorer = self.scorer.name(), error = %e, "scoring failed, skipping window");
                self.stats.record_error();
                ScoreMap::new()
            }
            Err(_) => {
                tracing::warn!(
                    window = index,
                    scorer = self.scorer.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "scoring timed out, skipping window"
                );
                self.stats.record_timeout();
                ScoreMap::new()
            }
        };

        let expected = self.tracker.class_count();
        scores.retain(|key, probabilities| {
            // `batch` is sorted by key
            if batch.binary_search_by(|(k, _)| k.cmp(key)).is_err() {
                tracing::warn!(flow = %key, "dropping score for a flow not in this window");
                false
            } else if probabilities.len() == expected {
                true
            } else {
                tracing::warn!(
                    flow = %key,
                    got = probabilities.len(),
                    expected,
                    "dropping probability vector of wrong length"
                );
                false
            }
        });
        scores
    }
}

/// Final state after a run
#[derive(Debug)]
pub struct PipelineOutcome {
    pub stats: PipelineStatsSnapshot,
    pub tracker: PredictionTracker,
    pub last_report: Option<WindowReport>,
}

/// Packet-in, report-out classification pipeline
pub struct Pipeline {
    config: ClassifierConfig,
    aggregator: Arc<FlowAggregator>,
    processor: WindowProcessor,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(config: ClassifierConfig, scorer: Arc<dyn Scorer>) -> FlowResult<Self> {
        config.validate()?;
        let stats = Arc::new(PipelineStats::default());
        let processor = WindowProcessor::new(&config, scorer, stats.clone())?;

        Ok(Self {
            config,
            aggregator: Arc::new(FlowAggregator::new()),
            processor,
            stats,
        })
    }

    /// Add a report sink
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.processor = self.processor.with_sink(sink);
        self
    }

    /// Shared counters, readable while the pipeline runs
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Run until the source is exhausted
    pub async fn run<S>(self, source: &mut S) -> FlowResult<PipelineOutcome>
    where
        S: PacketSource + ?Sized,
    {
        self.run_until(source, std::future::pending::<()>()).await
    }

    /// Run until the source is exhausted or `shutdown` resolves. Either way
    /// the open window is flushed and every queued window is processed
    /// before returning.
    pub async fn run_until<S, F>(self, source: &mut S, shutdown: F) -> FlowResult<PipelineOutcome>
    where
        S: PacketSource + ?Sized,
        F: Future<Output = ()>,
    {
        let Pipeline {
            config,
            aggregator,
            mut processor,
            stats,
        } = self;

        let (tx, mut rx) = mpsc::channel::<WindowBatch>(config.channel_capacity);
        let worker = tokio::spawn(async move {
            let mut last_report = None;
            while let Some(batch) = rx.recv().await {
                last_report = Some(processor.process_window(batch.index, batch.buckets).await);
            }
            (processor, last_report)
        });

        tracing::info!(
            window_secs = config.window_secs,
            classes = config.class_count(),
            standardize = config.standardize,
            "pipeline started"
        );

        let ingested = ingest(&config, &aggregator, &stats, source, &tx, shutdown).await;
        drop(tx);

        let (processor, last_report) = match worker.await {
            Ok(done) => done,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => return Err(FlowError::ChannelClosed),
        };
        ingested?;

        let stats = stats.snapshot();
        tracing::info!(
            packets = stats.packets,
            windows = stats.windows,
            flows_scored = stats.flows_scored,
            timeouts = stats.inference_timeouts,
            "pipeline finished"
        );

        Ok(PipelineOutcome {
            stats,
            tracker: processor.into_tracker(),
            last_report,
        })
    }
}

async fn ingest<S, F>(
    config: &ClassifierConfig,
    aggregator: &FlowAggregator,
    stats: &PipelineStats,
    source: &mut S,
    tx: &mpsc::Sender<WindowBatch>,
    shutdown: F,
) -> FlowResult<()>
where
    S: PacketSource + ?Sized,
    F: Future<Output = ()>,
{
    let mut clock = WindowClock::new(config.window_secs);
    let mut throughput = ThroughputLog::new(config.stats_interval_secs);
    let mut index = 0u64;
    tokio::pin!(shutdown);

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("shutdown requested");
                break;
            }
            next = source.next_packet() => next?,
        };
        let Some((key, record)) = next else { break };

        if clock.observe(record.timestamp) {
            close_window(aggregator, tx, &mut index).await?;
        }
        aggregator.add_packet(key, record);
        stats.record_packet();
        tracing::trace!(flow = %key, size = record.size_bytes, "packet");

        if let Some(count) = throughput.observe(record.timestamp) {
            tracing::info!("processed {} packets in the last {} seconds", count, throughput.interval_secs);
        }
    }

    if !aggregator.is_empty() {
        close_window(aggregator, tx, &mut index).await?;
    }
    Ok(())
}

async fn close_window(aggregator: &FlowAggregator, tx: &mpsc::Sender<WindowBatch>, index: &mut u64) -> FlowResult<()> {
    let buckets = aggregator.drain_window();
    tracing::debug!(window = *index, flows = buckets.len(), "window closed");
    tx.send(WindowBatch { index: *index, buckets })
        .await
        .map_err(|_| FlowError::ChannelClosed)?;
    *index += 1;
    Ok(())
}
