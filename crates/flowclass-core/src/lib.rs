//! flowclass - online flow aggregation and traffic classification
//!
//! Packets are grouped per flow into fixed windows of packet time. When a
//! window closes, each flow's inter-arrival and throughput statistics are
//! scored by a pluggable [`Scorer`], and the per-window class probabilities
//! are smoothed into a stable verdict per flow.
//!
//! - [`flow`]: flow keys, timestamps and packet records
//! - [`parse`]: Ethernet/IP/TCP/UDP header extraction
//! - [`features`]: per-flow feature extraction and standardisation
//! - [`aggregator`]: per-window flow buckets
//! - [`inference`]: the scorer seam and the built-in linear model
//! - [`tracker`]: cumulative-mean smoothing and pruning
//! - [`pipeline`]: the ingest/process loop
//! - [`report`]: window reports and sinks
//!
//! # Example
//!
//! ```no_run
//! use flowclass_core::{ClassifierConfig, LinearModel, LogSink, Pipeline, ReplaySource};
//! use std::sync::Arc;
//!
//! # async fn run() -> flowclass_core::FlowResult<()> {
//! let config = ClassifierConfig::default();
//! let model = Arc::new(LinearModel::load("model.json")?);
//! let mut source = ReplaySource::open("capture.jsonl", config.bidirectional).await?;
//!
//! let outcome = Pipeline::new(config, model)?
//!     .with_sink(Arc::new(LogSink))
//!     .run(&mut source)
//!     .await?;
//! println!("{} windows", outcome.stats.windows);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod aggregator;
pub mod config;
pub mod error;
pub mod features;
pub mod flow;
pub mod inference;
pub mod parse;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod stats;
pub mod tracker;

pub use aggregator::{FlowAggregator, WindowBuckets};
pub use config::ClassifierConfig;
pub use error::*;
pub use features::{FeatureExtractor, FeatureScaler, Features, FEATURE_COUNT};
pub use flow::*;
pub use inference::{LinearModel, LinearModelFile, ScoreMap, Scorer};
pub use pipeline::{Pipeline, PipelineOutcome, WindowClock, WindowProcessor};
pub use report::{FlowReport, JsonLinesSink, LatestReport, LogSink, ReportSink, WindowReport};
pub use source::{ChannelSource, PacketSource, ReplaySource};
#[cfg(feature = "pcap")]
pub use source::PcapSource;
pub use stats::{PipelineStats, PipelineStatsSnapshot};
pub use tracker::{PredictionState, PredictionTracker};
