//! Per-flow feature extraction
//!
//! Inter-arrival-time and throughput statistics over one flow's packets in
//! one window. Features are recomputed from scratch every window.

use crate::flow::{FlowKey, PacketRecord};
use serde::{Deserialize, Serialize};

/// Number of features per flow
pub const FEATURE_COUNT: usize = 6;

/// Default zero-duration guard, in seconds
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Statistical summary of one flow's window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Features {
    /// Smallest inter-arrival time (seconds)
    pub min_iat: f64,
    /// Largest inter-arrival time (seconds)
    pub max_iat: f64,
    /// Mean inter-arrival time (seconds)
    pub mean_iat: f64,
    /// Sample standard deviation of inter-arrival times (seconds)
    pub std_iat: f64,
    /// Packets per second over the flow's span
    pub packets_per_second: f64,
    /// Bytes per second over the flow's span
    pub bytes_per_second: f64,
}

impl Features {
    /// Convert to model input vector
    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        [
            self.min_iat,
            self.max_iat,
            self.mean_iat,
            self.std_iat,
            self.packets_per_second,
            self.bytes_per_second,
        ]
    }

    /// Build from a vector in `to_vector` order
    pub fn from_vector(v: [f64; FEATURE_COUNT]) -> Self {
        Self {
            min_iat: v[0],
            max_iat: v[1],
            mean_iat: v[2],
            std_iat: v[3],
            packets_per_second: v[4],
            bytes_per_second: v[5],
        }
    }

    /// True if every feature is a finite number
    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|x| x.is_finite())
    }
}

/// Stateless feature extractor
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    epsilon: f64,
}

impl FeatureExtractor {
    /// Create extractor with the given zero-duration guard (seconds)
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Extract features, summing byte counts from the records.
    ///
    /// # Panics
    ///
    /// Panics if `records` is empty.
    pub fn extract(&self, records: &[PacketRecord]) -> Features {
        let total_bytes = records.iter().map(|r| r.size_bytes).sum();
        self.extract_with_total(records, total_bytes)
    }

    /// Extract features from arrival-ordered records and their byte total.
    ///
    /// With fewer than two packets every IAT statistic is 0. With exactly one
    /// IAT the sample standard deviation is undefined and reported as 0.
    ///
    /// # Panics
    ///
    /// Panics if `records` is empty.
    pub fn extract_with_total(&self, records: &[PacketRecord], total_bytes: u64) -> Features {
        assert!(!records.is_empty(), "feature extraction needs at least one packet");

        let iats: Vec<f64> = records
            .windows(2)
            .map(|pair| pair[1].timestamp.secs_since(pair[0].timestamp))
            .collect();

        let (min_iat, max_iat, mean_iat, std_iat) = if iats.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let min = iats.iter().copied().fold(f64::INFINITY, f64::min);
            let max = iats.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = iats.iter().sum::<f64>() / iats.len() as f64;
            let std = if iats.len() < 2 {
                0.0
            } else {
                let ss: f64 = iats.iter().map(|x| (x - mean).powi(2)).sum();
                (ss / (iats.len() - 1) as f64).sqrt()
            };
            (min, max, mean, std)
        };

        let first = records[0].timestamp;
        let last = records[records.len() - 1].timestamp;
        let duration = last.secs_since(first) + self.epsilon;

        Features {
            min_iat,
            max_iat,
            mean_iat,
            std_iat,
            packets_per_second: records.len() as f64 / duration,
            bytes_per_second: total_bytes as f64 / duration,
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}

/// Per-window z-score standardisation across flows.
///
/// Each feature is centred on the window mean and divided by the population
/// standard deviation; a feature with zero spread becomes 0 for every flow.
pub struct FeatureScaler;

impl FeatureScaler {
    /// Standardise a window's batch in place
    pub fn standardize(batch: &mut [(FlowKey, Features)]) {
        if batch.is_empty() {
            return;
        }
        let n = batch.len() as f64;

        let vectors: Vec<[f64; FEATURE_COUNT]> = batch.iter().map(|(_, f)| f.to_vector()).collect();
        let mut mean = [0.0; FEATURE_COUNT];
        let mut std = [0.0; FEATURE_COUNT];

        for i in 0..FEATURE_COUNT {
            mean[i] = vectors.iter().map(|v| v[i]).sum::<f64>() / n;
            let var = vectors.iter().map(|v| (v[i] - mean[i]).powi(2)).sum::<f64>() / n;
            std[i] = var.sqrt();
        }

        for ((_, features), v) in batch.iter_mut().zip(vectors) {
            let mut scaled = [0.0; FEATURE_COUNT];
            for i in 0..FEATURE_COUNT {
                scaled[i] = if std[i] == 0.0 { 0.0 } else { (v[i] - mean[i]) / std[i] };
            }
            *features = Features::from_vector(scaled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Timestamp;
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn records(points: &[(f64, u64)]) -> Vec<PacketRecord> {
        points
            .iter()
            .map(|&(ts, size)| PacketRecord::new(Timestamp::from_secs_f64(ts), size))
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-5 * b.abs().max(1.0)
    }

    #[test]
    fn test_regular_flow() {
        let recs = records(&[(0.0, 100), (0.5, 200), (1.0, 150), (1.5, 300)]);
        let f = FeatureExtractor::default().extract(&recs);

        assert_eq!(f.min_iat, 0.5);
        assert_eq!(f.max_iat, 0.5);
        assert_eq!(f.mean_iat, 0.5);
        assert_eq!(f.std_iat, 0.0);
        assert!(approx(f.packets_per_second, 4.0 / 1.5));
        assert!(approx(f.bytes_per_second, 750.0 / 1.5));
    }

    #[test]
    fn test_sample_std_uses_bessel_correction() {
        // IATs 1, 2, 3: mean 2, squared deviations sum to 2, 2 / (3 - 1) = 1
        let recs = records(&[(0.0, 1), (1.0, 1), (3.0, 1), (6.0, 1)]);
        let f = FeatureExtractor::default().extract(&recs);
        assert!(approx(f.std_iat, 1.0));
        assert_eq!(f.min_iat, 1.0);
        assert_eq!(f.max_iat, 3.0);
        assert!(approx(f.mean_iat, 2.0));
    }

    #[test]
    fn test_single_packet_flow() {
        let recs = records(&[(3.0, 1500)]);
        let f = FeatureExtractor::new(1e-6).extract(&recs);

        assert_eq!((f.min_iat, f.max_iat, f.mean_iat, f.std_iat), (0.0, 0.0, 0.0, 0.0));
        // Rates are measured against the epsilon-only duration
        assert!(approx(f.packets_per_second, 1e6));
        assert!(approx(f.bytes_per_second, 1500.0 * 1e6));
    }

    #[test]
    fn test_two_packets_std_is_zero() {
        let recs = records(&[(0.0, 10), (0.25, 10)]);
        let f = FeatureExtractor::default().extract(&recs);
        assert_eq!(f.std_iat, 0.0);
        assert_eq!(f.mean_iat, 0.25);
        assert!(f.is_finite());
    }

    #[test]
    fn test_zero_duration_window() {
        let recs = records(&[(1.0, 60), (1.0, 60), (1.0, 60)]);
        let f = FeatureExtractor::new(0.5).extract(&recs);
        assert_eq!(f.max_iat, 0.0);
        assert_eq!(f.packets_per_second, 6.0);
        assert_eq!(f.bytes_per_second, 360.0);
    }

    #[test]
    fn test_explicit_byte_total() {
        let recs = records(&[(0.0, 1), (1.0, 1)]);
        let f = FeatureExtractor::new(1.0).extract_with_total(&recs, 1000);
        assert_eq!(f.bytes_per_second, 500.0);
    }

    #[test]
    #[should_panic(expected = "at least one packet")]
    fn test_empty_input_panics() {
        FeatureExtractor::default().extract(&[]);
    }

    #[test]
    fn test_standardize() {
        let k = |p| FlowKey::new(IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V4(Ipv4Addr::LOCALHOST), p, 80, 6);
        let mut batch = vec![
            (k(1), Features { min_iat: 1.0, packets_per_second: 5.0, ..Default::default() }),
            (k(2), Features { min_iat: 3.0, packets_per_second: 5.0, ..Default::default() }),
        ];
        FeatureScaler::standardize(&mut batch);

        assert!(approx(batch[0].1.min_iat, -1.0));
        assert!(approx(batch[1].1.min_iat, 1.0));
        // No spread: zeroed
        assert_eq!(batch[0].1.packets_per_second, 0.0);
        assert_eq!(batch[1].1.packets_per_second, 0.0);
    }

    #[test]
    fn test_standardize_single_flow_is_all_zero() {
        let k = FlowKey::new(IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V4(Ipv4Addr::LOCALHOST), 1, 2, 17);
        let mut batch = vec![(k, Features::from_vector([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))];
        FeatureScaler::standardize(&mut batch);
        assert_eq!(batch[0].1, Features::default());
    }

    fn arrival_gaps() -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(0u64..5_000_000, 1..64)
    }

    proptest! {
        #[test]
        fn prop_iat_ordering(gaps in arrival_gaps()) {
            let mut ts = 0u64;
            let mut recs = vec![PacketRecord::new(Timestamp::from_micros(ts), 64)];
            for gap in gaps {
                ts += gap;
                recs.push(PacketRecord::new(Timestamp::from_micros(ts), 64));
            }
            let f = FeatureExtractor::default().extract(&recs);

            let tol = 1e-9;
            prop_assert!(f.min_iat >= 0.0);
            prop_assert!(f.min_iat <= f.mean_iat + tol);
            prop_assert!(f.mean_iat <= f.max_iat + tol);
            prop_assert!(f.std_iat >= 0.0);
            prop_assert!(f.is_finite());
        }

        #[test]
        fn prop_extraction_is_deterministic(gaps in arrival_gaps(), size in 0u64..65_535) {
            let mut ts = 1_000u64;
            let mut recs = vec![PacketRecord::new(Timestamp::from_micros(ts), size)];
            for gap in gaps {
                ts += gap;
                recs.push(PacketRecord::new(Timestamp::from_micros(ts), size));
            }
            let extractor = FeatureExtractor::default();
            let a = extractor.extract(&recs).to_vector();
            let b = extractor.extract(&recs).to_vector();
            for (x, y) in a.iter().zip(b.iter()) {
                prop_assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }
}
