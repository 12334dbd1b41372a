//! Partition key generation.
//!
//! A `PartitionKeyGenerator` is a shared, thread-safe producer of
//! `PartitionKey` values under a chosen distribution. All dispatch threads
//! draw from one generator; each `next()` call is atomic.

mod field;

pub use field::{
    Field, FieldDescriptor, FieldGenerator, FieldRegistry, GeneratorArg, GeneratorSpec,
    field_catalog, parse_field_override,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Logical identifier for a row-group in the target database.
///
/// The canonical text form is `"<prefix><id>"`. Two keys with the same
/// text form are equal, regardless of how prefix and id split.
#[derive(Debug, Clone)]
pub struct PartitionKey {
    prefix: Arc<str>,
    id: u64,
}

impl PartitionKey {
    pub fn new(prefix: Arc<str>, id: u64) -> Self {
        Self { prefix, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Canonical text form, used for statement binding and the raw log.
    pub fn text(&self) -> String {
        format!("{}{}", self.prefix, self.id)
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.prefix, self.id)
    }
}

impl PartialEq for PartitionKey {
    fn eq(&self, other: &Self) -> bool {
        if self.prefix == other.prefix {
            return self.id == other.id;
        }
        self.text() == other.text()
    }
}

impl Eq for PartitionKey {}

impl std::hash::Hash for PartitionKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.text().hash(state);
    }
}

/// Distribution kind for partition key ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDistribution {
    /// `id = U[0, max_id)`, drawn per call.
    Random,
    /// `0, 1, ..., max_id, 0, 1, ...` from one shared atomic counter.
    Sequence,
    /// `round(N(max_id/2, max_id/4))`, resampled until in range.
    Normal,
}

impl std::str::FromStr for KeyDistribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(KeyDistribution::Random),
            "sequence" => Ok(KeyDistribution::Sequence),
            "normal" => Ok(KeyDistribution::Normal),
            other => Err(format!(
                "unknown key distribution '{}' (expected random, sequence or normal)",
                other
            )),
        }
    }
}

impl std::fmt::Display for KeyDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeyDistribution::Random => "random",
            KeyDistribution::Sequence => "sequence",
            KeyDistribution::Normal => "normal",
        };
        write!(f, "{}", name)
    }
}

enum DistributionState {
    Random,
    Sequence(AtomicU64),
    Normal { mean: f64, std_dev: f64 },
}

/// Shared, lazily evaluated stream of partition keys.
///
/// Bounded by `total` when finite; `next()` returns `None` once the bound
/// is reached. For the sequential distribution a single shared counter
/// guarantees that across threads each id is produced at most once per
/// wrap.
pub struct PartitionKeyGenerator {
    prefix: Arc<str>,
    max_id: u64,
    total: Option<u64>,
    produced: AtomicU64,
    state: DistributionState,
}

impl PartitionKeyGenerator {
    /// Creates a generator producing at most `total` keys (`None` means
    /// unbounded) with ids in `[0, max_id]` for sequence/normal and
    /// `[0, max_id)` for random.
    pub fn new(kind: KeyDistribution, prefix: &str, max_id: u64, total: Option<u64>) -> Self {
        let state = match kind {
            KeyDistribution::Random => DistributionState::Random,
            KeyDistribution::Sequence => DistributionState::Sequence(AtomicU64::new(0)),
            KeyDistribution::Normal => DistributionState::Normal {
                mean: max_id as f64 / 2.0,
                std_dev: max_id as f64 / 4.0,
            },
        };
        Self {
            prefix: Arc::from(prefix),
            max_id: max_id.max(1),
            total,
            produced: AtomicU64::new(0),
            state,
        }
    }

    /// Draws the next key, or `None` when the total bound is exhausted.
    pub fn next(&self) -> Option<PartitionKey> {
        if let Some(total) = self.total {
            let n = self.produced.fetch_add(1, Ordering::Relaxed);
            if n >= total {
                return None;
            }
        }

        let id = match &self.state {
            DistributionState::Random => rand::thread_rng().gen_range(0..self.max_id),
            DistributionState::Sequence(counter) => {
                counter.fetch_add(1, Ordering::Relaxed) % (self.max_id + 1)
            }
            DistributionState::Normal { mean, std_dev } => self.draw_normal(*mean, *std_dev),
        };

        Some(PartitionKey::new(Arc::clone(&self.prefix), id))
    }

    fn draw_normal(&self, mean: f64, std_dev: f64) -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let z: f64 = rng.sample(StandardNormal);
            let value = (mean + std_dev * z).round();
            if value >= 0.0 && value <= self.max_id as f64 {
                return value as u64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequence_wraps_inclusively() {
        let generator =
            PartitionKeyGenerator::new(KeyDistribution::Sequence, "t", 2, Some(5));
        let ids: Vec<u64> = std::iter::from_fn(|| generator.next())
            .map(|k| k.id())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_sequence_is_permutation_below_wrap() {
        let generator =
            PartitionKeyGenerator::new(KeyDistribution::Sequence, "t", 999, Some(500));
        let ids: HashSet<u64> = std::iter::from_fn(|| generator.next())
            .map(|k| k.id())
            .collect();
        assert_eq!(ids.len(), 500);
        assert_eq!(ids, (0..500).collect::<HashSet<u64>>());
    }

    #[test]
    fn test_sequence_unique_across_threads() {
        let generator = std::sync::Arc::new(PartitionKeyGenerator::new(
            KeyDistribution::Sequence,
            "t",
            9_999,
            Some(4_000),
        ));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let generator = std::sync::Arc::clone(&generator);
            handles.push(std::thread::spawn(move || {
                let mut ids = Vec::new();
                while let Some(key) = generator.next() {
                    ids.push(key.id());
                }
                ids
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 4_000);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4_000, "sequence ids must not repeat before wrap");
    }

    #[test]
    fn test_random_stays_below_max() {
        let generator =
            PartitionKeyGenerator::new(KeyDistribution::Random, "t", 100, Some(10_000));
        while let Some(key) = generator.next() {
            assert!(key.id() < 100);
        }
    }

    #[test]
    fn test_normal_stays_in_range() {
        let generator =
            PartitionKeyGenerator::new(KeyDistribution::Normal, "t", 50, Some(10_000));
        while let Some(key) = generator.next() {
            assert!(key.id() <= 50);
        }
    }

    #[test]
    fn test_total_bound_terminates() {
        let generator = PartitionKeyGenerator::new(KeyDistribution::Random, "t", 10, Some(3));
        assert!(generator.next().is_some());
        assert!(generator.next().is_some());
        assert!(generator.next().is_some());
        assert!(generator.next().is_none());
        assert!(generator.next().is_none());
    }

    #[test]
    fn test_unbounded_generator_keeps_producing() {
        let generator = PartitionKeyGenerator::new(KeyDistribution::Random, "t", 10, None);
        for _ in 0..1_000 {
            assert!(generator.next().is_some());
        }
    }

    #[test]
    fn test_key_equality_by_text() {
        let a = PartitionKey::new(Arc::from("p1"), 1);
        let b = PartitionKey::new(Arc::from("p"), 11);
        assert_eq!(a.text(), "p11");
        assert_eq!(a, b);

        let c = PartitionKey::new(Arc::from("p"), 2);
        assert_ne!(a, c);
    }

    #[test]
    fn test_distribution_from_str() {
        assert_eq!(
            "random".parse::<KeyDistribution>().unwrap(),
            KeyDistribution::Random
        );
        assert_eq!(
            "sequence".parse::<KeyDistribution>().unwrap(),
            KeyDistribution::Sequence
        );
        assert_eq!(
            "normal".parse::<KeyDistribution>().unwrap(),
            KeyDistribution::Normal
        );
        assert!("zipf".parse::<KeyDistribution>().is_err());
    }
}
