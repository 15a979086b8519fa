//! Static configuration for one venue run.
//!
//! The table inventory (`capacity -> count`) is immutable for the life of a
//! run; every reopen after an evacuation rebuilds from the same mapping.

use crate::error::VenueError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Inclusive `min..=max` range of integers, used for milliseconds and prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformRange {
    pub min: u64,
    pub max: u64,
}

impl UniformRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Interprets the bounds as milliseconds.
    pub fn as_durations(&self) -> (Duration, Duration) {
        (Duration::from_millis(self.min), Duration::from_millis(self.max))
    }

    fn is_ordered(&self) -> bool {
        self.min <= self.max
    }
}

/// Configuration for a venue run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// Table inventory: capacity -> number of tables
    pub table_counts: BTreeMap<u32, u32>,

    /// Smallest group the arrival generator produces
    pub min_group_size: u32,

    /// Largest group the arrival generator produces
    pub max_group_size: u32,

    /// How long the venue stays closed after a fire (ms)
    pub closure_ms: u64,

    /// Delay between fires (ms)
    pub fire_interval_ms: UniformRange,

    /// How long one member takes to eat (ms)
    pub eating_ms: UniformRange,

    /// Delay between group arrivals (ms)
    pub arrival_ms: UniformRange,

    /// Price charged per seated person
    pub price_per_person: UniformRange,

    /// Timeout of a single receive on any channel (ms)
    pub poll_interval_ms: u64,

    /// Empty polls a group tolerates before giving up on the broker
    pub customer_poll_budget: u32,

    /// Reply delivery retry policy
    pub reply_retry: RetryPolicy,

    /// Maximum number of concurrently live customer groups
    pub max_concurrent_customers: usize,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            table_counts: BTreeMap::from([(1, 2), (2, 2), (3, 2), (4, 2)]),
            min_group_size: 1,
            max_group_size: 3,
            closure_ms: 10_000,
            fire_interval_ms: UniformRange::new(30_000, 45_000),
            eating_ms: UniformRange::new(1_000, 5_000),
            arrival_ms: UniformRange::new(200, 1_000),
            price_per_person: UniformRange::new(10, 25),
            poll_interval_ms: 100,
            customer_poll_budget: 300,
            reply_retry: RetryPolicy::default(),
            max_concurrent_customers: 30,
        }
    }
}

impl VenueConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, VenueError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON configuration string.
    pub fn from_json_str(text: &str) -> Result<Self, VenueError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the agents cannot work with.
    pub fn validate(&self) -> Result<(), VenueError> {
        if self.table_counts.values().all(|&count| count == 0) {
            return Err(VenueError::config("table inventory is empty"));
        }
        if self.table_counts.contains_key(&0) {
            return Err(VenueError::config("table capacity must be at least 1"));
        }
        if self.min_group_size == 0 || self.min_group_size > self.max_group_size {
            return Err(VenueError::config(format!(
                "group size range {}..={} is invalid",
                self.min_group_size, self.max_group_size
            )));
        }
        for (name, range) in [
            ("fire_interval_ms", &self.fire_interval_ms),
            ("eating_ms", &self.eating_ms),
            ("arrival_ms", &self.arrival_ms),
            ("price_per_person", &self.price_per_person),
        ] {
            if !range.is_ordered() {
                return Err(VenueError::config(format!(
                    "{} has min {} > max {}",
                    name, range.min, range.max
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(VenueError::config("poll_interval_ms must be positive"));
        }
        if self.customer_poll_budget == 0 {
            return Err(VenueError::config("customer_poll_budget must be positive"));
        }
        if self.reply_retry.max_attempts == 0 {
            return Err(VenueError::config("reply_retry.max_attempts must be positive"));
        }
        if self.max_concurrent_customers == 0 {
            return Err(VenueError::config("max_concurrent_customers must be positive"));
        }
        Ok(())
    }

    /// Closure duration after a fire.
    pub fn closure_duration(&self) -> Duration {
        Duration::from_millis(self.closure_ms)
    }

    /// Single receive timeout.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total number of tables in the inventory.
    pub fn table_total(&self) -> u32 {
        self.table_counts.values().sum()
    }

    /// Largest configured table capacity.
    pub fn largest_capacity(&self) -> Option<u32> {
        self.table_counts
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(&capacity, _)| capacity)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = VenueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.table_total(), 8);
        assert_eq!(config.largest_capacity(), Some(4));
        assert_eq!(config.closure_duration(), Duration::from_secs(10));
    }

    #[test]
    fn test_json_partial_override() {
        let config = VenueConfig::from_json_str(
            r#"{ "table_counts": { "2": 3, "6": 1 }, "closure_ms": 250 }"#,
        )
        .unwrap();

        assert_eq!(config.table_counts, BTreeMap::from([(2, 3), (6, 1)]));
        assert_eq!(config.closure_ms, 250);
        // Untouched fields keep defaults
        assert_eq!(config.max_group_size, 3);
    }

    #[test]
    fn test_rejects_empty_inventory() {
        let config = VenueConfig {
            table_counts: BTreeMap::from([(2, 0)]),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VenueError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = VenueConfig {
            table_counts: BTreeMap::from([(0, 1), (2, 1)]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = VenueConfig {
            eating_ms: UniformRange::new(500, 100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = VenueConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, VenueError::ConfigParse(_)));
    }
}
