//! Tenant gate policy
//!
//! Thresholds, detection sensitivity, lookback window and component weights.
//! Overrides are validated when written and rejected outright when invalid;
//! nothing is clamped into range.

use crate::anomaly::DEFAULT_ZSCORE_THRESHOLD;
use crate::baseline::SUPPORTED_WINDOWS;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allowed drift of the weight sum from 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Bounds for a configurable lookback window
pub const MIN_WINDOW_DAYS: u32 = 1;
pub const MAX_WINDOW_DAYS: u32 = 90;

/// Upper bound for the detection z-score threshold
pub const MAX_ZSCORE_THRESHOLD: f64 = 10.0;

/// Invalid policy configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("component weights must sum to 1.0, got {0}")]
    WeightsDoNotSumToOne(f64),
    #[error("weight for {component} must be within [0, 1], got {value}")]
    WeightOutOfRange { component: &'static str, value: f64 },
    #[error("window_days must be within [1, 90], got {0}")]
    WindowOutOfRange(u32),
    #[error("window_days {0} is not a supported baseline window (3, 7, 14, 30)")]
    UnsupportedWindow(u32),
    #[error("block threshold {block} must not exceed hold threshold {hold}")]
    ThresholdOrder { block: f64, hold: f64 },
    #[error("{name} must be within [0, 100], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("zscore_threshold must be within (0, 10], got {0}")]
    ZScoreThresholdOutOfRange(f64),
}

/// Weights applied to the health sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentWeights {
    pub emq: f64,
    pub freshness: f64,
    pub variance: f64,
    pub anomaly: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            emq: 0.40,
            freshness: 0.25,
            variance: 0.20,
            anomaly: 0.15,
        }
    }
}

impl ComponentWeights {
    pub fn sum(&self) -> f64 {
        self.emq + self.freshness + self.variance + self.anomaly
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (component, value) in [
            ("emq", self.emq),
            ("freshness", self.freshness),
            ("variance", self.variance),
            ("anomaly", self.anomaly),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightOutOfRange { component, value });
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSumToOne(sum));
        }
        Ok(())
    }
}

/// Gate policy applied to every scope of a tenant
///
/// Omitted fields take their defaults; unrecognised fields are rejected so a
/// misspelled key never passes as the default policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatePolicy {
    /// Composite below this blocks automation
    pub block_threshold: f64,
    /// Composite below this holds automation
    pub hold_threshold: f64,
    /// Detection sensitivity
    pub zscore_threshold: f64,
    /// Baseline lookback
    pub window_days: u32,
    pub weights: ComponentWeights,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            block_threshold: 70.0,
            hold_threshold: 85.0,
            zscore_threshold: DEFAULT_ZSCORE_THRESHOLD,
            window_days: 7,
            weights: ComponentWeights::default(),
        }
    }
}

impl GatePolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;

        if !(MIN_WINDOW_DAYS..=MAX_WINDOW_DAYS).contains(&self.window_days) {
            return Err(ConfigError::WindowOutOfRange(self.window_days));
        }
        if !SUPPORTED_WINDOWS.contains(&self.window_days) {
            return Err(ConfigError::UnsupportedWindow(self.window_days));
        }

        for (name, value) in [
            ("block_threshold", self.block_threshold),
            ("hold_threshold", self.hold_threshold),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.block_threshold > self.hold_threshold {
            return Err(ConfigError::ThresholdOrder {
                block: self.block_threshold,
                hold: self.hold_threshold,
            });
        }

        if !self.zscore_threshold.is_finite()
            || self.zscore_threshold <= 0.0
            || self.zscore_threshold > MAX_ZSCORE_THRESHOLD
        {
            return Err(ConfigError::ZScoreThresholdOutOfRange(self.zscore_threshold));
        }
        Ok(())
    }
}

/// Default policy plus validated per-tenant overrides
#[derive(Debug, Default)]
pub struct PolicyStore {
    default: GatePolicy,
    overrides: DashMap<String, GatePolicy>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom default policy
    pub fn with_default(default: GatePolicy) -> Result<Self, ConfigError> {
        default.validate()?;
        Ok(Self {
            default,
            overrides: DashMap::new(),
        })
    }

    /// Validate and store a tenant override
    pub fn set_override(&self, tenant_id: &str, policy: GatePolicy) -> Result<(), ConfigError> {
        policy.validate()?;
        self.overrides.insert(tenant_id.to_string(), policy);
        Ok(())
    }

    pub fn clear_override(&self, tenant_id: &str) -> bool {
        self.overrides.remove(tenant_id).is_some()
    }

    /// Policy in force for a tenant
    pub fn effective(&self, tenant_id: &str) -> GatePolicy {
        self.overrides
            .get(tenant_id)
            .map(|p| *p)
            .unwrap_or(self.default)
    }

    pub fn has_override(&self, tenant_id: &str) -> bool {
        self.overrides.contains_key(tenant_id)
    }

    pub fn default_policy(&self) -> GatePolicy {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert_eq!(GatePolicy::default().validate(), Ok(()));
        assert!((ComponentWeights::default().sum() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let policy = GatePolicy {
            weights: ComponentWeights {
                emq: 0.5,
                freshness: 0.25,
                variance: 0.20,
                anomaly: 0.15,
            },
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::WeightsDoNotSumToOne(_))
        ));
    }

    #[test]
    fn test_rejects_negative_weight() {
        let weights = ComponentWeights {
            emq: 1.1,
            freshness: -0.1,
            variance: 0.0,
            anomaly: 0.0,
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::WeightOutOfRange { component: "emq", .. })
        ));
    }

    #[test]
    fn test_window_validation() {
        let out_of_range = GatePolicy {
            window_days: 120,
            ..Default::default()
        };
        assert_eq!(
            out_of_range.validate(),
            Err(ConfigError::WindowOutOfRange(120))
        );

        let zero = GatePolicy {
            window_days: 0,
            ..Default::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::WindowOutOfRange(0)));

        let unsupported = GatePolicy {
            window_days: 10,
            ..Default::default()
        };
        assert_eq!(
            unsupported.validate(),
            Err(ConfigError::UnsupportedWindow(10))
        );

        for window_days in SUPPORTED_WINDOWS {
            let policy = GatePolicy {
                window_days,
                ..Default::default()
            };
            assert!(policy.validate().is_ok());
        }
    }

    #[test]
    fn test_threshold_validation() {
        let inverted = GatePolicy {
            block_threshold: 90.0,
            hold_threshold: 80.0,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::ThresholdOrder { .. })
        ));

        let too_high = GatePolicy {
            hold_threshold: 101.0,
            ..Default::default()
        };
        assert!(matches!(
            too_high.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                name: "hold_threshold",
                ..
            })
        ));

        let zero_z = GatePolicy {
            zscore_threshold: 0.0,
            ..Default::default()
        };
        assert_eq!(
            zero_z.validate(),
            Err(ConfigError::ZScoreThresholdOutOfRange(0.0))
        );
    }

    #[test]
    fn test_store_rejects_invalid_override_without_clamping() {
        let store = PolicyStore::new();
        let invalid = GatePolicy {
            window_days: 365,
            ..Default::default()
        };

        assert!(store.set_override("tenant-a", invalid).is_err());
        assert!(!store.has_override("tenant-a"));
        assert_eq!(store.effective("tenant-a"), GatePolicy::default());
    }

    #[test]
    fn test_store_override_and_clear() {
        let store = PolicyStore::new();
        let strict = GatePolicy {
            block_threshold: 80.0,
            hold_threshold: 90.0,
            ..Default::default()
        };

        store.set_override("tenant-a", strict).unwrap();
        assert_eq!(store.effective("tenant-a").block_threshold, 80.0);
        assert_eq!(store.effective("tenant-b").block_threshold, 70.0);

        assert!(store.clear_override("tenant-a"));
        assert_eq!(store.effective("tenant-a"), GatePolicy::default());
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: GatePolicy = serde_json::from_str(r#"{"window_days": 14}"#).unwrap();
        assert_eq!(policy.window_days, 14);
        assert_eq!(policy.block_threshold, 70.0);
        assert_eq!(policy.weights, ComponentWeights::default());
    }

    #[test]
    fn test_policy_rejects_unknown_fields() {
        let typo = serde_json::from_str::<GatePolicy>(r#"{"block_treshold": 50}"#);
        assert!(typo.unwrap_err().to_string().contains("block_treshold"));

        let nested = serde_json::from_str::<GatePolicy>(
            r#"{"weights": {"emq": 0.4, "freshness": 0.25, "variance": 0.2, "anomaly": 0.15, "spend": 0.0}}"#,
        );
        assert!(nested.is_err());
    }
}
