//! Delta-to-value mapping with range clamping and limit detection.
//!
//! A raw delta is scaled by the parameter's span, subtracted from the current
//! value and clamped into `[min, max]`. Reaching a bound from the interior
//! clamps silently; only a further push while already pinned exactly on the
//! bound reports a [`Limit`], and in that case the value does not move.

use serde::{Deserialize, Serialize};

use crate::registry::Parameter;

/// Raw delta units that sweep a parameter across its whole range.
pub const DEFAULT_SENSITIVITY_DIVISOR: f64 = 500.0;

/// Which bound a parameter is pinned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Limit {
    Min,
    Max,
}

impl Limit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scaling between raw delta units and parameter units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensitivity {
    divisor: f64,
}

impl Sensitivity {
    /// # Panics
    ///
    /// Panics if `divisor` is not a positive finite number.
    #[must_use]
    pub fn new(divisor: f64) -> Self {
        assert!(
            divisor.is_finite() && divisor > 0.0,
            "sensitivity divisor must be positive"
        );
        Self { divisor }
    }

    #[must_use]
    pub fn divisor(&self) -> f64 {
        self.divisor
    }

    /// Parameter units moved per raw delta unit.
    #[must_use]
    pub fn step(&self, min: f64, max: f64) -> f64 {
        (max - min) / self.divisor
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVITY_DIVISOR)
    }
}

/// Result of applying one delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeOutcome {
    /// Candidate value; equals the current value when `limit` is set
    pub value: f64,
    pub limit: Option<Limit>,
}

impl RangeOutcome {
    #[must_use]
    pub fn is_limited(&self) -> bool {
        self.limit.is_some()
    }
}

/// Compute the candidate value for `delta` applied to `current` in `[min, max]`.
///
/// Positive deltas decrease the value.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn apply_delta_raw(
    current: f64,
    min: f64,
    max: f64,
    delta: f64,
    sensitivity: Sensitivity,
) -> RangeOutcome {
    let raw = current - delta * sensitivity.step(min, max);

    if raw <= min && current == min {
        return RangeOutcome {
            value: current,
            limit: Some(Limit::Min),
        };
    }
    if raw >= max && current == max {
        return RangeOutcome {
            value: current,
            limit: Some(Limit::Max),
        };
    }

    RangeOutcome {
        value: raw.clamp(min, max),
        limit: None,
    }
}

/// [`apply_delta_raw`] against a registry parameter.
#[must_use]
pub fn apply_delta(param: &Parameter, delta: f64, sensitivity: Sensitivity) -> RangeOutcome {
    apply_delta_raw(param.value, param.min, param.max, delta, sensitivity)
}
