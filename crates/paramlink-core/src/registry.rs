//! Process-wide parameter table.
//!
//! The registry is built once from the configured definitions and shared by
//! handle (`Arc<ParameterRegistry>`) with every connection. Parameters are
//! never added or removed at runtime; the only mutation is [`ParameterRegistry::set`],
//! which keeps `min <= value <= max` for every entry.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ParameterDef;
use crate::error::{ConfigError, Error, Result};

/// A named parameter with its admissible range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub address: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl Parameter {
    /// True when `value` is inside `[min, max]`.
    #[must_use]
    pub fn admits(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Snapshot entry, keyed by address in [`ParameterRegistry::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Shared parameter table.
#[derive(Debug)]
pub struct ParameterRegistry {
    params: RwLock<BTreeMap<String, Parameter>>,
}

impl ParameterRegistry {
    /// Build the registry from a definition table.
    ///
    /// Rejects duplicate addresses and definitions that violate their range.
    pub fn from_definitions(defs: &[ParameterDef]) -> Result<Self> {
        if defs.is_empty() {
            return Err(ConfigError::ValidationError(
                "parameter table must not be empty".to_string(),
            )
            .into());
        }

        let mut params = BTreeMap::new();
        for def in defs {
            def.validate()?;
            let param = Parameter {
                address: def.address.clone(),
                value: def.value,
                min: def.min,
                max: def.max,
            };
            if params.insert(def.address.clone(), param).is_some() {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate parameter address: {}",
                    def.address
                ))
                .into());
            }
        }

        Ok(Self {
            params: RwLock::new(params),
        })
    }

    /// Look up a parameter by address.
    pub fn get(&self, address: &str) -> Result<Parameter> {
        self.params
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::UnknownParameter(address.to_string()))
    }

    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.params.read().contains_key(address)
    }

    /// Current value for `address`.
    pub fn value(&self, address: &str) -> Result<f64> {
        self.get(address).map(|p| p.value)
    }

    /// Store an already-clamped value.
    ///
    /// No clamping happens here; a value outside the parameter's range is
    /// rejected with [`Error::OutOfRange`] and the stored value is left as is.
    pub fn set(&self, address: &str, value: f64) -> Result<()> {
        let mut params = self.params.write();
        let param = params
            .get_mut(address)
            .ok_or_else(|| Error::UnknownParameter(address.to_string()))?;
        if !param.admits(value) {
            return Err(Error::OutOfRange {
                address: address.to_string(),
                value,
                min: param.min,
                max: param.max,
            });
        }
        param.value = value;
        Ok(())
    }

    /// Read-only copy of every parameter.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ParameterState> {
        self.params
            .read()
            .values()
            .map(|p| {
                (
                    p.address.clone(),
                    ParameterState {
                        value: p.value,
                        min: p.min,
                        max: p.max,
                    },
                )
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.read().is_empty()
    }
}
