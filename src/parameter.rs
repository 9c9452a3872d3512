//! Progress units and scheduling quantities.
//!
//! Every cadence in the scheduler (warmup length, validation frequency,
//! checkpoint frequency, decay start) is a [`SchedulingParameter`]: a count
//! plus the unit it is measured in. Units are interchangeable at the option
//! level, so `--valid-freq 5000u` and `--valid-freq 2000000t` are both valid
//! ways to schedule validation.
//!
//! The textual form is a number with a one-letter suffix: `t` for target
//! labels, `u` for updates, `e` for epochs. A bare number means updates.
//! Scientific notation works because only the final character is inspected:
//! `5e5t` is 500 000 labels, `5e5` is 500 000 updates, and `5e5e` is 500 000
//! epochs. An SI multiplier (`k`, `M`, `G`, case-insensitive) may sit
//! between the number and the unit, so `300Ku` and `20Gt` read naturally.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ScheduleError;

/// Unit in which training progress is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingUnit {
    /// Target labels (tokens) processed, across all epochs.
    Labels,
    /// Optimizer updates applied.
    Updates,
    /// Full passes over the training data.
    Epochs,
}

impl SchedulingUnit {
    /// The one-letter suffix used in textual parameters.
    #[must_use]
    pub fn suffix(&self) -> char {
        match self {
            SchedulingUnit::Labels => 't',
            SchedulingUnit::Updates => 'u',
            SchedulingUnit::Epochs => 'e',
        }
    }

    /// Human-readable unit name for log messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SchedulingUnit::Labels => "labels",
            SchedulingUnit::Updates => "updates",
            SchedulingUnit::Epochs => "epochs",
        }
    }
}

impl fmt::Display for SchedulingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A quantity of training progress: a count and the unit it is counted in.
///
/// A parameter with `n == 0` is *unset*: the feature it configures is
/// disabled. [`SchedulingParameter::default`] produces an unset parameter in
/// updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulingParameter {
    /// The amount of progress.
    pub n: u64,
    /// The unit `n` is measured in.
    pub unit: SchedulingUnit,
}

impl SchedulingParameter {
    /// Creates a parameter from a count and unit.
    #[must_use]
    pub fn new(n: u64, unit: SchedulingUnit) -> Self {
        Self { n, unit }
    }

    /// A parameter counted in target labels.
    #[must_use]
    pub fn labels(n: u64) -> Self {
        Self::new(n, SchedulingUnit::Labels)
    }

    /// A parameter counted in optimizer updates.
    #[must_use]
    pub fn updates(n: u64) -> Self {
        Self::new(n, SchedulingUnit::Updates)
    }

    /// A parameter counted in epochs.
    #[must_use]
    pub fn epochs(n: u64) -> Self {
        Self::new(n, SchedulingUnit::Epochs)
    }

    /// Returns true if the parameter is set (`n > 0`).
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.n > 0
    }
}

impl Default for SchedulingParameter {
    fn default() -> Self {
        Self::updates(0)
    }
}

impl fmt::Display for SchedulingParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.n, self.unit.suffix())
    }
}

impl FromStr for SchedulingParameter {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }
        // Only the last character selects the unit, so the numeric part may
        // itself contain an 'e' for scientific notation.
        let (mut digits, unit) = match text.as_bytes()[text.len() - 1] {
            b't' => (&text[..text.len() - 1], SchedulingUnit::Labels),
            b'u' => (&text[..text.len() - 1], SchedulingUnit::Updates),
            b'e' => (&text[..text.len() - 1], SchedulingUnit::Epochs),
            _ => (text, SchedulingUnit::Updates),
        };
        // An optional SI multiplier sits between the number and the unit,
        // as in "300Ku" or "20Gt".
        let mut multiplier = 1.0;
        if let Some(last) = digits.as_bytes().last() {
            multiplier = match last {
                b'k' | b'K' => 1e3,
                b'm' | b'M' => 1e6,
                b'g' | b'G' => 1e9,
                _ => 1.0,
            };
            if multiplier != 1.0 {
                digits = &digits[..digits.len() - 1];
            }
        }
        let value = digits
            .parse::<f64>()
            .map_err(|e| ScheduleError::ParseParameter {
                text: s.to_string(),
                reason: e.to_string(),
            })?;
        let value = value * multiplier;
        if !value.is_finite() || value < 0.0 {
            return Err(ScheduleError::ParseParameter {
                text: s.to_string(),
                reason: "count must be a finite non-negative number".to_string(),
            });
        }
        // Counts are whole numbers once the multiplier is applied: "0.5Ku"
        // is 500, but "1.5u" has no meaning and truncating it would turn
        // "0.5e" into the unset sentinel.
        if value.fract() != 0.0 {
            return Err(ScheduleError::ParseParameter {
                text: s.to_string(),
                reason: "count must be a whole number".to_string(),
            });
        }
        Ok(Self::new(value as u64, unit))
    }
}

impl Serialize for SchedulingParameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SchedulingParameter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(DeError::custom)
    }
}
