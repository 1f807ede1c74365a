//! Training-time quantities such as `4800ba`, `1ep` or `0.1dur`.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A point or span in training time, in the unit the user wrote.
///
/// A bare integer is read as a number of epochs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainTime {
    Epochs(u64),
    Batches(u64),
    Samples(u64),
    Tokens(u64),
    /// Fraction of the whole training duration.
    Fraction(f64),
}

impl TrainTime {
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Epochs(_) => "ep",
            Self::Batches(_) => "ba",
            Self::Samples(_) => "sp",
            Self::Tokens(_) => "tok",
            Self::Fraction(_) => "dur",
        }
    }
}

impl fmt::Display for TrainTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epochs(n) | Self::Batches(n) | Self::Samples(n) | Self::Tokens(n) => {
                write!(f, "{n}{}", self.unit())
            }
            Self::Fraction(x) => write!(f, "{x}{}", self.unit()),
        }
    }
}

impl FromStr for TrainTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
        let (amount, unit) = s.split_at(split);
        if amount.is_empty() {
            return Err(format!("'{s}' has no amount"));
        }

        let count = || {
            amount
                .parse::<u64>()
                .map_err(|_| format!("'{amount}' is not a non-negative integer amount in '{s}'"))
        };

        match unit {
            "" | "ep" => count().map(Self::Epochs),
            "ba" => count().map(Self::Batches),
            "sp" => count().map(Self::Samples),
            "tok" => count().map(Self::Tokens),
            "dur" => {
                let fraction = amount
                    .parse::<f64>()
                    .map_err(|_| format!("'{amount}' is not a number in '{s}'"))?;
                if !fraction.is_finite() || fraction < 0.0 {
                    return Err(format!("duration fraction in '{s}' must be a finite value >= 0"));
                }
                Ok(Self::Fraction(fraction))
            }
            other => Err(format!("unknown time unit '{other}' in '{s}' (expected ep, ba, sp, tok or dur)")),
        }
    }
}

impl Serialize for TrainTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TrainTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Epochs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Epochs(n) => Ok(Self::Epochs(n)),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}
