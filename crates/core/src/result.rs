//! Race result outcomes attached to a selection at settlement.

use serde::{Deserialize, Serialize};

/// Final outcome of a race for one selection.
///
/// `Placed` only carries meaning for systems that run a place market; on the
/// win market it behaves exactly like `Lost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RaceResult {
    /// The horse won the race.
    Won,
    /// The horse did not win (or place).
    Lost,
    /// The horse finished in the places without winning.
    Placed,
    /// Non-runner: withdrawn before the off.
    #[serde(rename = "NR")]
    NonRunner,
    /// Bets voided by the exchange.
    Void,
    /// Race abandoned or cancelled.
    Cancelled,
}

impl RaceResult {
    /// All outcomes, in display order.
    pub const ALL: [Self; 6] = [
        Self::Won,
        Self::Lost,
        Self::Placed,
        Self::NonRunner,
        Self::Void,
        Self::Cancelled,
    ];

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Won => "WON",
            Self::Lost => "LOST",
            Self::Placed => "PLACED",
            Self::NonRunner => "NR",
            Self::Void => "VOID",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parses from string representation (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "WON" | "WIN" => Some(Self::Won),
            "LOST" | "LOSE" => Some(Self::Lost),
            "PLACED" | "PLACE" => Some(Self::Placed),
            "NR" | "NON-RUNNER" | "NON RUNNER" => Some(Self::NonRunner),
            "VOID" => Some(Self::Void),
            "CANCELLED" | "CANCELED" | "ABANDONED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// True for outcomes that return the stake with zero P/L.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::NonRunner | Self::Void | Self::Cancelled)
    }
}

impl std::fmt::Display for RaceResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
