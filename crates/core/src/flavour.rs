//! Machine flavour catalog.
//!
//! Each processing routine is pinned to a worker-pool flavour; dispatchers
//! are started per flavour so heavy radar routines and light optical
//! routines never compete for the same machines.

use serde::{Deserialize, Serialize};

/// Worker machine flavour a routine must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavour {
    /// High-memory machines (radar processing).
    #[serde(rename = "hma.large")]
    HmaLarge,
    /// General-purpose machines (optical processing).
    #[serde(rename = "eo1.large")]
    Eo1Large,
}

impl Flavour {
    /// Parse a flavour from its catalog value, case-insensitively.
    pub fn of(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hma.large" => Some(Self::HmaLarge),
            "eo1.large" => Some(Self::Eo1Large),
            _ => None,
        }
    }

    /// The catalog value stored in the `processing_routine` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmaLarge => "hma.large",
            Self::Eo1Large => "eo1.large",
        }
    }
}

impl std::fmt::Display for Flavour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
