//! Network identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which network a node is connected to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Main,
    /// The public test network.
    #[default]
    Test,
    /// A private network (local development or consortium).
    Priv,
}

impl NetworkId {
    /// Default peer-to-peer port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Main => 10333,
            Self::Test => 20333,
            Self::Priv => 20333,
        }
    }

    /// Human-readable name, as used in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "MainNet",
            Self::Test => "TestNet",
            Self::Priv => "PrivNet",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
