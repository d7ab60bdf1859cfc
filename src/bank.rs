use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Acquiring bank that reports the toll transactions.
#[derive(
    Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum,
)]
pub enum Bank {
    #[serde(rename = "IDFC")]
    Idfc,
    #[serde(rename = "ICICI")]
    Icici,
}

impl FromStr for Bank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "idfc" => Ok(Bank::Idfc),
            "icici" => Ok(Bank::Icici),
            // Some extracts carry the full bank name
            "idfc first" | "idfc first bank" | "idfc bank" => Ok(Bank::Idfc),
            "icici bank" => Ok(Bank::Icici),
            _ => Err(format!("Invalid bank: {}", s)),
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bank::Idfc => write!(f, "IDFC"),
            Bank::Icici => write!(f, "ICICI"),
        }
    }
}
