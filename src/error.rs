use thiserror::Error;

use super::bank::Bank;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid plaza config: {0}")]
    PlazaConfig(#[from] toml::de::Error),

    #[error("unknown bank: {0}")]
    UnknownBank(String),

    #[error("plaza {plaza_id} is listed more than once under {bank}")]
    DuplicatePlaza { bank: Bank, plaza_id: String },
}
