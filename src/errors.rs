use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CustodianError {
    #[error("Not found: {0}")]
    #[diagnostic(code(custodian::not_found))]
    NotFound(String),

    #[error("Forbidden: {0}")]
    #[diagnostic(code(custodian::forbidden))]
    Forbidden(String),

    #[error("Conflict: {0}")]
    #[diagnostic(code(custodian::conflict))]
    Conflict(String),

    #[error("Invalid input: {0}")]
    #[diagnostic(code(custodian::invalid_input))]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    #[diagnostic(code(custodian::unauthorized))]
    Unauthorized(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(custodian::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(custodian::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(custodian::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(custodian::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("{0}")]
    #[diagnostic(code(custodian::other))]
    Other(String),
}

impl CustodianError {
    /// Short machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CustodianError::NotFound(_) => "not_found",
            CustodianError::Forbidden(_) => "forbidden",
            CustodianError::Conflict(_) => "conflict",
            CustodianError::InvalidInput(_) => "invalid_input",
            CustodianError::Unauthorized(_) => "unauthorized",
            _ => "internal_error",
        }
    }
}
