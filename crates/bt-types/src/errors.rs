use thiserror::Error;

/// Main error type for the BlendTune scheduler
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Search space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Search-space definition errors
#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("Unsupported distribution kind '{kind}' for parameter {parameter}")]
    UnsupportedDistribution { parameter: String, kind: String },

    #[error("Missing field '{field}' for parameter {parameter}")]
    MissingField { parameter: String, field: String },

    #[error("Invalid bounds for parameter {parameter}: {message}")]
    InvalidBounds { parameter: String, message: String },

    #[error("Choice parameter {parameter} has no values")]
    EmptyChoice { parameter: String },

    #[error("Invalid space definition: {message}")]
    InvalidFormat { message: String },
}

/// Checkpoint save/restore errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot not found: {path}")]
    NotFound { path: String },

    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Snapshot strategy mismatch: expected {expected}, found {found}")]
    StrategyMismatch { expected: String, found: String },

    #[error("Corrupt snapshot: {message}")]
    Corrupt { message: String },
}

/// Result type alias for BlendTune operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SpaceError::UnsupportedDistribution {
            parameter: "lr".to_string(),
            kind: "normal".to_string(),
        };

        assert!(error.to_string().contains("Unsupported distribution kind"));
        assert!(error.to_string().contains("normal"));
        assert!(error.to_string().contains("lr"));
    }

    #[test]
    fn test_error_conversion() {
        let snapshot_error = SnapshotError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        let tune_error: TuneError = snapshot_error.into();

        match tune_error {
            TuneError::Snapshot(SnapshotError::VersionMismatch { found, .. }) => {
                assert_eq!(found, 7)
            }
            _ => panic!("Expected Snapshot error"),
        }
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, TuneError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, TuneError::Internal(_)));
        let config_err = config_error!("Missing required field: {}", "metric");
        assert!(config_err.to_string().contains("metric"));
    }
}
