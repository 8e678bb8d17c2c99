use thiserror::Error;

/// Main error type for the KernelTune system
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Search space error: {0}")]
    SearchSpace(#[from] SearchSpaceError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while building or querying a search space
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchSpaceError {
    #[error("Value {value} is not in the domain of parameter {parameter}")]
    Domain { parameter: String, value: String },

    #[error("Configuration {configuration} is not part of the search space")]
    NotInSpace { configuration: String },

    #[error("No valid configurations remain after applying restrictions")]
    EmptySearchSpace,

    #[error("Parameter {parameter} has an empty domain")]
    EmptyDomain { parameter: String },

    #[error("Parameter {parameter} is declared more than once")]
    DuplicateParameter { parameter: String },

    #[error("Value {value} appears more than once in the domain of parameter {parameter}")]
    DuplicateValue { parameter: String, value: String },

    #[error("Parameter {parameter} has a NaN value")]
    NanValue { parameter: String },

    #[error("Configuration has {actual} values, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Index {index} has already been observed")]
    AlreadyObserved { index: usize },
}

/// Errors raised by a search strategy or its models
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Unknown acquisition function: {name}")]
    UnknownAcquisitionFunction { name: String },

    #[error("Invalid strategy configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Surrogate fit failed: {message}")]
    SurrogateFit { message: String },

    #[error("Surrogate prediction failed: {message}")]
    SurrogatePredict { message: String },
}

/// Result type alias for KernelTune operations
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
        let error = SearchSpaceError::Domain {
            parameter: "block_size_x".to_string(),
            value: "48".to_string(),
        };

        assert!(error.to_string().contains("block_size_x"));
        assert!(error.to_string().contains("48"));
    }

    #[test]
    fn test_error_conversion() {
        let strategy_error = StrategyError::UnknownAcquisitionFunction {
            name: "gp-hedge".to_string(),
        };
        let tune_error: TuneError = strategy_error.into();

        match tune_error {
            TuneError::Strategy(StrategyError::UnknownAcquisitionFunction { name }) => {
                assert_eq!(name, "gp-hedge")
            }
            _ => panic!("Expected Strategy error"),
        }
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, TuneError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, TuneError::Internal(_)));
        let config_err = config_error!("Missing required field: {}", "tune_params");
        assert!(config_err.to_string().contains("tune_params"));
    }
}
