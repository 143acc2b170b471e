use thiserror::Error;

// Unified error type for hymls

#[derive(Error, Debug)]
pub enum HymlsError {
    #[error("configuration error at {file}:{line}: {message}")]
    Config {
        message: String,
        file: &'static str,
        line: u32,
    },
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("factorization failed in {context}: {detail}")]
    Factorization { context: String, detail: String },
    #[error("{component} used before {expected}")]
    State {
        component: &'static str,
        expected: &'static str,
    },
    #[error("entry ({row}, {col}) is not in the preallocated sparsity pattern")]
    Pattern { row: usize, col: usize },
    #[error("communication error: {0}")]
    Comm(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "rayon")]
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Build a [`HymlsError::Config`] that records where it was raised.
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::HymlsError::Config {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Return `DimensionMismatch` unless `expected == found`.
pub(crate) fn check_dim(context: &'static str, expected: usize, found: usize) -> Result<(), HymlsError> {
    if expected != found {
        return Err(HymlsError::DimensionMismatch { context, expected, found });
    }
    Ok(())
}
