use thiserror::Error;

#[derive(Error, Debug)]
pub enum CmfdError {
    #[error("Solver diverged at iteration {iteration}: {message}")]
    SolverDiverged { iteration: usize, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{what} index out of bounds: index={index}, len={len}")]
    IndexOutOfBounds {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Physics constraint violated: {0}")]
    PhysicsViolation(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Linear algebra error: {0}")]
    LinAlg(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CmfdResult<T> = Result<T, CmfdError>;
