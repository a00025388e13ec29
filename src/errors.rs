use thiserror::Error;

/// Error type for proposal setup and evaluation.
///
/// Recoverable kernel precondition failures (wrong detector count, empty DE
/// buffer, glitch dimension at a boundary) are not errors: kernels report them
/// by returning no proposal, and the cycle scheduler retries the next kernel.
/// Programming errors (empty cycle, missing adaptive-sigma entry, degenerate
/// geometry) panic instead, since they reflect a broken setup.
#[derive(Error, Debug)]
pub enum ProposalError {
    #[error("{0}")]
    Setup(String),
    #[error("malformed prior range for {name}: [{min}, {max}]")]
    MalformedPriorRange { name: String, min: f64, max: f64 },
    #[error("malformed sample file: {0}")]
    MalformedSampleFile(String),
    #[error("k-means clustering failed to converge after {0} attempts")]
    ClusteringFailed(usize),
}

/// Convenience type for `Result<T, ProposalError>`.
pub type ProposalResult<T> = Result<T, ProposalError>;
