use std::path::PathBuf;
use thiserror::Error;

/// Reasons an import operation is refused before any work starts
#[derive(Error, Debug)]
pub enum ImportError {
    /// Source path does not exist
    #[error("Source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Source path exists but is not a directory
    #[error("Source path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Destination project already exists and merging was not requested
    #[error("Project already exists: {0} (enable merge to add to it)")]
    ProjectExists(String),

    /// Project name would escape the library root
    #[error("Invalid project name: {0:?}")]
    InvalidProjectName(String),

    /// No job with this id is known to the registry
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job exists but cannot take the requested transition
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// Anything else (I/O while preparing the destination, etc.)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;
