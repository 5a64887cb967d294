use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Failed to run buildctl: {0}")]
    BuildctlSpawn(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Invalid OCI layout: {0}")]
    InvalidLayout(String),

    #[error("SBOM generation failed: {0}")]
    Sbom(String),

    #[error("Container structure tests failed: {0}")]
    StructureTest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
