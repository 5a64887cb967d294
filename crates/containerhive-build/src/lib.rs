//! ContainerHive image build functionality
//!
//! This crate drives BuildKit through the `buildctl` CLI to produce OCI
//! tars, and runs the post-build artifact steps: SBOM generation via syft
//! and container-structure-tests against the local Docker daemon.

pub mod buildkit;
pub mod cache;
pub mod docker;
pub mod error;
pub mod progress;
pub mod sbom;

pub use buildkit::{BuildOpts, BuildkitClient, host_platform, rewrite_hive_refs};
pub use cache::BuildkitCache;
pub use docker::DockerClient;
pub use error::{BuildError, BuildResult};
pub use progress::BuildProgress;
pub use sbom::{FORMAT_SPDX_JSON, SbomImageTool, sbom_path};
pub use structure_test::{StructureTestRunner, collect_test_definitions};
