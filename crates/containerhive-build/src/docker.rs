//! Docker連携
//!
//! container-structure-testの実行に先立って、ビルド済みOCI tarを
//! ローカルのDockerデーモンへロードします。

use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// OCIインデックスマニフェストでイメージ名を持つアノテーションキー
const IMAGE_NAME_ANNOTATION: &str = "io.containerd.image.name";

#[derive(Debug, Deserialize)]
struct OciIndex {
    manifests: Vec<OciIndexEntry>,
}

#[derive(Debug, Deserialize)]
struct OciIndexEntry {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Dockerデーモンへの接続
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// ローカルのDockerデーモンへ接続して疎通を確認
    pub async fn connect() -> BuildResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        Ok(Self { docker })
    }

    /// OCI tarからインデックスマニフェストのイメージ名を読み取る
    ///
    /// tar全体を展開せず、`index.json` エントリだけを読みます。
    fn image_name_from_tar(tar_path: &Path) -> BuildResult<String> {
        let file = std::fs::File::open(tar_path)?;
        let mut archive = tar::Archive::new(file);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?;
            if path.as_ref() != Path::new("index.json") {
                continue;
            }

            let mut content = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut content)?;
            let index: OciIndex = serde_json::from_slice(&content)
                .map_err(|e| BuildError::InvalidLayout(format!("failed to parse index.json: {}", e)))?;

            let first = index
                .manifests
                .first()
                .ok_or_else(|| BuildError::InvalidLayout("no manifests in OCI layout".to_string()))?;

            return first
                .annotations
                .get(IMAGE_NAME_ANNOTATION)
                .filter(|name| !name.is_empty())
                .cloned()
                .ok_or_else(|| {
                    BuildError::InvalidLayout(
                        "no image name annotation in OCI index".to_string(),
                    )
                });
        }

        Err(BuildError::InvalidLayout(
            "index.json not found in OCI tar".to_string(),
        ))
    }

    /// OCI tarをDockerデーモンへロードしてイメージ名を返す
    pub async fn load_image_from_tar(&self, tar_path: &Path) -> BuildResult<String> {
        let image_name = Self::image_name_from_tar(tar_path)?;
        debug!(image = %image_name, tar = %tar_path.display(), "Loading OCI tar into Docker");

        let content = tokio::fs::read(tar_path).await?;

        #[allow(deprecated)]
        let options = bollard::image::ImportImageOptions {
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self
            .docker
            .import_image(options, bollard::body_full(content.into()), None);

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(error) = info.error {
                return Err(BuildError::BuildFailed(format!(
                    "docker load failed: {}",
                    error
                )));
            }
        }

        info!(image = %image_name, "Loaded image into Docker");
        Ok(image_name)
    }
}
