//! SBOM生成
//!
//! 外部ツール syft でビルド済みOCI tarからSBOMを生成します。
//! SBOM生成の失敗はビルド全体を止めません（呼び出し側で警告に留める）。

use crate::error::{BuildError, BuildResult};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// SBOMのシリアライズ形式
pub const FORMAT_SPDX_JSON: &str = "spdx-json";

/// syftを使ったSBOM生成ツール
pub struct SbomImageTool {
    syft_binary: String,
}

impl SbomImageTool {
    /// syftの存在を確認してツールを初期化
    pub async fn new() -> BuildResult<Self> {
        let tool = Self {
            syft_binary: "syft".to_string(),
        };

        let output = Command::new(&tool.syft_binary)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| BuildError::Sbom(format!("syft not available: {}", e)))?;

        if !output.success() {
            return Err(BuildError::Sbom("syft version check failed".to_string()));
        }

        Ok(tool)
    }

    /// OCI tarからSBOMを生成して指定形式でシリアライズ
    pub async fn generate_sbom(&self, tar_file: &Path, format: &str) -> BuildResult<Vec<u8>> {
        debug!(tar = %tar_file.display(), format = %format, "Generating SBOM");

        let output = Command::new(&self.syft_binary)
            .arg("scan")
            .arg(format!("oci-archive:{}", tar_file.display()))
            .arg("-o")
            .arg(format)
            .arg("--quiet")
            .output()
            .await
            .map_err(|e| BuildError::Sbom(format!("failed to run syft: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::Sbom(format!(
                "syft exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        info!(
            tar = %tar_file.display(),
            size = output.stdout.len(),
            "Generated SBOM"
        );
        Ok(output.stdout)
    }
}

/// OCI tarの隣に置かれるSBOMファイルのパス
pub fn sbom_path(tar_file: &Path) -> std::path::PathBuf {
    let mut path = tar_file.as_os_str().to_owned();
    path.push(".sbom.spdx.json");
    std::path::PathBuf::from(path)
}
