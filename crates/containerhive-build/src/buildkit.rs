//! BuildKitドライバ
//!
//! `buildctl` CLIを通じてBuildKitデーモンにビルドを依頼します。
//! 出力は常にOCI tar（`rewrite-timestamp=true`）で、再現性のため
//! `SOURCE_DATE_EPOCH` を固定値で注入します。
//!
//! ビルドは2本の並行レッグで構成されます:
//! ソルバプロセスの完了待ちと、進捗ストリームのハンドラへの転送。
//! 両方が完了するまで `build` は返らず、どちらかが失敗すれば
//! そのエラーが返ります。

use crate::cache::BuildkitCache;
use crate::error::{BuildError, BuildResult};
use crate::progress::BuildProgress;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 再現可能ビルドのための固定タイムスタンプ
const SOURCE_DATE_EPOCH: &str = "1770336000";

/// hive参照のプレフィックス（レジストリアドレスに置換される）
const HIVE_PREFIX: &[u8] = b"__hive__/";

/// 1ビルドのオプション
#[derive(Debug, Clone, Default)]
pub struct BuildOpts {
    /// `<image>:<tag>` 形式のイメージ名
    pub image_name: String,
    /// `linux/amd64` のようなプラットフォーム指定
    pub platform: String,
    /// OCI tarの出力先
    pub tar_file: PathBuf,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// シークレット名 → 内容（mode 0600 の一時ファイル経由で渡される）
    pub secrets: BTreeMap<String, Vec<u8>>,
    pub cache: Option<BuildkitCache>,
    /// ビルドコンテキスト（Dockerfileと同じディレクトリ）
    pub context_dir: PathBuf,
    /// コンテキスト内のDockerfileファイル名
    pub dockerfile_name: String,
}

/// buildctl経由のBuildKitクライアント
pub struct BuildkitClient {
    addr: String,
}

impl BuildkitClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// デーモンへの到達性を確認
    pub async fn ping(&self) -> BuildResult<()> {
        let output = Command::new("buildctl")
            .arg("--addr")
            .arg(&self.addr)
            .arg("debug")
            .arg("workers")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BuildError::BuildctlSpawn(format!("failed to run buildctl: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::BuildFailed(format!(
                "BuildKit daemon not reachable at {}: {}",
                self.addr,
                stderr.trim()
            )));
        }

        Ok(())
    }

    /// イメージを1つビルドしてOCI tarへエクスポート
    pub async fn build(&self, opts: &BuildOpts, progress: &BuildProgress) -> BuildResult<()> {
        info!(image = %opts.image_name, platform = %opts.platform, "Starting BuildKit build");

        // シークレットは0600の一時ファイルに書き出して --secret で渡す。
        // ファイルはビルド完了まで生存させる必要がある。
        let mut secret_files = Vec::with_capacity(opts.secrets.len());
        for (key, value) in &opts.secrets {
            let file = tempfile::NamedTempFile::new()?;
            std::fs::write(file.path(), value)?;
            secret_files.push((key.clone(), file));
        }

        let mut cmd = Command::new("buildctl");
        cmd.arg("--addr")
            .arg(&self.addr)
            .arg("build")
            .arg("--frontend")
            .arg("dockerfile.v0")
            .arg("--local")
            .arg(format!("context={}", opts.context_dir.display()))
            .arg("--local")
            .arg(format!("dockerfile={}", opts.context_dir.display()))
            .arg("--opt")
            .arg(format!("filename={}", opts.dockerfile_name))
            .arg("--opt")
            .arg(format!("platform={}", opts.platform))
            .arg("--opt")
            .arg(format!("build-arg:SOURCE_DATE_EPOCH={}", SOURCE_DATE_EPOCH));

        for (key, value) in &opts.build_args {
            cmd.arg("--opt").arg(format!("build-arg:{}={}", key, value));
        }

        for (key, value) in &opts.labels {
            cmd.arg("--opt").arg(format!("label:{}={}", key, value));
        }

        for (key, file) in &secret_files {
            cmd.arg("--secret")
                .arg(format!("id={},src={}", key, file.path().display()));
        }

        if let Some(cache) = &opts.cache {
            let cache_entry = cache.to_cache_entry();
            cmd.arg("--import-cache").arg(&cache_entry);
            cmd.arg("--export-cache").arg(&cache_entry);
        }

        cmd.arg("--output").arg(format!(
            "type=oci,name={},rewrite-timestamp=true,dest={}",
            opts.image_name,
            opts.tar_file.display()
        ));
        cmd.arg("--progress").arg("plain");

        debug!(command = ?cmd, "Running buildctl");

        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| BuildError::BuildctlSpawn(format!("failed to spawn buildctl: {}", e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BuildError::BuildctlSpawn("failed to capture stderr".to_string()))?;

        // 進捗転送レッグ: plain進捗をハンドラへ1行ずつ流す。
        // 最後の数行はエラーメッセージとして保持する。
        let status_leg = async {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: Vec<String> = Vec::new();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| BuildError::BuildFailed(format!("progress stream error: {}", e)))?
            {
                progress.status(&line);
                tail.push(line);
                if tail.len() > 20 {
                    tail.remove(0);
                }
            }
            Ok::<Vec<String>, BuildError>(tail)
        };

        // ソルバレッグ: プロセスの終了を待つ
        let solver_leg = async {
            child
                .wait()
                .await
                .map_err(|e| BuildError::BuildFailed(format!("failed to wait for buildctl: {}", e)))
        };

        let (status_result, solver_result) = tokio::join!(status_leg, solver_leg);
        let tail = status_result?;
        let status = solver_result?;

        if !status.success() {
            let detail = tail.join("\n");
            warn!(image = %opts.image_name, "BuildKit build failed");
            return Err(BuildError::BuildFailed(format!(
                "buildctl exited with {:?}:\n{}",
                status.code(),
                detail
            )));
        }

        info!(image = %opts.image_name, tar = %opts.tar_file.display(), "Build finished");
        Ok(())
    }
}

/// ホストアーキテクチャに対応する `linux/<arch>` プラットフォーム
pub fn host_platform() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("linux/{}", arch)
}

/// Dockerfile内の `__hive__/` 参照をレジストリアドレスで書き換える
///
/// 生のバイト列に対する純粋なテキスト置換です。コメントや行継続の中の
/// 参照も同一に書き換えるため、意図的にパースを行いません。
pub fn rewrite_hive_refs(src: &Path, target: &Path, registry_address: &str) -> BuildResult<()> {
    let content = std::fs::read(src)?;
    let replacement = format!("{}/", registry_address);
    let rewritten = replace_bytes(&content, HIVE_PREFIX, replacement.as_bytes());
    std::fs::write(target, rewritten)?;
    Ok(())
}

fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(haystack.len());
    let mut pos = 0;

    while pos < haystack.len() {
        if haystack[pos..].starts_with(needle) {
            output.extend_from_slice(replacement);
            pos += needle.len();
        } else {
            output.push(haystack[pos]);
            pos += 1;
        }
    }

    output
}
