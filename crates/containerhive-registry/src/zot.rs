//! 組み込みzotレジストリのライフサイクル
//!
//! ローカル開発ビルド用の一時的なOCIレジストリです。zotバイナリを
//! サイドカープロセスとして 127.0.0.1 のエフェメラルポートで起動し、
//! ビルドフェーズの間だけ生存させます。
//!
//! レジストリは依存エッジが存在する場合にのみ起動され、
//! `__hive__/` 参照の解決先として使われます。

use crate::error::{RegistryError, RegistryResult};
use crate::oci::{self, OciLayout};
use crate::tar::extract_tar;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// 準備完了ポーリングの間隔
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// 準備完了待機のタイムアウト
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// 組み込みzotレジストリ
pub struct ZotRegistry {
    child: Option<Child>,
    data_dir: Option<tempfile::TempDir>,
    port: u16,
    http: reqwest::Client,
}

impl ZotRegistry {
    pub fn new() -> Self {
        Self {
            child: None,
            data_dir: None,
            port: 0,
            http: reqwest::Client::new(),
        }
    }

    /// OSにエフェメラルポートを割り当てさせる
    fn pick_ephemeral_port() -> RegistryResult<u16> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
            .map_err(|e| RegistryError::StartFailed(format!("ポートの割り当てに失敗: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| RegistryError::StartFailed(format!("ポートの取得に失敗: {}", e)))?
            .port();
        Ok(port)
    }

    /// zot設定ファイルを書き出す
    fn write_config(data_dir: &Path, port: u16) -> RegistryResult<PathBuf> {
        std::fs::create_dir_all(data_dir.join("storage"))
            .map_err(|e| RegistryError::StartFailed(format!("ストレージディレクトリの作成に失敗: {}", e)))?;

        let config = serde_json::json!({
            "distSpecVersion": "1.1.0",
            "storage": {
                "rootDirectory": data_dir.join("storage"),
                "gc": false,
                "dedupe": false,
            },
            "http": {
                "address": "127.0.0.1",
                "port": port.to_string(),
            },
            "log": {
                "level": "error",
            },
        });

        let config_path = data_dir.join("config.json");
        std::fs::write(&config_path, serde_json::to_vec_pretty(&config).expect("config is serializable"))
            .map_err(|e| RegistryError::StartFailed(format!("zot設定の書き込みに失敗: {}", e)))?;
        Ok(config_path)
    }

    /// レジストリを起動して準備完了まで待機
    ///
    /// 起動・準備のいずれかに失敗した場合はプロセスとデータディレクトリを
    /// 片付けてからエラーを返します。
    pub async fn start(&mut self) -> RegistryResult<()> {
        let data_dir = tempfile::Builder::new()
            .prefix("containerhive-zot-")
            .tempdir()
            .map_err(|e| {
                RegistryError::StartFailed(format!("データディレクトリの作成に失敗: {}", e))
            })?;

        let port = Self::pick_ephemeral_port()?;
        let config_path = Self::write_config(data_dir.path(), port)?;

        debug!(port = port, data_dir = %data_dir.path().display(), "Starting zot registry");

        let child = Command::new("zot")
            .arg("serve")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RegistryError::StartFailed(format!("zotの起動に失敗: {}", e)))?;

        self.child = Some(child);
        self.data_dir = Some(data_dir);
        self.port = port;

        if let Err(e) = self.wait_for_ready().await {
            self.stop().await;
            return Err(e);
        }

        info!(address = %self.address(), "Registry started");
        Ok(())
    }

    /// GET /v2/ が200を返すまで100ms間隔で最大30秒ポーリング
    async fn wait_for_ready(&self) -> RegistryResult<()> {
        let url = format!("http://{}/v2/", self.address());
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(RegistryError::ReadyTimeout);
            }

            if let Ok(response) = self.http.get(&url).send().await {
                if response.status() == reqwest::StatusCode::OK {
                    return Ok(());
                }
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// レジストリのアドレス（startの呼び出し後は安定）
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// 組み込み実装かどうか
    ///
    /// 上流レジストリが設定されている場合、呼び出し側はこれを見て
    /// プッシュの要否を判断します。
    pub fn is_local(&self) -> bool {
        true
    }

    /// ビルド済みOCI tarをレジストリへプッシュ
    ///
    /// tarを一時ディレクトリへ展開し、インデックスの先頭マニフェストを
    /// `<address>/<image_name>:<tag>` へアップロードします。
    pub async fn push(&self, image_name: &str, tag: &str, oci_tar_path: &Path) -> RegistryResult<()> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("oci-push-")
            .tempdir()
            .map_err(|e| RegistryError::Push(format!("一時ディレクトリの作成に失敗: {}", e)))?;

        extract_tar(oci_tar_path, tmp_dir.path())?;

        let layout = OciLayout::from_path(tmp_dir.path())?;
        oci::push_image(&self.http, &self.address(), &layout, image_name, tag).await
    }

    /// レジストリを停止してデータディレクトリを削除（冪等）
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill zot process");
            }
        }
        // TempDirのドロップでデータディレクトリが削除される
        self.data_dir.take();
    }
}

impl Default for ZotRegistry {
    fn default() -> Self {
        Self::new()
    }
}
