//! OCIイメージレイアウトの読み取りとレジストリへのプッシュ
//!
//! BuildKitがエクスポートしたOCIレイアウト（展開済み）から
//! インデックスの先頭マニフェストを選び、blobとマニフェストを
//! OCI Distribution APIでアップロードします。
//! ローカル開発用レジストリが相手なのでHTTP（insecure）です。

use crate::error::{RegistryError, RegistryResult};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// OCIレイアウトの index.json
#[derive(Debug, Deserialize)]
pub struct OciIndex {
    pub manifests: Vec<OciDescriptor>,
}

/// マニフェスト/blobの記述子
#[derive(Debug, Clone, Deserialize)]
pub struct OciDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
}

/// イメージマニフェスト
#[derive(Debug, Deserialize)]
pub struct OciManifest {
    pub config: OciDescriptor,
    pub layers: Vec<OciDescriptor>,
}

/// 展開済みのOCIイメージレイアウト
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    /// 展開済みディレクトリからレイアウトを開く
    pub fn from_path(root: &Path) -> RegistryResult<Self> {
        if !root.join("index.json").is_file() {
            return Err(RegistryError::InvalidLayout(format!(
                "index.json が見つかりません: {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// index.json を読み込む
    pub fn index(&self) -> RegistryResult<OciIndex> {
        let content = std::fs::read(self.root.join("index.json"))?;
        serde_json::from_slice(&content)
            .map_err(|e| RegistryError::InvalidLayout(format!("index.json のパースに失敗: {}", e)))
    }

    /// `sha256:<hex>` 形式のダイジェストからblobパスを導出
    fn blob_path(&self, digest: &str) -> RegistryResult<PathBuf> {
        let (algorithm, hex) = digest.split_once(':').ok_or_else(|| {
            RegistryError::InvalidLayout(format!("無効なダイジェスト: {}", digest))
        })?;

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RegistryError::InvalidLayout(format!(
                "無効なダイジェスト: {}",
                digest
            )));
        }

        Ok(self.root.join("blobs").join(algorithm).join(hex))
    }

    /// blobを読み込み、sha256ダイジェストを検証する
    pub fn read_blob(&self, digest: &str) -> RegistryResult<Vec<u8>> {
        let path = self.blob_path(digest)?;
        let content = std::fs::read(&path).map_err(|e| RegistryError::IoAt {
            path,
            message: e.to_string(),
        })?;

        if let Some(expected) = digest.strip_prefix("sha256:") {
            let actual = format!("{:x}", Sha256::digest(&content));
            if actual != expected {
                return Err(RegistryError::InvalidLayout(format!(
                    "blobダイジェストが一致しません: expected {}, got sha256:{}",
                    digest, actual
                )));
            }
        }

        Ok(content)
    }
}

/// blobを1つアップロード（存在すればスキップ）
async fn upload_blob(
    client: &reqwest::Client,
    registry_addr: &str,
    image_name: &str,
    digest: &str,
    content: Vec<u8>,
) -> RegistryResult<()> {
    // 既にあればアップロード不要
    let head_url = format!("http://{}/v2/{}/blobs/{}", registry_addr, image_name, digest);
    let head = client.head(&head_url).send().await?;
    if head.status().is_success() {
        debug!(digest = %digest, "Blob already exists, skipping upload");
        return Ok(());
    }

    // アップロードセッションを開始
    let start_url = format!("http://{}/v2/{}/blobs/uploads/", registry_addr, image_name);
    let start = client.post(&start_url).send().await?;
    if !start.status().is_success() {
        return Err(RegistryError::Push(format!(
            "blobアップロードの開始に失敗: HTTP {}",
            start.status().as_u16()
        )));
    }

    let location = start
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            RegistryError::Push("レジストリがLocationヘッダを返しませんでした".to_string())
        })?;

    let upload_url = if location.starts_with("http") {
        location.to_string()
    } else {
        format!("http://{}{}", registry_addr, location)
    };
    let separator = if upload_url.contains('?') { '&' } else { '?' };
    let put_url = format!("{}{}digest={}", upload_url, separator, digest);

    let put = client
        .put(&put_url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(content)
        .send()
        .await?;

    if !put.status().is_success() {
        return Err(RegistryError::Push(format!(
            "blob {} のアップロードに失敗: HTTP {}",
            digest,
            put.status().as_u16()
        )));
    }

    debug!(digest = %digest, "Uploaded blob");
    Ok(())
}

/// レイアウトの先頭マニフェストをレジストリへプッシュ
pub async fn push_image(
    client: &reqwest::Client,
    registry_addr: &str,
    layout: &OciLayout,
    image_name: &str,
    tag: &str,
) -> RegistryResult<()> {
    let index = layout.index()?;
    let descriptor = index.manifests.first().ok_or_else(|| {
        RegistryError::InvalidLayout("OCIレイアウトにマニフェストがありません".to_string())
    })?;

    let manifest_bytes = layout.read_blob(&descriptor.digest)?;
    let manifest: OciManifest = serde_json::from_slice(&manifest_bytes).map_err(|e| {
        RegistryError::InvalidLayout(format!("マニフェストのパースに失敗: {}", e))
    })?;

    // config + 各レイヤーのblobを先にアップロードする
    let config_digest = manifest.config.digest.clone();
    let config_bytes = layout.read_blob(&config_digest)?;
    upload_blob(client, registry_addr, image_name, &config_digest, config_bytes).await?;

    for layer in &manifest.layers {
        let layer_bytes = layout.read_blob(&layer.digest)?;
        upload_blob(client, registry_addr, image_name, &layer.digest, layer_bytes).await?;
    }

    // 最後にマニフェストをタグ付きでPUT
    let manifest_url = format!(
        "http://{}/v2/{}/manifests/{}",
        registry_addr, image_name, tag
    );
    let response = client
        .put(&manifest_url)
        .header(reqwest::header::CONTENT_TYPE, descriptor.media_type.clone())
        .body(manifest_bytes)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(RegistryError::Push(format!(
            "マニフェストのPUTに失敗: HTTP {}",
            response.status().as_u16()
        )));
    }

    info!(
        image = %image_name,
        tag = %tag,
        registry = %registry_addr,
        "Pushed image to registry"
    );
    Ok(())
}
