//! プロジェクト発見機能
//!
//! 規約ベースのディレクトリ構造を走査して不変の `Project` モデルを構築します。
//!
//! ```text
//! <root>/
//!   hive.{yaml,yml} | container-hive.{yaml,yml}   (必須)
//!   images/
//!     <image-name>/                               (フラットなイメージ)
//!       image.{yaml,yml}
//!       Dockerfile[.gotpl]
//!       rootfs/...                                (任意)
//!       test.{yml,yaml}.gotpl                     (任意)
//!       <variant-name>/                           (宣言されたバリアントごと)
//!     <lineage>/<version>/                        (ネストされたイメージ)
//!       image.{yaml,yml}
//! ```
//!
//! 発見は読み取り専用で、ファイルを一切作成しません。

use crate::error::{HiveError, Result};
use crate::file_resolver::{file_candidates, resolve_first_existing};
use crate::model::{BuildArgs, Image, ImageVariant, Project, SecretRef, Tag, Versions};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// プロジェクト設定ファイルの候補（この順で最初に存在するものが勝つ）
const HIVE_CONFIG_FILE_NAMES: &[&str] = &[
    "hive.yaml",
    "hive.yml",
    "container-hive.yaml",
    "container-hive.yml",
];

/// イメージ設定ファイルの候補
const IMAGE_CONFIG_FILE_NAMES: &[&str] = &["image.yaml", "image.yml"];

const IMAGES_DIR_NAME: &str = "images";
const ROOTFS_DIR_NAME: &str = "rootfs";

/// プロジェクトレベルの設定（hive.yml）
///
/// すべてのセクションは任意ですが、未知のフィールドは拒否されます。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HiveConfig {
    #[serde(default)]
    pub buildkit: Option<BuildkitSettings>,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
}

/// BuildKitデーモンの接続設定
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildkitSettings {
    pub address: Option<String>,
}

/// ビルドキャッシュの設定（s3 / registry のどちらか一方）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub s3: Option<S3CacheSettings>,
    #[serde(default)]
    pub registry: Option<RegistryCacheSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3CacheSettings {
    pub endpoint_url: String,
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub use_path_style: bool,
    #[serde(default)]
    pub cache_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryCacheSettings {
    pub r#ref: String,
    #[serde(default)]
    pub insecure: bool,
}

/// image.yml のスキーマ（厳密: 未知のフィールドはエラー）
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageDefinitionConfig {
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    variants: Vec<VariantConfig>,
    #[serde(default)]
    versions: Versions,
    #[serde(default)]
    build_args: BuildArgs,
    #[serde(default)]
    secrets: BTreeMap<String, SecretRef>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariantConfig {
    name: String,
    tag_suffix: String,
    #[serde(default)]
    versions: Versions,
    #[serde(default)]
    build_args: BuildArgs,
}

/// プロジェクトルートからContainerHive設定ファイルを探す
fn find_hive_config(root: &Path) -> Result<PathBuf> {
    for name in HIVE_CONFIG_FILE_NAMES {
        let path = root.join(name);
        if path.is_file() {
            debug!(config = %path.display(), "Found hive config file");
            return Ok(path);
        }
    }
    Err(HiveError::ConfigNotFound(root.to_path_buf()))
}

/// プロジェクト設定をロード
///
/// 空ファイルは有効（すべてデフォルト）として扱います。
pub fn load_hive_config(path: &Path) -> Result<HiveConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HiveError::IoAt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if content.trim().is_empty() {
        return Ok(HiveConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|e| HiveError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// イメージディレクトリ直下の image.{yaml,yml} を探す
fn find_image_config(dir: &Path) -> Option<PathBuf> {
    for name in IMAGE_CONFIG_FILE_NAMES {
        let path = dir.join(name);
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

/// rootfs ディレクトリのパスを解決
///
/// 存在しない場合は `None`、存在するがディレクトリでない場合はエラー。
fn get_rootfs_path(image_root: &Path) -> Result<Option<PathBuf>> {
    let rootfs = image_root.join(ROOTFS_DIR_NAME);
    match std::fs::metadata(&rootfs) {
        Ok(meta) if meta.is_dir() => Ok(Some(rootfs)),
        Ok(_) => Err(HiveError::Discovery {
            path: rootfs,
            message: "rootfs がディレクトリではありません".to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HiveError::Discovery {
            path: rootfs,
            message: format!("rootfs の stat に失敗: {}", e),
        }),
    }
}

/// `NoFileCandidates` を「ファイルなし」として回復するヘルパー
fn optional_file(result: Result<PathBuf>) -> Result<Option<PathBuf>> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(HiveError::NoFileCandidates) => Ok(None),
        Err(e) => Err(e),
    }
}

/// テスト設定ファイル（test.{yml,yaml}.gotpl）を解決
fn get_test_config_path(root: &Path) -> Result<Option<PathBuf>> {
    let candidates = file_candidates("test", &["yml", "yaml"]);
    optional_file(resolve_first_existing(root, &candidates))
}

/// ビルドエントリポイント（Dockerfile[.gotpl]）を解決
fn get_build_entrypoint_path(root: &Path) -> Result<Option<PathBuf>> {
    let candidates = file_candidates("Dockerfile", &[]);
    optional_file(resolve_first_existing(root, &candidates))
}

/// image.yml を厳密スキーマでパース
fn parse_image_config_file(config_file_path: &Path) -> Result<ImageDefinitionConfig> {
    let content = std::fs::read_to_string(config_file_path).map_err(|e| HiveError::IoAt {
        path: config_file_path.to_path_buf(),
        message: e.to_string(),
    })?;

    serde_yaml::from_str(&content).map_err(|e| HiveError::Parse {
        path: config_file_path.to_path_buf(),
        message: e.to_string(),
    })
}

/// 宣言されたバリアントを解決
///
/// 各バリアントのディレクトリは `<image_root>/<variant.name>` で、
/// rootfs / テスト設定 / Dockerfile をイメージと同じ方法で再解決します。
fn process_variants(
    config: &ImageDefinitionConfig,
    image_root: &Path,
) -> Result<BTreeMap<String, ImageVariant>> {
    let mut variants = BTreeMap::new();

    for v in &config.variants {
        let variant_root = image_root.join(&v.name);

        let rootfs_dir = get_rootfs_path(&variant_root).map_err(|e| HiveError::Discovery {
            path: variant_root.clone(),
            message: format!("バリアント '{}' の rootfs の発見に失敗: {}", v.name, e),
        })?;
        let test_config_path = get_test_config_path(&variant_root)?;
        let build_entrypoint_path = get_build_entrypoint_path(&variant_root)?;

        variants.insert(
            v.name.clone(),
            ImageVariant {
                name: v.name.clone(),
                root_dir: variant_root,
                rootfs_dir,
                build_entrypoint_path,
                test_config_path,
                tag_suffix: v.tag_suffix.clone(),
                versions: v.versions.clone(),
                build_args: v.build_args.clone(),
            },
        );
    }

    Ok(variants)
}

/// 単一のイメージディレクトリを `Image` モデルへ変換
fn process_image_config(images_root: &Path, config_file_path: &Path) -> Result<Image> {
    let image_root = config_file_path
        .parent()
        .expect("image config file always has a parent directory")
        .to_path_buf();

    let relative_root = image_root
        .strip_prefix(images_root)
        .map_err(|e| HiveError::Discovery {
            path: image_root.clone(),
            message: format!("相対パスの計算に失敗: {}", e),
        })?;
    let identifier = relative_root.to_string_lossy().replace('\\', "/");

    // ネストされた識別子（dotnet/8）では親セグメントが論理名、
    // 末尾セグメントはバージョン系統
    let name = match identifier.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => identifier.clone(),
    };

    let parsed = parse_image_config_file(config_file_path)?;
    let rootfs_dir = get_rootfs_path(&image_root)?;
    let test_config_path = get_test_config_path(&image_root)?;
    let build_entrypoint_path = get_build_entrypoint_path(&image_root)?;
    let variants = process_variants(&parsed, &image_root)?;

    let mut tags = BTreeMap::new();
    for tag in parsed.tags {
        tags.insert(tag.name.clone(), tag);
    }

    debug!(
        identifier = %identifier,
        name = %name,
        tag_count = tags.len(),
        variant_count = variants.len(),
        "Processed image config"
    );

    Ok(Image {
        identifier,
        name,
        root_dir: image_root,
        rootfs_dir,
        build_entrypoint_path,
        test_config_path,
        definition_file_path: config_file_path.to_path_buf(),
        versions: parsed.versions,
        build_args: parsed.build_args,
        secrets: parsed.secrets,
        tags,
        variants,
        depends_on: parsed.depends_on,
    })
}

/// images/ 配下を深さ2まで走査してイメージディレクトリを列挙
///
/// イメージディレクトリ = image.{yaml,yml} を直接含むディレクトリ。
fn collect_image_config_paths(images_root: &Path) -> Result<Vec<PathBuf>> {
    let mut config_paths = Vec::new();

    let entries = std::fs::read_dir(images_root).map_err(|e| HiveError::Discovery {
        path: images_root.to_path_buf(),
        message: format!("ディレクトリの読み込みに失敗: {}", e),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| HiveError::Discovery {
            path: images_root.to_path_buf(),
            message: format!("ディレクトリエントリの読み込みに失敗: {}", e),
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        if let Some(config) = find_image_config(&path) {
            config_paths.push(config);
            continue;
        }

        // 深さ2: <lineage>/<version>/image.yml
        let sub_entries = std::fs::read_dir(&path).map_err(|e| HiveError::Discovery {
            path: path.clone(),
            message: format!("ディレクトリの読み込みに失敗: {}", e),
        })?;
        for sub_entry in sub_entries {
            let sub_entry = sub_entry.map_err(|e| HiveError::Discovery {
                path: path.clone(),
                message: format!("ディレクトリエントリの読み込みに失敗: {}", e),
            })?;
            let sub_path = sub_entry.path();
            if sub_path.is_dir() {
                if let Some(config) = find_image_config(&sub_path) {
                    config_paths.push(config);
                }
            }
        }
    }

    Ok(config_paths)
}

/// プロジェクトルートから `Project` モデルを構築
pub fn discover_project(root: &Path) -> Result<Project> {
    let root_dir = root.canonicalize().map_err(|e| HiveError::Discovery {
        path: root.to_path_buf(),
        message: format!("プロジェクトルートの正規化に失敗: {}", e),
    })?;

    let config_file_path = find_hive_config(&root_dir)?;
    // スキーマエラーを発見フェーズで検出する
    load_hive_config(&config_file_path)?;

    let mut images_by_identifier: BTreeMap<String, Arc<Image>> = BTreeMap::new();
    let mut images_by_name: BTreeMap<String, Vec<Arc<Image>>> = BTreeMap::new();

    let images_root = root_dir.join(IMAGES_DIR_NAME);
    if images_root.is_dir() {
        for config_path in collect_image_config_paths(&images_root)? {
            let image = Arc::new(process_image_config(&images_root, &config_path)?);

            if images_by_identifier.contains_key(&image.identifier) {
                return Err(HiveError::Discovery {
                    path: config_path,
                    message: format!("イメージ識別子が重複しています: {}", image.identifier),
                });
            }

            images_by_name
                .entry(image.name.clone())
                .or_default()
                .push(image.clone());
            images_by_identifier.insert(image.identifier.clone(), image);
        }
    } else {
        warn!(images_root = %images_root.display(), "No images directory found in project");
    }

    info!(
        project_root = %root_dir.display(),
        image_count = images_by_identifier.len(),
        "Discovered project"
    );

    Ok(Project {
        root_dir,
        config_file_path,
        images_by_identifier,
        images_by_name,
    })
}
