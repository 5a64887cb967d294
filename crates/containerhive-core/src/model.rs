//! モデル定義
//!
//! ContainerHiveプロジェクトの不変データモデルを定義します。
//! モデルは発見（discovery）フェーズで一度だけ構築され、
//! 以降のフェーズからは読み取り専用で共有されます。

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// パッケージ/ツール名からバージョントークンへのマッピング
pub type Versions = BTreeMap<String, String>;

/// ビルド引数のマッピング（マージ時は大文字小文字を区別）
pub type BuildArgs = BTreeMap<String, String>;

/// シークレットの解決バックエンド種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    Plain,
    Env,
    Vault,
}

/// シークレット参照
///
/// `source_type` が省略された場合は env → plain → vault の順で解決を試みます。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    #[serde(default)]
    pub source_type: Option<SecretSource>,
    pub value: String,
}

/// イメージのタグ（= 1つのOCIアーティファクトになるバージョン）
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub versions: Versions,
    #[serde(default)]
    pub build_args: BuildArgs,
}

/// イメージのバリアント（タグにサフィックスを付けて派生するフレーバー）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageVariant {
    pub name: String,
    pub root_dir: PathBuf,
    pub rootfs_dir: Option<PathBuf>,
    pub build_entrypoint_path: Option<PathBuf>,
    pub test_config_path: Option<PathBuf>,
    pub tag_suffix: String,
    pub versions: Versions,
    pub build_args: BuildArgs,
}

/// 宣言されたビルド対象イメージ
///
/// `identifier` は images/ ディレクトリからの相対パス（例: `dotnet/8`）。
/// `name` は論理名で、ネストされた識別子では親セグメントになります
/// （`dotnet/8` の name は `dotnet`、末尾セグメントはバージョン系統）。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Image {
    pub identifier: String,
    pub name: String,
    pub root_dir: PathBuf,
    pub rootfs_dir: Option<PathBuf>,
    pub build_entrypoint_path: Option<PathBuf>,
    pub test_config_path: Option<PathBuf>,
    pub definition_file_path: PathBuf,
    pub versions: Versions,
    pub build_args: BuildArgs,
    pub secrets: BTreeMap<String, SecretRef>,
    pub tags: BTreeMap<String, Tag>,
    pub variants: BTreeMap<String, ImageVariant>,
    pub depends_on: Vec<String>,
}

/// 発見済みのContainerHiveプロジェクト
///
/// 同一の `Arc<Image>` が両方のインデックスから共有されます。
/// イメージ名は複数の識別子で共有されることがあります
/// （同じ論理イメージの別バージョン系統）。
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub root_dir: PathBuf,
    pub config_file_path: PathBuf,
    pub images_by_identifier: BTreeMap<String, Arc<Image>>,
    pub images_by_name: BTreeMap<String, Vec<Arc<Image>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_ref_deserialize() {
        let secret: SecretRef =
            serde_yaml::from_str("source_type: vault\nvalue: secret/data/app#password").unwrap();
        assert_eq!(secret.source_type, Some(SecretSource::Vault));
        assert_eq!(secret.value, "secret/data/app#password");
    }

    #[test]
    fn test_secret_ref_without_source_type() {
        let secret: SecretRef = serde_yaml::from_str("value: plaintext-value").unwrap();
        assert_eq!(secret.source_type, None);
    }

    #[test]
    fn test_secret_ref_rejects_unknown_field() {
        let result = serde_yaml::from_str::<SecretRef>("value: x\nunknown_key: y");
        assert!(result.is_err());
    }

    #[test]
    fn test_tag_deserialize_defaults() {
        let tag: Tag = serde_yaml::from_str("name: 3.13.7").unwrap();
        assert_eq!(tag.name, "3.13.7");
        assert!(tag.versions.is_empty());
        assert!(tag.build_args.is_empty());
    }
}
