//! ビルド値リゾルバ
//!
//! イメージ・タグ・バリアントの3スコープに分かれた versions / build_args /
//! secrets を、文書化された優先順位で単一の解決済みセットへマージします。
//!
//! ## 優先順位（上が勝ち）
//!
//! - versions:   variant > tag > image
//! - build_args: variant > image > tag
//!
//! build_args でイメージがタグを上書きするのは意図的な非対称です。
//! イメージレベルの引数はプロジェクト所有のデフォルトとして扱われ、
//! タグファイルによって偶然上書きされてはなりません。

use crate::error::{HiveError, Result};
use crate::model::{BuildArgs, Image, ImageVariant, Tag, Versions};
use crate::secrets;
use std::collections::BTreeMap;

/// マージ済みのビルド値
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedBuildValues {
    pub build_args: BuildArgs,
    pub versions: Versions,
    pub secrets: BTreeMap<String, Vec<u8>>,
}

impl ResolvedBuildValues {
    /// BuildKit に渡すビルド引数マップへエクスポート
    ///
    /// - build_args の各キーは正規化される
    /// - versions の各キーは正規化 + `_VERSION` サフィックス
    /// - 正規化後にキーが衝突した場合は versions が勝つ
    pub fn to_build_args(&self) -> BuildArgs {
        let mut args = BuildArgs::new();

        for (key, value) in &self.build_args {
            args.insert(normalize_key(key), value.clone());
        }

        for (key, value) in &self.versions {
            args.insert(format!("{}_VERSION", normalize_key(key)), value.clone());
        }

        args
    }
}

/// ビルド引数キーの正規化: `-` を `_` に置換して大文字化
pub fn normalize_key(key: &str) -> String {
    key.replace('-', "_").to_uppercase()
}

/// イメージのシークレット参照を解決
async fn resolve_secrets(image: &Image) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut resolved = BTreeMap::new();

    for (key, secret_ref) in &image.secrets {
        let value = secrets::resolve(secret_ref.source_type, &secret_ref.value)
            .await
            .map_err(|e| HiveError::SecretResolution {
                key: key.clone(),
                message: e.to_string(),
            })?;
        resolved.insert(key.clone(), value);
    }

    Ok(resolved)
}

/// イメージ + タグのビルド値を解決
pub async fn for_tag(image: &Image, tag: &Tag) -> Result<ResolvedBuildValues> {
    let mut versions = image.versions.clone();
    for (key, value) in &tag.versions {
        versions.insert(key.clone(), value.clone());
    }

    // タグの引数を下敷きにし、イメージの引数で上書きする
    let mut build_args = tag.build_args.clone();
    for (key, value) in &image.build_args {
        build_args.insert(key.clone(), value.clone());
    }

    Ok(ResolvedBuildValues {
        build_args,
        versions,
        secrets: resolve_secrets(image).await?,
    })
}

/// イメージ + タグ + バリアントのビルド値を解決
///
/// バリアントの versions / build_args は他のすべてを上書きします。
pub async fn for_tag_variant(
    image: &Image,
    variant: &ImageVariant,
    tag: &Tag,
) -> Result<ResolvedBuildValues> {
    let mut resolved = for_tag(image, tag).await?;

    for (key, value) in &variant.versions {
        resolved.versions.insert(key.clone(), value.clone());
    }

    for (key, value) in &variant.build_args {
        resolved.build_args.insert(key.clone(), value.clone());
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SecretRef, SecretSource};

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_for_tag_empty_image_and_tag() {
        let resolved = for_tag(&Image::default(), &Tag::default()).await.unwrap();
        assert!(resolved.build_args.is_empty());
        assert!(resolved.versions.is_empty());
        assert!(resolved.secrets.is_empty());
    }

    #[tokio::test]
    async fn test_for_tag_versions_tag_overrides_image() {
        let image = Image {
            versions: map(&[("python", "3.10"), ("pip", "22.0")]),
            ..Default::default()
        };
        let tag = Tag {
            versions: map(&[("python", "3.11")]),
            ..Default::default()
        };

        let resolved = for_tag(&image, &tag).await.unwrap();
        assert_eq!(
            resolved.versions,
            map(&[("python", "3.11"), ("pip", "22.0")])
        );
    }

    #[tokio::test]
    async fn test_for_tag_build_args_image_overrides_tag() {
        let image = Image {
            build_args: map(&[("BASE_IMAGE", "alpine:3.18"), ("EXTRA_ARG", "value")]),
            ..Default::default()
        };
        let tag = Tag {
            build_args: map(&[("BASE_IMAGE", "alpine:latest")]),
            ..Default::default()
        };

        let resolved = for_tag(&image, &tag).await.unwrap();
        // イメージレベルの引数がタグを上書きする（意図的な非対称）
        assert_eq!(
            resolved.build_args,
            map(&[("BASE_IMAGE", "alpine:3.18"), ("EXTRA_ARG", "value")])
        );
    }

    #[tokio::test]
    async fn test_for_tag_complex_merge() {
        let image = Image {
            versions: map(&[("python", "3.10"), ("poetry", "1.5.0")]),
            build_args: map(&[("BASE_IMAGE", "alpine:3.18"), ("WORKDIR", "/app")]),
            ..Default::default()
        };
        let tag = Tag {
            versions: map(&[("python", "3.11"), ("pip", "23.0")]),
            build_args: map(&[("BASE_IMAGE", "alpine:latest"), ("BUILD_TYPE", "release")]),
            ..Default::default()
        };

        let resolved = for_tag(&image, &tag).await.unwrap();
        assert_eq!(
            resolved.versions,
            map(&[("python", "3.11"), ("poetry", "1.5.0"), ("pip", "23.0")])
        );
        assert_eq!(
            resolved.build_args,
            map(&[
                ("BASE_IMAGE", "alpine:3.18"),
                ("WORKDIR", "/app"),
                ("BUILD_TYPE", "release"),
            ])
        );
    }

    #[tokio::test]
    async fn test_for_tag_does_not_mutate_inputs() {
        let image = Image {
            versions: map(&[("python", "3.10")]),
            build_args: map(&[("A", "image")]),
            ..Default::default()
        };
        let tag = Tag {
            versions: map(&[("python", "3.11")]),
            build_args: map(&[("A", "tag")]),
            ..Default::default()
        };

        let _ = for_tag(&image, &tag).await.unwrap();
        assert_eq!(image.versions.get("python").unwrap(), "3.10");
        assert_eq!(tag.build_args.get("A").unwrap(), "tag");
    }

    #[tokio::test]
    async fn test_for_tag_variant_versions_override_all() {
        let image = Image {
            versions: map(&[("python", "3.10"), ("poetry", "1.5.0")]),
            ..Default::default()
        };
        let tag = Tag {
            versions: map(&[("python", "3.9")]),
            ..Default::default()
        };
        let variant = ImageVariant {
            versions: map(&[("python", "3.11"), ("nodejs", "20.0.0")]),
            ..Default::default()
        };

        let resolved = for_tag_variant(&image, &variant, &tag).await.unwrap();
        assert_eq!(
            resolved.versions,
            map(&[
                ("python", "3.11"),
                ("poetry", "1.5.0"),
                ("nodejs", "20.0.0"),
            ])
        );
    }

    #[tokio::test]
    async fn test_for_tag_variant_build_args_override_all() {
        let image = Image {
            build_args: map(&[("BASE_IMAGE", "alpine:3.18"), ("WORKDIR", "/app")]),
            ..Default::default()
        };
        let tag = Tag {
            build_args: map(&[("BASE_IMAGE", "alpine:latest")]),
            ..Default::default()
        };
        let variant = ImageVariant {
            build_args: map(&[("BASE_IMAGE", "ubuntu:22.04"), ("VARIANT_ARG", "value")]),
            ..Default::default()
        };

        let resolved = for_tag_variant(&image, &variant, &tag).await.unwrap();
        assert_eq!(
            resolved.build_args,
            map(&[
                ("BASE_IMAGE", "ubuntu:22.04"),
                ("WORKDIR", "/app"),
                ("VARIANT_ARG", "value"),
            ])
        );
    }

    #[tokio::test]
    async fn test_resolves_plain_secrets() {
        let mut secrets = BTreeMap::new();
        secrets.insert(
            "api-key".to_string(),
            SecretRef {
                source_type: Some(SecretSource::Plain),
                value: "secret-value".to_string(),
            },
        );
        let image = Image {
            secrets,
            ..Default::default()
        };

        let resolved = for_tag(&image, &Tag::default()).await.unwrap();
        assert_eq!(resolved.secrets.get("api-key").unwrap(), b"secret-value");
    }

    #[tokio::test]
    async fn test_secret_failure_identifies_key() {
        let mut secrets = BTreeMap::new();
        secrets.insert(
            "db-password".to_string(),
            SecretRef {
                source_type: Some(SecretSource::Vault),
                value: "not-a-valid-reference".to_string(),
            },
        );
        let image = Image {
            secrets,
            ..Default::default()
        };

        let err = for_tag(&image, &Tag::default()).await.unwrap_err();
        assert!(
            err.to_string().contains("db-password"),
            "エラーにシークレットキーが含まれるべき: {}",
            err
        );
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("a-b-c"), "A_B_C");
        assert_eq!(normalize_key("base-image"), "BASE_IMAGE");
        assert_eq!(normalize_key("PYTHON"), "PYTHON");
        // 冪等性
        assert_eq!(normalize_key(&normalize_key("some-key")), "SOME_KEY");
    }

    #[test]
    fn test_to_build_args_exports_versions_with_suffix() {
        let resolved = ResolvedBuildValues {
            build_args: map(&[("BASE_IMAGE", "alpine:latest"), ("WORKDIR", "/app")]),
            versions: map(&[("python", "3.11"), ("node", "20.0.0")]),
            secrets: BTreeMap::new(),
        };

        let exported = resolved.to_build_args();
        assert_eq!(
            exported,
            map(&[
                ("BASE_IMAGE", "alpine:latest"),
                ("WORKDIR", "/app"),
                ("PYTHON_VERSION", "3.11"),
                ("NODE_VERSION", "20.0.0"),
            ])
        );
    }

    #[test]
    fn test_to_build_args_normalizes_hyphenated_build_args() {
        let resolved = ResolvedBuildValues {
            build_args: map(&[("base-image", "alpine:latest")]),
            versions: map(&[("python", "3.11")]),
            ..Default::default()
        };

        let exported = resolved.to_build_args();
        assert_eq!(exported.get("BASE_IMAGE").unwrap(), "alpine:latest");
        assert_eq!(exported.get("PYTHON_VERSION").unwrap(), "3.11");
    }

    #[test]
    fn test_to_build_args_hyphenated_version_keys() {
        let resolved = ResolvedBuildValues {
            versions: map(&[("some-package", "1.2.3"), ("another-tool", "4.5.6")]),
            ..Default::default()
        };

        let exported = resolved.to_build_args();
        assert_eq!(
            exported,
            map(&[
                ("SOME_PACKAGE_VERSION", "1.2.3"),
                ("ANOTHER_TOOL_VERSION", "4.5.6"),
            ])
        );
    }

    #[test]
    fn test_to_build_args_versions_win_on_collision() {
        let resolved = ResolvedBuildValues {
            build_args: map(&[("python-version", "from-build-args")]),
            versions: map(&[("python", "3.11")]),
            ..Default::default()
        };

        let exported = resolved.to_build_args();
        assert_eq!(exported.get("PYTHON_VERSION").unwrap(), "3.11");
    }

    #[test]
    fn test_to_build_args_is_idempotent() {
        let resolved = ResolvedBuildValues {
            build_args: map(&[("base-image", "alpine")]),
            versions: map(&[("python", "3.11")]),
            ..Default::default()
        };

        let once = resolved.to_build_args();
        let re_resolved = ResolvedBuildValues {
            build_args: once.clone(),
            versions: Versions::new(),
            secrets: BTreeMap::new(),
        };
        assert_eq!(re_resolved.to_build_args(), once);
    }
}
