//! BuildKitキャッシュ設定
//!
//! S3キャッシュとレジストリキャッシュの2種類をサポートします。
//! どちらも `--import-cache` / `--export-cache` の属性マップへ変換されます。

use std::collections::BTreeMap;

/// BuildKitのキャッシュバックエンド
#[derive(Debug, Clone)]
pub enum BuildkitCache {
    S3 {
        endpoint_url: String,
        bucket: String,
        region: String,
        access_key_id: String,
        secret_access_key: String,
        use_path_style: bool,
        cache_key: String,
    },
    Registry {
        cache_ref: String,
        insecure: bool,
    },
}

impl BuildkitCache {
    /// BuildKitのキャッシュタイプ名
    pub fn name(&self) -> &'static str {
        match self {
            BuildkitCache::S3 { .. } => "s3",
            BuildkitCache::Registry { .. } => "registry",
        }
    }

    /// キャッシュエントリの属性マップ
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert("mode".to_string(), "max".to_string());

        match self {
            BuildkitCache::S3 {
                endpoint_url,
                bucket,
                region,
                access_key_id,
                secret_access_key,
                use_path_style,
                cache_key,
            } => {
                attrs.insert("endpoint_url".to_string(), endpoint_url.clone());
                attrs.insert("bucket".to_string(), bucket.clone());
                attrs.insert("region".to_string(), region.clone());
                attrs.insert("access_key_id".to_string(), access_key_id.clone());
                attrs.insert("secret_access_key".to_string(), secret_access_key.clone());
                attrs.insert("use_path_style".to_string(), use_path_style.to_string());
                attrs.insert("name".to_string(), cache_key.clone());
            }
            BuildkitCache::Registry { cache_ref, insecure } => {
                attrs.insert("ref".to_string(), cache_ref.clone());
                attrs.insert("image-manifest".to_string(), "true".to_string());
                attrs.insert("oci-mediatypes".to_string(), "true".to_string());
                if *insecure {
                    attrs.insert("registry.insecure".to_string(), "true".to_string());
                }
            }
        }

        attrs
    }

    /// `type=...,k=v,...` 形式のbuildctl引数へ変換
    ///
    /// `ignore-errors` は明示されていない限り `true` が補われます
    /// （キャッシュ障害でビルド自体を失敗させない）。
    pub fn to_cache_entry(&self) -> String {
        let mut attrs = self.to_attributes();
        attrs
            .entry("ignore-errors".to_string())
            .or_insert_with(|| "true".to_string());

        let mut parts = Vec::with_capacity(attrs.len() + 1);
        parts.push(format!("type={}", self.name()));
        for (key, value) in attrs {
            parts.push(format!("{}={}", key, value));
        }
        parts.join(",")
    }
}
