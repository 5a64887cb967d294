//! シークレットリゾルバ
//!
//! 不透明なシークレット参照をプラガブルなバックエンドでバイト列に解決します。
//!
//! ## バックエンド
//!
//! - `plain`: 値をそのまま返す
//! - `env`: 環境変数が設定されていて空でなければその値、なければ「未処理」
//! - `vault`: `path#field` 参照をVault KV v2で解決
//!
//! ## 解決の優先順位
//!
//! `source_type` が明示されていればそのバックエンドのみを使用します。
//! 省略時は env → plain → vault の固定順で試行し、最初に値を返した
//! バックエンドが勝ちます。エラーを返したバックエンドで即座に中断します。

use crate::error::Result;
use crate::model::SecretSource;
use crate::vault;
use async_trait::async_trait;
use tracing::debug;

/// シークレットバックエンドのインターフェース
///
/// `Ok(None)` は「このリゾルバでは処理されなかった」ことを示します。
/// エラーは値そのものが無効な場合にのみ返してください。
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, value: &str) -> Result<Option<String>>;
}

/// 値をそのまま返すリゾルバ
pub struct PlainTextResolver;

#[async_trait]
impl SecretResolver for PlainTextResolver {
    async fn resolve(&self, value: &str) -> Result<Option<String>> {
        Ok(Some(value.to_string()))
    }
}

/// 環境変数から解決するリゾルバ
///
/// 変数が未設定または空の場合はエラーにせず「未処理」を返します。
pub struct EnvVarResolver;

#[async_trait]
impl SecretResolver for EnvVarResolver {
    async fn resolve(&self, value: &str) -> Result<Option<String>> {
        match std::env::var(value) {
            Ok(resolved) if !resolved.is_empty() => {
                debug!(env_var = %value, "Resolved secret from environment variable");
                Ok(Some(resolved))
            }
            _ => Ok(None),
        }
    }
}

/// Vault KV v2 から解決するリゾルバ
pub struct VaultSecretResolver;

#[async_trait]
impl SecretResolver for VaultSecretResolver {
    async fn resolve(&self, value: &str) -> Result<Option<String>> {
        let (path, field) = vault::split_reference(value)?;
        let secret = vault::get_secret_with_default_configuration(path, field).await?;
        Ok(Some(secret))
    }
}

/// source_type 省略時の試行順序
const RESOLVER_ORDER: &[SecretSource] = &[SecretSource::Env, SecretSource::Plain, SecretSource::Vault];

fn resolver_for(source: SecretSource) -> Box<dyn SecretResolver> {
    match source {
        SecretSource::Plain => Box::new(PlainTextResolver),
        SecretSource::Env => Box::new(EnvVarResolver),
        SecretSource::Vault => Box::new(VaultSecretResolver),
    }
}

/// シークレット参照をバイト列に解決
pub async fn resolve(source_type: Option<SecretSource>, value: &str) -> Result<Vec<u8>> {
    if let Some(source) = source_type {
        let resolved = resolver_for(source).resolve(value).await?;
        return match resolved {
            Some(secret) => Ok(secret.into_bytes()),
            None => Ok(Vec::new()),
        };
    }

    for source in RESOLVER_ORDER {
        if let Some(secret) = resolver_for(*source).resolve(value).await? {
            return Ok(secret.into_bytes());
        }
    }

    // plainが常に値を返すため通常は到達しない
    Err(crate::error::HiveError::Secret(format!(
        "どのリゾルバもシークレットを処理できませんでした: {}",
        value
    )))
}
