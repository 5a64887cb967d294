//! Vault KV v2 クライアント
//!
//! `path#field` 形式の参照をHashiCorp VaultのKV v2 APIで解決します。
//!
//! ## トークンの解決順序
//!
//! 1. 環境変数 `VAULT_TOKEN`（最優先）
//! 2. `~/.vault-token` ファイルの内容（Vault CLIのログイン結果）
//!
//! ## 必要な環境
//!
//! - `VAULT_ADDR` 環境変数が設定されていること
//! - 上記いずれかの方法でトークンが取得できること

use crate::error::{HiveError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// KV v2 のレスポンス形式: `{ "data": { "data": { field: value } } }`
#[derive(Debug, Deserialize)]
struct KvV2Response {
    data: KvV2Data,
}

#[derive(Debug, Deserialize)]
struct KvV2Data {
    data: BTreeMap<String, serde_json::Value>,
}

/// `path#field` 形式の参照を分解
pub fn split_reference(value: &str) -> Result<(&str, &str)> {
    match value.split_once('#') {
        Some((path, field)) if !path.is_empty() && !field.is_empty() => Ok((path, field)),
        _ => Err(HiveError::Secret(format!(
            "無効なVault参照: {} (path#field 形式で指定してください)",
            value
        ))),
    }
}

/// Vault CLIが保存したトークンを `~/.vault-token` から読み込む
fn lookup_cli_token() -> Result<String> {
    let home = std::env::var("HOME")
        .ok()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| HiveError::Secret("HOME が設定されていません".to_string()))?;

    let token_path = std::path::Path::new(&home).join(".vault-token");
    let token = std::fs::read_to_string(&token_path).map_err(|e| {
        HiveError::Secret(format!(
            "Vaultトークンファイルの読み込みに失敗: {}\n理由: {}",
            token_path.display(),
            e
        ))
    })?;

    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(HiveError::Secret(format!(
            "Vaultトークンファイルが空です: {}",
            token_path.display()
        )));
    }

    Ok(token)
}

/// 環境変数またはCLIトークンファイルからVaultトークンを解決
fn lookup_token() -> Result<String> {
    if let Ok(token) = std::env::var("VAULT_TOKEN") {
        if !token.is_empty() {
            debug!("Using VAULT_TOKEN from environment");
            return Ok(token);
        }
    }

    lookup_cli_token()
}

/// KV v2 シークレットの単一フィールドを取得
pub async fn get_secret(addr: &str, token: &str, path: &str, field: &str) -> Result<String> {
    let url = format!("{}/v1/{}", addr.trim_end_matches('/'), path);
    debug!(url = %url, field = %field, "Fetching secret from Vault");

    let response = reqwest::Client::new()
        .get(&url)
        .header("X-Vault-Token", token)
        .send()
        .await
        .map_err(|e| HiveError::Secret(format!("VaultへのHTTPリクエストに失敗: {}", e)))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(HiveError::Secret(format!(
            "invalid HTTP status: {}",
            status.as_u16()
        )));
    }

    let body: KvV2Response = response
        .json()
        .await
        .map_err(|e| HiveError::Secret(format!("Vaultレスポンスのパースに失敗: {}", e)))?;

    match body.data.data.get(field) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(HiveError::Secret(format!(
            "no field '{}' in secret",
            field
        ))),
    }
}

/// デフォルト構成（VAULT_ADDR + トークン自動解決）でシークレットを取得
pub async fn get_secret_with_default_configuration(path: &str, field: &str) -> Result<String> {
    let addr = std::env::var("VAULT_ADDR")
        .ok()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| HiveError::Secret("VAULT_ADDR が設定されていません".to_string()))?;

    let token = lookup_token()?;
    get_secret(&addr, &token, path, field).await
}
