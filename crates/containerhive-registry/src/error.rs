use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("レジストリの起動に失敗しました: {0}")]
    StartFailed(String),

    #[error("レジストリの準備完了を待機中にタイムアウトしました (30秒)")]
    ReadyTimeout,

    #[error("無効なOCIレイアウト: {0}")]
    InvalidLayout(String),

    #[error("イメージのプッシュに失敗しました: {0}")]
    Push(String),

    #[error("tar entry escapes destination: {0}")]
    TarEntryEscapes(String),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoAt { path: PathBuf, message: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP エラー: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
