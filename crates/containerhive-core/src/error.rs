use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("ContainerHive設定ファイルが見つかりません: {0}\nヒント: hive.yml または container-hive.yml をプロジェクトルートに配置してください")]
    ConfigNotFound(PathBuf),

    #[error("設定ファイルのパースエラー: {path}\n理由: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("プロジェクト発見エラー: {path}\n理由: {message}")]
    Discovery { path: PathBuf, message: String },

    #[error("ファイル候補が見つかりません")]
    NoFileCandidates,

    #[error("テンプレート展開エラー: {file}\n理由: {message}")]
    Render { file: PathBuf, message: String },

    #[error("シークレット解決エラー: {0}")]
    Secret(String),

    #[error("シークレット '{key}' の解決に失敗しました: {message}")]
    SecretResolution { key: String, message: String },

    #[error("循環依存が検出されました ({resolved}/{total} 件のイメージを解決済み)")]
    DependencyCycle { resolved: usize, total: usize },

    #[error(
        "イメージ '{image}' は depends_on で '{dependency}' を宣言していますが、その名前のイメージはプロジェクトに存在しません"
    )]
    UnknownDependency { image: String, dependency: String },

    #[error("並列タスクの実行エラー: {0}")]
    TaskFailure(String),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoAt { path: PathBuf, message: String },

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HiveError>;
