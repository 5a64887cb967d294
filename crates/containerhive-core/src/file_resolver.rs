//! ファイル候補リゾルバ
//!
//! ベース名とオプションの拡張子リストから、規約上許容される
//! ファイル名候補（テンプレートサフィックス付きを含む）を生成し、
//! ディスク上で最初に存在するものを解決します。

use crate::error::{HiveError, Result};
use std::path::{Path, PathBuf};

/// Goテンプレート形式のテンプレート拡張子
pub const TEMPLATE_EXT_GOTPL: &str = "gotpl";

/// 登録済みテンプレート拡張子（現在は gotpl のみ）
pub(crate) const SUPPORTED_TEMPLATE_EXTENSIONS: &[&str] = &[TEMPLATE_EXT_GOTPL];

/// ファイル名候補を生成
///
/// 拡張子リストが空の場合: `[base, base.<tmpl>]`
/// 拡張子リストがある場合: 各拡張子×各テンプレート拡張子の直積
/// `base.<ext>.<tmpl>`（プレーンな `base.<ext>` は含まない）
pub fn file_candidates(base_name: &str, extensions: &[&str]) -> Vec<String> {
    if extensions.is_empty() {
        let mut names = Vec::with_capacity(SUPPORTED_TEMPLATE_EXTENSIONS.len() + 1);
        names.push(base_name.to_string());
        for tmpl_ext in SUPPORTED_TEMPLATE_EXTENSIONS {
            names.push(format!("{}.{}", base_name, tmpl_ext));
        }
        names
    } else {
        let mut names = Vec::with_capacity(extensions.len() * SUPPORTED_TEMPLATE_EXTENSIONS.len());
        for ext in extensions {
            for tmpl_ext in SUPPORTED_TEMPLATE_EXTENSIONS {
                names.push(format!("{}.{}.{}", base_name, ext, tmpl_ext));
            }
        }
        names
    }
}

/// 候補リストのうちディスク上に存在する最初のファイルを解決
///
/// ディレクトリはスキップします。どの候補も存在しない場合は
/// `HiveError::NoFileCandidates` を返します（任意ファイルでは回復可能）。
pub fn resolve_first_existing(root: &Path, candidates: &[String]) -> Result<PathBuf> {
    for candidate in candidates {
        let candidate_path = root.join(candidate);
        if candidate_path.is_file() {
            return Ok(candidate_path);
        }
    }
    Err(HiveError::NoFileCandidates)
}

/// ファイル名からテンプレート拡張子を除去
///
/// 最後のドット区切りサフィックスが登録済みテンプレート拡張子の場合のみ
/// 除去します。それ以外はそのまま返します。
pub fn remove_template_ext(filename: &str) -> &str {
    let Some(dot_pos) = filename.rfind('.') else {
        return filename;
    };

    let ext = &filename[dot_pos + 1..];
    if SUPPORTED_TEMPLATE_EXTENSIONS.contains(&ext) {
        &filename[..dot_pos]
    } else {
        filename
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_file_candidates_without_extensions() {
        let got = file_candidates("Dockerfile", &[]);
        assert_eq!(got, vec!["Dockerfile", "Dockerfile.gotpl"]);
    }

    #[test]
    fn test_file_candidates_with_yaml_and_yml() {
        let got = file_candidates("test", &["yaml", "yml"]);
        assert_eq!(got, vec!["test.yaml.gotpl", "test.yml.gotpl"]);
    }

    #[test]
    fn test_file_candidates_with_single_extension() {
        let got = file_candidates("config", &["yaml"]);
        assert_eq!(got, vec!["config.yaml.gotpl"]);
    }

    #[test]
    fn test_resolve_first_existing_prefers_first_candidate() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("Dockerfile"), "FROM alpine").unwrap();

        let candidates = file_candidates("Dockerfile", &[]);
        let got = resolve_first_existing(root.path(), &candidates).unwrap();
        assert_eq!(got, root.path().join("Dockerfile"));
    }

    #[test]
    fn test_resolve_first_existing_falls_back_to_template() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("Dockerfile.gotpl"), "FROM {{ .ImageName }}").unwrap();

        let candidates = file_candidates("Dockerfile", &[]);
        let got = resolve_first_existing(root.path(), &candidates).unwrap();
        assert_eq!(got, root.path().join("Dockerfile.gotpl"));
    }

    #[test]
    fn test_resolve_first_existing_skips_directories() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("Dockerfile")).unwrap();
        fs::write(root.path().join("Dockerfile.gotpl"), "FROM alpine").unwrap();

        let candidates = file_candidates("Dockerfile", &[]);
        let got = resolve_first_existing(root.path(), &candidates).unwrap();
        assert_eq!(got, root.path().join("Dockerfile.gotpl"));
    }

    #[test]
    fn test_resolve_first_existing_returns_sentinel_when_nothing_exists() {
        let root = tempfile::tempdir().unwrap();

        let candidates = file_candidates("Dockerfile", &[]);
        let err = resolve_first_existing(root.path(), &candidates).unwrap_err();
        assert!(matches!(err, HiveError::NoFileCandidates));
    }

    #[test]
    fn test_resolve_first_existing_with_empty_candidates() {
        let root = tempfile::tempdir().unwrap();

        let err = resolve_first_existing(root.path(), &[]).unwrap_err();
        assert!(matches!(err, HiveError::NoFileCandidates));
    }

    #[test]
    fn test_remove_template_ext() {
        // (入力, 期待値)
        let cases = [
            ("Dockerfile.gotpl", "Dockerfile"),
            ("config.yaml.gotpl", "config.yaml"),
            ("Dockerfile", "Dockerfile"),
            ("config.txt", "config.txt"),
            ("config.gotpl.txt", "config.gotpl.txt"),
            ("", ""),
            (".gotpl", ""),
            (".dockerignore", ".dockerignore"),
            (".dockerignore.gotpl", ".dockerignore"),
        ];

        for (input, expected) in cases {
            assert_eq!(remove_template_ext(input), expected, "input: {:?}", input);
        }
    }

    #[test]
    fn test_remove_template_ext_is_idempotent() {
        for name in ["Dockerfile.gotpl", "test.yml.gotpl", "plain"] {
            let once = remove_template_ext(name);
            assert_eq!(remove_template_ext(once), once);
        }
    }

    #[test]
    fn test_remove_template_ext_is_left_inverse_of_candidates() {
        // strip(candidate(base)) == base が成り立つこと
        for candidate in file_candidates("Dockerfile", &[]) {
            let stripped = remove_template_ext(&candidate);
            assert!(stripped == "Dockerfile" || stripped == candidate.as_str());
        }
        let templated = format!("{}.{}", "Dockerfile", TEMPLATE_EXT_GOTPL);
        assert_eq!(remove_template_ext(&templated), "Dockerfile");
    }
}
