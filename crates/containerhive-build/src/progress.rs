//! ビルド進捗の表示
//!
//! buildctl の `--progress plain` ストリームを解析し、頂点（ビルドステップ）
//! の開始・完了を追跡してスピナー1行に集約します。plain進捗の各行は
//! `#<id> <内容>` 形式で、内容はステップ見出し（`[2/3] RUN ...`）、
//! 経過ログ、`DONE` / `CACHED` / `ERROR` のいずれかです。

use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// 1行に収める表示メッセージの最大長
const MAX_MESSAGE_CHARS: usize = 120;

#[derive(Default)]
struct ProgressState {
    /// 頂点ID → ステップ見出し
    vertex_names: BTreeMap<u32, String>,
    started: BTreeSet<u32>,
    finished: BTreeSet<u32>,
}

pub struct BuildProgress {
    progress_bar: ProgressBar,
    state: Mutex<ProgressState>,
}

impl BuildProgress {
    pub fn new(image_tag: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("progress template is valid"),
        );
        pb.set_message(format!("Building {}...", image_tag));

        Self {
            progress_bar: pb,
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// plain進捗の1行を取り込んで表示を更新
    pub fn status(&self, line: &str) {
        let Some((vertex_id, rest)) = parse_vertex_line(line) else {
            // 頂点に紐付かない行（警告など）はそのまま流す
            if !line.trim().is_empty() {
                self.progress_bar.set_message(truncate(line.trim()));
            }
            return;
        };

        let mut state = self.state.lock().expect("progress state lock");

        if rest.starts_with("DONE") || rest.starts_with("ERROR") {
            state.finished.insert(vertex_id);
        } else if rest == "CACHED" {
            // キャッシュヒットは開始行なしで完了する
            state.started.insert(vertex_id);
            state.finished.insert(vertex_id);
        } else if rest.starts_with('[') {
            // ステップ見出し: `[2/3] RUN apk add curl`
            state.started.insert(vertex_id);
            state.vertex_names.insert(vertex_id, rest.to_string());
        }

        let detail = if rest.starts_with('[') {
            rest.to_string()
        } else {
            match state.vertex_names.get(&vertex_id) {
                Some(name) => format!("{} | {}", name, rest),
                None => rest.to_string(),
            }
        };

        let message = format!(
            "({}/{}) {}",
            state.finished.len(),
            state.started.len().max(state.finished.len()),
            detail
        );
        self.progress_bar.set_message(truncate(&message));
    }

    pub fn finish_success(&self) {
        let state = self.state.lock().expect("progress state lock");
        self.progress_bar.finish_with_message(format!(
            "Build completed ✓ ({} steps)",
            state.finished.len()
        ));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(truncate(&format!("Build failed: {}", error)));
    }
}

/// `#<id> <内容>` 形式の行を分解
fn parse_vertex_line(line: &str) -> Option<(u32, &str)> {
    let rest = line.strip_prefix('#')?;
    let (id_token, content) = rest.split_once(' ')?;
    let vertex_id = id_token.parse().ok()?;
    Some((vertex_id, content.trim_end()))
}

fn truncate(message: &str) -> String {
    if message.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = message.chars().take(MAX_MESSAGE_CHARS - 3).collect();
        format!("{}...", truncated)
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vertex_line() {
        assert_eq!(
            parse_vertex_line("#5 [2/3] RUN apk add curl"),
            Some((5, "[2/3] RUN apk add curl"))
        );
        assert_eq!(parse_vertex_line("#1 DONE 0.2s"), Some((1, "DONE 0.2s")));
        assert_eq!(parse_vertex_line("#4 CACHED"), Some((4, "CACHED")));
        // 頂点行でないもの
        assert_eq!(parse_vertex_line("WARN: no output specified"), None);
        assert_eq!(parse_vertex_line("#abc DONE"), None);
        assert_eq!(parse_vertex_line(""), None);
    }

    #[test]
    fn test_step_counting() {
        let progress = BuildProgress::new("python:3.13.7");
        progress.status("#1 [internal] load build definition from Dockerfile.patched");
        progress.status("#1 transferring dockerfile: 123B done");
        progress.status("#1 DONE 0.0s");
        progress.status("#2 [1/2] FROM docker.io/library/alpine:3.19");
        progress.status("#2 CACHED");
        progress.status("#3 [2/2] RUN apk add curl");

        let state = progress.state.lock().unwrap();
        assert_eq!(state.started.len(), 3);
        assert_eq!(state.finished.len(), 2);
        assert_eq!(
            state.vertex_names.get(&3).unwrap(),
            "[2/2] RUN apk add curl"
        );
    }

    #[test]
    fn test_error_line_counts_as_finished() {
        let progress = BuildProgress::new("app:latest");
        progress.status("#7 [3/4] RUN make install");
        progress.status("#7 ERROR process \"make install\" did not complete successfully");

        let state = progress.state.lock().unwrap();
        assert!(state.finished.contains(&7));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let long = "あ".repeat(300);
        let truncated = truncate(&long);
        assert!(truncated.chars().count() <= MAX_MESSAGE_CHARS);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate("short"), "short");
    }
}
