//! 依存関係スキャナとグラフ
//!
//! レンダリング済みDockerfileの `FROM __hive__/...` 参照と、
//! image.yml の明示的な `depends_on` をマージして依存グラフを構築し、
//! 決定的なトポロジカルソートでビルド順序を導出します。
//!
//! エッジ `from → to` は「from は to に依存する」を意味し、
//! `to` が `from` より先にビルドされる必要があります。

use crate::error::{HiveError, Result};
use crate::model::Project;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// hive参照のプレフィックス
pub const HIVE_PREFIX: &str = "__hive__/";

/// コンテナイメージの依存グラフ
///
/// 多重エッジは許容されます（トポロジカルソートは重複を正しく処理する）。
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<String, Vec<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// イメージ名をノードとして登録
    pub fn add_image(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    /// 「from は to に依存する」を記録
    pub fn add_dependency(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.entry(from.into()).or_default().push(to.into());
    }

    /// 指定イメージが依存するイメージの一覧
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 指定イメージに依存しているイメージの一覧（逆引き）
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let mut result = Vec::new();
        for (from, deps) in &self.edges {
            if deps.iter().any(|d| d == name) {
                result.push(from.as_str());
            }
        }
        result
    }

    /// グラフに依存エッジが1つでも存在するか
    pub fn has_dependencies(&self) -> bool {
        self.edges.values().any(|deps| !deps.is_empty())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// 依存が先に来るビルド順序を返す
    ///
    /// Kahnのアルゴリズムを使用。キューは挿入のたびにソートし直され、
    /// 同着のノードは名前の昇順で取り出されるため出力は完全に決定的です。
    /// 全ノードを解決できない場合は循環依存エラー。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        // 逆隣接リストと入次数（= 依存の数）を構築
        let mut dependents_of: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

        for node in &self.nodes {
            in_degree.insert(node, 0);
        }

        for (from, deps) in &self.edges {
            *in_degree.entry(from).or_insert(0) += deps.len();
            for to in deps {
                dependents_of.entry(to).or_default().push(from);
            }
        }

        // 入次数0のノードでキューを初期化（名前順）
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();
        queue.sort_unstable();

        let mut order = Vec::with_capacity(self.nodes.len());
        while !queue.is_empty() {
            // 名前が最小のノードを取り出す
            let node = queue.remove(0);
            order.push(node.to_string());

            if let Some(dependents) = dependents_of.get(node) {
                for dependent in dependents {
                    let degree = in_degree
                        .get_mut(dependent)
                        .expect("dependent is always a known node");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(dependent);
                        queue.sort_unstable();
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(HiveError::DependencyCycle {
                resolved: order.len(),
                total: self.nodes.len(),
            });
        }

        Ok(order)
    }
}

/// Dockerfileの1行から FROM 参照を抽出
///
/// 先頭の空白と大文字小文字は無視され、`--platform=` のようなフラグは
/// 読み飛ばされます。`AS <alias>` は参照に含まれません。
fn parse_from_reference(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.len() < 5 {
        return None;
    }

    let (keyword, rest) = trimmed.split_at(4);
    if !keyword.eq_ignore_ascii_case("FROM") || !rest.starts_with(char::is_whitespace) {
        return None;
    }

    rest.split_whitespace().find(|token| !token.starts_with("--"))
}

/// レンダリング済みDockerfileから hive参照の依存エッジを抽出
fn scan_dockerfile(image_name: &str, dockerfile: &Path, graph: &mut Graph) -> Result<()> {
    let content = std::fs::read_to_string(dockerfile).map_err(|e| HiveError::IoAt {
        path: dockerfile.to_path_buf(),
        message: e.to_string(),
    })?;

    for line in content.lines() {
        let Some(reference) = parse_from_reference(line) else {
            continue;
        };

        if let Some(hive_ref) = reference.strip_prefix(HIVE_PREFIX) {
            // タグがあれば最初の ':' で切り落とす
            let dep_name = hive_ref.split(':').next().unwrap_or(hive_ref);
            debug!(
                image = %image_name,
                depends_on = %dep_name,
                "Found hive reference in Dockerfile"
            );
            graph.add_dependency(image_name, dep_name);
        }
    }

    Ok(())
}

/// レンダリング済みのdistツリーをスキャンして依存グラフを構築
///
/// `<dist>/<image>/<tag>/Dockerfile` を行単位で解析し、
/// `__hive__/` で始まるベースイメージ参照をエッジとして記録します。
/// 依存のないイメージもノードとして登録されます。
pub fn scan_rendered_project(dist_path: &Path) -> Result<Graph> {
    let mut graph = Graph::new();

    let entries = std::fs::read_dir(dist_path).map_err(|e| HiveError::IoAt {
        path: dist_path.to_path_buf(),
        message: e.to_string(),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| HiveError::IoAt {
            path: dist_path.to_path_buf(),
            message: e.to_string(),
        })?;
        let image_dir = entry.path();
        if !image_dir.is_dir() {
            continue;
        }

        let image_name = entry.file_name().to_string_lossy().to_string();
        graph.add_image(image_name.clone());

        let tag_entries = std::fs::read_dir(&image_dir).map_err(|e| HiveError::IoAt {
            path: image_dir.clone(),
            message: e.to_string(),
        })?;
        for tag_entry in tag_entries {
            let tag_entry = tag_entry.map_err(|e| HiveError::IoAt {
                path: image_dir.clone(),
                message: e.to_string(),
            })?;
            let dockerfile = tag_entry.path().join("Dockerfile");
            if dockerfile.is_file() {
                scan_dockerfile(&image_name, &dockerfile, &mut graph)?;
            }
        }
    }

    info!(
        node_count = graph.nodes.len(),
        "Scanned rendered project for dependencies"
    );
    Ok(graph)
}

/// スキャン結果と明示的な depends_on をマージ
///
/// `depends_on` が未知のイメージ名を指している場合はエラー。
pub fn build_dependency_graph(scanned: &Graph, project: &Project) -> Result<Graph> {
    let mut graph = Graph::new();

    for node in &scanned.nodes {
        graph.add_image(node.clone());
    }
    for (from, deps) in &scanned.edges {
        for to in deps {
            graph.add_dependency(from.clone(), to.clone());
        }
    }

    for (name, images) in &project.images_by_name {
        graph.add_image(name.clone());
        for image in images {
            for dep in &image.depends_on {
                if !project.images_by_name.contains_key(dep) {
                    return Err(HiveError::UnknownDependency {
                        image: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                graph.add_dependency(name.clone(), dep.clone());
            }
        }
    }

    Ok(graph)
}
