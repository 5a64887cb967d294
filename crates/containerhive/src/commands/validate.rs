//! validateコマンド
//!
//! 発見 → レンダリング → 依存解決までを実行し、ビルド順序を表示します。
//! ビルド自体は行わないため、BuildKitデーモンなしで実行できます。

use colored::Colorize;
use containerhive_core::{
    build_dependency_graph, discover_project, render_project, scan_rendered_project,
};
use std::path::Path;

pub async fn handle_validate_command(project_path: &Path) -> anyhow::Result<()> {
    println!("{}", "プロジェクトを検証中...".green());
    let project = discover_project(project_path)?;
    println!(
        "  {} {} 件のイメージを発見しました",
        "✓".green(),
        project.images_by_identifier.len()
    );

    // 依存スキャンにはレンダリング済みツリーが必要なので一時distを使う
    let temp_dist = tempfile::tempdir()?;
    render_project(&project, temp_dist.path()).await?;
    println!("  {} レンダリング成功", "✓".green());

    let scanned = scan_rendered_project(temp_dist.path())?;
    let graph = build_dependency_graph(&scanned, &project)?;
    let build_order = graph.topological_sort()?;
    println!("  {} 依存グラフは循環なし", "✓".green());

    println!();
    println!("{}", "ビルド順序:".bold());
    for (index, name) in build_order.iter().enumerate() {
        let deps = graph.dependencies(name);
        if deps.is_empty() {
            println!("  {}. {}", index + 1, name.cyan());
        } else {
            println!("  {}. {} (依存: {})", index + 1, name.cyan(), deps.join(", "));
        }
    }

    Ok(())
}
