//! renderコマンド
//!
//! プロジェクトを発見してビルドコンテキストをdistへレンダリングします。

use colored::Colorize;
use containerhive_core::{discover_project, render_project};
use std::path::Path;

pub async fn handle_render_command(project_path: &Path, dist_path: &Path) -> anyhow::Result<()> {
    println!("{}", "プロジェクトを発見中...".green());
    let project = discover_project(project_path)?;

    println!(
        "  {} {} 件のイメージを発見しました",
        "✓".green(),
        project.images_by_identifier.len()
    );
    for images in project.images_by_name.values() {
        for image in images {
            println!(
                "  • {} ({} タグ, {} バリアント)",
                image.identifier.cyan(),
                image.tags.len(),
                image.variants.len()
            );
        }
    }

    println!();
    println!("{}", "レンダリング中...".green());
    render_project(&project, dist_path).await?;
    println!(
        "{} {} へレンダリングしました",
        "✓".green(),
        dist_path.display().to_string().cyan()
    );

    Ok(())
}
