//! レンダリングエンジン
//!
//! プロジェクトモデルから `<dist>/<image>/<tag[-variant]>/` ツリーを
//! 並列に実体化します。distツリーは実行のたびに削除・再作成されます。
//!
//! ## 並行性
//!
//! タグディレクトリとバリアントディレクトリは出力パスを共有しないため、
//! すべて独立したタスクとして並列実行されます。唯一の順序保証は
//! 単一バリアントタスク内の「イメージrootfsコピー → バリアントrootfs
//! コピー」で、これによりバリアントのファイルが上書きで勝ちます。
//! 最初のエラーでレンダリング全体が中断され、残りのタスクは
//! キャンセルされます。

use crate::error::{HiveError, Result};
use crate::file_resolver::remove_template_ext;
use crate::model::{Image, ImageVariant, Project, Tag};
use crate::resolver::{self, ResolvedBuildValues};
use crate::template::{TemplateContext, copy_or_render};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

const TESTS_DIR_NAME: &str = "tests";

fn mkdir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| HiveError::IoAt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// ファイルを1つコピー（fs::copyがファイルモードを保持する）
fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    std::fs::copy(src, dst).map_err(|e| HiveError::IoAt {
        path: src.to_path_buf(),
        message: format!("{} へのコピーに失敗: {}", dst.display(), e),
    })?;
    Ok(())
}

/// ディレクトリを再帰的にコピー（パーミッション保持）
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    mkdir(dst)?;
    if let Ok(meta) = std::fs::metadata(src) {
        let _ = std::fs::set_permissions(dst, meta.permissions());
    }

    let entries = std::fs::read_dir(src).map_err(|e| HiveError::IoAt {
        path: src.to_path_buf(),
        message: e.to_string(),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| HiveError::IoAt {
            path: src.to_path_buf(),
            message: e.to_string(),
        })?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            copy_file(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

/// rootfs オーバーレイをターゲットの rootfs/ 配下へコピー
///
/// 既存ファイルは上書きされます（後からのコピーが勝つ）。
fn copy_rootfs(source: &Path, target_root: &Path) -> Result<()> {
    mkdir(target_root)?;
    copy_dir(source, &target_root.join("rootfs"))
}

/// tests/ ディレクトリを作成してパスを返す
fn create_tests_dir(root: &Path) -> Result<PathBuf> {
    let tests_root = root.join(TESTS_DIR_NAME);
    mkdir(&tests_root)?;
    Ok(tests_root)
}

/// エントリポイントの出力パス（テンプレート拡張子を除去した名前）
fn entrypoint_target(root: &Path, entrypoint: &Path) -> PathBuf {
    let file_name = entrypoint
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    root.join(remove_template_ext(file_name))
}

fn template_context(image: &Image, resolved: &ResolvedBuildValues) -> TemplateContext {
    TemplateContext::new(
        image.name.clone(),
        resolved.versions.clone(),
        resolved.build_args.clone(),
    )
}

/// 単一タグのビルドコンテキストを実体化
pub async fn setup_image_tag_dir(tag_path: &Path, image: &Image, tag: &Tag) -> Result<()> {
    mkdir(tag_path)?;

    let resolved = resolver::for_tag(image, tag).await?;
    let ctx = template_context(image, &resolved);

    if let Some(entrypoint) = &image.build_entrypoint_path {
        copy_or_render(&ctx, entrypoint, &entrypoint_target(tag_path, entrypoint))?;
    }

    if let Some(rootfs) = &image.rootfs_dir {
        copy_rootfs(rootfs, tag_path)?;
    }

    if let Some(test_config) = &image.test_config_path {
        let tests_root = create_tests_dir(tag_path)?;
        copy_or_render(&ctx, test_config, &tests_root.join("image.yml"))?;
    }

    debug!(path = %tag_path.display(), "Materialized tag directory");
    Ok(())
}

/// 単一バリアントのビルドコンテキストを実体化
///
/// イメージrootfsを先に、バリアントrootfsを後にコピーすることで
/// バリアントのファイルが同一相対パスのファイルを上書きします。
pub async fn setup_variant_dir(
    variant_path: &Path,
    image: &Image,
    tag: &Tag,
    variant: &ImageVariant,
) -> Result<()> {
    let resolved = resolver::for_tag_variant(image, variant, tag).await?;
    let ctx = template_context(image, &resolved);

    mkdir(variant_path)?;

    if let Some(entrypoint) = &variant.build_entrypoint_path {
        copy_or_render(&ctx, entrypoint, &entrypoint_target(variant_path, entrypoint))?;
    }

    if let Some(rootfs) = &image.rootfs_dir {
        copy_rootfs(rootfs, variant_path)?;
    }

    if let Some(rootfs) = &variant.rootfs_dir {
        copy_rootfs(rootfs, variant_path)?;
    }

    if image.test_config_path.is_some() || variant.test_config_path.is_some() {
        let tests_root = create_tests_dir(variant_path)?;

        if let Some(test_config) = &image.test_config_path {
            copy_or_render(&ctx, test_config, &tests_root.join("image.yml"))?;
        }

        if let Some(test_config) = &variant.test_config_path {
            copy_or_render(&ctx, test_config, &tests_root.join("variant.yml"))?;
        }
    }

    debug!(path = %variant_path.display(), "Materialized variant directory");
    Ok(())
}

/// プロジェクト全体を dist ツリーへレンダリング
pub async fn render_project(project: &Project, dist_path: &Path) -> Result<()> {
    // 前回の出力を削除（存在しない場合は無視）
    match tokio::fs::remove_dir_all(dist_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(HiveError::IoAt {
                path: dist_path.to_path_buf(),
                message: format!("distディレクトリの削除に失敗: {}", e),
            });
        }
    }
    mkdir(dist_path)?;

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for (name, images) in &project.images_by_name {
        let name_root = dist_path.join(name);
        mkdir(&name_root)?;

        for image in images {
            for (tag_name, tag) in &image.tags {
                let tag_path = name_root.join(tag_name);
                let task_image: Arc<Image> = image.clone();
                let task_tag = tag.clone();
                tasks.spawn(async move {
                    setup_image_tag_dir(&tag_path, &task_image, &task_tag).await
                });

                for variant in image.variants.values() {
                    let variant_path = name_root.join(format!("{}{}", tag_name, variant.tag_suffix));
                    let task_image: Arc<Image> = image.clone();
                    let task_tag = tag.clone();
                    let task_variant = variant.clone();
                    tasks.spawn(async move {
                        setup_variant_dir(&variant_path, &task_image, &task_tag, &task_variant)
                            .await
                    });
                }
            }
        }
    }

    // 最初のエラーで中断。JoinSetのドロップにより残りはキャンセルされる
    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| HiveError::TaskFailure(e.to_string()))??;
    }

    info!(dist = %dist_path.display(), "Rendered project");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::discover_project;
    use std::collections::BTreeMap;
    use std::fs;

    async fn render_project_checked(project_root: &Path, dist: &Path) {
        let project = discover_project(project_root).unwrap();
        render_project(&project, dist).await.unwrap();
    }

    fn assert_file_contains(path: &Path, substring: &str) {
        let content = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
        assert!(
            content.contains(substring),
            "{} does not contain {:?}, got:\n{}",
            path.display(),
            substring,
            content
        );
    }

    fn assert_file_content(path: &Path, expected: &str) {
        let content = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
        assert_eq!(content, expected, "content mismatch for {}", path.display());
    }

    fn create_minimal_project(base: &Path) {
        fs::write(base.join("hive.yml"), "").unwrap();
        let nginx = base.join("images/nginx");
        fs::create_dir_all(&nginx).unwrap();
        fs::write(nginx.join("image.yml"), "tags:\n  - name: \"1.27\"\n").unwrap();
        fs::write(nginx.join("Dockerfile"), "FROM nginx:alpine\n").unwrap();
    }

    fn create_template_project(base: &Path) {
        fs::write(base.join("hive.yml"), "").unwrap();
        let app = base.join("images/app");
        fs::create_dir_all(app.join("rootfs/etc")).unwrap();
        fs::write(
            app.join("image.yml"),
            "tags:\n  - name: latest\n    versions:\n      go: 1.22.5\n",
        )
        .unwrap();
        fs::write(
            app.join("Dockerfile.gotpl"),
            "FROM golang:{{.Versions.go}}\n",
        )
        .unwrap();
        fs::write(
            app.join("test.yml.gotpl"),
            "expected: go{{.Versions.go}}\nimage: \"{{.ImageName}}\"\n",
        )
        .unwrap();
        fs::write(app.join("rootfs/etc/app.conf"), "env=production\n").unwrap();
    }

    /// S2シナリオ: バリアントrootfsがイメージrootfsをオーバーレイする
    fn create_multi_variant_project(base: &Path) {
        fs::write(base.join("hive.yml"), "").unwrap();
        let image = base.join("images/base");
        fs::create_dir_all(image.join("rootfs/etc")).unwrap();
        fs::create_dir_all(image.join("full/rootfs/etc")).unwrap();
        fs::write(
            image.join("image.yml"),
            r#"
tags:
  - name: 3.3.0
variants:
  - name: full
    tag_suffix: -full
"#,
        )
        .unwrap();
        fs::write(image.join("Dockerfile"), "FROM ruby:alpine\n").unwrap();
        fs::write(image.join("rootfs/etc/base.conf"), "source=base").unwrap();
        fs::write(image.join("full/Dockerfile"), "FROM ruby:latest\n").unwrap();
        fs::write(
            image.join("full/rootfs/etc/base.conf"),
            "source=full-override",
        )
        .unwrap();
        fs::write(image.join("full/rootfs/etc/full.conf"), "variant=full").unwrap();
    }

    fn create_dependency_project(base: &Path) {
        fs::write(base.join("hive.yml"), "").unwrap();
        let ubuntu = base.join("images/ubuntu");
        fs::create_dir_all(&ubuntu).unwrap();
        fs::write(ubuntu.join("image.yml"), "tags:\n  - name: \"22.04\"\n").unwrap();
        fs::write(ubuntu.join("Dockerfile"), "FROM ubuntu:22.04\n").unwrap();

        let python = base.join("images/python");
        fs::create_dir_all(&python).unwrap();
        fs::write(python.join("image.yml"), "tags:\n  - name: \"3.13\"\n").unwrap();
        fs::write(
            python.join("Dockerfile"),
            "FROM __hive__/ubuntu:22.04\nRUN apt-get install python3\n",
        )
        .unwrap();
    }

    /// distツリーを相対パス→バイト列のマップへ読み込む
    fn snapshot_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut snapshot = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
                    snapshot.insert(rel, fs::read(&path).unwrap());
                }
            }
        }
        snapshot
    }

    #[tokio::test]
    async fn test_render_minimal_project() {
        let project_root = tempfile::tempdir().unwrap();
        create_minimal_project(project_root.path());
        let dist = tempfile::tempdir().unwrap();
        render_project_checked(project_root.path(), dist.path()).await;

        let tag_dir = dist.path().join("nginx/1.27");
        assert!(tag_dir.is_dir());
        assert_file_contains(&tag_dir.join("Dockerfile"), "FROM nginx:alpine");
        // テスト設定もrootfsもないので作られない
        assert!(!tag_dir.join("tests").exists());
        assert!(!tag_dir.join("rootfs").exists());
    }

    #[tokio::test]
    async fn test_render_template_project() {
        let project_root = tempfile::tempdir().unwrap();
        create_template_project(project_root.path());
        let dist = tempfile::tempdir().unwrap();
        render_project_checked(project_root.path(), dist.path()).await;

        let tag_dir = dist.path().join("app/latest");

        // エントリポイントはテンプレート拡張子を除去した名前で出力される
        assert!(!tag_dir.join("Dockerfile.gotpl").exists());
        assert_file_contains(&tag_dir.join("Dockerfile"), "FROM golang:1.22.5");

        // テスト設定はバージョンとイメージ名で展開される
        let test_file = tag_dir.join("tests/image.yml");
        assert_file_contains(&test_file, "go1.22.5");
        assert_file_contains(&test_file, "\"app\"");

        // rootfsがコピーされる
        assert_file_contains(&tag_dir.join("rootfs/etc/app.conf"), "env=production");
    }

    #[tokio::test]
    async fn test_variant_rootfs_overlays_image_rootfs() {
        let project_root = tempfile::tempdir().unwrap();
        create_multi_variant_project(project_root.path());
        let dist = tempfile::tempdir().unwrap();
        render_project_checked(project_root.path(), dist.path()).await;

        // タグディレクトリはイメージrootfsのみ
        assert_file_content(
            &dist.path().join("base/3.3.0/rootfs/etc/base.conf"),
            "source=base",
        );

        // バリアントディレクトリではバリアントのファイルが勝つ
        let variant_dir = dist.path().join("base/3.3.0-full");
        assert_file_content(
            &variant_dir.join("rootfs/etc/base.conf"),
            "source=full-override",
        );
        assert_file_content(&variant_dir.join("rootfs/etc/full.conf"), "variant=full");
        assert_file_contains(&variant_dir.join("Dockerfile"), "FROM ruby:latest");
    }

    #[tokio::test]
    async fn test_variant_test_configs() {
        let project_root = tempfile::tempdir().unwrap();
        fs::write(project_root.path().join("hive.yml"), "").unwrap();
        let image = project_root.path().join("images/dotnet/8");
        fs::create_dir_all(image.join("node")).unwrap();
        fs::write(
            image.join("image.yml"),
            r#"
tags:
  - name: 8.0.100
variants:
  - name: node
    tag_suffix: -node
    versions:
      nodejs: "24"
"#,
        )
        .unwrap();
        fs::write(image.join("Dockerfile"), "FROM mcr\n").unwrap();
        fs::write(
            image.join("node/test.yml.gotpl"),
            "nodeVersion: {{.Versions.nodejs}}\n",
        )
        .unwrap();

        let dist = tempfile::tempdir().unwrap();
        render_project_checked(project_root.path(), dist.path()).await;

        let tests_dir = dist.path().join("dotnet/8.0.100-node/tests");
        // イメージレベルのテスト設定はないので image.yml は作られない
        assert!(!tests_dir.join("image.yml").exists());
        // バリアントのテスト設定はバージョンで展開される
        assert_file_contains(&tests_dir.join("variant.yml"), "nodeVersion: 24");

        // タグディレクトリにはtestsフォルダ自体がない
        assert!(!dist.path().join("dotnet/8.0.100/tests").exists());
    }

    #[tokio::test]
    async fn test_render_preserves_hive_prefix() {
        let project_root = tempfile::tempdir().unwrap();
        create_dependency_project(project_root.path());
        let dist = tempfile::tempdir().unwrap();
        render_project_checked(project_root.path(), dist.path()).await;

        assert_file_contains(
            &dist.path().join("python/3.13/Dockerfile"),
            "FROM __hive__/ubuntu:22.04",
        );
        assert_file_contains(
            &dist.path().join("ubuntu/22.04/Dockerfile"),
            "FROM ubuntu:22.04",
        );
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let project_root = tempfile::tempdir().unwrap();
        create_multi_variant_project(project_root.path());

        let dist_a = tempfile::tempdir().unwrap();
        let dist_b = tempfile::tempdir().unwrap();
        render_project_checked(project_root.path(), dist_a.path()).await;
        render_project_checked(project_root.path(), dist_b.path()).await;

        // バイト単位で一致すること
        assert_eq!(snapshot_tree(dist_a.path()), snapshot_tree(dist_b.path()));
    }

    #[tokio::test]
    async fn test_render_recreates_dist() {
        let project_root = tempfile::tempdir().unwrap();
        create_minimal_project(project_root.path());

        let dist = tempfile::tempdir().unwrap();
        let stale = dist.path().join("stale-leftover");
        fs::write(&stale, "from previous run").unwrap();

        render_project_checked(project_root.path(), dist.path()).await;
        assert!(!stale.exists(), "前回の実行の残骸は削除されるべき");
    }

    #[tokio::test]
    async fn test_render_error_on_bad_template() {
        let project_root = tempfile::tempdir().unwrap();
        fs::write(project_root.path().join("hive.yml"), "").unwrap();
        let app = project_root.path().join("images/app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("image.yml"), "tags:\n  - name: latest\n").unwrap();
        fs::write(app.join("Dockerfile.gotpl"), "FROM {{.Unknown}}\n").unwrap();

        let project = discover_project(project_root.path()).unwrap();
        let dist = tempfile::tempdir().unwrap();
        let err = render_project(&project, dist.path()).await.unwrap_err();
        assert!(matches!(err, HiveError::Render { .. }), "got: {:?}", err);
    }
}
