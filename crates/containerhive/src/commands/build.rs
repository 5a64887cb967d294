//! buildコマンド
//!
//! パイプライン全体を駆動します:
//! 発見 → レンダリング → 依存解決 → 依存順でのBuildKitビルド。
//!
//! 依存エッジが存在する場合のみ一時レジストリを起動し、ビルド済みの
//! 中間イメージをプッシュして `__hive__/` 参照を解決可能にします。
//! タグ単位のビルド失敗はログに残してスキップされ、無関係なイメージの
//! ビルドは継続します（ビルド前のエラーはすべて致命的）。

use colored::Colorize;
use containerhive_build::{
    BuildError, BuildOpts, BuildProgress, BuildkitCache, BuildkitClient, DockerClient,
    SbomImageTool, StructureTestRunner, collect_test_definitions, host_platform,
    rewrite_hive_refs, sbom_path,
};
use containerhive_core::discovery::CacheSettings;
use containerhive_core::{
    Image, ResolvedBuildValues, build_dependency_graph, discover_project, load_hive_config,
    render_project, resolver, scan_rendered_project,
};
use containerhive_core::dependency::Graph;
use containerhive_registry::ZotRegistry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// BuildKitデーモンのデフォルトアドレス
const DEFAULT_BUILDKIT_ADDR: &str = "tcp://127.0.0.1:8502";

pub struct BuildCommandOptions {
    pub project_path: PathBuf,
    pub dist_path: PathBuf,
    pub reports_path: PathBuf,
    pub buildkit_addr: Option<String>,
    pub platform: Option<String>,
    pub skip_sbom: bool,
    pub skip_tests: bool,
}

/// ビルドループ全体で共有されるツール群
struct BuildTools {
    buildkit: BuildkitClient,
    sbom: Option<SbomImageTool>,
    docker: Option<DockerClient>,
    cache: Option<BuildkitCache>,
    platform: String,
    reports_path: PathBuf,
}

/// 1つのタグ（またはバリアント）ディレクトリのビルド指定
struct TagBuildSpec {
    /// イメージの論理名（dist直下のディレクトリ名）
    image_name: String,
    /// `<tag>` または `<tag><tag_suffix>`
    dir_name: String,
    /// `<image>:<dir_name>` 形式のイメージ参照
    image_ref: String,
    build_args: BTreeMap<String, String>,
    secrets: BTreeMap<String, Vec<u8>>,
}

/// hive.yml のキャッシュ設定をBuildkitCacheへ変換
fn cache_from_settings(settings: Option<&CacheSettings>) -> Option<BuildkitCache> {
    let settings = settings?;

    if let Some(s3) = &settings.s3 {
        return Some(BuildkitCache::S3 {
            endpoint_url: s3.endpoint_url.clone(),
            bucket: s3.bucket.clone(),
            region: s3.region.clone(),
            access_key_id: s3
                .access_key_id
                .clone()
                .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
                .unwrap_or_default(),
            secret_access_key: s3
                .secret_access_key
                .clone()
                .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
                .unwrap_or_default(),
            use_path_style: s3.use_path_style,
            cache_key: s3
                .cache_key
                .clone()
                .unwrap_or_else(|| "containerhive".to_string()),
        });
    }

    if let Some(registry) = &settings.registry {
        return Some(BuildkitCache::Registry {
            cache_ref: registry.r#ref.clone(),
            insecure: registry.insecure,
        });
    }

    None
}

/// 単一のタグディレクトリをビルドしてOCI tarのパスを返す
async fn build_tag_context(
    tools: &BuildTools,
    registry: Option<&ZotRegistry>,
    dist_path: &Path,
    spec: &TagBuildSpec,
) -> anyhow::Result<PathBuf> {
    let context_dir = dist_path.join(&spec.image_name).join(&spec.dir_name);
    let dockerfile_path = context_dir.join("Dockerfile");
    if !dockerfile_path.is_file() {
        return Err(BuildError::DockerfileNotFound(dockerfile_path).into());
    }

    // hive参照をレジストリアドレスへ書き換える（レジストリ稼働時のみ）
    let dockerfile_name = if let Some(registry) = registry {
        let patched = context_dir.join("Dockerfile.patched");
        rewrite_hive_refs(&dockerfile_path, &patched, &registry.address())?;
        "Dockerfile.patched".to_string()
    } else {
        "Dockerfile".to_string()
    };

    let tar_file = context_dir.join("image.tar");
    let opts = BuildOpts {
        image_name: spec.image_ref.clone(),
        platform: tools.platform.clone(),
        tar_file: tar_file.clone(),
        build_args: spec.build_args.clone(),
        labels: BTreeMap::new(),
        secrets: spec.secrets.clone(),
        cache: tools.cache.clone(),
        context_dir: context_dir.clone(),
        dockerfile_name,
    };

    let progress = BuildProgress::new(&spec.image_ref);
    let result = tools.buildkit.build(&opts, &progress).await;

    // パッチ済みDockerfileはビルド完了後に削除する
    let _ = std::fs::remove_file(context_dir.join("Dockerfile.patched"));

    match result {
        Ok(()) => {
            progress.finish_success();
            println!(
                "  {} {} → {}",
                "✓".green(),
                spec.image_ref.cyan(),
                tar_file.display()
            );
            Ok(tar_file)
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            Err(e.into())
        }
    }
}

/// ビルド後のアーティファクト生成（ベストエフォート、失敗は警告のみ）
async fn post_build_artifacts(
    tools: &BuildTools,
    dist_path: &Path,
    spec: &TagBuildSpec,
    tar_file: &Path,
) {
    // SBOM生成
    if let Some(sbom_tool) = &tools.sbom {
        match sbom_tool
            .generate_sbom(tar_file, containerhive_build::FORMAT_SPDX_JSON)
            .await
        {
            Ok(serialized) => {
                let path = sbom_path(tar_file);
                match std::fs::write(&path, &serialized) {
                    Ok(()) => {
                        info!(sbom = %path.display(), size = serialized.len(), "SBOM written");
                    }
                    Err(e) => {
                        warn!(image = %spec.image_ref, error = %e, "Failed to write SBOM");
                    }
                }
            }
            Err(e) => {
                warn!(image = %spec.image_ref, error = %e, "SBOM generation failed");
            }
        }
    }

    // container-structure-test
    if let Some(docker) = &tools.docker {
        let context_dir = dist_path.join(&spec.image_name).join(&spec.dir_name);
        let test_definitions = collect_test_definitions(&context_dir);
        if test_definitions.is_empty() {
            debug!(image = %spec.image_ref, "No structure test definitions, skipping");
            return;
        }

        let report_file = tools.reports_path.join(format!(
            "{}-cst-report.xml",
            spec.image_ref.replace(':', "-")
        ));
        let runner = StructureTestRunner {
            test_definition_paths: test_definitions,
            tar_file: tar_file.to_path_buf(),
            platform: tools.platform.clone(),
            report_file: report_file.clone(),
        };

        match runner.run(docker).await {
            Ok(()) => {
                println!(
                    "  {} 構造テスト合格 → {}",
                    "✓".green(),
                    report_file.display()
                );
            }
            Err(e) => {
                warn!(image = %spec.image_ref, error = %e, "Container structure tests failed");
            }
        }
    }
}

/// 依存イメージのために一時レジストリへプッシュ
async fn push_for_dependents(
    registry: Option<&ZotRegistry>,
    graph: &Graph,
    spec: &TagBuildSpec,
    tar_file: &Path,
) {
    let Some(registry) = registry else {
        return;
    };
    if graph.dependents(&spec.image_name).is_empty() || !registry.is_local() {
        return;
    }

    match registry
        .push(&spec.image_name, &spec.dir_name, tar_file)
        .await
    {
        Ok(()) => {
            println!(
                "  {} {} をローカルレジストリへプッシュしました",
                "✓".green(),
                spec.image_ref.cyan()
            );
        }
        Err(e) => {
            // プッシュ失敗は継続するが、依存イメージは後で失敗する可能性が高い
            warn!(image = %spec.image_ref, error = %e, "Failed to push to local registry");
        }
    }
}

fn tag_build_spec(
    image: &Image,
    dir_name: String,
    resolved: &ResolvedBuildValues,
    include_secrets: bool,
) -> TagBuildSpec {
    TagBuildSpec {
        image_name: image.name.clone(),
        image_ref: format!("{}:{}", image.name, dir_name),
        dir_name,
        build_args: resolved.to_build_args(),
        // シークレットはイメージレベルのみ（バリアントには渡さない）
        secrets: if include_secrets {
            resolved.secrets.clone()
        } else {
            BTreeMap::new()
        },
    }
}

pub async fn handle_build_command(opts: BuildCommandOptions) -> anyhow::Result<()> {
    // ===== ビルド前フェーズ（エラーはすべて致命的） =====

    println!("{}", "プロジェクトを発見中...".green());
    let project = discover_project(&opts.project_path)?;
    let hive_config = load_hive_config(&project.config_file_path)?;
    println!(
        "  {} {} 件のイメージを発見しました",
        "✓".green(),
        project.images_by_identifier.len()
    );

    println!("{}", "レンダリング中...".green());
    render_project(&project, &opts.dist_path).await?;
    println!(
        "  {} {} へレンダリングしました",
        "✓".green(),
        opts.dist_path.display()
    );

    println!("{}", "依存関係を解決中...".green());
    let scanned = scan_rendered_project(&opts.dist_path)?;
    let graph = build_dependency_graph(&scanned, &project)?;
    let build_order = graph.topological_sort()?;
    println!("  {} ビルド順序: {}", "✓".green(), build_order.join(" → "));

    std::fs::create_dir_all(&opts.reports_path)?;

    // BuildKit接続
    let buildkit_addr = opts
        .buildkit_addr
        .clone()
        .or_else(|| {
            hive_config
                .buildkit
                .as_ref()
                .and_then(|b| b.address.clone())
        })
        .unwrap_or_else(|| DEFAULT_BUILDKIT_ADDR.to_string());
    println!("{}", "BuildKitに接続中...".blue());
    let buildkit = BuildkitClient::new(buildkit_addr.clone());
    buildkit.ping().await?;
    println!("  {} {}", "✓".green(), buildkit_addr.cyan());

    // ビルド後アーティファクトのツールはベストエフォートで初期化する
    let sbom = if opts.skip_sbom {
        None
    } else {
        match SbomImageTool::new().await {
            Ok(tool) => Some(tool),
            Err(e) => {
                warn!(error = %e, "syft not available, SBOM generation disabled");
                None
            }
        }
    };

    let docker = if opts.skip_tests {
        None
    } else {
        match DockerClient::connect().await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Docker not available, structure tests disabled");
                None
            }
        }
    };

    let tools = BuildTools {
        buildkit,
        sbom,
        docker,
        cache: cache_from_settings(hive_config.cache.as_ref()),
        platform: opts.platform.clone().unwrap_or_else(host_platform),
        reports_path: opts.reports_path.clone(),
    };

    // レジストリは依存エッジが存在する場合のみ起動する
    let mut registry = if graph.has_dependencies() {
        let mut reg = ZotRegistry::new();
        reg.start().await?;
        println!(
            "{} 一時レジストリを起動しました: {}",
            "✓".green(),
            reg.address().cyan()
        );
        Some(reg)
    } else {
        println!("依存関係がないため、レジストリなしでビルドします");
        None
    };

    // ===== ビルドループ（タグ単位の失敗は分離される） =====

    let mut built = 0usize;
    let mut failed = 0usize;

    for image_name in &build_order {
        let Some(images) = project.images_by_name.get(image_name) else {
            warn!(image = %image_name, "Image in build order not found in project");
            continue;
        };

        println!();
        println!("{}", format!("🔨 {} をビルド中...", image_name).green().bold());

        for image in images {
            for (tag_name, tag) in &image.tags {
                let resolved = resolver::for_tag(image, tag).await?;
                let spec = tag_build_spec(image, tag_name.clone(), &resolved, true);

                // レンダリング直後にタグのDockerfileが無いのは不変条件違反
                let tag_dockerfile = opts
                    .dist_path
                    .join(&spec.image_name)
                    .join(&spec.dir_name)
                    .join("Dockerfile");
                if !tag_dockerfile.is_file() {
                    return Err(BuildError::DockerfileNotFound(tag_dockerfile).into());
                }

                let tar_file =
                    match build_tag_context(&tools, registry.as_ref(), &opts.dist_path, &spec)
                        .await
                    {
                        Ok(tar) => tar,
                        Err(e) => {
                            // タグのビルド失敗はスキップして他のイメージを続行する。
                            // これに依存するイメージはプル失敗で同様にスキップされる。
                            warn!(image = %spec.image_ref, error = %e, "Build failed, skipping tag");
                            println!("  {} {} のビルドに失敗: {}", "✗".red(), spec.image_ref, e);
                            failed += 1;
                            continue;
                        }
                    };
                built += 1;

                post_build_artifacts(&tools, &opts.dist_path, &spec, &tar_file).await;

                // バリアントはタグのビルド成功後に処理する
                for variant in image.variants.values() {
                    let variant_resolved =
                        resolver::for_tag_variant(image, variant, tag).await?;
                    let variant_dir = format!("{}{}", tag_name, variant.tag_suffix);
                    let variant_spec =
                        tag_build_spec(image, variant_dir, &variant_resolved, false);

                    let variant_context = opts
                        .dist_path
                        .join(&variant_spec.image_name)
                        .join(&variant_spec.dir_name);
                    if !variant_context.join("Dockerfile").is_file() {
                        warn!(
                            image = %variant_spec.image_ref,
                            "Dockerfile not found for variant, skipping"
                        );
                        continue;
                    }

                    let variant_tar = match build_tag_context(
                        &tools,
                        registry.as_ref(),
                        &opts.dist_path,
                        &variant_spec,
                    )
                    .await
                    {
                        Ok(tar) => tar,
                        Err(e) => {
                            warn!(image = %variant_spec.image_ref, error = %e, "Variant build failed, skipping");
                            println!(
                                "  {} {} のビルドに失敗: {}",
                                "✗".red(),
                                variant_spec.image_ref,
                                e
                            );
                            failed += 1;
                            continue;
                        }
                    };
                    built += 1;

                    post_build_artifacts(&tools, &opts.dist_path, &variant_spec, &variant_tar)
                        .await;
                    push_for_dependents(registry.as_ref(), &graph, &variant_spec, &variant_tar)
                        .await;
                }

                push_for_dependents(registry.as_ref(), &graph, &spec, &tar_file).await;
            }
        }
    }

    if let Some(reg) = registry.as_mut() {
        reg.stop().await;
    }

    println!();
    if failed == 0 {
        println!(
            "{}",
            format!("✓ {} 件のイメージタグをビルドしました", built)
                .green()
                .bold()
        );
        Ok(())
    } else {
        println!(
            "{}",
            format!("{} 件成功, {} 件失敗", built, failed).yellow().bold()
        );
        anyhow::bail!("{} 件のイメージタグのビルドに失敗しました", failed)
    }
}
