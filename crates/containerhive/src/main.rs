mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hive",
    about = "コンテナイメージファミリーの宣言的ビルドオーケストレーター",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// プロジェクト全体をビルド（レンダリング → 依存解決 → BuildKit）
    Build {
        /// プロジェクトルート
        project: PathBuf,

        /// レンダリング出力先（デフォルト: <project>/dist）
        #[arg(long)]
        dist: Option<PathBuf>,

        /// テストレポート出力先（デフォルト: <project>/reports）
        #[arg(long)]
        reports: Option<PathBuf>,

        /// BuildKitデーモンのアドレス
        #[arg(long)]
        buildkit_addr: Option<String>,

        /// ビルドプラットフォーム（デフォルト: ホストアーキテクチャ）
        #[arg(long)]
        platform: Option<String>,

        /// SBOM生成をスキップ
        #[arg(long)]
        skip_sbom: bool,

        /// container-structure-testをスキップ
        #[arg(long)]
        skip_tests: bool,
    },

    /// ビルドコンテキストをdistツリーへレンダリング
    Render {
        /// プロジェクトルート
        project: PathBuf,

        /// レンダリング出力先（デフォルト: <project>/dist）
        #[arg(long)]
        dist: Option<PathBuf>,
    },

    /// プロジェクトを検証してビルド順序を表示
    Validate {
        /// プロジェクトルート
        project: PathBuf,
    },

    /// バージョンを表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            project,
            dist,
            reports,
            buildkit_addr,
            platform,
            skip_sbom,
            skip_tests,
        } => {
            let dist = dist.unwrap_or_else(|| project.join("dist"));
            let reports = reports.unwrap_or_else(|| project.join("reports"));
            commands::build::handle_build_command(commands::build::BuildCommandOptions {
                project_path: project,
                dist_path: dist,
                reports_path: reports,
                buildkit_addr,
                platform,
                skip_sbom,
                skip_tests,
            })
            .await
        }
        Commands::Render { project, dist } => {
            let dist = dist.unwrap_or_else(|| project.join("dist"));
            commands::render::handle_render_command(&project, &dist).await
        }
        Commands::Validate { project } => commands::validate::handle_validate_command(&project).await,
        Commands::Version => {
            println!("containerhive {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
