//! ContainerHive コア
//!
//! 宣言的なコンテナイメージファミリーのプロジェクトモデルと、
//! その発見・レンダリング・依存解決を提供します。
//!
//! # パイプライン
//!
//! 1. **発見**: 規約ベースのディレクトリ構造から不変の [`model::Project`] を構築
//! 2. **レンダリング**: `<dist>/<image>/<tag[-variant]>/` のビルドコンテキストを並列生成
//! 3. **依存解決**: Dockerfileスキャン ∪ `depends_on` → 決定的なビルド順序

pub mod dependency;
pub mod discovery;
pub mod error;
pub mod file_resolver;
pub mod model;
pub mod rendering;
pub mod resolver;
pub mod secrets;
pub mod template;
pub mod vault;

pub use dependency::{Graph, build_dependency_graph, scan_rendered_project};
pub use discovery::{HiveConfig, discover_project, load_hive_config};
pub use error::{HiveError, Result};
pub use model::{BuildArgs, Image, ImageVariant, Project, SecretRef, SecretSource, Tag, Versions};
pub use rendering::render_project;
pub use resolver::{ResolvedBuildValues, for_tag, for_tag_variant, normalize_key};
pub use template::TemplateContext;
