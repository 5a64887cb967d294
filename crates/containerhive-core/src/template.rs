//! テンプレートプロセッサ
//!
//! `.gotpl` 拡張子を持つファイルをテンプレートコンテキストで展開します。
//! 認識されない拡張子のファイルはバイト単位でそのままコピーされます。
//!
//! テンプレート構文は `.gotpl` ファイルが使うGoテンプレートの
//! アクセササブセットのみを実装します:
//!
//! ```text
//! {{.ImageName}}
//! {{.Versions.KEY}}
//! {{.BuildArgs.KEY}}
//! ```
//!
//! 存在するマップのキーミスは `<no value>` として出力され、
//! 未知のトップレベルフィールドの参照は展開エラーになります。

use crate::error::{HiveError, Result};
use crate::file_resolver::SUPPORTED_TEMPLATE_EXTENSIONS;
use crate::model::{BuildArgs, Versions};
use std::path::Path;
use tracing::debug;

/// テンプレート展開に公開されるコンテキスト
///
/// ここに列挙されたフィールド以外は一切公開されません。
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub image_name: String,
    pub versions: Versions,
    pub build_args: BuildArgs,
}

impl TemplateContext {
    pub fn new(image_name: impl Into<String>, versions: Versions, build_args: BuildArgs) -> Self {
        Self {
            image_name: image_name.into(),
            versions,
            build_args,
        }
    }
}

/// マップのキーミス時にGoテンプレートが出力する値
const NO_VALUE: &str = "<no value>";

/// ファイル内容をテンプレートとして処理
///
/// ファイル名の最後のドット以降のサフィックスで判定:
/// - 登録済みテンプレート拡張子 → 展開
/// - それ以外（2文字未満を含む） → バイトをそのまま返す
pub fn process(ctx: &TemplateContext, path: &Path, content: &[u8]) -> Result<Vec<u8>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    if ext.len() < 2 || !SUPPORTED_TEMPLATE_EXTENSIONS.contains(&ext) {
        return Ok(content.to_vec());
    }

    let source = std::str::from_utf8(content).map_err(|e| HiveError::Render {
        file: path.to_path_buf(),
        message: format!("テンプレートがUTF-8ではありません: {}", e),
    })?;

    let rendered = render_gotpl(ctx, source).map_err(|message| HiveError::Render {
        file: path.to_path_buf(),
        message,
    })?;

    Ok(rendered.into_bytes())
}

/// ソースファイルをターゲットへコピーまたは展開
///
/// テンプレート拡張子を持つファイルは展開して書き込み、
/// それ以外はファイルモードを保持したままコピーします。
pub fn copy_or_render(ctx: &TemplateContext, src: &Path, target: &Path) -> Result<()> {
    let ext = src.extension().and_then(|e| e.to_str()).unwrap_or_default();

    if ext.len() < 2 || !SUPPORTED_TEMPLATE_EXTENSIONS.contains(&ext) {
        // パススルーコピー（fs::copyはパーミッションを保持する）
        std::fs::copy(src, target).map_err(|e| HiveError::IoAt {
            path: src.to_path_buf(),
            message: e.to_string(),
        })?;
        return Ok(());
    }

    debug!(src = %src.display(), target = %target.display(), "Rendering template file");

    let content = std::fs::read(src).map_err(|e| HiveError::IoAt {
        path: src.to_path_buf(),
        message: e.to_string(),
    })?;
    let rendered = process(ctx, src, &content)?;
    std::fs::write(target, rendered).map_err(|e| HiveError::IoAt {
        path: target.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(())
}

/// Goテンプレートのアクセササブセットを展開
fn render_gotpl(ctx: &TemplateContext, source: &str) -> std::result::Result<String, String> {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            return Err("閉じられていないアクション: '}}' が見つかりません".to_string());
        };

        let action = after_open[..close].trim();
        output.push_str(&evaluate_action(ctx, action)?);

        rest = &after_open[close + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

/// 単一のテンプレートアクションを評価
fn evaluate_action(ctx: &TemplateContext, action: &str) -> std::result::Result<String, String> {
    let Some(path) = action.strip_prefix('.') else {
        return Err(format!("サポートされていないアクション: {{{{{}}}}}", action));
    };

    let mut segments = path.split('.');
    let field = segments.next().unwrap_or_default();
    let key = segments.next();

    if segments.next().is_some() {
        return Err(format!("フィールドパスが深すぎます: .{}", path));
    }

    match (field, key) {
        ("ImageName", None) => Ok(ctx.image_name.clone()),
        ("Versions", Some(key)) => Ok(lookup(&ctx.versions, key)),
        ("BuildArgs", Some(key)) => Ok(lookup(&ctx.build_args, key)),
        ("Versions", None) | ("BuildArgs", None) => {
            Err(format!("マップ '{}' は直接出力できません", field))
        }
        _ => Err(format!("未定義のフィールド: .{}", path)),
    }
}

fn lookup(map: &std::collections::BTreeMap<String, String>, key: &str) -> String {
    match map.get(key) {
        Some(value) => value.clone(),
        None => NO_VALUE.to_string(),
    }
}
