//! 安全なtar展開
//!
//! OCI tarを一時ディレクトリへ展開します。絶対パスと `..` による
//! ディレクトリトラバーサルを含むエントリは拒否されます。

use crate::error::{RegistryError, RegistryResult};
use std::path::{Component, Path};

/// tarアーカイブを展開先ディレクトリへ安全に展開
pub fn extract_tar(tar_path: &Path, dest_dir: &Path) -> RegistryResult<()> {
    let file = std::fs::File::open(tar_path).map_err(|e| RegistryError::IoAt {
        path: tar_path.to_path_buf(),
        message: format!("tarのオープンに失敗: {}", e),
    })?;

    let mut archive = tar::Archive::new(file);

    for entry in archive.entries()? {
        let mut entry = entry?;

        let raw_name = String::from_utf8_lossy(&entry.path_bytes()).to_string();
        let entry_path = entry.path().map_err(|_| {
            RegistryError::TarEntryEscapes(raw_name.clone())
        })?;

        // 展開先から逃げるエントリを拒否する
        let escapes = entry_path.is_absolute()
            || entry_path.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            });
        if escapes {
            return Err(RegistryError::TarEntryEscapes(raw_name));
        }

        let target = dest_dir.join(&entry_path);

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&target)?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = std::fs::File::create(&target)?;
                std::io::copy(&mut entry, &mut out)?;
            }
            // リンクやデバイスノードはOCIレイアウトに現れないため無視
            _ => {}
        }
    }

    Ok(())
}
