use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// テスト用のContainerHiveプロジェクトを組み立てるフィクスチャ
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("hive.yml"), "").unwrap();
        Self { root }
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// イメージディレクトリを作成して image.yml と Dockerfile を配置
    pub fn add_image(&self, name: &str, image_yml: &str, dockerfile: &str) -> PathBuf {
        let dir = self.root.path().join("images").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("image.yml"), image_yml).unwrap();
        fs::write(dir.join("Dockerfile"), dockerfile).unwrap();
        dir
    }

    /// イメージディレクトリへ任意のファイルを追加
    #[allow(dead_code)]
    pub fn add_file(&self, image_dir: &Path, relative: &str, content: &str) {
        let path = image_dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}
