//! 仓库扫描器
//!
//! 遍历仓库中的 Python 文件，生成 `{相对路径: [对象描述符...]}`

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::python;

/// 需要跳过的目录
pub const IGNORED_DIRS: &[&str] = &[
    "__pycache__", "node_modules", "venv", "env", "dist", "build", "site-packages",
];

/// 支持的源文件扩展名
const SOURCE_EXTENSION: &str = "py";

/// 仓库扫描器
#[derive(Debug, Clone)]
pub struct RepoScanner {
    root: PathBuf,
    /// 编译后的忽略模式（glob patterns）
    ignore_patterns: Vec<glob::Pattern>,
}

impl RepoScanner {
    /// 创建扫描器，无效的忽略模式会被记录并丢弃
    pub fn new(root: impl Into<PathBuf>, ignore_patterns: &[String]) -> Self {
        let ignore_patterns = ignore_patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Invalid ignore pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            root: root.into(),
            ignore_patterns,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn should_ignore(&self, relative: &str, name: &str) -> bool {
        if name.starts_with('.') || IGNORED_DIRS.contains(&name) {
            return true;
        }
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches(name) || pattern.matches(relative))
    }

    /// 收集所有源文件的相对路径（排序）
    pub fn collect_files(&self) -> Result<Vec<String>, ScanError> {
        if !self.root.exists() {
            return Err(ScanError::PathNotFound(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(ScanError::NotADirectory(self.root.clone()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            let relative = self.relative_path(e.path());
            !self.should_ignore(&relative, &name)
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to walk entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let is_source = entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(SOURCE_EXTENSION))
                .unwrap_or(false);
            if is_source {
                files.push(self.relative_path(entry.path()));
            }
        }

        files.sort();
        Ok(files)
    }

    /// 解析单个文件，生成带源码信息的描述符列表
    pub fn generate_file_structure(&self, relative: &str) -> Result<Vec<Value>, ScanError> {
        let abs_path = self.root.join(relative);
        let content = fs::read_to_string(&abs_path).map_err(|e| ScanError::IoError(abs_path.clone(), e))?;
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        let descriptors = python::parse_file(&content)
            .into_iter()
            .map(|obj| {
                let start = obj.start_line.saturating_sub(1).min(lines.len());
                let end = obj.end_line.min(lines.len());
                let code_content: String = lines[start..end].concat();
                json!({
                    "type": obj.kind,
                    "name": obj.name,
                    "md_content": [],
                    "code_start_line": obj.start_line,
                    "code_end_line": obj.end_line,
                    "params": obj.params,
                    "have_return": code_content.contains("return"),
                    "code_content": code_content,
                    "name_column": obj.name_column,
                })
            })
            .collect();
        Ok(descriptors)
    }

    /// 生成整个仓库的结构，跳过未跟踪文件与未暂存版本的映射文件
    pub fn generate_overall_structure(
        &self,
        fake_file_reflection: &BTreeMap<String, String>,
        jump_files: &[String],
    ) -> Result<Map<String, Value>, ScanError> {
        let skipped: HashSet<&str> = jump_files
            .iter()
            .chain(fake_file_reflection.values())
            .map(String::as_str)
            .collect();

        let mut structure = Map::new();
        for relative in self.collect_files()? {
            if skipped.contains(relative.as_str()) {
                debug!("Skipping untracked or unstaged file: {}", relative);
                continue;
            }
            match self.generate_file_structure(&relative) {
                Ok(descriptors) => {
                    structure.insert(relative, Value::Array(descriptors));
                }
                Err(e) => {
                    warn!("An error occurred while generating file structure for {}: {}", relative, e);
                }
            }
        }

        info!("Scan completed: {} files", structure.len());
        Ok(structure)
    }
}

/// 扫描错误类型
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("路径不存在: {0}")]
    PathNotFound(PathBuf),

    #[error("路径不是目录: {0}")]
    NotADirectory(PathBuf),

    #[error("IO错误 ({0}): {1}")]
    IoError(PathBuf, #[source] std::io::Error),
}
