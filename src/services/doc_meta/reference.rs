//! 双向引用关系
//!
//! 对每个代码对象调用外部引用解析器，把引用点映射回覆盖它的最小对象，
//! 过滤掉祖先/后代之间的引用后建立 `reference_who` / `who_reference_me` 边

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::tree::DocTree;
use super::types::{ItemId, WhiteListEntry};

/// 引用查找范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceScope {
    /// 仅在定义所在文件内查找
    File,
    /// 在整个仓库中查找
    Global,
}

/// 一次引用查询
#[derive(Debug, Clone)]
pub struct ReferenceQuery<'a> {
    pub repo_root: &'a Path,
    /// 定义所在文件（相对路径）
    pub file_path: &'a str,
    /// 符号名称
    pub name: &'a str,
    /// 定义行（1-based）
    pub line: usize,
    /// 名称所在列（0-based）
    pub column: usize,
    pub scope: ReferenceScope,
}

/// 引用点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSite {
    /// 引用者所在文件（相对路径）
    pub file_path: String,
    pub line: usize,
    pub column: usize,
}

/// 引用解析错误
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("file is not tracked by the resolver: {0}")]
    UnknownFile(String),

    #[error("IO错误 ({0}): {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("resolver failed: {0}")]
    Resolver(String),
}

/// 外部引用解析器接口
pub trait ReferenceFinder {
    /// 返回符号的所有引用点（不含定义点本身）
    fn find_references(&self, query: &ReferenceQuery<'_>) -> Result<Vec<ReferenceSite>, ReferenceError>;
}

/// 引用解析选项
#[derive(Debug, Clone, Default)]
pub struct ReferenceOptions<'a> {
    pub repo_root: PathBuf,
    /// 白名单：只解析名单中的文件，名单外的对象只查同文件引用
    pub white_list: Option<&'a [WhiteListEntry]>,
    /// 来自未暂存版本的映射文件（fake_file_reflection 的值）
    pub fake_files: HashSet<String>,
    /// 未跟踪的文件
    pub jump_files: HashSet<String>,
}

impl<'a> ReferenceOptions<'a> {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            ..Default::default()
        }
    }

    pub fn with_white_list(mut self, white_list: Option<&'a [WhiteListEntry]>) -> Self {
        self.white_list = white_list;
        self
    }

    pub fn with_fake_file_reflection(mut self, reflection: &BTreeMap<String, String>) -> Self {
        self.fake_files = reflection.values().cloned().collect();
        self
    }

    pub fn with_jump_files(mut self, jump_files: &[String]) -> Self {
        self.jump_files = jump_files.iter().cloned().collect();
        self
    }
}

/// 清空已有的引用边
pub fn clear_references(tree: &mut DocTree) {
    let ids: Vec<ItemId> = tree.ids().collect();
    for id in ids {
        let item = tree.get_mut(id);
        item.reference_who.clear();
        item.who_reference_me.clear();
        item.special_reference_type.clear();
    }
}

/// 重新计算整棵树的双向引用关系，返回建立的边数
pub fn parse_reference<F: ReferenceFinder + ?Sized>(
    tree: &mut DocTree,
    finder: &F,
    options: &ReferenceOptions<'_>,
) -> usize {
    clear_references(tree);

    let (white_list_files, white_list_objs): (HashSet<&str>, HashSet<&str>) = match options.white_list {
        Some(list) => (
            list.iter().map(|e| e.file_path.as_str()).collect(),
            list.iter().map(|e| e.id_text.as_str()).collect(),
        ),
        None => (HashSet::new(), HashSet::new()),
    };

    let mut total = 0;
    for file in tree.all_files() {
        let rel_file_path = tree.full_name(file);
        if !white_list_files.is_empty() && !white_list_files.contains(rel_file_path.as_str()) {
            continue;
        }

        let mut ref_count = 0;
        let objects: Vec<ItemId> = tree.travel_list(file).into_iter().skip(1).collect();
        for now_obj in objects {
            // 白名单外的对象只查同文件引用，作为加速
            let in_file_only =
                !white_list_objs.is_empty() && !white_list_objs.contains(tree.get(now_obj).obj_name.as_str());
            ref_count += link_object(tree, finder, options, &rel_file_path, now_obj, in_file_only);
        }

        info!("find {} refer-relation in {}", ref_count, rel_file_path);
        total += ref_count;
    }
    total
}

fn link_object<F: ReferenceFinder + ?Sized>(
    tree: &mut DocTree,
    finder: &F,
    options: &ReferenceOptions<'_>,
    rel_file_path: &str,
    now_obj: ItemId,
    in_file_only: bool,
) -> usize {
    let (name, line, column) = {
        let item = tree.get(now_obj);
        (item.obj_name.clone(), item.code_start_line.max(0) as usize, item.name_column())
    };

    let query = ReferenceQuery {
        repo_root: &options.repo_root,
        file_path: rel_file_path,
        name: &name,
        line,
        column,
        scope: if in_file_only {
            ReferenceScope::File
        } else {
            ReferenceScope::Global
        },
    };

    let sites = match finder.find_references(&query) {
        Ok(sites) => sites,
        Err(e) => {
            warn!(
                "Error occurred while finding references of {}: {}",
                tree.full_name(now_obj),
                e
            );
            return 0;
        }
    };

    let mut added = 0;
    for site in sites {
        if options.fake_files.contains(&site.file_path) {
            debug!(
                "[Reference From Unstaged Version, skip] {} -> {}",
                site.file_path,
                tree.full_name(now_obj)
            );
            continue;
        }
        if options.jump_files.contains(&site.file_path) {
            debug!(
                "[Reference From Untracked Version, skip] {} -> {}",
                site.file_path,
                tree.full_name(now_obj)
            );
            continue;
        }

        let Some(referencer_file) = tree.find_path(&site.file_path) else {
            info!(
                "Find \"{}\"(not in target repo) referenced {}",
                site.file_path,
                tree.full_name(now_obj)
            );
            continue;
        };

        let referencer = tree.find_obj_with_lineno(referencer_file, site.line as i64);
        if tree.get(referencer).obj_name == name {
            debug!(
                "Find {} with name_duplicate_reference, skipped",
                tree.full_name(now_obj)
            );
            continue;
        }
        if tree.has_ancestor_relation(now_obj, referencer) {
            continue;
        }
        if tree.get(referencer).reference_who.contains(&now_obj) {
            continue;
        }

        let special = {
            let r = tree.get(referencer);
            r.kind.is_function_like() && r.code_start_line == site.line as i64
        };
        let r = tree.get_mut(referencer);
        r.reference_who.push(now_obj);
        r.special_reference_type.push(special);
        tree.get_mut(now_obj).who_reference_me.push(referencer);
        added += 1;
    }
    added
}
