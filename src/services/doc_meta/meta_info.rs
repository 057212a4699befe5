//! 仓库文档元信息
//!
//! 持有对象树与运行元数据，负责断点的读写以及新旧两版对象树的对齐

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::reference::{self, ReferenceFinder, ReferenceOptions};
use super::scheduler::{get_task_manager, TaskPlan};
use super::tree::{DocTree, TreeBuilder};
use super::types::{ItemId, ItemStatus, WhiteListEntry};
use crate::services::code_analyzer::scanner::{RepoScanner, ScanError};

/// 对象层级文件名
pub const HIERARCHY_FILE: &str = "project_hierarchy.json";
/// 运行元数据文件名
pub const META_FILE: &str = "meta-info.json";

/// meta-info.json 的内容，字段全部必填
#[derive(Debug, Serialize, Deserialize)]
struct MetaFile {
    doc_version: String,
    in_generation_process: bool,
    fake_file_reflection: BTreeMap<String, String>,
    jump_files: Vec<String>,
    deleted_items_from_older_meta: Vec<Vec<String>>,
}

/// 断点读写错误
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("IO错误 ({0}): {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("解析错误 ({0}): {1}")]
    ParseError(PathBuf, #[source] serde_json::Error),

    #[error("序列化错误: {0}")]
    SerializeError(#[source] serde_json::Error),

    #[error("{0} is not a JSON object keyed by file path")]
    InvalidLayout(PathBuf),
}

/// 仓库文档元信息
#[derive(Debug, Clone, Default)]
pub struct MetaInfo {
    pub repo_path: PathBuf,
    pub document_version: String,
    pub tree: DocTree,
    pub white_list: Option<Vec<WhiteListEntry>>,
    /// 原文件 -> 未暂存版本的映射文件
    pub fake_file_reflection: BTreeMap<String, String>,
    /// 未跟踪的文件
    pub jump_files: Vec<String>,
    /// `[全名, 类型]`
    pub deleted_items_from_older_meta: Vec<Vec<String>>,
    pub in_generation_process: bool,
}

impl MetaInfo {
    /// 扫描仓库并构建新的元信息
    pub fn init_meta_info(
        scanner: &RepoScanner,
        fake_file_reflection: BTreeMap<String, String>,
        jump_files: Vec<String>,
    ) -> Result<Self, ScanError> {
        info!("Initializing MetaInfo from {}", scanner.root().display());
        let structure = scanner.generate_overall_structure(&fake_file_reflection, &jump_files)?;
        let mut meta = Self::from_project_hierarchy_json(&structure, Some(scanner.root()));
        meta.repo_path = scanner.root().to_path_buf();
        meta.fake_file_reflection = fake_file_reflection;
        meta.jump_files = jump_files;
        Ok(meta)
    }

    /// 从 `{文件: [描述符...]}` 构建，`repo_root` 设置后跳过磁盘上缺失或为空的文件
    pub fn from_project_hierarchy_json(hierarchy: &Map<String, Value>, repo_root: Option<&Path>) -> Self {
        let builder = match repo_root {
            Some(root) => TreeBuilder::with_repo_root(root),
            None => TreeBuilder::new(),
        };
        Self {
            repo_path: repo_root.map(Path::to_path_buf).unwrap_or_default(),
            tree: builder.build(hierarchy),
            ..Default::default()
        }
    }

    /// 序列化对象树
    ///
    /// `flash_reference_relation` 为真时写入重新计算的引用关系（严格全名），
    /// 否则原样写回读入时的名称列表
    pub fn to_hierarchy_json(&self, flash_reference_relation: bool) -> Map<String, Value> {
        let mut hierarchy = Map::new();
        for file in self.tree.all_files() {
            let mut file_content = Vec::new();
            for id in self.tree.travel_list(file).into_iter().skip(1) {
                let item = self.tree.get(id);
                let mut obj = item.content.clone();
                obj.insert("name".into(), Value::String(item.obj_name.clone()));
                obj.insert("type".into(), Value::String(item.kind.to_type_str().into()));
                obj.insert("md_content".into(), Value::from(item.md_content.clone()));
                obj.insert("item_status".into(), Value::String(item.status.as_str().into()));

                if flash_reference_relation {
                    let who_reference_me: Vec<String> = item
                        .who_reference_me
                        .iter()
                        .map(|&r| self.tree.strict_full_name(r))
                        .collect();
                    let reference_who: Vec<String> = item
                        .reference_who
                        .iter()
                        .map(|&r| self.tree.strict_full_name(r))
                        .collect();
                    obj.insert("who_reference_me".into(), Value::from(who_reference_me));
                    obj.insert("reference_who".into(), Value::from(reference_who));
                    obj.insert(
                        "special_reference_type".into(),
                        Value::from(item.special_reference_type.clone()),
                    );
                } else {
                    obj.insert(
                        "who_reference_me".into(),
                        Value::from(item.who_reference_me_name_list.clone()),
                    );
                    obj.insert(
                        "reference_who".into(),
                        Value::from(item.reference_who_name_list.clone()),
                    );
                }
                file_content.push(Value::Object(obj));
            }
            hierarchy.insert(self.tree.full_name(file), Value::Array(file_content));
        }
        hierarchy
    }

    /// 写入断点目录（先写临时文件再重命名）
    pub fn checkpoint(&self, target_dir: &Path, flash_reference_relation: bool) -> Result<(), CheckpointError> {
        fs::create_dir_all(target_dir).map_err(|e| CheckpointError::IoError(target_dir.to_path_buf(), e))?;

        let hierarchy = Value::Object(self.to_hierarchy_json(flash_reference_relation));
        let content = serde_json::to_string_pretty(&hierarchy).map_err(CheckpointError::SerializeError)?;
        write_replace(&target_dir.join(HIERARCHY_FILE), &content)?;

        let meta = MetaFile {
            doc_version: self.document_version.clone(),
            in_generation_process: self.in_generation_process,
            fake_file_reflection: self.fake_file_reflection.clone(),
            jump_files: self.jump_files.clone(),
            deleted_items_from_older_meta: self.deleted_items_from_older_meta.clone(),
        };
        let content = serde_json::to_string_pretty(&meta).map_err(CheckpointError::SerializeError)?;
        write_replace(&target_dir.join(META_FILE), &content)?;

        debug!("MetaInfo is refreshed and saved to {}", target_dir.display());
        Ok(())
    }

    /// 从断点目录读取，任一文件缺失或损坏都返回错误
    pub fn from_checkpoint_path(checkpoint_dir: &Path, repo_root: Option<&Path>) -> Result<Self, CheckpointError> {
        let hierarchy_path = checkpoint_dir.join(HIERARCHY_FILE);
        let content = fs::read_to_string(&hierarchy_path)
            .map_err(|e| CheckpointError::IoError(hierarchy_path.clone(), e))?;
        let hierarchy: Value = serde_json::from_str(&content)
            .map_err(|e| CheckpointError::ParseError(hierarchy_path.clone(), e))?;
        let hierarchy = hierarchy
            .as_object()
            .ok_or_else(|| CheckpointError::InvalidLayout(hierarchy_path.clone()))?;

        let meta_path = checkpoint_dir.join(META_FILE);
        let content =
            fs::read_to_string(&meta_path).map_err(|e| CheckpointError::IoError(meta_path.clone(), e))?;
        let meta: MetaFile =
            serde_json::from_str(&content).map_err(|e| CheckpointError::ParseError(meta_path.clone(), e))?;

        let mut meta_info = Self::from_project_hierarchy_json(hierarchy, repo_root);
        meta_info.document_version = meta.doc_version;
        meta_info.in_generation_process = meta.in_generation_process;
        meta_info.fake_file_reflection = meta.fake_file_reflection;
        meta_info.jump_files = meta.jump_files;
        meta_info.deleted_items_from_older_meta = meta.deleted_items_from_older_meta;

        info!("Loading MetaInfo: {}", checkpoint_dir.display());
        Ok(meta_info)
    }

    /// 重新计算双向引用关系
    pub fn parse_reference<F: ReferenceFinder + ?Sized>(&mut self, finder: &F) -> usize {
        let options = ReferenceOptions::new(self.repo_path.clone())
            .with_white_list(self.white_list.as_deref())
            .with_fake_file_reflection(&self.fake_file_reflection)
            .with_jump_files(&self.jump_files);
        reference::parse_reference(&mut self.tree, finder, &options)
    }

    /// 计算整个仓库的任务顺序（依赖已计算好的引用关系）
    pub fn get_task_manager<A>(&mut self, available: A) -> TaskPlan
    where
        A: Fn(&DocTree, ItemId) -> bool,
    {
        let root = self.tree.root();
        get_task_manager(&mut self.tree, root, available, self.white_list.as_deref())
    }

    /// 重新计算引用关系后计算任务顺序
    pub fn get_topology<F, A>(&mut self, finder: &F, available: A) -> TaskPlan
    where
        F: ReferenceFinder + ?Sized,
        A: Fn(&DocTree, ItemId) -> bool,
    {
        self.parse_reference(finder);
        self.get_task_manager(available)
    }

    /// 在当前树中找到旧树节点的对应节点：逐级按槽位名匹配，且类型必须一致
    fn find_counterpart(&self, older: &MetaInfo, older_id: ItemId) -> Option<ItemId> {
        let older_tree = &older.tree;
        let path: Vec<&str> = older_tree
            .get(older_id)
            .tree_path
            .iter()
            .skip(1)
            .map(|&id| older_tree.slot_name(id))
            .collect();
        let found = self.tree.find(&path)?;
        if self.tree.get(found).kind == older_tree.get(older_id).kind {
            Some(found)
        } else {
            None
        }
    }

    /// 从旧版本元信息继承已生成的文档与状态，找不到对应节点的旧节点记为已删除
    pub fn load_doc_from_older_meta(&mut self, older: &MetaInfo) {
        info!("merge doc from an older version of metainfo");
        let mut deleted_items = Vec::new();
        let mut stack = vec![older.tree.root()];

        while let Some(older_id) = stack.pop() {
            let older_item = older.tree.get(older_id);
            let Some(found) = self.find_counterpart(older, older_id) else {
                deleted_items.push(vec![
                    older.tree.full_name(older_id),
                    older_item.kind.to_type_str().to_string(),
                ]);
                continue;
            };

            let item = self.tree.get_mut(found);
            item.md_content = older_item.md_content.clone();
            item.status = older_item.status;
            let code_changed = matches!(
                (older_item.code_content(), item.code_content()),
                (Some(old_code), Some(new_code)) if old_code != new_code
            );
            if code_changed && item.status == ItemStatus::UpToDate {
                item.status = ItemStatus::CodeChanged;
            }

            for &child in older_item.children.values().rev() {
                stack.push(child);
            }
        }

        for entry in &deleted_items {
            debug!("deleted from older meta: {:?}", entry);
        }
        self.deleted_items_from_older_meta = deleted_items;
    }

    /// 引用关系重新计算后，比较新旧引用者集合
    pub fn mark_referencer_changes(&mut self, older: &MetaInfo) {
        for older_id in older.tree.travel_list(older.tree.root()) {
            let Some(found) = self.find_counterpart(older, older_id) else {
                continue;
            };
            if self.tree.get(found).status != ItemStatus::UpToDate {
                continue;
            }

            let new_names: HashSet<String> = self
                .tree
                .get(found)
                .who_reference_me
                .iter()
                .map(|&r| self.tree.strict_full_name(r))
                .collect();
            let old_names: HashSet<String> = older
                .tree
                .get(older_id)
                .who_reference_me_name_list
                .iter()
                .cloned()
                .collect();

            if new_names != old_names {
                self.tree.get_mut(found).status = if new_names.is_subset(&old_names) {
                    ItemStatus::ReferencerMissing
                } else {
                    ItemStatus::ReferencerAdded
                };
            }
        }
    }
}

fn write_replace(path: &Path, content: &str) -> Result<(), CheckpointError> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content).map_err(|e| CheckpointError::IoError(tmp_path.clone(), e))?;
    fs::rename(&tmp_path, path).map_err(|e| CheckpointError::IoError(path.to_path_buf(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::doc_meta::reference::tests::{func, StubFinder};
    use crate::services::doc_meta::scheduler::need_to_generate;
    use crate::services::doc_meta::types::ItemKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn with_code(mut value: Value, code: &str) -> Value {
        value["code_content"] = json!(code);
        value
    }

    fn meta_from(value: Value) -> MetaInfo {
        MetaInfo::from_project_hierarchy_json(value.as_object().unwrap(), None)
    }

    #[test]
    fn test_checkpoint_round_trip_keeps_raw_names() {
        let mut f = func("f", 1, 2);
        f["item_status"] = json!("doc_up_to_date");
        f["md_content"] = json!(["f doc"]);
        f["who_reference_me"] = json!(["a.py/g"]);
        let mut g = func("g", 4, 5);
        g["reference_who"] = json!(["a.py/f"]);
        g["extra_field"] = json!({"kept": true});

        let mut meta = meta_from(json!({
            "pkg/a.py": [
                json!({"type": "ClassDef", "name": "A", "md_content": [], "code_start_line": 7, "code_end_line": 12}),
                func("m", 8, 10),
            ],
            "a.py": [f, g],
        }));
        meta.document_version = "v1".into();
        meta.jump_files = vec!["untracked.py".into()];
        meta.fake_file_reflection.insert("a.py".into(), "a_latest.py".into());

        let dir = TempDir::new().unwrap();
        meta.checkpoint(dir.path(), false).unwrap();
        let loaded = MetaInfo::from_checkpoint_path(dir.path(), None).unwrap();

        assert_eq!(loaded.document_version, "v1");
        assert_eq!(loaded.jump_files, meta.jump_files);
        assert_eq!(loaded.fake_file_reflection, meta.fake_file_reflection);
        assert!(!loaded.in_generation_process);
        assert_eq!(loaded.tree.len(), meta.tree.len());

        for id in meta.tree.ids() {
            let name = meta.tree.strict_full_name(id);
            let path: Vec<&str> = if id == meta.tree.root() { vec![] } else { name.split('/').collect() };
            let other = loaded.tree.find(&path).unwrap();
            let (a, b) = (meta.tree.get(id), loaded.tree.get(other));
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.obj_name, b.obj_name);
            assert_eq!(a.status, b.status);
            assert_eq!(a.md_content, b.md_content);
            assert_eq!(a.reference_who_name_list, b.reference_who_name_list);
            assert_eq!(a.who_reference_me_name_list, b.who_reference_me_name_list);
        }

        let g = loaded.tree.find_path("a.py/g").unwrap();
        assert_eq!(loaded.tree.get(g).content.get("extra_field"), Some(&json!({"kept": true})));
        assert_eq!(loaded.tree.get(loaded.tree.find_path("pkg/a.py/A/m").unwrap()).kind, ItemKind::ClassFunction);
    }

    #[test]
    fn test_flash_checkpoint_writes_strict_names() {
        let mut meta = meta_from(json!({ "a.py": [ func("f", 1, 2), func("f", 4, 5), func("g", 7, 8) ] }));
        let mut finder = StubFinder::default();
        finder.add("a.py", "f", "a.py", 8);
        meta.parse_reference(&finder);

        let hierarchy = meta.to_hierarchy_json(true);
        let objects = hierarchy["a.py"].as_array().unwrap();
        let g = objects.iter().find(|o| o["name"] == "g").unwrap();
        assert_eq!(g["reference_who"], json!(["a.py/f", "a.py/f_0"]));
        assert_eq!(g["special_reference_type"], json!([false, false]));
        assert_eq!(g["item_status"], json!("doc_has_not_been_generated"));
        assert_eq!(g["type"], json!("FunctionDef"));
    }

    #[test]
    fn test_up_to_date_node_excluded_after_reload() {
        let mut meta = meta_from(json!({ "a.py": [ func("x", 1, 2), func("y", 4, 5) ] }));
        let x = meta.tree.find_path("a.py/x").unwrap();
        meta.tree.get_mut(x).status = ItemStatus::UpToDate;
        meta.tree.get_mut(x).md_content.push("x doc".into());

        let dir = TempDir::new().unwrap();
        meta.checkpoint(dir.path(), true).unwrap();

        let mut loaded = MetaInfo::from_checkpoint_path(dir.path(), None).unwrap();
        let plan = loaded.get_task_manager(|tree, id| need_to_generate(tree, id, &[]));

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tasks[&0].full_name, "a.py/y");
        let x = loaded.tree.find_path("a.py/x").unwrap();
        assert_eq!(loaded.tree.get(x).task_id, None);
        assert_eq!(loaded.tree.get(x).latest_doc(), Some("x doc"));
    }

    #[test]
    fn test_missing_or_corrupt_checkpoint_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            MetaInfo::from_checkpoint_path(dir.path(), None),
            Err(CheckpointError::IoError(..))
        ));

        fs::write(dir.path().join(HIERARCHY_FILE), "{ not json").unwrap();
        assert!(matches!(
            MetaInfo::from_checkpoint_path(dir.path(), None),
            Err(CheckpointError::ParseError(..))
        ));

        fs::write(dir.path().join(HIERARCHY_FILE), "{}").unwrap();
        assert!(matches!(
            MetaInfo::from_checkpoint_path(dir.path(), None),
            Err(CheckpointError::IoError(..))
        ));

        fs::write(dir.path().join(META_FILE), r#"{"doc_version": ""}"#).unwrap();
        assert!(matches!(
            MetaInfo::from_checkpoint_path(dir.path(), None),
            Err(CheckpointError::ParseError(..))
        ));

        fs::write(dir.path().join(HIERARCHY_FILE), "[]").unwrap();
        assert!(matches!(
            MetaInfo::from_checkpoint_path(dir.path(), None),
            Err(CheckpointError::InvalidLayout(..))
        ));
    }

    #[test]
    fn test_reconcile_carries_docs_and_records_deletions() {
        let mut older = meta_from(json!({
            "a.py": [
                with_code(func("f", 1, 2), "def f():\n    pass\n"),
                with_code(func("g", 4, 5), "def g():\n    f()\n"),
                json!({"type": "ClassDef", "name": "h", "md_content": [], "code_start_line": 7, "code_end_line": 9}),
                func("k", 11, 12),
            ],
        }));
        for name in ["a.py/f", "a.py/g", "a.py/h", "a.py/k"] {
            let id = older.tree.find_path(name).unwrap();
            let item = older.tree.get_mut(id);
            item.status = ItemStatus::UpToDate;
            item.md_content = vec![format!("doc of {}", name)];
        }

        let mut current = meta_from(json!({
            "a.py": [
                with_code(func("f", 1, 2), "def f():\n    return 1\n"),
                with_code(func("g", 4, 5), "def g():\n    f()\n"),
                func("h", 7, 9),
            ],
        }));
        current.load_doc_from_older_meta(&older);

        let f = current.tree.find_path("a.py/f").unwrap();
        let g = current.tree.find_path("a.py/g").unwrap();
        let h = current.tree.find_path("a.py/h").unwrap();
        assert_eq!(current.tree.get(f).status, ItemStatus::CodeChanged);
        assert_eq!(current.tree.get(f).latest_doc(), Some("doc of a.py/f"));
        assert_eq!(current.tree.get(g).status, ItemStatus::UpToDate);
        assert_eq!(current.tree.get(h).status, ItemStatus::NotGenerated);
        assert!(current.tree.get(h).md_content.is_empty());

        assert_eq!(
            current.deleted_items_from_older_meta,
            vec![
                vec!["a.py/h".to_string(), "ClassDef".to_string()],
                vec!["a.py/k".to_string(), "FunctionDef".to_string()],
            ]
        );
    }

    #[test]
    fn test_referencer_changes_are_marked() {
        let mut older = meta_from(json!({
            "a.py": [ func("f", 1, 2), func("z", 4, 5), func("g", 7, 8), func("h", 10, 11) ],
        }));
        for (name, refs) in [("a.py/f", vec!["a.py/g"]), ("a.py/z", vec!["a.py/g", "a.py/h"])] {
            let id = older.tree.find_path(name).unwrap();
            let item = older.tree.get_mut(id);
            item.status = ItemStatus::UpToDate;
            item.who_reference_me_name_list = refs.into_iter().map(String::from).collect();
        }

        let mut current = meta_from(json!({
            "a.py": [ func("f", 1, 2), func("z", 4, 5), func("g", 7, 8), func("h", 10, 11) ],
        }));
        current.load_doc_from_older_meta(&older);

        let mut finder = StubFinder::default();
        finder.add("a.py", "f", "a.py", 8);
        finder.add("a.py", "f", "a.py", 11);
        finder.add("a.py", "z", "a.py", 8);
        current.parse_reference(&finder);
        current.mark_referencer_changes(&older);

        let f = current.tree.find_path("a.py/f").unwrap();
        let z = current.tree.find_path("a.py/z").unwrap();
        assert_eq!(current.tree.get(f).status, ItemStatus::ReferencerAdded);
        assert_eq!(current.tree.get(z).status, ItemStatus::ReferencerMissing);
        assert!(current.deleted_items_from_older_meta.is_empty());
    }
}
