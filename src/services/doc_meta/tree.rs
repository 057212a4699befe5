//! 对象树
//!
//! 以 arena（扁平 Vec + 索引）保存 仓库 → 目录 → 文件 → 类/函数 的层级结构，
//! 父节点与引用关系都以索引表示

use serde_json::{Map, Value};
use std::path::Path;
use tracing::{error, info, warn};

use super::types::{DescriptorError, DocItem, ItemId, ItemKind, ObjectDescriptor};

/// 根节点名称
pub const REPO_ROOT_NAME: &str = "full_repo";

/// 对象树
#[derive(Debug, Clone)]
pub struct DocTree {
    items: Vec<DocItem>,
}

impl Default for DocTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocTree {
    /// 创建只有仓库根节点的空树
    pub fn new() -> Self {
        let mut root = DocItem::container(ItemKind::Repo, REPO_ROOT_NAME);
        root.tree_path = vec![ItemId(0)];
        Self { items: vec![root] }
    }

    pub fn root(&self) -> ItemId {
        ItemId(0)
    }

    pub fn get(&self, id: ItemId) -> &DocItem {
        &self.items[id.0]
    }

    pub fn get_mut(&mut self, id: ItemId) -> &mut DocItem {
        &mut self.items[id.0]
    }

    /// 节点总数（包含根节点）
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 树中是否还没有任何文件节点
    pub fn has_no_files(&self) -> bool {
        !self.items.iter().any(|item| item.kind == ItemKind::File)
    }

    /// 所有节点索引（arena 顺序）
    pub fn ids(&self) -> impl Iterator<Item = ItemId> {
        (0..self.items.len()).map(ItemId)
    }

    fn push(&mut self, item: DocItem) -> ItemId {
        self.items.push(item);
        ItemId(self.items.len() - 1)
    }

    /// 将 `child` 挂到 `parent` 下，重名时改名为 `name_<n>`，返回实际槽位名
    fn attach(&mut self, parent: ItemId, child: ItemId) -> String {
        let declared = self.items[child.0].obj_name.clone();
        let mut slot = declared.clone();
        if self.items[parent.0].children.contains_key(&slot) {
            let mut n = 0;
            while self.items[parent.0]
                .children
                .contains_key(&format!("{}_{}", declared, n))
            {
                n += 1;
            }
            slot = format!("{}_{}", declared, n);
        }
        self.items[child.0].parent = Some(parent);
        self.items[parent.0].children.insert(slot.clone(), child);
        slot
    }

    /// 获取或创建名为 `name` 的容器子节点
    fn ensure_container(&mut self, parent: ItemId, name: &str, kind: ItemKind) -> ItemId {
        if let Some(&existing) = self.items[parent.0].children.get(name) {
            return existing;
        }
        let id = self.push(DocItem::container(kind, name));
        self.items[id.0].parent = Some(parent);
        self.items[parent.0].children.insert(name.to_string(), id);
        id
    }

    /// 从根节点按槽位名路径查找节点
    pub fn find(&self, path: &[&str]) -> Option<ItemId> {
        let mut now = self.root();
        for part in path {
            now = *self.items[now.0].children.get(*part)?;
        }
        Some(now)
    }

    /// 按 `/` 分隔的相对路径查找节点
    pub fn find_path(&self, relative_path: &str) -> Option<ItemId> {
        let parts: Vec<&str> = relative_path.split('/').collect();
        self.find(&parts)
    }

    /// 节点在父节点 children 中的键（根节点返回其名称）
    pub fn slot_name(&self, id: ItemId) -> &str {
        let item = &self.items[id.0];
        match item.parent {
            Some(parent) => self.items[parent.0]
                .children
                .iter()
                .find(|(_, &child)| child == id)
                .map(|(name, _)| name.as_str())
                .unwrap_or(item.obj_name.as_str()),
            None => item.obj_name.as_str(),
        }
    }

    /// 从仓库根往下的声明名称路径，以 `/` 分隔（不含根节点）
    pub fn full_name(&self, id: ItemId) -> String {
        self.name_chain(id, false)
    }

    /// 与 `full_name` 相同，但每一级使用槽位名，反映重名改名后的键
    pub fn strict_full_name(&self, id: ItemId) -> String {
        self.name_chain(id, true)
    }

    fn name_chain(&self, id: ItemId, strict: bool) -> String {
        if self.items[id.0].parent.is_none() {
            return self.items[id.0].obj_name.clone();
        }
        let mut names = Vec::new();
        let mut now = Some(id);
        while let Some(current) = now {
            let item = &self.items[current.0];
            if item.parent.is_none() {
                break;
            }
            if strict {
                names.push(self.slot_name(current).to_string());
            } else {
                names.push(item.obj_name.clone());
            }
            now = item.parent;
        }
        names.reverse();
        names.join("/")
    }

    /// 节点所在的文件节点（文件节点返回自身）
    pub fn file_of(&self, id: ItemId) -> Option<ItemId> {
        let mut now = Some(id);
        while let Some(current) = now {
            if self.items[current.0].kind == ItemKind::File {
                return Some(current);
            }
            now = self.items[current.0].parent;
        }
        None
    }

    /// 节点所在文件的相对路径，无文件祖先时返回自身全名
    pub fn file_name(&self, id: ItemId) -> String {
        match self.file_of(id) {
            Some(file) => self.full_name(file),
            None => self.full_name(id),
        }
    }

    /// 先序遍历，`id` 在第一个
    pub fn travel_list(&self, id: ItemId) -> Vec<ItemId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            result.push(current);
            for &child in self.items[current.0].children.values().rev() {
                stack.push(child);
            }
        }
        result
    }

    /// 所有文件节点（先序）
    pub fn all_files(&self) -> Vec<ItemId> {
        self.travel_list(self.root())
            .into_iter()
            .filter(|id| self.items[id.0].kind == ItemKind::File)
            .collect()
    }

    /// `a` 与 `b` 之间是否存在祖先/后代关系（包括相同节点）
    pub fn has_ancestor_relation(&self, a: ItemId, b: ItemId) -> bool {
        self.items[a.0].tree_path.contains(&b) || self.items[b.0].tree_path.contains(&a)
    }

    /// 从文件节点往下找覆盖 `line` 的最小对象；找不到更小的就返回当前节点
    pub fn find_obj_with_lineno(&self, file: ItemId, line: i64) -> ItemId {
        let mut now = file;
        loop {
            let next = self.items[now.0]
                .children
                .values()
                .copied()
                .find(|&child| self.items[child.0].covers_line(line));
            match next {
                Some(child) => now = child,
                None => return now,
            }
        }
    }

    /// 自底向上重新计算深度
    pub fn check_depth(&mut self) {
        let order = self.travel_list(self.root());
        for &id in order.iter().rev() {
            let depth = self.items[id.0]
                .children
                .values()
                .map(|child| self.items[child.0].depth + 1)
                .max()
                .unwrap_or(0);
            self.items[id.0].depth = depth;
        }
    }

    /// 记录每个节点从根开始的路径
    pub fn parse_tree_path(&mut self) {
        let order = self.travel_list(self.root());
        for id in order {
            let mut path = match self.items[id.0].parent {
                Some(parent) => self.items[parent.0].tree_path.clone(),
                None => Vec::new(),
            };
            path.push(id);
            self.items[id.0].tree_path = path;
        }
    }
}

/// 构建单个文件子树时的错误
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("object list of {0} is not a sequence")]
    NotAList(String),

    #[error("descriptor #{index} of {file} is malformed: {source}")]
    Descriptor {
        file: String,
        index: usize,
        #[source]
        source: DescriptorError,
    },
}

/// 对象树构建器
///
/// 输入 `{相对文件路径: [对象描述符...]}`，新解析的结果与断点中的
/// project_hierarchy.json 使用同一格式
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder<'a> {
    /// 设置后会跳过磁盘上已不存在或为空的文件
    repo_root: Option<&'a Path>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new() -> Self {
        Self { repo_root: None }
    }

    pub fn with_repo_root(repo_root: &'a Path) -> Self {
        Self {
            repo_root: Some(repo_root),
        }
    }

    /// 构建对象树
    pub fn build(&self, hierarchy: &Map<String, Value>) -> DocTree {
        let mut tree = DocTree::new();

        for (file_name, file_content) in hierarchy {
            if let Some(root) = self.repo_root {
                let abs_path = root.join(file_name);
                match std::fs::metadata(&abs_path) {
                    Err(_) => {
                        info!("deleted content: {}", file_name);
                        continue;
                    }
                    Ok(meta) if meta.len() == 0 => {
                        info!("blank content: {}", file_name);
                        continue;
                    }
                    Ok(_) => {}
                }
            }

            if let Err(e) = self.build_file(&mut tree, file_name, file_content) {
                error!("Skipping file subtree: {}", e);
            }
        }

        tree.parse_tree_path();
        tree.check_depth();
        tree
    }

    fn build_file(
        &self,
        tree: &mut DocTree,
        file_name: &str,
        file_content: &Value,
    ) -> Result<(), TreeError> {
        let values = file_content
            .as_array()
            .ok_or_else(|| TreeError::NotAList(file_name.to_string()))?;

        // 先校验全部描述符，避免出错时留下半棵子树
        let descriptors = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                ObjectDescriptor::from_value(value).map_err(|source| TreeError::Descriptor {
                    file: file_name.to_string(),
                    index,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let parts: Vec<&str> = file_name.split('/').collect();
        let mut now = tree.root();
        for dir in &parts[..parts.len() - 1] {
            now = tree.ensure_container(now, dir, ItemKind::Dir);
        }
        let file_item = tree.ensure_container(now, parts[parts.len() - 1], ItemKind::File);

        let item_ids: Vec<ItemId> = descriptors
            .into_iter()
            .map(|d| tree.push(DocItem::from_descriptor(d)))
            .collect();

        for &id in &item_ids {
            let mut potential_father: Option<ItemId> = None;
            for &other in &item_ids {
                if !tree.get(other).span_contains(tree.get(id)) {
                    continue;
                }
                let better = match potential_father {
                    None => true,
                    Some(current) => tree.get(other).span_width() < tree.get(current).span_width(),
                };
                if better {
                    potential_father = Some(other);
                }
            }

            let father = potential_father.unwrap_or(file_item);
            let slot = tree.attach(father, id);
            let declared = &tree.get(id).obj_name;
            if &slot != declared {
                warn!(
                    "Name duplicate in {}: rename to {}->{}",
                    file_name, declared, slot
                );
            }
        }

        // 先序遍历保证父节点先于子节点确定类型
        for id in tree.travel_list(file_item) {
            if tree.get(id).kind != ItemKind::Function {
                continue;
            }
            let parent_kind = tree.get(id).parent.map(|p| tree.get(p).kind);
            let new_kind = match parent_kind {
                Some(ItemKind::Class) => ItemKind::ClassFunction,
                Some(kind) if kind.is_function_like() => ItemKind::SubFunction,
                _ => ItemKind::Function,
            };
            tree.get_mut(id).kind = new_kind;
        }

        Ok(())
    }
}
