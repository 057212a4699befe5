//! 文档对象类型定义
//!
//! 定义对象树节点、节点类型、文档状态以及解析器描述符的访问方法

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 节点在对象树 arena 中的索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub(crate) usize);

impl ItemId {
    /// 获取原始索引
    pub fn index(self) -> usize {
        self.0
    }
}

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// 仓库根节点
    Repo,
    /// 目录
    Dir,
    /// 源文件
    File,
    /// 类定义
    Class,
    /// 类方法
    ClassFunction,
    /// 顶层函数
    Function,
    /// 嵌套函数
    SubFunction,
    /// 全局变量
    GlobalVar,
}

impl ItemKind {
    /// 序列化到 project_hierarchy.json 的 `type` 字段
    pub fn to_type_str(self) -> &'static str {
        match self {
            ItemKind::Class => "ClassDef",
            ItemKind::Function | ItemKind::ClassFunction | ItemKind::SubFunction => "FunctionDef",
            ItemKind::Repo => "_repo",
            ItemKind::Dir => "_dir",
            ItemKind::File => "_file",
            ItemKind::GlobalVar => "_global_var",
        }
    }

    /// 根据描述符的 `type` 字段得到初始类型（函数的最终类型在挂载父节点后确定）
    pub fn from_descriptor_type(type_str: &str) -> Self {
        match type_str {
            "ClassDef" => ItemKind::Class,
            "FunctionDef" | "AsyncFunctionDef" => ItemKind::Function,
            _ => ItemKind::GlobalVar,
        }
    }

    /// 是否为函数类节点
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            ItemKind::Function | ItemKind::ClassFunction | ItemKind::SubFunction
        )
    }

    /// 是否为非代码节点（仓库、目录、文件）
    pub fn is_container(self) -> bool {
        matches!(self, ItemKind::Repo | ItemKind::Dir | ItemKind::File)
    }
}

/// 文档状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemStatus {
    /// 文档已是最新
    UpToDate,
    /// 文档尚未生成
    #[default]
    NotGenerated,
    /// 代码已变更
    CodeChanged,
    /// 新增了引用者
    ReferencerAdded,
    /// 原有引用者已不存在
    ReferencerMissing,
}

impl ItemStatus {
    /// 持久化使用的名称
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::UpToDate => "doc_up_to_date",
            ItemStatus::NotGenerated => "doc_has_not_been_generated",
            ItemStatus::CodeChanged => "code_changed",
            ItemStatus::ReferencerAdded => "add_new_referencer",
            ItemStatus::ReferencerMissing => "referencer_not_exist",
        }
    }

    /// 从持久化名称解析
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "doc_up_to_date" => Some(ItemStatus::UpToDate),
            "doc_has_not_been_generated" => Some(ItemStatus::NotGenerated),
            "code_changed" => Some(ItemStatus::CodeChanged),
            "add_new_referencer" => Some(ItemStatus::ReferencerAdded),
            "referencer_not_exist" => Some(ItemStatus::ReferencerMissing),
            _ => None,
        }
    }
}

/// 白名单条目：限定只处理指定文件中的指定对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteListEntry {
    pub file_path: String,
    pub id_text: String,
}

/// 对象树节点
#[derive(Debug, Clone)]
pub struct DocItem {
    pub kind: ItemKind,
    pub status: ItemStatus,
    /// 声明名称（重名时与父节点 children 中的键不同）
    pub obj_name: String,
    /// 起始行（1-based，非代码节点为 -1）
    pub code_start_line: i64,
    /// 结束行（包含）
    pub code_end_line: i64,
    /// 已生成的文档，最后一条为当前版本
    pub md_content: Vec<String>,
    /// 解析器给出的原始描述符，未知字段原样保留
    pub content: Map<String, Value>,
    /// 子节点：槽位名 -> 节点，保持插入顺序
    pub children: IndexMap<String, ItemId>,
    pub parent: Option<ItemId>,
    /// 叶子为 0，否则为 1 + 子节点最大深度
    pub depth: usize,
    /// 从根到自身的路径（包含自身）
    pub tree_path: Vec<ItemId>,
    /// 我引用了谁
    pub reference_who: Vec<ItemId>,
    /// 谁引用了我
    pub who_reference_me: Vec<ItemId>,
    /// 与 reference_who 平行：引用点是否就在引用者自身的定义行
    pub special_reference_type: Vec<bool>,
    /// 从断点读入的引用名称（未重新计算引用时原样写回）
    pub reference_who_name_list: Vec<String>,
    pub who_reference_me_name_list: Vec<String>,
    /// 调度后的任务编号
    pub task_id: Option<usize>,
}

impl DocItem {
    /// 创建非代码节点（仓库、目录、文件）
    pub fn container(kind: ItemKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            status: ItemStatus::NotGenerated,
            obj_name: name.into(),
            code_start_line: -1,
            code_end_line: -1,
            md_content: Vec::new(),
            content: Map::new(),
            children: IndexMap::new(),
            parent: None,
            depth: 0,
            tree_path: Vec::new(),
            reference_who: Vec::new(),
            who_reference_me: Vec::new(),
            special_reference_type: Vec::new(),
            reference_who_name_list: Vec::new(),
            who_reference_me_name_list: Vec::new(),
            task_id: None,
        }
    }

    /// 根据已校验的描述符创建代码对象节点
    pub fn from_descriptor(descriptor: ObjectDescriptor) -> Self {
        let kind = ItemKind::from_descriptor_type(&descriptor.type_str);
        let mut item = Self::container(kind, descriptor.name);
        item.code_start_line = descriptor.start_line;
        item.code_end_line = descriptor.end_line;
        item.md_content = descriptor.md_content;
        item.status = descriptor.status.unwrap_or_default();
        item.reference_who_name_list = descriptor.reference_who;
        item.who_reference_me_name_list = descriptor.who_reference_me;
        item.special_reference_type = descriptor.special_reference_type;
        item.content = descriptor.raw;
        item
    }

    /// 跨度宽度
    pub fn span_width(&self) -> i64 {
        self.code_end_line - self.code_start_line
    }

    /// 当前跨度是否严格包含 `other`（跨度相同不算包含）
    pub fn span_contains(&self, other: &DocItem) -> bool {
        if self.code_start_line == other.code_start_line && self.code_end_line == other.code_end_line {
            return false;
        }
        self.code_start_line <= other.code_start_line && self.code_end_line >= other.code_end_line
    }

    /// 行号是否落在跨度内
    pub fn covers_line(&self, line: i64) -> bool {
        self.code_start_line <= line && line <= self.code_end_line
    }

    /// 名称所在列（缺省为 0）
    pub fn name_column(&self) -> usize {
        self.content
            .get("name_column")
            .and_then(Value::as_i64)
            .filter(|c| *c >= 0)
            .map(|c| c as usize)
            .unwrap_or(0)
    }

    /// 描述符中的参数列表
    pub fn params(&self) -> Vec<String> {
        self.content
            .get("params")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 描述符中的源码片段
    pub fn code_content(&self) -> Option<&str> {
        self.content.get("code_content").and_then(Value::as_str)
    }

    /// 最新一版文档
    pub fn latest_doc(&self) -> Option<&str> {
        self.md_content.last().map(String::as_str)
    }
}

/// 解析器为单个代码对象给出的描述符（已校验）
#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    pub type_str: String,
    pub name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub md_content: Vec<String>,
    pub status: Option<ItemStatus>,
    pub reference_who: Vec<String>,
    pub who_reference_me: Vec<String>,
    pub special_reference_type: Vec<bool>,
    /// 完整原始 JSON 对象
    pub raw: Map<String, Value>,
}

/// 描述符校验错误
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor is not a JSON object")]
    NotAnObject,

    #[error("descriptor is missing field `{0}`")]
    MissingField(&'static str),

    #[error("descriptor field `{0}` has an invalid value")]
    InvalidField(&'static str),
}

impl ObjectDescriptor {
    /// 从原始 JSON 值校验并提取描述符
    pub fn from_value(value: &Value) -> Result<Self, DescriptorError> {
        let raw = value.as_object().ok_or(DescriptorError::NotAnObject)?.clone();

        let name = required_str(&raw, "name")?;
        let type_str = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let start_line = required_i64(&raw, "code_start_line")?;
        let end_line = required_i64(&raw, "code_end_line")?;
        if end_line < start_line {
            return Err(DescriptorError::InvalidField("code_end_line"));
        }

        let md_content = string_list(&raw, "md_content");
        let status = match raw.get("item_status") {
            Some(Value::String(s)) => {
                Some(ItemStatus::parse(s).ok_or(DescriptorError::InvalidField("item_status"))?)
            }
            Some(_) => return Err(DescriptorError::InvalidField("item_status")),
            None => None,
        };
        let special_reference_type = raw
            .get("special_reference_type")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_bool).collect())
            .unwrap_or_default();

        Ok(Self {
            type_str,
            name,
            start_line,
            end_line,
            md_content,
            status,
            reference_who: string_list(&raw, "reference_who"),
            who_reference_me: string_list(&raw, "who_reference_me"),
            special_reference_type,
            raw,
        })
    }
}

fn required_str(raw: &Map<String, Value>, key: &'static str) -> Result<String, DescriptorError> {
    match raw.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DescriptorError::InvalidField(key)),
        None => Err(DescriptorError::MissingField(key)),
    }
}

fn required_i64(raw: &Map<String, Value>, key: &'static str) -> Result<i64, DescriptorError> {
    match raw.get(key) {
        Some(v) => v.as_i64().ok_or(DescriptorError::InvalidField(key)),
        None => Err(DescriptorError::MissingField(key)),
    }
}

fn string_list(raw: &Map<String, Value>, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
