//! 文档元信息
//!
//! 对象树、双向引用图、任务调度与断点存储

pub mod meta_info;
pub mod reference;
pub mod scheduler;
pub mod tree;
pub mod types;

pub use meta_info::{CheckpointError, MetaInfo};
pub use reference::{ReferenceError, ReferenceFinder, ReferenceQuery, ReferenceScope, ReferenceSite};
pub use scheduler::{need_to_generate, TaskInfo, TaskPlan};
pub use tree::{DocTree, TreeBuilder};
pub use types::{DocItem, ItemId, ItemKind, ItemStatus, WhiteListEntry};
