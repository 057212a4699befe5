//! 代码分析器
//!
//! 对象树的外部协作方：仓库扫描、Python 结构提取与文本引用解析

pub mod python;
pub mod references;
pub mod scanner;

pub use references::TextualReferenceFinder;
pub use scanner::{RepoScanner, ScanError};
