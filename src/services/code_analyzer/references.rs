//! 文本引用解析
//!
//! 按整词匹配在缓存的源码行中查找符号出现的位置

use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use tracing::debug;

use super::scanner::{RepoScanner, ScanError};
use crate::services::doc_meta::reference::{
    ReferenceError, ReferenceFinder, ReferenceQuery, ReferenceScope, ReferenceSite,
};

/// 基于文本匹配的引用解析器
#[derive(Debug, Clone, Default)]
pub struct TextualReferenceFinder {
    /// 相对路径 -> 源码行
    files: BTreeMap<String, Vec<String>>,
}

impl TextualReferenceFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取扫描器发现的全部源文件
    pub fn from_repo(scanner: &RepoScanner) -> Result<Self, ScanError> {
        let mut finder = Self::new();
        for relative in scanner.collect_files()? {
            let abs_path = scanner.root().join(&relative);
            match fs::read_to_string(&abs_path) {
                Ok(content) => finder.insert_file(relative, &content),
                Err(e) => debug!("Skipping unreadable file {}: {}", abs_path.display(), e),
            }
        }
        Ok(finder)
    }

    pub fn insert_file(&mut self, relative: impl Into<String>, content: &str) {
        self.files
            .insert(relative.into(), content.lines().map(str::to_string).collect());
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl ReferenceFinder for TextualReferenceFinder {
    fn find_references(&self, query: &ReferenceQuery<'_>) -> Result<Vec<ReferenceSite>, ReferenceError> {
        if !self.files.contains_key(query.file_path) {
            return Err(ReferenceError::UnknownFile(query.file_path.to_string()));
        }
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(query.name)))
            .map_err(|e| ReferenceError::Resolver(e.to_string()))?;

        let targets: Vec<(&String, &Vec<String>)> = match query.scope {
            ReferenceScope::File => self.files.get_key_value(query.file_path).into_iter().collect(),
            ReferenceScope::Global => self.files.iter().collect(),
        };

        let mut sites = Vec::new();
        for (file_path, lines) in targets {
            for (idx, line) in lines.iter().enumerate() {
                let line_no = idx + 1;
                if file_path == query.file_path && line_no == query.line {
                    continue;
                }
                let code = match line.find('#') {
                    Some(pos) => &line[..pos],
                    None => line.as_str(),
                };
                for m in pattern.find_iter(code) {
                    sites.push(ReferenceSite {
                        file_path: file_path.clone(),
                        line: line_no,
                        column: code[..m.start()].chars().count(),
                    });
                }
            }
        }
        Ok(sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn query<'a>(file_path: &'a str, name: &'a str, line: usize, scope: ReferenceScope) -> ReferenceQuery<'a> {
        ReferenceQuery {
            repo_root: Path::new("/repo"),
            file_path,
            name,
            line,
            column: 4,
            scope,
        }
    }

    fn finder() -> TextualReferenceFinder {
        let mut finder = TextualReferenceFinder::new();
        finder.insert_file("a.py", "def f():\n    pass\n\ndef g():\n    f()  # call f\n# f in a comment\nfoo = 1\n");
        finder.insert_file("b.py", "from a import f\n\ndef h():\n    return f() + f()\n");
        finder
    }

    #[test]
    fn test_file_scope_matches_whole_words_only() {
        let sites = finder()
            .find_references(&query("a.py", "f", 1, ReferenceScope::File))
            .unwrap();
        assert_eq!(
            sites,
            vec![ReferenceSite {
                file_path: "a.py".into(),
                line: 5,
                column: 4
            }]
        );
    }

    #[test]
    fn test_global_scope_searches_every_file() {
        let sites = finder()
            .find_references(&query("a.py", "f", 1, ReferenceScope::Global))
            .unwrap();
        let located: Vec<(&str, usize, usize)> = sites
            .iter()
            .map(|s| (s.file_path.as_str(), s.line, s.column))
            .collect();
        assert_eq!(
            located,
            vec![("a.py", 5, 4), ("b.py", 1, 14), ("b.py", 4, 11), ("b.py", 4, 17)]
        );
    }

    #[test]
    fn test_unknown_file_is_an_error() {
        let result = finder().find_references(&query("missing.py", "f", 1, ReferenceScope::Global));
        assert!(matches!(result, Err(ReferenceError::UnknownFile(_))));
    }
}
