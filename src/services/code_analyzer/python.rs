//! Python 结构提取
//!
//! 基于缩进识别 `class` / `def` / `async def` 定义及其行号跨度

use once_cell::sync::Lazy;
use regex::Regex;

// 预编译正则表达式
static RE_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(class|async\s+def|def)\s+([A-Za-z_]\w*)").unwrap()
});
static RE_TRIPLE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""""|'''"#).unwrap());

/// 解析出的代码对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObject {
    /// `ClassDef` / `FunctionDef` / `AsyncFunctionDef`
    pub kind: String,
    pub name: String,
    /// 1-based
    pub start_line: usize,
    /// 1-based，包含
    pub end_line: usize,
    pub params: Vec<String>,
    /// 名称在起始行中的列（0-based，按字符计）
    pub name_column: usize,
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// 标记每一行是否以三引号字符串的中间部分开头
fn string_continuation_mask(lines: &[&str]) -> Vec<bool> {
    let mut mask = Vec::with_capacity(lines.len());
    let mut open: Option<String> = None;
    for line in lines {
        mask.push(open.is_some());
        for m in RE_TRIPLE_QUOTE.find_iter(line) {
            match &open {
                Some(delim) if delim == m.as_str() => open = None,
                Some(_) => {}
                None => open = Some(m.as_str().to_string()),
            }
        }
    }
    mask
}

/// 从名称后的 `(` 开始收集签名，返回 (参数列表文本, 签名结束行下标)
fn collect_signature(lines: &[&str], start: usize, after_name: usize) -> (String, usize) {
    let mut depth = 0i32;
    let mut text = String::new();
    let mut started = false;

    for (idx, line) in lines.iter().enumerate().skip(start) {
        let segment = if idx == start { &line[after_name..] } else { line };
        for ch in segment.chars() {
            match ch {
                '(' | '[' | '{' => {
                    if started || ch == '(' {
                        if started {
                            text.push(ch);
                        }
                        started = true;
                        depth += 1;
                    }
                }
                ')' | ']' | '}' if started => {
                    depth -= 1;
                    if depth == 0 {
                        return (text, idx);
                    }
                    text.push(ch);
                }
                ':' if !started => return (text, idx),
                _ if started => text.push(ch),
                _ => {}
            }
        }
        if started {
            text.push(' ');
        }
    }
    (text, lines.len().saturating_sub(1))
}

/// 拆分顶层逗号并去掉注解、默认值与 `*` / `**`
fn split_params(signature: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in signature.chars() {
        match ch {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => pieces.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    pieces.push(current);

    pieces
        .iter()
        .filter_map(|piece| {
            let piece = piece.trim().trim_start_matches('*');
            let name = piece.split(|c: char| c == ':' || c == '=').next().unwrap_or("").trim();
            if name.is_empty() || name == "/" {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

/// 解析 Python 源码，输出按起始行排序
pub fn parse_file(content: &str) -> Vec<ParsedObject> {
    let lines: Vec<&str> = content.lines().collect();
    let in_string = string_continuation_mask(&lines);
    let mut objects = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if in_string[i] {
            continue;
        }
        let Some(caps) = RE_DEF.captures(line) else { continue };
        let (Some(keyword), Some(name)) = (caps.get(2), caps.get(3)) else { continue };

        let def_indent = indent_of(line);
        let kind = match keyword.as_str() {
            "class" => "ClassDef",
            "def" => "FunctionDef",
            _ => "AsyncFunctionDef",
        };

        let (signature, signature_end) = collect_signature(&lines, i, name.end());
        let params = if kind == "ClassDef" {
            Vec::new()
        } else {
            split_params(&signature)
        };

        let mut end = signature_end;
        for (j, body_line) in lines.iter().enumerate().skip(signature_end + 1) {
            if in_string[j] {
                end = j;
                continue;
            }
            let trimmed = body_line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let indent = indent_of(body_line);
            if trimmed.starts_with('#') {
                if indent > def_indent {
                    end = j;
                }
                continue;
            }
            if indent <= def_indent {
                break;
            }
            end = j;
        }

        objects.push(ParsedObject {
            kind: kind.to_string(),
            name: name.as_str().to_string(),
            start_line: i + 1,
            end_line: end + 1,
            params,
            name_column: line[..name.start()].chars().count(),
        });
    }

    objects
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import os


class User(Base):
    """A user.

def not_a_function():
    """

    def __init__(self, name: str, *args, age=3, **kwargs):
        self.name = name

        # trailing comment
    async def save(self,
                   force: bool = False) -> None:
        def inner(x):
            return x
        return inner(force)


def helper(a, b: dict[str, int] = {}, /, *, c):
    pass
# top level comment
value = helper(1, 2, c=3)
"#;

    fn find<'a>(objects: &'a [ParsedObject], name: &str) -> &'a ParsedObject {
        objects.iter().find(|o| o.name == name).unwrap()
    }

    #[test]
    fn test_parse_nested_definitions() {
        let objects = parse_file(SAMPLE);
        let names: Vec<&str> = objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["User", "__init__", "save", "inner", "helper"]);

        let user = find(&objects, "User");
        assert_eq!(user.kind, "ClassDef");
        assert_eq!((user.start_line, user.end_line), (4, 18));
        assert_eq!(user.name_column, 6);

        let init = find(&objects, "__init__");
        assert_eq!((init.start_line, init.end_line), (10, 13));
        assert_eq!(init.params, vec!["self", "name", "args", "age", "kwargs"]);

        let save = find(&objects, "save");
        assert_eq!(save.kind, "AsyncFunctionDef");
        assert_eq!((save.start_line, save.end_line), (14, 18));
        assert_eq!(save.params, vec!["self", "force"]);

        let inner = find(&objects, "inner");
        assert_eq!((inner.start_line, inner.end_line), (16, 17));
        assert_eq!(inner.name_column, 12);
    }

    #[test]
    fn test_parse_signature_edge_cases() {
        let objects = parse_file(SAMPLE);
        let helper = find(&objects, "helper");
        assert_eq!((helper.start_line, helper.end_line), (21, 22));
        assert_eq!(helper.params, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_one_line_definitions() {
        let objects = parse_file("def f(): pass\n\ndef g():\n    f()\n");
        assert_eq!(objects.len(), 2);
        assert_eq!((objects[0].start_line, objects[0].end_line), (1, 1));
        assert_eq!((objects[1].start_line, objects[1].end_line), (3, 4));
        assert!(objects[0].params.is_empty());
    }
}
