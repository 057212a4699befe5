//! LLM Prompt 模板
//!
//! 为单个代码对象生成文档的 system / user Prompt

use super::generator::GenerationRequest;

/// system Prompt
pub const DOC_SYSTEM_PROMPT: &str = r#"You are an AI documentation assistant. Your task is to write documentation for one {object_kind} of a code repository so that readers understand what it does and how to use it.

The object is `{object_name}`, located at `{full_name}` (file `{file_path}`).
Its ancestors in the project hierarchy are: {ancestors}.

Source code of the object:
```python
{code_content}
```
{param_section}{return_section}
{referenced_section}
{referencer_section}
Please write the documentation in {language}, in Markdown, and keep it under {max_tokens} tokens. Start with a one-sentence description of the object's purpose, then describe its parameters, its behavior, and notes on usage. Describe only what the code shows, and do not invent behavior."#;

/// user Prompt
pub const DOC_USER_PROMPT: &str = "Write the documentation for `{object_name}` now. Reply in {language} with the documentation only.";

const REFERENCED_HEADER: &str = "The object calls or uses the following objects, with their documentation:";
const REFERENCER_HEADER: &str = "The object is used by the following objects:";

fn format_referenced(request: &GenerationRequest) -> String {
    if request.referenced_docs.is_empty() {
        return String::new();
    }
    let mut section = String::from(REFERENCED_HEADER);
    section.push('\n');
    for referenced in &request.referenced_docs {
        section.push_str(&format!(
            "- `{}`: {}\n",
            referenced.full_name,
            referenced.doc.as_deref().unwrap_or("(no documentation yet)")
        ));
    }
    section
}

fn format_referencers(request: &GenerationRequest) -> String {
    if request.referencer_names.is_empty() {
        return String::new();
    }
    let mut section = String::from(REFERENCER_HEADER);
    section.push('\n');
    for name in &request.referencer_names {
        section.push_str(&format!("- `{}`\n", name));
    }
    section
}

/// 格式化 system Prompt
pub fn format_doc_system_prompt(request: &GenerationRequest, language: &str, max_tokens: u32) -> String {
    let ancestors = if request.ancestors.is_empty() {
        "(none)".to_string()
    } else {
        request.ancestors.join(" -> ")
    };
    let param_section = if request.params.is_empty() {
        String::new()
    } else {
        format!("\nParameters: {}\n", request.params.join(", "))
    };
    let return_section = if request.have_return {
        "\nThe object returns a value; describe the return value.\n"
    } else {
        ""
    };

    let max_tokens = max_tokens.to_string();
    let referenced_section = format_referenced(request);
    let referencer_section = format_referencers(request);
    fill_template(
        DOC_SYSTEM_PROMPT,
        &[
            ("object_kind", request.kind_label()),
            ("object_name", request.obj_name.as_str()),
            ("full_name", request.full_name.as_str()),
            ("file_path", request.file_path.as_str()),
            ("ancestors", ancestors.as_str()),
            ("param_section", param_section.as_str()),
            ("return_section", return_section),
            ("referenced_section", referenced_section.as_str()),
            ("referencer_section", referencer_section.as_str()),
            ("language", language),
            ("max_tokens", max_tokens.as_str()),
            ("code_content", request.code_content.as_str()),
        ],
    )
}

/// 一次扫描完成所有 `{name}` 替换，填入的值不会再被替换
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let filled = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match filled {
            Some((value, close)) => {
                output.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                output.push('{');
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

/// 格式化 user Prompt
pub fn format_doc_user_prompt(request: &GenerationRequest, language: &str) -> String {
    fill_template(
        DOC_USER_PROMPT,
        &[("object_name", request.obj_name.as_str()), ("language", language)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::doc_generator::generator::ReferencedDoc;
    use crate::services::doc_meta::ItemKind;

    fn request() -> GenerationRequest {
        GenerationRequest {
            kind: ItemKind::ClassFunction,
            obj_name: "save".into(),
            full_name: "models.py/User/save".into(),
            file_path: "models.py".into(),
            code_content: "def save(self, force):\n    return {}\n".into(),
            params: vec!["self".into(), "force".into()],
            have_return: true,
            ancestors: vec!["models.py".into(), "User".into()],
            referenced_docs: vec![ReferencedDoc {
                full_name: "db.py/connect".into(),
                doc: Some("Opens a connection.".into()),
            }],
            referencer_names: vec!["main.py/main".into()],
        }
    }

    #[test]
    fn test_system_prompt_fills_every_placeholder() {
        let prompt = format_doc_system_prompt(&request(), "Chinese", 512);
        assert!(prompt.contains("class method"));
        assert!(prompt.contains("`models.py/User/save`"));
        assert!(prompt.contains("models.py -> User"));
        assert!(prompt.contains("Parameters: self, force"));
        assert!(prompt.contains("`db.py/connect`: Opens a connection."));
        assert!(prompt.contains("- `main.py/main`"));
        assert!(prompt.contains("in Chinese"));
        assert!(prompt.contains("under 512 tokens"));
        // 源码中的花括号原样保留
        assert!(prompt.contains("return {}"));
        assert!(!prompt.contains("{language}"));
    }

    #[test]
    fn test_optional_sections_are_omitted() {
        let mut req = request();
        req.params.clear();
        req.referenced_docs.clear();
        req.referencer_names.clear();
        req.have_return = false;
        let prompt = format_doc_system_prompt(&req, "English", 1024);
        assert!(!prompt.contains("Parameters:"));
        assert!(!prompt.contains(REFERENCED_HEADER));
        assert!(!prompt.contains(REFERENCER_HEADER));
        assert!(!prompt.contains("return value"));
    }

    #[test]
    fn test_inserted_text_is_not_substituted_again() {
        let mut req = request();
        req.referenced_docs[0].doc = Some("Uses {language} and {max_tokens} literally.".into());
        req.code_content = "def save(self):\n    return f\"{full_name}\"\n".into();
        let prompt = format_doc_system_prompt(&req, "Chinese", 512);
        assert!(prompt.contains("Uses {language} and {max_tokens} literally."));
        assert!(prompt.contains("return f\"{full_name}\""));
        assert!(prompt.contains("in Chinese"));
    }

    #[test]
    fn test_fill_template_leaves_unknown_braces() {
        let filled = fill_template("{a} {b} {unbalanced", &[("a", "{b}"), ("b", "x")]);
        assert_eq!(filled, "{b} x {unbalanced");
    }
}
