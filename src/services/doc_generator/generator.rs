//! 文档生成器
//!
//! 从对象树节点构造生成请求，并通过 LLM 生成单个对象的文档

use async_trait::async_trait;
use tracing::{debug, info};

use super::prompts;
use crate::llm::{ChatMessage, CompletionParams, LlmClient, LlmError};
use crate::services::doc_meta::{DocTree, ItemId, ItemKind};

/// 生成错误
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("LLM调用错误: {0}")]
    LlmError(#[from] LlmError),

    #[error("模型没有返回 {0} 的文档")]
    EmptyDocument(String),

    #[error("生成失败: {0}")]
    Generation(String),
}

/// 被引用对象及其最新文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedDoc {
    pub full_name: String,
    pub doc: Option<String>,
}

/// 单个对象的生成请求
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: ItemKind,
    pub obj_name: String,
    pub full_name: String,
    pub file_path: String,
    pub code_content: String,
    pub params: Vec<String>,
    pub have_return: bool,
    /// 从文件节点到父节点的名称
    pub ancestors: Vec<String>,
    /// reference_who 中各节点的最新文档
    pub referenced_docs: Vec<ReferencedDoc>,
    /// who_reference_me 中各节点的全名
    pub referencer_names: Vec<String>,
}

impl GenerationRequest {
    /// 从对象树中的节点构造请求
    pub fn from_tree(tree: &DocTree, id: ItemId) -> Self {
        let item = tree.get(id);
        let ancestors = item
            .tree_path
            .iter()
            .skip(1)
            .filter(|&&a| a != id)
            .map(|&a| tree.get(a).obj_name.clone())
            .collect();
        let referenced_docs = item
            .reference_who
            .iter()
            .map(|&r| ReferencedDoc {
                full_name: tree.full_name(r),
                doc: tree.get(r).latest_doc().map(str::to_string),
            })
            .collect();

        Self {
            kind: item.kind,
            obj_name: item.obj_name.clone(),
            full_name: tree.full_name(id),
            file_path: tree.file_name(id),
            code_content: item.code_content().unwrap_or_default().to_string(),
            params: item.params(),
            have_return: item
                .content
                .get("have_return")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ancestors,
            referenced_docs,
            referencer_names: item.who_reference_me.iter().map(|&r| tree.full_name(r)).collect(),
        }
    }

    /// Prompt 中使用的对象类别
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ItemKind::Class => "class",
            ItemKind::ClassFunction => "class method",
            ItemKind::Function => "function",
            ItemKind::SubFunction => "nested function",
            ItemKind::GlobalVar => "global variable",
            ItemKind::Repo => "repository",
            ItemKind::Dir => "directory",
            ItemKind::File => "file",
        }
    }
}

/// 文本生成接口
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError>;
}

/// 基于 OpenAI 兼容接口的文档生成器
pub struct LlmDocGenerator {
    client: LlmClient,
    params: CompletionParams,
    language: String,
    max_tokens: u32,
}

impl LlmDocGenerator {
    pub fn new(
        client: LlmClient,
        model: impl Into<String>,
        temperature: f64,
        language: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            params: CompletionParams::new(model)
                .with_temperature(temperature)
                .with_max_tokens(max_tokens),
            language: language.into(),
            max_tokens,
        }
    }

    /// 构造发送给模型的消息
    pub fn build_messages(&self, request: &GenerationRequest) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(prompts::format_doc_system_prompt(
                request,
                &self.language,
                self.max_tokens,
            )),
            ChatMessage::user(prompts::format_doc_user_prompt(request, &self.language)),
        ]
    }
}

#[async_trait]
impl TextGenerator for LlmDocGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        info!("Generating doc: {}", request.full_name);
        let messages = self.build_messages(request);
        let content = self.client.complete(messages, &self.params).await?;
        let doc = finish_document(&request.full_name, &content)?;
        debug!("Doc generated: {} ({} chars)", request.full_name, doc.len());
        Ok(doc)
    }
}

/// 去掉首尾空白，空白文档视为失败
fn finish_document(full_name: &str, content: &str) -> Result<String, GeneratorError> {
    let doc = content.trim();
    if doc.is_empty() {
        return Err(GeneratorError::EmptyDocument(full_name.to_string()));
    }
    Ok(doc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::doc_meta::reference::tests::func;
    use crate::llm::ChatRole;
    use crate::services::doc_meta::TreeBuilder;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_request_from_tree_collects_context() {
        let mut method = func("save", 3, 5);
        method["params"] = json!(["self", "force"]);
        method["have_return"] = json!(true);
        method["code_content"] = json!("def save(self, force):\n    return helper()\n");
        let hierarchy = json!({
            "pkg/models.py": [
                json!({"type": "ClassDef", "name": "User", "md_content": [], "code_start_line": 1, "code_end_line": 6}),
                method,
                func("helper", 8, 9),
            ],
        });
        let mut tree = TreeBuilder::new().build(hierarchy.as_object().unwrap());
        let save = tree.find_path("pkg/models.py/User/save").unwrap();
        let helper = tree.find_path("pkg/models.py/helper").unwrap();
        tree.get_mut(save).reference_who.push(helper);
        tree.get_mut(helper).who_reference_me.push(save);
        tree.get_mut(helper).md_content.push("helper doc".into());

        let request = GenerationRequest::from_tree(&tree, save);
        assert_eq!(request.kind, ItemKind::ClassFunction);
        assert_eq!(request.full_name, "pkg/models.py/User/save");
        assert_eq!(request.file_path, "pkg/models.py");
        assert_eq!(request.ancestors, vec!["pkg", "models.py", "User"]);
        assert_eq!(request.params, vec!["self", "force"]);
        assert!(request.have_return);
        assert_eq!(
            request.referenced_docs,
            vec![ReferencedDoc {
                full_name: "pkg/models.py/helper".into(),
                doc: Some("helper doc".into()),
            }]
        );

        let request = GenerationRequest::from_tree(&tree, helper);
        assert_eq!(request.referencer_names, vec!["pkg/models.py/User/save"]);
        assert_eq!(request.kind_label(), "function");
    }

    #[test]
    fn test_build_messages() {
        let client = LlmClient::new("sk-test", "https://api.openai.com", Duration::from_secs(5)).unwrap();
        let generator = LlmDocGenerator::new(client, "gpt-test", 0.2, "Chinese", 256);
        let request = GenerationRequest {
            kind: ItemKind::Function,
            obj_name: "f".into(),
            full_name: "a.py/f".into(),
            file_path: "a.py".into(),
            code_content: "def f():\n    pass\n".into(),
            params: Vec::new(),
            have_return: false,
            ancestors: vec!["a.py".into()],
            referenced_docs: Vec::new(),
            referencer_names: Vec::new(),
        };

        let messages = generator.build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("under 256 tokens"));
        assert_eq!(messages[1].role, ChatRole::User);
        assert!(messages[1].content.contains("Reply in Chinese"));
        assert_eq!(generator.params.max_tokens, Some(256));
        assert_eq!(generator.params.model, "gpt-test");
    }

    #[test]
    fn test_blank_document_is_rejected() {
        assert!(matches!(
            finish_document("a.py/f", "  \n\t"),
            Err(GeneratorError::EmptyDocument(name)) if name == "a.py/f"
        ));
        assert_eq!(finish_document("a.py/f", "\n# f\n").unwrap(), "# f");
    }
}
