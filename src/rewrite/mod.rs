//! Article rewriting through an OpenAI-compatible chat API.
//!
//! The model receives the title and the ordered paragraph list as JSON and
//! must return the same shape with the same paragraph count. Responses that
//! drift on count are reconciled locally; transient failures are retried.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RewriteConfig;
use crate::error::{FeedForgeError, ForgeResult};

const SYSTEM_PROMPT: &str = r#"你是一个有十年经验的自媒体老手，写文章就跟聊天似的，特别自然。现在需要你改写一篇文章，注意以下要求：

【标题】
- 保持原意，换个说法就行，别改太多

【正文改写】
- 逐段改写，原创度 70% 以上，意思不能跑偏
- 段落数量和顺序必须跟原文一模一样，一段对一段，不准增删合并

【最重要 —— 写得像人话】
- 你写出来的东西要像真人写的博客、公众号文章，不能有任何AI痕迹
- 句子长短要参差不齐，有的句子就几个字，有的可以长一些，别整齐划一
- 每段的开头别都一个套路，有时候直接说事，有时候可以先来个转折、感叹、疑问
- 适当带点情绪——惊讶、吐槽、感慨、调侃都行，别一直平铺直叙
- 原文如果有口语、俚语、网络梗，该保留就保留，甚至可以换个更接地气的说法
- 偶尔可以用一两个不那么正式的表达，比如"说白了""搁谁谁不急""这谁顶得住"之类的

【绝对禁止的AI套话和模式】
- 禁止：值得注意的是、不可否认、总而言之、综上所述、毋庸置疑、显而易见
- 禁止：首先/其次/再次/最后、一方面/另一方面 这种机械连接
- 禁止：不仅...更...、既...又... 这种工整的关联词堆叠
- 禁止：每段结尾都来一句总结性的升华
- 禁止：连续多段用相同的句式结构（比如每段都是"XXX，这XXX"的模式）
- 禁止：过度使用排比、对仗
- 禁止：把原文生动的表达改成文绉绉的书面语

请严格按照以下 JSON 格式返回，不要包含任何其他文字：
{"title": "改写后的标题", "paragraphs": ["改写段落1", "改写段落2", ...]}"#;

/// Title plus paragraph list, the shape exchanged with the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewritePayload {
    pub title: String,
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct RewriteClient {
    http: reqwest::Client,
    config: RewriteConfig,
}

impl RewriteClient {
    pub fn new(config: &RewriteConfig) -> ForgeResult<Self> {
        if config.api_base.trim().is_empty() {
            return Err(FeedForgeError::RewriteNotConfigured {
                field: "api_base".to_string(),
            });
        }
        if config.api_key.trim().is_empty() {
            return Err(FeedForgeError::RewriteNotConfigured {
                field: "api_key".to_string(),
            });
        }
        if config.model.trim().is_empty() {
            return Err(FeedForgeError::RewriteNotConfigured {
                field: "model".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| FeedForgeError::network(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Rewrite a title and its paragraphs, retrying transient failures.
    /// The returned paragraph list always has the input's length.
    pub async fn rewrite(&self, article_id: i64, payload: &RewritePayload) -> ForgeResult<RewritePayload> {
        if payload.paragraphs.is_empty() {
            return Err(FeedForgeError::NoRewritableText { article_id });
        }

        let mut last_err = None;
        for attempt in 1..=self.config.max_retries {
            match self.rewrite_once(payload).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    warn!(
                        "Rewrite attempt {}/{} failed: {}",
                        attempt, self.config.max_retries, err
                    );
                    last_err = Some(err);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(self.config.retry_delay_seconds))
                            .await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FeedForgeError::rewrite("rewrite failed")))
    }

    async fn rewrite_once(&self, payload: &RewritePayload) -> ForgeResult<RewritePayload> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        info!(
            "Rewriting via {}: model={}, paragraphs={}",
            url,
            self.config.model,
            payload.paragraphs.len()
        );

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": serde_json::to_string(payload)?},
            ],
            "temperature": self.config.temperature,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedForgeError::HttpRequest {
                url,
                status: status.as_u16(),
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| FeedForgeError::rewrite("empty chat response"))?;

        let parsed: RewritePayload = serde_json::from_str(&strip_code_fences(&content))
            .map_err(|e| FeedForgeError::rewrite(format!("unparseable model output: {}", e)))?;

        Ok(reconcile(parsed, payload))
    }
}

/// Remove markdown code fences the model sometimes wraps its JSON in
fn strip_code_fences(content: &str) -> String {
    if !content.starts_with("```") {
        return content.to_string();
    }
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Force the response back onto the original paragraph count: extra
/// paragraphs are cut, missing ones fall back to the original text.
fn reconcile(mut result: RewritePayload, original: &RewritePayload) -> RewritePayload {
    let want = original.paragraphs.len();
    let got = result.paragraphs.len();
    if got != want {
        warn!("Model returned {} paragraphs, expected {}", got, want);
        result.paragraphs.truncate(want);
        while result.paragraphs.len() < want {
            result
                .paragraphs
                .push(original.paragraphs[result.paragraphs.len()].clone());
        }
    }
    if result.title.trim().is_empty() {
        result.title = original.title.clone();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RewriteConfig;

    fn payload(n: usize) -> RewritePayload {
        RewritePayload {
            title: "原标题".to_string(),
            paragraphs: (0..n).map(|i| format!("原段落{}", i)).collect(),
        }
    }

    #[test]
    fn test_client_requires_configuration() {
        let config = RewriteConfig::default();
        let err = match RewriteClient::new(&config) {
            Ok(_) => panic!("client built without api settings"),
            Err(err) => err,
        };
        assert!(matches!(err, FeedForgeError::RewriteNotConfigured { .. }));
    }

    #[test]
    fn test_strip_code_fences() {
        let fenced = "```json\n{\"title\": \"t\", \"paragraphs\": []}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"title\": \"t\", \"paragraphs\": []}");
        let plain = "{\"title\": \"t\"}";
        assert_eq!(strip_code_fences(plain), plain);
    }

    #[test]
    fn test_reconcile_truncates_extra_paragraphs() {
        let result = RewritePayload {
            title: "新标题".to_string(),
            paragraphs: vec!["a".into(), "b".into(), "c".into()],
        };
        let fixed = reconcile(result, &payload(2));
        assert_eq!(fixed.paragraphs, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reconcile_pads_missing_with_original() {
        let result = RewritePayload {
            title: String::new(),
            paragraphs: vec!["新0".into()],
        };
        let fixed = reconcile(result, &payload(3));
        assert_eq!(
            fixed.paragraphs,
            vec!["新0".to_string(), "原段落1".to_string(), "原段落2".to_string()]
        );
        // Empty title falls back to the original
        assert_eq!(fixed.title, "原标题");
    }
}
