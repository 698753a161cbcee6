//! Article content extraction and document generation.
//!
//! The article page's `.article-content` block is reduced to an ordered list
//! of [`ArticleElement`]s (paragraphs and image urls). Boilerplate is
//! stripped on the way: byline signatures, a trailing reference section,
//! and greeting paragraphs at the top.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

pub mod word;

pub use word::WordWriter;

use crate::config::DocumentConfig;
use crate::error::{FeedForgeError, ForgeResult};

/// One ordered piece of article content
#[derive(Debug, Clone, PartialEq)]
pub enum ArticleElement {
    Text(String),
    Image { url: String },
}

impl ArticleElement {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArticleElement::Text(text) => Some(text),
            ArticleElement::Image { .. } => None,
        }
    }
}

/// Byline lines such as `文| 杨磊`, `编辑丨姜召`, `来源：xxx`
fn signature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(文|作者|编辑|责编|责任编辑|审核|初审|终审|复审|校对|排版|图片|来源|供稿|记者|通讯员|本文作者|撰文|策划|监制|出品)\s*[|丨/／:：]",
        )
        .unwrap()
    })
}

/// Standalone reference-section headers near the end of an article
fn reference_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(参考资料|参考文献|资料来源|信息来源|素材来源|文章来源|来源)\s*[：:]*\s*$")
            .unwrap()
    })
}

/// Author self-introductions and greeting boilerplate at the top
fn greeting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^((各位|大家|朋友们?|兄弟们?|老铁们?|小伙伴们?|宝子们?|家人们?).{0,6}(好|嗨|哈喽|hello)|(大家好|你好|哈喽|hello|hi).{0,4}(我是|我叫|这里是)|我是.{1,8}[，,].{0,15}(今天|这次|咱们?|我们|接着|继续|来聊|来说|来讲|聊聊|说说|讲讲)|(关注|喜欢)我的.{0,6}(朋友|粉丝|老铁|兄弟|小伙伴|家人|宝子).{0,6}(都|应该|肯定)?(知道|了解|清楚))",
        )
        .unwrap()
    })
}

/// Strip XML-incompatible control characters, keeping tab and newlines
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            !(matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}'))
        })
        .collect()
}

/// Turn a title into a filesystem-safe name, capped at 80 chars
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\n' | '\r' | '\t'))
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(80).collect();
    if capped.is_empty() {
        "untitled".to_string()
    } else {
        capped
    }
}

fn has_skipped_ancestor(element: ElementRef<'_>) -> bool {
    for ancestor in element.ancestors() {
        if let Some(el) = ElementRef::wrap(ancestor) {
            let name = el.value().name();
            if name == "h1" || name == "script" || name == "style" || name == "noscript" {
                return true;
            }
            if name == "div"
                && el
                    .value()
                    .attr("class")
                    .is_some_and(|c| c.contains("article-meta"))
            {
                return true;
            }
        }
    }
    false
}

/// Extract ordered content elements from an article page.
/// Fails with [`FeedForgeError::ContentNotFound`] when the page carries no
/// `.article-content` block.
pub fn extract_elements(html: &str, url: &str) -> ForgeResult<Vec<ArticleElement>> {
    let document = Html::parse_document(html);
    let content_selector = Selector::parse(".article-content").unwrap();
    let piece_selector = Selector::parse("p, img").unwrap();

    let root = document
        .select(&content_selector)
        .next()
        .ok_or_else(|| FeedForgeError::ContentNotFound {
            url: url.to_string(),
        })?;

    let mut elements = Vec::new();
    for piece in root.select(&piece_selector) {
        if has_skipped_ancestor(piece) {
            continue;
        }
        match piece.value().name() {
            "img" => {
                // Lazy-loaded pages put the real url in data-src
                let src = piece
                    .value()
                    .attr("data-src")
                    .or_else(|| piece.value().attr("src"))
                    .unwrap_or("");
                if !src.is_empty() && !src.starts_with("data:") {
                    elements.push(ArticleElement::Image {
                        url: src.to_string(),
                    });
                }
            }
            _ => {
                let text = clean_text(piece.text().collect::<String>().trim());
                if text.is_empty() || signature_re().is_match(&text) {
                    continue;
                }
                elements.push(ArticleElement::Text(text));
            }
        }
    }

    debug!("Extracted {} content elements from {}", elements.len(), url);
    Ok(elements)
}

/// Drop a trailing reference section: the last matching header line and
/// everything after it.
pub fn remove_reference_section(elements: Vec<ArticleElement>) -> Vec<ArticleElement> {
    let ref_start = elements.iter().rposition(|e| {
        e.as_text()
            .is_some_and(|t| reference_header_re().is_match(t.trim()))
    });

    match ref_start {
        Some(index) => {
            info!(
                "Reference section detected at element {}, dropping {} elements",
                index,
                elements.len() - index
            );
            elements.into_iter().take(index).collect()
        }
        None => elements,
    }
}

/// Drop greeting paragraphs from the head of the article. Only the first
/// three text elements are considered; the scan stops at the first
/// non-greeting paragraph.
pub fn remove_greetings(elements: Vec<ArticleElement>) -> Vec<ArticleElement> {
    let mut result = elements;
    let mut checked = 0;
    let mut i = 0;

    while i < result.len() && checked < 3 {
        let Some(text) = result[i].as_text() else {
            i += 1;
            continue;
        };
        checked += 1;
        if greeting_re().is_match(text.trim()) {
            info!("Greeting paragraph removed: {}", &text.chars().take(50).collect::<String>());
            result.remove(i);
        } else {
            break;
        }
    }
    result
}

/// Total characters across all text elements
pub fn text_length(elements: &[ArticleElement]) -> usize {
    elements
        .iter()
        .filter_map(|e| e.as_text())
        .map(|t| t.chars().count())
        .sum()
}

/// Fetches article pages and images over plain HTTP
pub struct ContentFetcher {
    http: reqwest::Client,
    config: DocumentConfig,
}

impl ContentFetcher {
    pub fn new(config: &DocumentConfig) -> ForgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.image_timeout_seconds))
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(|e| FeedForgeError::network(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Fetch an article page and extract its filtered content elements
    pub async fn fetch_elements(&self, article_url: &str) -> ForgeResult<Vec<ArticleElement>> {
        info!("Fetching article content: {}", article_url);

        let fingerprint = crate::collect::Fingerprint::random();
        let response = self
            .http
            .get(article_url)
            .header("User-Agent", &fingerprint.user_agent)
            .header("Accept-Language", &fingerprint.accept_language)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedForgeError::HttpRequest {
                url: article_url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await?;
        let elements = extract_elements(&html, article_url)?;
        let elements = remove_reference_section(elements);
        let elements = remove_greetings(elements);
        Ok(elements)
    }

    /// Download one image, sending the configured referer
    pub async fn fetch_image(&self, url: &str) -> ForgeResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .header("Referer", &self.config.image_referer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedForgeError::HttpRequest {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Crop the watermark strip off the bottom of an image and re-encode as PNG.
/// Images the decoder rejects are returned unchanged.
pub fn crop_watermark(bytes: &[u8], crop_percent: u32) -> Vec<u8> {
    let Ok(img) = image::load_from_memory(bytes) else {
        return bytes.to_vec();
    };

    let (width, height) = (img.width(), img.height());
    // Small images carry no watermark strip worth cutting
    if width < 100 || height < 100 {
        return bytes.to_vec();
    }
    let crop_height = (height as f64 * crop_percent as f64 / 100.0) as u32;
    if crop_height == 0 || crop_height >= height {
        return bytes.to_vec();
    }

    let cropped = img.crop_imm(0, 0, width, height - crop_height);
    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    if cropped
        .write_to(&mut cursor, image::ImageOutputFormat::Png)
        .is_err()
    {
        return bytes.to_vec();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html><body>
          <div class="article-content">
            <h1>这是标题</h1>
            <div class="article-meta"><span>2024-01-01</span><p>meta paragraph</p></div>
            <p>第一段正文。</p>
            <p>文|杨磊</p>
            <img data-src="https://p.example/real.png" src="data:image/gif;base64,xyz"/>
            <p>第二段正文。</p>
            <p></p>
          </div>
        </body></html>"#;

    #[test]
    fn test_extract_skips_title_meta_and_signatures() {
        let elements = extract_elements(SAMPLE, "https://example.com/a").unwrap();
        assert_eq!(
            elements,
            vec![
                ArticleElement::Text("第一段正文。".to_string()),
                ArticleElement::Image {
                    url: "https://p.example/real.png".to_string()
                },
                ArticleElement::Text("第二段正文。".to_string()),
            ]
        );
    }

    #[test]
    fn test_extract_without_content_block_fails() {
        let err = extract_elements("<html><body><p>x</p></body></html>", "u").unwrap_err();
        assert!(matches!(err, FeedForgeError::ContentNotFound { .. }));
    }

    #[test]
    fn test_remove_reference_section() {
        let elements = vec![
            ArticleElement::Text("正文".to_string()),
            ArticleElement::Text("参考资料：".to_string()),
            ArticleElement::Text("某某期刊".to_string()),
            ArticleElement::Image { url: "x".to_string() },
        ];
        let filtered = remove_reference_section(elements);
        assert_eq!(filtered, vec![ArticleElement::Text("正文".to_string())]);
    }

    #[test]
    fn test_remove_greetings_stops_at_real_content() {
        let elements = vec![
            ArticleElement::Text("大家好，我是小明".to_string()),
            ArticleElement::Text("正文从这里开始。".to_string()),
            ArticleElement::Text("我是老王，今天聊聊养生".to_string()),
        ];
        let filtered = remove_greetings(elements);
        // Only the leading greeting goes; the later lookalike stays
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].as_text(), Some("正文从这里开始。"));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("a/b:c*d"), "abcd");
        assert_eq!(safe_filename("  .. "), "untitled");
        assert_eq!(safe_filename(""), "untitled");
        let long = "长".repeat(100);
        assert_eq!(safe_filename(&long).chars().count(), 80);
    }

    #[test]
    fn test_clean_text_strips_control_chars() {
        assert_eq!(clean_text("a\u{0}b\u{7f}c\td"), "abc\td");
    }

    #[test]
    fn test_signature_variants() {
        for line in ["文| 杨磊", "编辑丨姜召", "责编：张三", " 来源：网络"] {
            assert!(signature_re().is_match(line), "{}", line);
        }
        assert!(!signature_re().is_match("文章讲的是来源问题"));
    }

    #[test]
    fn test_text_length() {
        let elements = vec![
            ArticleElement::Text("abc".to_string()),
            ArticleElement::Image { url: "x".to_string() },
            ArticleElement::Text("一二三".to_string()),
        ];
        assert_eq!(text_length(&elements), 6);
    }
}
