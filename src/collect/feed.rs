//! Feed response payloads and their mapping to article rows.

use serde::Deserialize;

use crate::storage::NewArticle;

/// Top-level feed page
#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub data: Vec<FeedItem>,
    #[serde(default)]
    pub has_more: bool,
}

/// One raw feed entry. The endpoint mixes snake_case fields with a nested
/// camelCase counter cell, so both spellings appear here deliberately.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub group_id: Option<serde_json::Value>,
    #[serde(default)]
    pub item_id: Option<serde_json::Value>,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub article_url: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub share_url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub publish_time: i64,
    #[serde(default)]
    pub behot_time: i64,
    #[serde(default)]
    pub max_behot_time: i64,
    #[serde(default)]
    pub has_video: bool,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub read_count: i64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub repin_count: i64,
    #[serde(default, rename = "itemCell")]
    pub item_cell: ItemCell,
    #[serde(default)]
    pub user_info: UserInfo,
    #[serde(default)]
    pub image_list: Vec<ImageRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemCell {
    #[serde(default, rename = "itemCounter")]
    pub item_counter: ItemCounter,
}

/// Detailed counters; each falls back to the flat field when absent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemCounter {
    #[serde(default, rename = "showCount")]
    pub show_count: Option<i64>,
    #[serde(default, rename = "shareCount")]
    pub share_count: Option<i64>,
    #[serde(default, rename = "diggCount")]
    pub digg_count: Option<i64>,
    #[serde(default, rename = "readCount")]
    pub read_count: Option<i64>,
    #[serde(default, rename = "commentCount")]
    pub comment_count: Option<i64>,
    #[serde(default, rename = "repinCount")]
    pub repin_count: Option<i64>,
    #[serde(default, rename = "videoWatchCount")]
    pub video_watch_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub user_id: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageRef {
    #[serde(default)]
    pub url: String,
}

fn id_to_string(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl FeedItem {
    /// Stable article identity; prefers group_id, falls back to item_id
    pub fn id(&self) -> String {
        let gid = id_to_string(&self.group_id);
        if !gid.is_empty() {
            return gid;
        }
        id_to_string(&self.item_id)
    }

    /// Best available publish timestamp
    pub fn effective_publish_time(&self) -> i64 {
        if self.publish_time != 0 {
            self.publish_time
        } else {
            self.behot_time
        }
    }

    pub fn content_type(&self) -> &'static str {
        if self.has_video {
            "video"
        } else if self.has_image {
            "image"
        } else {
            "text"
        }
    }

    /// Flatten into a storable row, resolving counter fallbacks
    pub fn into_article(self) -> NewArticle {
        let counter = &self.item_cell.item_counter;
        let user_id = match &self.user_info.user_id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        let url = if !self.article_url.is_empty() {
            self.article_url.clone()
        } else {
            self.url.clone()
        };

        NewArticle {
            group_id: self.id(),
            content_type: self.content_type().to_string(),
            publish_time: self.effective_publish_time(),
            read_count: counter.read_count.unwrap_or(self.read_count),
            show_count: counter.show_count.unwrap_or(0),
            like_count: counter.digg_count.unwrap_or(self.like_count),
            comment_count: counter.comment_count.unwrap_or(self.comment_count),
            share_count: counter.share_count.unwrap_or(0),
            repin_count: counter.repin_count.unwrap_or(self.repin_count),
            video_watch_count: counter.video_watch_count.unwrap_or(0),
            image_count: self.image_list.len() as i64,
            title: self.title,
            abstract_text: self.abstract_text,
            url,
            share_url: self.share_url,
            source: self.source,
            user_name: self.user_info.name,
            user_avatar: self.user_info.avatar_url,
            user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feed_with_counter_cell() {
        let body = serde_json::json!({
            "has_more": true,
            "data": [{
                "group_id": 7473002025927541286u64,
                "title": "标题",
                "abstract": "摘要",
                "article_url": "https://www.toutiao.com/article/7473002025927541286/",
                "publish_time": 1_700_000_000,
                "has_image": true,
                "read_count": 10,
                "like_count": 2,
                "itemCell": {
                    "itemCounter": {
                        "readCount": 1234,
                        "diggCount": 56,
                        "showCount": 9999,
                        "videoWatchCount": 0
                    }
                },
                "user_info": {"name": "作者", "user_id": "99"},
                "image_list": [{"url": "https://p.example/1.png"}]
            }]
        });

        let response: FeedResponse = serde_json::from_value(body).unwrap();
        assert!(response.has_more);
        let article = response.data.into_iter().next().unwrap().into_article();
        assert_eq!(article.group_id, "7473002025927541286");
        assert_eq!(article.read_count, 1234);
        assert_eq!(article.like_count, 56);
        assert_eq!(article.show_count, 9999);
        assert_eq!(article.content_type, "image");
        assert_eq!(article.image_count, 1);
        assert_eq!(article.user_name, "作者");
    }

    #[test]
    fn test_counter_fallback_to_flat_fields() {
        let item: FeedItem = serde_json::from_value(serde_json::json!({
            "item_id": "42",
            "title": "t",
            "url": "https://example.com/a",
            "behot_time": 123,
            "read_count": 7,
            "comment_count": 3
        }))
        .unwrap();

        let article = item.into_article();
        assert_eq!(article.group_id, "42");
        assert_eq!(article.publish_time, 123);
        assert_eq!(article.read_count, 7);
        assert_eq!(article.comment_count, 3);
        assert_eq!(article.url, "https://example.com/a");
        assert_eq!(article.content_type, "text");
    }

    #[test]
    fn test_missing_data_defaults_to_empty() {
        let response: FeedResponse = serde_json::from_str("{}").unwrap();
        assert!(response.data.is_empty());
        assert!(!response.has_more);
    }
}
