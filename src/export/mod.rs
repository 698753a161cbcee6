//! Article metadata export to CSV and JSON.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

mod csv_exporter;
mod json_exporter;

use crate::error::FeedForgeError;
use crate::storage::ArticleRecord;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = FeedForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(FeedForgeError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

/// Outcome of one export run
#[derive(Debug, Clone, Serialize)]
pub struct ExportStats {
    pub records: usize,
    pub path: String,
    pub format: String,
}

/// Write articles to `output_path` in the given format
pub async fn export_articles(
    articles: &[ArticleRecord],
    format: ExportFormat,
    output_path: &Path,
) -> Result<ExportStats> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match format {
        ExportFormat::Csv => csv_exporter::export_csv(articles, output_path).await?,
        ExportFormat::Json => json_exporter::export_json(articles, output_path).await?,
    }

    info!(
        "Exported {} articles to {} ({})",
        articles.len(),
        output_path.display(),
        format
    );
    Ok(ExportStats {
        records: articles.len(),
        path: output_path.display().to_string(),
        format: format.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_articles() -> Vec<ArticleRecord> {
        vec![ArticleRecord {
            id: 1,
            group_id: "g1".to_string(),
            category: "tech".to_string(),
            title: "标题, 带逗号".to_string(),
            abstract_text: "摘要".to_string(),
            url: "https://example.com/a".to_string(),
            share_url: String::new(),
            source: "源".to_string(),
            content_type: "text".to_string(),
            publish_time: 1_700_000_000,
            read_count: 10,
            show_count: 20,
            like_count: 3,
            comment_count: 1,
            share_count: 0,
            repin_count: 0,
            video_watch_count: 0,
            image_count: 2,
            user_name: "作者".to_string(),
            user_avatar: String::new(),
            user_id: "u1".to_string(),
            is_rewritten: true,
            doc_path: String::new(),
            created_at: 0,
            updated_at: 0,
        }]
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(FeedForgeError::UnsupportedFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_export_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("articles.csv");
        let stats = export_articles(&sample_articles(), ExportFormat::Csv, &path)
            .await
            .unwrap();
        assert_eq!(stats.records, 1);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("group_id,"));
        assert!(content.contains("\"标题, 带逗号\""));
    }

    #[tokio::test]
    async fn test_export_json_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("articles.json");
        export_articles(&sample_articles(), ExportFormat::Json, &path)
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["group_id"], "g1");
        assert_eq!(parsed[0]["is_rewritten"], true);
    }

    #[tokio::test]
    async fn test_export_empty_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let stats = export_articles(&[], ExportFormat::Csv, &path).await.unwrap();
        assert_eq!(stats.records, 0);
        // Header row still written
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("group_id,"));
    }
}
