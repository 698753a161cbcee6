use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::storage::ArticleRecord;

const HEADER: &[&str] = &[
    "group_id",
    "category",
    "title",
    "abstract",
    "url",
    "share_url",
    "source",
    "content_type",
    "publish_time",
    "read_count",
    "show_count",
    "like_count",
    "comment_count",
    "share_count",
    "repin_count",
    "video_watch_count",
    "image_count",
    "user_name",
    "user_id",
    "is_rewritten",
    "doc_path",
];

/// Export articles to a CSV file with a fixed header row
pub async fn export_csv(articles: &[ArticleRecord], output_path: &Path) -> Result<()> {
    debug!(
        "Exporting {} records to CSV: {}",
        articles.len(),
        output_path.display()
    );

    // The csv crate is synchronous; build the file in memory and write once
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;

    for article in articles {
        writer.write_record(&[
            article.group_id.clone(),
            article.category.clone(),
            article.title.clone(),
            article.abstract_text.clone(),
            article.url.clone(),
            article.share_url.clone(),
            article.source.clone(),
            article.content_type.clone(),
            article.publish_time.to_string(),
            article.read_count.to_string(),
            article.show_count.to_string(),
            article.like_count.to_string(),
            article.comment_count.to_string(),
            article.share_count.to_string(),
            article.repin_count.to_string(),
            article.video_watch_count.to_string(),
            article.image_count.to_string(),
            article.user_name.clone(),
            article.user_id.clone(),
            article.is_rewritten.to_string(),
            article.doc_path.clone(),
        ])?;
    }

    let data = writer.into_inner()?;
    tokio::fs::write(output_path, data).await?;
    Ok(())
}
