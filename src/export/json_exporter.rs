use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::storage::ArticleRecord;

/// Export articles as a pretty-printed JSON array
pub async fn export_json(articles: &[ArticleRecord], output_path: &Path) -> Result<()> {
    debug!(
        "Exporting {} records to JSON: {}",
        articles.len(),
        output_path.display()
    );

    let data = serde_json::to_vec_pretty(articles)?;
    tokio::fs::write(output_path, data).await?;
    Ok(())
}
