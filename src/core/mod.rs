//! Application core: wires storage, collection, rewriting and document
//! generation together behind one facade the API and CLI both call.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::collect::FeedClient;
use crate::config::AppConfig;
use crate::document::word::{DocElement, WordWriter};
use crate::document::{self, ArticleElement, ContentFetcher};
use crate::error::{FeedForgeError, ForgeResult};
use crate::export::{self, ExportFormat, ExportStats};
use crate::rewrite::{RewriteClient, RewritePayload};
use crate::storage::{AccountAddOutcome, ArticleRecord, ArticleStats, DownloadStats, StorageManager};
use crate::task::{
    BatchTaskSpec, ProgressBus, ProgressEvent, TaskLogLevel, TaskManager, TaskStatus, TimeWindow,
    UnitOutcome,
};

/// Result of a batch account import
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountImportReport {
    pub added: usize,
    pub skipped: usize,
    pub invalid: usize,
}

/// Result of importing articles by url
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArticleImportReport {
    pub added: usize,
    pub skipped: usize,
    pub invalid: usize,
}

/// What a single rewrite produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewriteOutcome {
    /// Document written, article flagged as rewritten
    Rewritten { title: String, doc_path: String },
    /// Too short to be worth keeping; the article row was removed
    Deleted { chars: usize },
}

/// Totals of a batch rewrite run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchRewriteReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub deleted: usize,
}

fn article_id_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"/article/(\d+)").unwrap(),
            Regex::new(r"/[ai](\d{10,})").unwrap(),
            Regex::new(r"(\d{15,})").unwrap(),
        ]
    })
}

/// Pull a numeric article id out of any supported url shape
pub fn extract_article_id(url: &str) -> Option<String> {
    article_id_res()
        .iter()
        .find_map(|re| re.captures(url))
        .map(|caps| caps[1].to_string())
}

pub struct FeedForge {
    config: AppConfig,
    storage: Arc<StorageManager>,
    tasks: Arc<TaskManager>,
    progress: ProgressBus,
}

impl FeedForge {
    pub async fn new(config: AppConfig) -> ForgeResult<Self> {
        config.validate()?;
        let storage = Arc::new(
            StorageManager::new(&config.database)
                .await
                .map_err(|e| FeedForgeError::database(e.to_string()))?,
        );
        let tasks = Arc::new(TaskManager::new(&config.task));

        Ok(Self {
            config,
            storage,
            tasks,
            progress: ProgressBus::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn progress(&self) -> &ProgressBus {
        &self.progress
    }

    // -----------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------

    pub async fn account_types(&self) -> ForgeResult<Vec<String>> {
        self.storage
            .list_account_types()
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn add_account_type(&self, name: &str) -> ForgeResult<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FeedForgeError::config("account type name is empty"));
        }
        self.storage
            .add_account_type(name)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn remove_account_type(&self, name: &str) -> ForgeResult<usize> {
        self.storage
            .remove_account_type(name.trim())
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn accounts(&self, type_name: &str) -> ForgeResult<Vec<String>> {
        self.storage
            .list_accounts(type_name.trim())
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    /// Parse one account url per line, drop urls outside the profile prefix,
    /// and insert the rest
    pub async fn add_accounts(&self, type_name: &str, text: &str) -> ForgeResult<AccountImportReport> {
        let prefix = &self.config.collect.account_url_prefix;
        let mut valid = Vec::new();
        let mut invalid = 0;

        for line in text.lines() {
            let url = line.trim().trim_end_matches('/').to_string() + "/";
            if url.len() <= 1 {
                continue;
            }
            if url.starts_with(prefix.as_str()) && url.len() > prefix.len() {
                valid.push(url);
            } else {
                invalid += 1;
            }
        }

        let AccountAddOutcome { added, skipped } = self
            .storage
            .add_accounts(type_name.trim(), &valid)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?;

        Ok(AccountImportReport {
            added,
            skipped,
            invalid,
        })
    }

    pub async fn remove_account(&self, type_name: &str, url: &str) -> ForgeResult<bool> {
        self.storage
            .remove_account(type_name.trim(), url)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn clear_accounts(&self, type_name: &str) -> ForgeResult<usize> {
        self.storage
            .clear_accounts(type_name.trim())
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    // -----------------------------------------------------------------
    // Collection tasks
    // -----------------------------------------------------------------

    /// Start collecting one account group. `count` > 0 limits how many of
    /// the group's accounts take part.
    pub async fn start_batch_collect(
        &self,
        type_name: &str,
        count: usize,
        window: TimeWindow,
    ) -> ForgeResult<()> {
        let spec = BatchTaskSpec {
            type_name: type_name.trim().to_string(),
            count,
            window,
        };
        self.start_multi_batch_collect(vec![spec]).await
    }

    /// Start collecting several account groups in one task. Specs are
    /// validated up front: duplicate group names and empty groups reject the
    /// whole request before any unit runs.
    pub async fn start_multi_batch_collect(&self, specs: Vec<BatchTaskSpec>) -> ForgeResult<()> {
        if specs.is_empty() {
            return Err(FeedForgeError::task("no task specs given"));
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.type_name.clone()) {
                return Err(FeedForgeError::DuplicateSpec {
                    type_name: spec.type_name.clone(),
                });
            }
        }

        // One unit per participating account
        let mut units: Vec<(String, String, TimeWindow)> = Vec::new();
        for spec in &specs {
            let mut accounts = self
                .storage
                .list_accounts(&spec.type_name)
                .await
                .map_err(|e| FeedForgeError::database(e.to_string()))?;
            if accounts.is_empty() {
                return Err(FeedForgeError::NoAccounts {
                    type_name: spec.type_name.clone(),
                });
            }
            if spec.count > 0 {
                accounts.truncate(spec.count);
            }
            for account in accounts {
                units.push((account, spec.type_name.clone(), spec.window));
            }
        }

        info!(
            "Starting collection: {} specs, {} accounts",
            specs.len(),
            units.len()
        );

        let client = Arc::new(FeedClient::new(&self.config.collect)?);
        let storage = Arc::clone(&self.storage);
        let progress = self.progress.clone();
        let per_account_timeout = Duration::from_secs(self.config.collect.collect_timeout_seconds);

        self.tasks.start(
            units,
            "collect".to_string(),
            move |(account, category, window), ctx| {
                let client = Arc::clone(&client);
                let storage = Arc::clone(&storage);
                let progress = progress.clone();
                async move {
                    let stop_probe = ctx.clone();
                    let collected = tokio::time::timeout(
                        per_account_timeout,
                        client.collect_account(&account, 0, window, move || stop_probe.should_stop()),
                    )
                    .await
                    .map_err(|_| format!("account timed out: {}", account))?
                    .map_err(|e| format!("collect failed for {}: {}", account, e))?;

                    let count = collected.articles.len();
                    let (inserted, updated) = storage
                        .save_articles(&collected.articles, &category)
                        .await
                        .map_err(|e| format!("save failed for {}: {}", account, e))?;

                    ctx.log(
                        TaskLogLevel::Success,
                        format!(
                            "[{}] {} articles ({} new, {} refreshed)",
                            category, count, inserted, updated
                        ),
                    );
                    progress.publish(ProgressEvent::Collect {
                        message: format!("collected {}", account),
                        count,
                    });

                    Ok(UnitOutcome { articles: count })
                }
            },
        )
    }

    pub fn task_status(&self) -> TaskStatus {
        self.tasks.status()
    }

    pub fn stop_task(&self) -> ForgeResult<()> {
        self.tasks.stop()
    }

    // -----------------------------------------------------------------
    // Articles
    // -----------------------------------------------------------------

    pub async fn articles(
        &self,
        page: usize,
        page_size: usize,
        filter_rewritten: Option<bool>,
    ) -> ForgeResult<(Vec<ArticleRecord>, usize)> {
        self.storage
            .list_articles(page, page_size, filter_rewritten)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn download_articles_page(
        &self,
        page: usize,
        page_size: usize,
        filter_downloaded: Option<bool>,
    ) -> ForgeResult<(Vec<ArticleRecord>, usize)> {
        self.storage
            .list_articles_by_download(page, page_size, filter_downloaded)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn article_stats(&self) -> ForgeResult<ArticleStats> {
        self.storage
            .article_stats()
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn download_stats(&self) -> ForgeResult<DownloadStats> {
        self.storage
            .download_stats()
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    pub async fn toggle_rewritten(&self, article_id: i64) -> ForgeResult<bool> {
        self.storage
            .toggle_rewritten(article_id)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?
            .ok_or(FeedForgeError::ArticleNotFound { article_id })
    }

    pub async fn delete_article(&self, article_id: i64) -> ForgeResult<()> {
        let removed = self
            .storage
            .delete_article(article_id)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?;
        if !removed {
            return Err(FeedForgeError::ArticleNotFound { article_id });
        }
        Ok(())
    }

    pub async fn delete_all_articles(&self) -> ForgeResult<usize> {
        self.storage
            .delete_all_articles()
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))
    }

    /// Import articles by pasted urls, one per line
    pub async fn import_article_urls(&self, text: &str) -> ForgeResult<ArticleImportReport> {
        let mut report = ArticleImportReport::default();

        for line in text.lines() {
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }

            let Some(group_id) = extract_article_id(raw) else {
                report.invalid += 1;
                continue;
            };

            let url = if raw.starts_with("http") {
                raw.to_string()
            } else {
                format!("https://www.toutiao.com/article/{}/", group_id)
            };

            let added = self
                .storage
                .import_article(&group_id, &url)
                .await
                .map_err(|e| FeedForgeError::database(e.to_string()))?;
            if added {
                report.added += 1;
            } else {
                report.skipped += 1;
            }
        }

        info!(
            "Article import: {} added, {} skipped, {} invalid",
            report.added, report.skipped, report.invalid
        );
        Ok(report)
    }

    // -----------------------------------------------------------------
    // Document download
    // -----------------------------------------------------------------

    async fn render_document(
        &self,
        fetcher: &ContentFetcher,
        article: &ArticleRecord,
        base_dir: &Path,
        elements: Vec<ArticleElement>,
        title: &str,
    ) -> ForgeResult<String> {
        let mut rendered = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                ArticleElement::Text(text) => rendered.push(DocElement::Paragraph(text)),
                ArticleElement::Image { url } => match fetcher.fetch_image(&url).await {
                    Ok(bytes) if bytes.len() > 500 => {
                        let cropped = document::crop_watermark(
                            &bytes,
                            self.config.document.watermark_crop_percent,
                        );
                        rendered.push(DocElement::Image(cropped));
                    }
                    Ok(_) => rendered.push(DocElement::ImagePlaceholder),
                    Err(err) => {
                        warn!("Image download failed ({}): {}", url, err);
                        rendered.push(DocElement::ImagePlaceholder);
                    }
                },
            }
        }

        let mut path = base_dir.to_path_buf();
        if !article.category.is_empty() {
            path.push(document::safe_filename(&article.category));
        }
        path.push(format!("{}.doc", document::safe_filename(title)));

        WordWriter::write(&path, title, &rendered).await.map_err(|e| {
            warn!("Document write failed: {}", e);
            FeedForgeError::FileWrite {
                path: path.display().to_string(),
            }
        })?;

        Ok(path.display().to_string())
    }

    /// Fetch one article's content and save it as a document
    pub async fn download_article(&self, article_id: i64) -> ForgeResult<String> {
        let article = self
            .storage
            .get_article(article_id)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?
            .ok_or(FeedForgeError::ArticleNotFound { article_id })?;
        if article.url.is_empty() {
            return Err(FeedForgeError::ArticleMissingUrl { article_id });
        }

        let fetcher = ContentFetcher::new(&self.config.document)?;
        let elements = fetcher.fetch_elements(&article.url).await?;
        let base_dir = self.config.document.save_path.clone();
        let doc_path = self
            .render_document(&fetcher, &article, &base_dir, elements, &article.title)
            .await?;

        self.storage
            .set_doc_path(article_id, &doc_path)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?;

        info!("Article downloaded: id={}, path={}", article_id, doc_path);
        Ok(doc_path)
    }

    /// Download a set of articles sequentially, publishing progress events
    pub async fn batch_download(&self, article_ids: &[i64]) -> ForgeResult<(usize, usize)> {
        let total = article_ids.len();
        let mut success = 0;
        let mut failed = 0;

        for (index, &article_id) in article_ids.iter().enumerate() {
            let title = self
                .storage
                .get_article(article_id)
                .await
                .ok()
                .flatten()
                .map(|a| a.title)
                .unwrap_or_default();

            match self.download_article(article_id).await {
                Ok(_) => success += 1,
                Err(err) => {
                    warn!("Download failed: id={}, err={}", article_id, err);
                    failed += 1;
                }
            }
            self.progress.publish(ProgressEvent::Download {
                article_id,
                title,
                current: index + 1,
                total,
            });
        }

        Ok((success, failed))
    }

    /// Download every article that has a url but no document yet
    pub async fn download_all(&self) -> ForgeResult<(usize, usize)> {
        let ids = self
            .storage
            .download_candidates()
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?;
        info!("Downloading all pending articles: {}", ids.len());
        self.batch_download(&ids).await
    }

    // -----------------------------------------------------------------
    // Rewriting
    // -----------------------------------------------------------------

    /// Rewrite one article: fetch its content, run it through the model,
    /// and save the result as a document. Articles shorter than the
    /// configured minimum are deleted instead.
    pub async fn rewrite_article(&self, article_id: i64) -> ForgeResult<RewriteOutcome> {
        let article = self
            .storage
            .get_article(article_id)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?
            .ok_or(FeedForgeError::ArticleNotFound { article_id })?;

        let client = RewriteClient::new(&self.config.rewrite)?;
        let fetcher = ContentFetcher::new(&self.config.document)?;
        self.rewrite_one(&client, &fetcher, article).await
    }

    async fn rewrite_one(
        &self,
        client: &RewriteClient,
        fetcher: &ContentFetcher,
        article: ArticleRecord,
    ) -> ForgeResult<RewriteOutcome> {
        let article_id = article.id;
        if article.url.is_empty() {
            return Err(FeedForgeError::ArticleMissingUrl { article_id });
        }

        let mut elements = fetcher.fetch_elements(&article.url).await?;

        // Split text out, remembering where each paragraph sits
        let mut text_indices = Vec::new();
        let mut paragraphs = Vec::new();
        for (index, element) in elements.iter().enumerate() {
            if let ArticleElement::Text(text) = element {
                text_indices.push(index);
                paragraphs.push(text.clone());
            }
        }
        if paragraphs.is_empty() {
            return Err(FeedForgeError::NoRewritableText { article_id });
        }

        // Too short to rewrite: drop the article entirely
        let chars = document::text_length(&elements);
        if chars < self.config.rewrite.min_chars {
            info!(
                "Article below {} chars ({}), deleting: id={}",
                self.config.rewrite.min_chars, chars, article_id
            );
            self.storage
                .delete_article(article_id)
                .await
                .map_err(|e| FeedForgeError::database(e.to_string()))?;
            return Ok(RewriteOutcome::Deleted { chars });
        }

        let payload = RewritePayload {
            title: article.title.clone(),
            paragraphs,
        };
        let rewritten = client.rewrite(article_id, &payload).await?;

        // Put rewritten paragraphs back in place, images untouched
        for (pos, &element_index) in text_indices.iter().enumerate() {
            elements[element_index] = ArticleElement::Text(rewritten.paragraphs[pos].clone());
        }

        let base_dir = self.config.rewrite.save_path.clone();
        let doc_path = self
            .render_document(fetcher, &article, &base_dir, elements, &rewritten.title)
            .await?;

        self.storage
            .mark_rewritten(article_id)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?;

        info!("Article rewritten: id={}, path={}", article_id, doc_path);
        Ok(RewriteOutcome::Rewritten {
            title: rewritten.title,
            doc_path,
        })
    }

    /// Rewrite every eligible article over a bounded worker pool.
    /// Submissions are staggered one second apart to avoid a burst of
    /// simultaneous model calls at start.
    pub async fn batch_rewrite(self: &Arc<Self>, force: bool) -> ForgeResult<BatchRewriteReport> {
        let articles = self
            .storage
            .rewrite_candidates(force)
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?;
        if articles.is_empty() {
            return Ok(BatchRewriteReport::default());
        }

        let client = Arc::new(RewriteClient::new(&self.config.rewrite)?);
        let fetcher = Arc::new(ContentFetcher::new(&self.config.document)?);
        let semaphore = Arc::new(Semaphore::new(self.config.rewrite.workers.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let total = articles.len();

        info!(
            "Batch rewrite started: {} articles, {} workers",
            total, self.config.rewrite.workers
        );

        let mut handles = Vec::with_capacity(total);
        for article in articles {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| FeedForgeError::internal("rewrite pool closed"))?;
            let core = Arc::clone(self);
            let client = Arc::clone(&client);
            let fetcher = Arc::clone(&fetcher);
            let completed = Arc::clone(&completed);

            handles.push(tokio::spawn(async move {
                let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
                core.progress.publish(ProgressEvent::Rewrite {
                    title: article.title.chars().take(30).collect(),
                    current,
                    total,
                });

                let result = core.rewrite_one(&client, &fetcher, article).await;
                drop(permit);
                result
            }));

            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let mut report = BatchRewriteReport {
            total,
            ..Default::default()
        };
        for handle in handles {
            match handle.await {
                Ok(Ok(RewriteOutcome::Rewritten { .. })) => report.success += 1,
                Ok(Ok(RewriteOutcome::Deleted { .. })) => {
                    report.success += 1;
                    report.deleted += 1;
                }
                Ok(Err(err)) => {
                    warn!("Batch rewrite item failed: {}", err);
                    report.failed += 1;
                }
                Err(err) => {
                    warn!("Rewrite worker panicked: {}", err);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Batch rewrite finished: {}/{} ok ({} deleted, {} failed)",
            report.success, report.total, report.deleted, report.failed
        );
        Ok(report)
    }

    // -----------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------

    pub async fn export_articles(
        &self,
        format: ExportFormat,
        output_path: &Path,
    ) -> ForgeResult<ExportStats> {
        let articles = self
            .storage
            .all_articles()
            .await
            .map_err(|e| FeedForgeError::database(e.to_string()))?;
        export::export_articles(&articles, format, output_path)
            .await
            .map_err(|e| FeedForgeError::export(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_article_id_formats() {
        assert_eq!(
            extract_article_id("https://www.toutiao.com/article/7473002025927541286/"),
            Some("7473002025927541286".to_string())
        );
        assert_eq!(
            extract_article_id("https://www.toutiao.com/a7473002025927541286/"),
            Some("7473002025927541286".to_string())
        );
        assert_eq!(
            extract_article_id("https://www.toutiao.com/i7473002025927541286/"),
            Some("7473002025927541286".to_string())
        );
        assert_eq!(
            extract_article_id("7473002025927541286"),
            Some("7473002025927541286".to_string())
        );
        assert_eq!(extract_article_id("https://example.com/foo"), None);
        // Bare ids must be long enough to be unambiguous
        assert_eq!(extract_article_id("12345"), None);
    }
}
