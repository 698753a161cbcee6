use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub mod migrations;

use crate::config::DatabaseConfig;

/// Storage manager for SQLite database operations
pub struct StorageManager {
    connection: Arc<Mutex<Connection>>,
}

/// Article row as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: i64,
    pub group_id: String,
    pub category: String,
    pub title: String,
    pub abstract_text: String,
    pub url: String,
    pub share_url: String,
    pub source: String,
    pub content_type: String,
    pub publish_time: i64,
    pub read_count: i64,
    pub show_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub repin_count: i64,
    pub video_watch_count: i64,
    pub image_count: i64,
    pub user_name: String,
    pub user_avatar: String,
    pub user_id: String,
    pub is_rewritten: bool,
    pub doc_path: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Article payload produced by a collection run, before it has a row id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewArticle {
    pub group_id: String,
    pub title: String,
    pub abstract_text: String,
    pub url: String,
    pub share_url: String,
    pub source: String,
    pub content_type: String,
    pub publish_time: i64,
    pub read_count: i64,
    pub show_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub repin_count: i64,
    pub video_watch_count: i64,
    pub image_count: i64,
    pub user_name: String,
    pub user_avatar: String,
    pub user_id: String,
}

/// Outcome of a batch account insert
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountAddOutcome {
    pub added: usize,
    pub skipped: usize,
}

/// Rewrite-side article statistics
#[derive(Debug, Clone, Serialize)]
pub struct ArticleStats {
    pub total: usize,
    pub rewritten: usize,
    pub pending: usize,
}

/// Download-side article statistics
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStats {
    pub total: usize,
    pub downloaded: usize,
    pub not_downloaded: usize,
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<ArticleRecord> {
    Ok(ArticleRecord {
        id: row.get(0)?,
        group_id: row.get(1)?,
        category: row.get(2)?,
        title: row.get(3)?,
        abstract_text: row.get(4)?,
        url: row.get(5)?,
        share_url: row.get(6)?,
        source: row.get(7)?,
        content_type: row.get(8)?,
        publish_time: row.get(9)?,
        read_count: row.get(10)?,
        show_count: row.get(11)?,
        like_count: row.get(12)?,
        comment_count: row.get(13)?,
        share_count: row.get(14)?,
        repin_count: row.get(15)?,
        video_watch_count: row.get(16)?,
        image_count: row.get(17)?,
        user_name: row.get(18)?,
        user_avatar: row.get(19)?,
        user_id: row.get(20)?,
        is_rewritten: row.get(21)?,
        doc_path: row.get(22)?,
        created_at: row.get(23)?,
        updated_at: row.get(24)?,
    })
}

const ARTICLE_COLUMNS: &str = "id, group_id, category, title, abstract, url, share_url, source, \
     content_type, publish_time, read_count, show_count, like_count, comment_count, share_count, \
     repin_count, video_watch_count, image_count, user_name, user_avatar, user_id, is_rewritten, \
     doc_path, created_at, updated_at";

impl StorageManager {
    /// Open the database, apply pragmas and run migrations
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing storage: {}", config.path.display());

        if let Some(parent) = config.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connection = Connection::open(&config.path)?;
        connection.execute_batch(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            config.busy_timeout_ms
        ))?;
        if config.enable_wal {
            // WAL returns the new mode as a row, so go through query_row
            let _mode: String =
                connection.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        }

        let storage = Self {
            connection: Arc::new(Mutex::new(connection)),
        };

        storage.run_migrations().await?;

        info!("Storage initialized");
        Ok(storage)
    }

    /// Open an in-memory database, used by tests
    pub async fn new_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        let storage = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        let conn = self.connection.lock().await;
        migrations::run_migrations(&conn)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Account types
    // ---------------------------------------------------------------------

    /// List all account types, alphabetically
    pub async fn list_account_types(&self) -> Result<Vec<String>> {
        let conn = self.connection.lock().await;

        let mut stmt = conn.prepare(
            "SELECT name FROM account_types
             UNION
             SELECT DISTINCT category FROM accounts WHERE category != ''
             ORDER BY 1",
        )?;
        let types = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(types)
    }

    /// Register a new account type; fails if it already exists
    pub async fn add_account_type(&self, name: &str) -> Result<bool> {
        let conn = self.connection.lock().await;

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM account_types WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO account_types (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().timestamp()],
        )?;
        info!("Created account type: {}", name);
        Ok(true)
    }

    /// Delete an account type and every account under it
    pub async fn remove_account_type(&self, name: &str) -> Result<usize> {
        let conn = self.connection.lock().await;

        let removed = conn.execute("DELETE FROM accounts WHERE category = ?1", params![name])?;
        conn.execute("DELETE FROM account_types WHERE name = ?1", params![name])?;

        info!("Removed account type {} ({} accounts)", name, removed);
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    /// Account urls of a type, in insertion order
    pub async fn list_accounts(&self, type_name: &str) -> Result<Vec<String>> {
        let conn = self.connection.lock().await;

        let mut stmt = conn.prepare(
            "SELECT url FROM accounts WHERE category = ?1 ORDER BY created_at, id",
        )?;
        let accounts = stmt
            .query_map(params![type_name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Insert accounts under a type, skipping urls that already exist
    pub async fn add_accounts(&self, type_name: &str, urls: &[String]) -> Result<AccountAddOutcome> {
        let mut conn = self.connection.lock().await;
        let now = Utc::now().timestamp();

        let tx = conn.transaction()?;
        let mut outcome = AccountAddOutcome::default();

        tx.execute(
            "INSERT OR IGNORE INTO account_types (name, created_at) VALUES (?1, ?2)",
            params![type_name, now],
        )?;

        for url in urls {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO accounts (url, category, created_at) VALUES (?1, ?2, ?3)",
                params![url, type_name, now],
            )?;
            if inserted > 0 {
                outcome.added += 1;
            } else {
                outcome.skipped += 1;
            }
        }

        tx.commit()?;

        info!(
            "[{}] accounts added: {}, skipped: {}",
            type_name, outcome.added, outcome.skipped
        );
        Ok(outcome)
    }

    /// Remove a single account; returns false when it was not present
    pub async fn remove_account(&self, type_name: &str, url: &str) -> Result<bool> {
        let conn = self.connection.lock().await;

        let removed = conn.execute(
            "DELETE FROM accounts WHERE category = ?1 AND url = ?2",
            params![type_name, url],
        )?;
        Ok(removed > 0)
    }

    /// Remove every account under a type, keeping the type itself
    pub async fn clear_accounts(&self, type_name: &str) -> Result<usize> {
        let conn = self.connection.lock().await;

        // Re-register the type so it survives the purge
        conn.execute(
            "INSERT OR IGNORE INTO account_types (name, created_at) VALUES (?1, ?2)",
            params![type_name, Utc::now().timestamp()],
        )?;
        let removed = conn.execute("DELETE FROM accounts WHERE category = ?1", params![type_name])?;

        info!("Cleared {} accounts under type {}", removed, type_name);
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Articles
    // ---------------------------------------------------------------------

    /// Upsert collected articles. Existing rows (same group_id) only get their
    /// counters refreshed; new rows are inserted with the given category.
    /// Returns (inserted, updated).
    pub async fn save_articles(
        &self,
        articles: &[NewArticle],
        category: &str,
    ) -> Result<(usize, usize)> {
        let mut conn = self.connection.lock().await;
        let now = Utc::now().timestamp();

        let tx = conn.transaction()?;
        let mut inserted = 0;
        let mut updated = 0;

        for article in articles {
            if article.group_id.is_empty() {
                continue;
            }

            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM articles WHERE group_id = ?1",
                params![article.group_id],
                |row| row.get(0),
            )?;

            if exists > 0 {
                tx.execute(
                    "UPDATE articles SET
                        read_count = ?1, show_count = ?2, like_count = ?3,
                        comment_count = ?4, share_count = ?5, repin_count = ?6,
                        video_watch_count = ?7, updated_at = ?8
                     WHERE group_id = ?9",
                    params![
                        article.read_count,
                        article.show_count,
                        article.like_count,
                        article.comment_count,
                        article.share_count,
                        article.repin_count,
                        article.video_watch_count,
                        now,
                        article.group_id
                    ],
                )?;
                updated += 1;
            } else {
                tx.execute(
                    "INSERT INTO articles (
                        group_id, category, title, abstract, url, share_url, source,
                        content_type, publish_time, read_count, show_count, like_count,
                        comment_count, share_count, repin_count, video_watch_count,
                        image_count, user_name, user_avatar, user_id, is_rewritten,
                        doc_path, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                              ?14, ?15, ?16, ?17, ?18, ?19, ?20, 0, '', ?21, ?21)",
                    params![
                        article.group_id,
                        category,
                        article.title,
                        article.abstract_text,
                        article.url,
                        article.share_url,
                        article.source,
                        article.content_type,
                        article.publish_time,
                        article.read_count,
                        article.show_count,
                        article.like_count,
                        article.comment_count,
                        article.share_count,
                        article.repin_count,
                        article.video_watch_count,
                        article.image_count,
                        article.user_name,
                        article.user_avatar,
                        article.user_id,
                        now
                    ],
                )?;
                inserted += 1;
            }
        }

        tx.commit()?;

        info!("Articles saved: {} inserted, {} updated", inserted, updated);
        Ok((inserted, updated))
    }

    /// Insert a placeholder row for an article imported by url only.
    /// Returns false when the group_id already exists.
    pub async fn import_article(&self, group_id: &str, url: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let now = Utc::now().timestamp();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO articles
                (group_id, title, url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![group_id, format!("待下载文章 ({})", group_id), url, now],
        )?;

        Ok(inserted > 0)
    }

    /// Paginated article listing, newest first, optionally filtered by rewrite flag
    pub async fn list_articles(
        &self,
        page: usize,
        page_size: usize,
        filter_rewritten: Option<bool>,
    ) -> Result<(Vec<ArticleRecord>, usize)> {
        let (filter, param): (&str, i64) = match filter_rewritten {
            Some(flag) => ("WHERE is_rewritten = ?1", flag as i64),
            None => ("", 0),
        };

        self.list_page(filter, param, filter_rewritten.is_some(), page, page_size)
            .await
    }

    /// Paginated listing filtered on whether a document has been generated
    pub async fn list_articles_by_download(
        &self,
        page: usize,
        page_size: usize,
        filter_downloaded: Option<bool>,
    ) -> Result<(Vec<ArticleRecord>, usize)> {
        let filter = match filter_downloaded {
            Some(true) => "WHERE doc_path != ''",
            Some(false) => "WHERE doc_path = ''",
            None => "",
        };

        self.list_page(filter, 0, false, page, page_size).await
    }

    async fn list_page(
        &self,
        filter: &str,
        param: i64,
        with_param: bool,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<ArticleRecord>, usize)> {
        let conn = self.connection.lock().await;
        let page = page.max(1);
        let offset = (page - 1) * page_size;

        let count_sql = format!("SELECT COUNT(*) FROM articles {}", filter);
        let list_sql = format!(
            "SELECT {} FROM articles {} ORDER BY publish_time DESC, id DESC LIMIT {} OFFSET {}",
            ARTICLE_COLUMNS, filter, page_size, offset
        );

        let total: i64 = if with_param {
            conn.query_row(&count_sql, params![param], |row| row.get(0))?
        } else {
            conn.query_row(&count_sql, [], |row| row.get(0))?
        };

        let mut stmt = conn.prepare(&list_sql)?;
        let articles = if with_param {
            stmt.query_map(params![param], row_to_article)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map([], row_to_article)?
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok((articles, total as usize))
    }

    /// Fetch one article by row id
    pub async fn get_article(&self, article_id: i64) -> Result<Option<ArticleRecord>> {
        let conn = self.connection.lock().await;

        let sql = format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS);
        let article = conn
            .query_row(&sql, params![article_id], row_to_article)
            .optional()?;

        Ok(article)
    }

    /// Articles eligible for rewriting (have a url; unrewritten unless forced)
    pub async fn rewrite_candidates(&self, force: bool) -> Result<Vec<ArticleRecord>> {
        let conn = self.connection.lock().await;

        let sql = if force {
            format!(
                "SELECT {} FROM articles WHERE url != '' ORDER BY publish_time DESC",
                ARTICLE_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM articles WHERE url != '' AND is_rewritten = 0
                 ORDER BY publish_time DESC",
                ARTICLE_COLUMNS
            )
        };

        let mut stmt = conn.prepare(&sql)?;
        let articles = stmt
            .query_map([], row_to_article)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    /// Ids of articles with a url but no generated document yet
    pub async fn download_candidates(&self) -> Result<Vec<i64>> {
        let conn = self.connection.lock().await;

        let mut stmt =
            conn.prepare("SELECT id FROM articles WHERE url != '' AND doc_path = ''")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    /// All articles, newest first, for export
    pub async fn all_articles(&self) -> Result<Vec<ArticleRecord>> {
        let conn = self.connection.lock().await;

        let sql = format!(
            "SELECT {} FROM articles ORDER BY publish_time DESC, id DESC",
            ARTICLE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let articles = stmt
            .query_map([], row_to_article)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    /// Flip the rewrite flag; returns the new value
    pub async fn toggle_rewritten(&self, article_id: i64) -> Result<Option<bool>> {
        let conn = self.connection.lock().await;

        let updated = conn.execute(
            "UPDATE articles SET is_rewritten = NOT is_rewritten WHERE id = ?1",
            params![article_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }

        let flag: bool = conn.query_row(
            "SELECT is_rewritten FROM articles WHERE id = ?1",
            params![article_id],
            |row| row.get(0),
        )?;
        debug!("Article {} rewrite flag -> {}", article_id, flag);
        Ok(Some(flag))
    }

    /// Mark an article as rewritten
    pub async fn mark_rewritten(&self, article_id: i64) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE articles SET is_rewritten = 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().timestamp(), article_id],
        )?;
        Ok(())
    }

    /// Record the generated document path for an article
    pub async fn set_doc_path(&self, article_id: i64, doc_path: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE articles SET doc_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![doc_path, Utc::now().timestamp(), article_id],
        )?;
        Ok(())
    }

    /// Delete one article; returns false when not present
    pub async fn delete_article(&self, article_id: i64) -> Result<bool> {
        let conn = self.connection.lock().await;
        let removed = conn.execute("DELETE FROM articles WHERE id = ?1", params![article_id])?;
        if removed > 0 {
            info!("Deleted article: id={}", article_id);
        }
        Ok(removed > 0)
    }

    /// Delete all articles; returns the number removed
    pub async fn delete_all_articles(&self) -> Result<usize> {
        let conn = self.connection.lock().await;
        let removed = conn.execute("DELETE FROM articles", [])?;
        info!("Deleted all articles: {}", removed);
        Ok(removed)
    }

    /// Rewrite statistics
    pub async fn article_stats(&self) -> Result<ArticleStats> {
        let conn = self.connection.lock().await;

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        let rewritten: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE is_rewritten = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(ArticleStats {
            total: total as usize,
            rewritten: rewritten as usize,
            pending: (total - rewritten) as usize,
        })
    }

    /// Download statistics
    pub async fn download_stats(&self) -> Result<DownloadStats> {
        let conn = self.connection.lock().await;

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        let downloaded: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE doc_path != ''",
            [],
            |row| row.get(0),
        )?;

        Ok(DownloadStats {
            total: total as usize,
            downloaded: downloaded as usize,
            not_downloaded: (total - downloaded) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(group_id: &str, reads: i64) -> NewArticle {
        NewArticle {
            group_id: group_id.to_string(),
            title: format!("title {}", group_id),
            url: format!("https://example.com/article/{}/", group_id),
            content_type: "text".to_string(),
            publish_time: 1_700_000_000,
            read_count: reads,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_account_types_and_accounts() {
        let storage = StorageManager::new_in_memory().await.unwrap();

        assert!(storage.add_account_type("tech").await.unwrap());
        assert!(!storage.add_account_type("tech").await.unwrap());

        let urls = vec![
            "https://www.toutiao.com/c/user/token/a/".to_string(),
            "https://www.toutiao.com/c/user/token/b/".to_string(),
            "https://www.toutiao.com/c/user/token/a/".to_string(),
        ];
        let outcome = storage.add_accounts("tech", &urls).await.unwrap();
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.skipped, 1);

        let accounts = storage.list_accounts("tech").await.unwrap();
        assert_eq!(accounts.len(), 2);

        // Type without accounts still listed
        storage.add_account_type("finance").await.unwrap();
        let types = storage.list_account_types().await.unwrap();
        assert_eq!(types, vec!["finance".to_string(), "tech".to_string()]);

        storage.clear_accounts("tech").await.unwrap();
        assert!(storage.list_accounts("tech").await.unwrap().is_empty());
        // Clearing keeps the type registered
        assert!(storage
            .list_account_types()
            .await
            .unwrap()
            .contains(&"tech".to_string()));
    }

    #[tokio::test]
    async fn test_save_articles_upsert() {
        let storage = StorageManager::new_in_memory().await.unwrap();

        let batch = vec![article("g1", 10), article("g2", 20)];
        let (inserted, updated) = storage.save_articles(&batch, "tech").await.unwrap();
        assert_eq!((inserted, updated), (2, 0));

        // Second save refreshes counters only
        let batch = vec![article("g1", 99), article("g3", 30)];
        let (inserted, updated) = storage.save_articles(&batch, "tech").await.unwrap();
        assert_eq!((inserted, updated), (1, 1));

        let (articles, total) = storage.list_articles(1, 20, None).await.unwrap();
        assert_eq!(total, 3);
        let g1 = articles.iter().find(|a| a.group_id == "g1").unwrap();
        assert_eq!(g1.read_count, 99);
        assert_eq!(g1.category, "tech");
    }

    #[tokio::test]
    async fn test_pagination_and_filters() {
        let storage = StorageManager::new_in_memory().await.unwrap();

        let batch: Vec<NewArticle> = (0..25).map(|i| article(&format!("g{}", i), i)).collect();
        storage.save_articles(&batch, "").await.unwrap();

        let (page1, total) = storage.list_articles(1, 20, None).await.unwrap();
        assert_eq!(total, 25);
        assert_eq!(page1.len(), 20);
        let (page2, _) = storage.list_articles(2, 20, None).await.unwrap();
        assert_eq!(page2.len(), 5);

        let first_id = page1[0].id;
        storage.mark_rewritten(first_id).await.unwrap();

        let (rewritten, total) = storage.list_articles(1, 20, Some(true)).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rewritten[0].id, first_id);

        let stats = storage.article_stats().await.unwrap();
        assert_eq!(stats.total, 25);
        assert_eq!(stats.rewritten, 1);
        assert_eq!(stats.pending, 24);
    }

    #[tokio::test]
    async fn test_toggle_and_delete() {
        let storage = StorageManager::new_in_memory().await.unwrap();
        storage
            .save_articles(&[article("g1", 1)], "")
            .await
            .unwrap();
        let (articles, _) = storage.list_articles(1, 10, None).await.unwrap();
        let id = articles[0].id;

        assert_eq!(storage.toggle_rewritten(id).await.unwrap(), Some(true));
        assert_eq!(storage.toggle_rewritten(id).await.unwrap(), Some(false));
        assert_eq!(storage.toggle_rewritten(9999).await.unwrap(), None);

        assert!(storage.delete_article(id).await.unwrap());
        assert!(!storage.delete_article(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_and_download_candidates() {
        let storage = StorageManager::new_in_memory().await.unwrap();

        assert!(storage
            .import_article("7473002025927541286", "https://example.com/article/7473002025927541286/")
            .await
            .unwrap());
        assert!(!storage
            .import_article("7473002025927541286", "https://example.com/article/7473002025927541286/")
            .await
            .unwrap());

        let candidates = storage.download_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);

        storage
            .set_doc_path(candidates[0], "/tmp/a.doc")
            .await
            .unwrap();
        assert!(storage.download_candidates().await.unwrap().is_empty());

        let stats = storage.download_stats().await.unwrap();
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.not_downloaded, 0);
    }
}
