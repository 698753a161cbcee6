//! Schema migrations, applied in order on startup.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

const SCHEMA_VERSION: i32 = 1;

/// Bring the database up to [`SCHEMA_VERSION`], one step at a time. Each
/// applied step is recorded in `schema_version` so reruns are no-ops.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for version in (applied + 1)..=SCHEMA_VERSION {
        info!("Migrating schema to v{}", version);
        match version {
            1 => migrate_v1(conn)?,
            other => bail!("no migration registered for version {}", other),
        }
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().timestamp()],
        )?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    // Account types are first-class rows so a type can exist with no accounts
    conn.execute(
        "CREATE TABLE account_types (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Tracked benchmark accounts
    conn.execute(
        "CREATE TABLE accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Collected articles
    conn.execute(
        "CREATE TABLE articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            abstract TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT '',
            share_url TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL DEFAULT 'text',
            publish_time INTEGER NOT NULL DEFAULT 0,
            read_count INTEGER NOT NULL DEFAULT 0,
            show_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            share_count INTEGER NOT NULL DEFAULT 0,
            repin_count INTEGER NOT NULL DEFAULT 0,
            video_watch_count INTEGER NOT NULL DEFAULT 0,
            image_count INTEGER NOT NULL DEFAULT 0,
            user_name TEXT NOT NULL DEFAULT '',
            user_avatar TEXT NOT NULL DEFAULT '',
            user_id TEXT NOT NULL DEFAULT '',
            is_rewritten INTEGER NOT NULL DEFAULT 0,
            doc_path TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute("CREATE INDEX idx_accounts_category ON accounts (category)", [])?;
    conn.execute("CREATE INDEX idx_articles_category ON articles (category)", [])?;
    conn.execute("CREATE INDEX idx_articles_publish_time ON articles (publish_time)", [])?;
    conn.execute("CREATE INDEX idx_articles_is_rewritten ON articles (is_rewritten)", [])?;
    conn.execute("CREATE INDEX idx_articles_user_id ON articles (user_id)", [])?;

    Ok(())
}
