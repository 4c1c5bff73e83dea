use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::title::TitleResolver;
use super::{Page, PageStore, SaveOutcome, StoreError, StoreResult};

/// SQLite-backed page store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    titles: Arc<dyn TitleResolver>,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path, titles: Arc<dyn TitleResolver>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::run_migrations(&conn)?;

        info!("Page store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            titles,
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory(titles: Arc<dyn TitleResolver>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            titles,
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- One copy of a link per user
            CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_user_url
                ON pages(user_id, url);
            ",
        )
        .context("Failed to run migrations")?;

        Ok(())
    }

    async fn resolve_title(&self, page: &Page) -> Option<String> {
        if page.title.is_some() {
            return page.title.clone();
        }
        match self.titles.resolve(&page.url).await {
            Ok(title) => title,
            Err(e) => {
                warn!("Saving {} without a title: {:#}", page.url, e);
                None
            }
        }
    }
}

/// Insert the user if missing and return its id. Caller holds the lock.
fn ensure_user(conn: &Connection, user_name: &str) -> rusqlite::Result<String> {
    conn.execute(
        "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(username) DO NOTHING",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            user_name,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;

    conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        rusqlite::params![user_name],
        |row| row.get(0),
    )
}

#[async_trait]
impl PageStore for SqliteStore {
    async fn user_exists(&self, user_name: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            rusqlite::params![user_name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn create_user(&self, user_name: &str) -> StoreResult<String> {
        let conn = self.conn.lock().await;
        let id = ensure_user(&conn, user_name)?;
        debug!("User {} has id {}", user_name, id);
        Ok(id)
    }

    async fn page_exists(&self, page: &Page) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let exists = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM pages p
                JOIN users u ON p.user_id = u.id
                WHERE u.username = ?1 AND p.url = ?2
            )",
            rusqlite::params![page.user_name, page.url],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn save_page(&self, page: &Page) -> StoreResult<SaveOutcome> {
        // Network lookup happens before taking the DB lock
        let title = self.resolve_title(page).await;

        let conn = self.conn.lock().await;
        let user_id = ensure_user(&conn, &page.user_name)?;

        let inserted = conn.execute(
            "INSERT INTO pages (id, user_id, url, title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, url) DO NOTHING",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                user_id,
                page.url,
                title,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;

        if inserted == 0 {
            debug!("{} already saved for {}", page.url, page.user_name);
            return Ok(SaveOutcome::AlreadyExists);
        }
        Ok(SaveOutcome::Saved)
    }

    async fn pick_random_page(&self, user_name: &str) -> StoreResult<Page> {
        let conn = self.conn.lock().await;
        let picked: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT p.url, p.title FROM pages p
                 JOIN users u ON p.user_id = u.id
                 WHERE u.username = ?1
                 ORDER BY RANDOM() LIMIT 1",
                rusqlite::params![user_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (url, title) = picked.ok_or(StoreError::NoSavedPages)?;
        Ok(Page {
            url,
            user_name: user_name.to_string(),
            title,
        })
    }

    async fn remove_page(&self, page: &Page) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM pages
             WHERE url = ?1
               AND user_id = (SELECT id FROM users WHERE username = ?2)",
            rusqlite::params![page.url, page.user_name],
        )?;
        if removed == 0 {
            debug!("{} was not stored for {}", page.url, page.user_name);
        }
        Ok(())
    }
}

#[cfg(test)]
impl SqliteStore {
    pub async fn count_pages(&self, user_name: &str) -> usize {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pages p
                 JOIN users u ON p.user_id = u.id
                 WHERE u.username = ?1",
                rusqlite::params![user_name],
                |row| row.get(0),
            )
            .unwrap();
        count as usize
    }

    pub async fn count_users(&self, user_name: &str) -> usize {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1",
                rusqlite::params![user_name],
                |row| row.get(0),
            )
            .unwrap();
        count as usize
    }
}
