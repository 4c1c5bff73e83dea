pub mod sqlite;
pub mod title;

use async_trait::async_trait;
use thiserror::Error;

/// A saved link, owned by one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub user_name: String,
    /// Display title, resolved when the page is saved
    pub title: Option<String>,
}

impl Page {
    pub fn new(url: &str, user_name: &str) -> Self {
        Self {
            url: url.to_string(),
            user_name: user_name.to_string(),
            title: None,
        }
    }
}

/// Result of a save request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The (url, user) pair was already stored
    AlreadyExists,
}

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The user has nothing saved
    #[error("no saved pages")]
    NoSavedPages,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for users and their saved pages
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn user_exists(&self, user_name: &str) -> StoreResult<bool>;

    /// Register a user, returning the existing id when already present
    async fn create_user(&self, user_name: &str) -> StoreResult<String>;

    async fn page_exists(&self, page: &Page) -> StoreResult<bool>;

    /// Persist a page, attaching its title when one can be resolved
    async fn save_page(&self, page: &Page) -> StoreResult<SaveOutcome>;

    /// Pick one of the user's pages at random, or `StoreError::NoSavedPages`
    async fn pick_random_page(&self, user_name: &str) -> StoreResult<Page>;

    async fn remove_page(&self, page: &Page) -> StoreResult<()>;
}
