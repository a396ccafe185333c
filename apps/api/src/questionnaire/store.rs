//! Persistence seam for questionnaire templates.
//!
//! `AppState` carries an `Arc<dyn TemplateStore>`; Postgres in production,
//! the in-memory store for local runs and tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::questionnaire::model::{Question, QuestionOption, Submission, Template};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A `(name, version)` key or an active question slot is already taken.
    #[error("Unique key violation: {0}")]
    UniqueViolation(String),

    /// The template row changed since it was loaded.
    #[error("Template '{name}' v{version} was modified concurrently")]
    ConcurrencyConflict { name: String, version: i32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Failures another attempt against fresh data may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation(_) | StoreError::ConcurrencyConflict { .. }
        )
    }
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Every template version with its full graph, soft-deleted ones included.
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;

    /// All versions of one name, oldest first.
    async fn list_versions(&self, name: &str) -> Result<Vec<Template>, StoreError>;

    async fn find_template(&self, name: &str, version: i32)
        -> Result<Option<Template>, StoreError>;

    /// Highest version number ever issued for `name`, deleted rows included.
    async fn latest_template_version(&self, name: &str) -> Result<Option<i32>, StoreError>;

    /// Inserts a brand-new template version with its whole graph.
    async fn insert_template(&self, template: &Template) -> Result<(), StoreError>;

    /// Replaces the stored graph of an existing version. Fails with
    /// `ConcurrencyConflict` when `template.row_version` is stale; returns the
    /// new token.
    async fn save_template(&self, template: &Template) -> Result<i64, StoreError>;

    async fn delete_template(&self, name: &str, version: i32) -> Result<(), StoreError>;

    async fn count_submissions(&self, name: &str, version: i32) -> Result<i64, StoreError>;

    async fn insert_submission(&self, submission: &Submission) -> Result<(), StoreError>;

    async fn latest_question_version(&self, name: &str) -> Result<Option<i32>, StoreError>;

    async fn latest_option_version(&self, name: &str) -> Result<Option<i32>, StoreError>;

    async fn option_exists(&self, name: &str, version: i32) -> Result<bool, StoreError>;

    /// Every version of a question with its options, newest first.
    async fn question_versions(&self, name: &str) -> Result<Vec<Question>, StoreError>;

    /// Every version of an option, newest first.
    async fn option_versions(&self, name: &str) -> Result<Vec<QuestionOption>, StoreError>;
}
