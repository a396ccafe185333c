use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub name: String,
    pub version: i32,
    pub template_type: String,
    pub status: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub time_limit_seconds: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub row_version: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SectionRow {
    pub id: Uuid,
    pub template_name: String,
    pub template_version: i32,
    pub sort_order: i32,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub name: String,
    pub version: i32,
    pub section_id: Uuid,
    pub sort_order: i32,
    pub question_type: String,
    pub question_text: String,
    pub is_required: bool,
    pub trait_key: Option<String>,
    pub ws: Option<f64>,
    pub media_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OptionRow {
    pub name: String,
    pub version: i32,
    pub question_name: String,
    pub question_version: i32,
    pub sort_order: i32,
    pub label: String,
    pub is_correct: Option<bool>,
    pub score: Option<f64>,
    pub weight: Option<f64>,
    pub wa: Option<f64>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
