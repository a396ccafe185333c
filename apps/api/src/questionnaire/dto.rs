//! Wire shapes for the template API. Type and status fields stay strings on
//! the way in so validation can report bad values instead of serde rejecting
//! the whole body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::questionnaire::model::{Question, QuestionOption, Section, Template, TemplateStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDto {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub template_type: String,
    #[serde(default)]
    pub status: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub time_limit_seconds: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub is_deleted: bool,
    /// Concurrency token from a previous read. A stale value fails an
    /// in-place update with a conflict.
    pub row_version: Option<i64>,
    /// Produce a new template version instead of editing this one.
    #[serde(default)]
    pub should_update_version: bool,
    #[serde(default)]
    pub sections_count: usize,
    #[serde(default)]
    pub questions_count: usize,
    #[serde(default)]
    pub sections: Vec<SectionDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDto {
    pub id: Option<Uuid>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionDto>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDto {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub question_type: String,
    #[serde(default)]
    pub prompt_text: String,
    #[serde(default)]
    pub is_required: bool,
    pub trait_key: Option<String>,
    pub ws: Option<f64>,
    pub media_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub options: Vec<OptionDto>,
}

impl Default for QuestionDto {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: 0,
            order: 0,
            question_type: String::new(),
            prompt_text: String::new(),
            is_required: false,
            trait_key: None,
            ws: None,
            media_url: None,
            is_active: true,
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDto {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub label: String,
    pub is_correct: Option<bool>,
    pub score: Option<f64>,
    pub weight: Option<f64>,
    pub wa: Option<f64>,
    pub media_url: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Domain → DTO
// ────────────────────────────────────────────────────────────────────────────

impl From<&Template> for TemplateDto {
    fn from(t: &Template) -> Self {
        Self {
            name: t.name.clone(),
            version: t.version,
            template_type: t.template_type.to_string(),
            status: t.status.to_string(),
            title: t.title.clone(),
            description: t.description.clone(),
            time_limit_seconds: t.time_limit_seconds,
            published_at: t.published_at,
            created_at: Some(t.created_at),
            updated_at: Some(t.updated_at),
            is_published: t.status == TemplateStatus::Published,
            is_deleted: t.is_deleted,
            row_version: Some(t.row_version),
            should_update_version: false,
            sections_count: t.sections.len(),
            questions_count: t.active_question_count(),
            sections: t.sections.iter().map(SectionDto::from).collect(),
        }
    }
}

impl From<&Section> for SectionDto {
    /// Only the active version of each question is exposed.
    fn from(s: &Section) -> Self {
        Self {
            id: Some(s.id),
            order: s.order,
            title: s.title.clone(),
            description: s.description.clone(),
            questions: s.active_questions().map(QuestionDto::from).collect(),
        }
    }
}

impl From<&Question> for QuestionDto {
    fn from(q: &Question) -> Self {
        Self {
            name: q.name.clone(),
            version: q.version,
            order: q.order,
            question_type: q.question_type.to_string(),
            prompt_text: q.question_text.clone(),
            is_required: q.is_required,
            trait_key: q.trait_key.clone(),
            ws: q.ws,
            media_url: q.media_url.clone(),
            is_active: q.is_active,
            options: q.options.iter().map(OptionDto::from).collect(),
        }
    }
}

impl From<&QuestionOption> for OptionDto {
    fn from(o: &QuestionOption) -> Self {
        Self {
            name: o.name.clone(),
            version: o.version,
            order: o.order,
            label: o.label.clone(),
            is_correct: o.is_correct,
            score: o.score,
            weight: o.weight,
            wa: o.wa,
            media_url: o.media_url.clone(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Candidate view: no scoring data
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTemplateDto {
    pub name: String,
    pub version: i32,
    pub template_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub time_limit_seconds: Option<i32>,
    pub sections: Vec<CandidateSectionDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSectionDto {
    pub id: Uuid,
    pub order: i32,
    pub title: String,
    pub description: Option<String>,
    pub questions: Vec<CandidateQuestionDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateQuestionDto {
    pub name: String,
    pub version: i32,
    pub order: i32,
    pub question_type: String,
    pub prompt_text: String,
    pub is_required: bool,
    pub media_url: Option<String>,
    pub options: Vec<CandidateOptionDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOptionDto {
    pub name: String,
    pub version: i32,
    pub order: i32,
    pub label: String,
    pub media_url: Option<String>,
}

impl From<&Template> for CandidateTemplateDto {
    fn from(t: &Template) -> Self {
        Self {
            name: t.name.clone(),
            version: t.version,
            template_type: t.template_type.to_string(),
            title: t.title.clone(),
            description: t.description.clone(),
            time_limit_seconds: t.time_limit_seconds,
            sections: t
                .sections
                .iter()
                .map(|s| CandidateSectionDto {
                    id: s.id,
                    order: s.order,
                    title: s.title.clone(),
                    description: s.description.clone(),
                    questions: s
                        .active_questions()
                        .map(|q| CandidateQuestionDto {
                            name: q.name.clone(),
                            version: q.version,
                            order: q.order,
                            question_type: q.question_type.to_string(),
                            prompt_text: q.question_text.clone(),
                            is_required: q.is_required,
                            media_url: q.media_url.clone(),
                            options: q
                                .options
                                .iter()
                                .map(|o| CandidateOptionDto {
                                    name: o.name.clone(),
                                    version: o.version,
                                    order: o.order,
                                    label: o.label.clone(),
                                    media_url: o.media_url.clone(),
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// History, listing and small request/response bodies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHistoryItem {
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// A question version with its options, as returned by question history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionHistoryDto {
    #[serde(flatten)]
    pub question: QuestionDto,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Question> for QuestionHistoryDto {
    fn from(q: &Question) -> Self {
        Self {
            question: QuestionDto::from(q),
            created_at: q.created_at,
            updated_at: q.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRequest {
    #[serde(default)]
    pub new_name: String,
    #[serde(default)]
    pub include_questions: bool,
    #[serde(default)]
    pub include_title: bool,
    #[serde(default)]
    pub include_description: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeleteMode {
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub mode: DeleteMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    #[serde(default)]
    pub candidate_ref: String,
}

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub search_term: Option<String>,
    pub template_type: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub only_deleted: bool,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_descending: bool,
    pub page_number: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListQuery {
    /// Page numbers below 1 become 1.
    pub fn page_number(&self) -> usize {
        match self.page_number {
            Some(n) if n >= 1 => n as usize,
            _ => 1,
        }
    }

    /// Sizes outside `1..=100` fall back to 10.
    pub fn page_size(&self) -> usize {
        match self.page_size {
            Some(n) if n >= 1 && n as usize <= MAX_PAGE_SIZE => n as usize,
            _ => DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page_number: usize,
    pub page_size: usize,
}
