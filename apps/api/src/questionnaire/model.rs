//! Questionnaire aggregate: template → sections → questions → options.
//!
//! Templates, questions and options are keyed by `(name, version)`; sections
//! are keyed by id and belong to exactly one template version. Collections are
//! kept sorted by `order`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
}

fn parse_ignore_case<T: Copy>(
    all: &[T],
    as_str: fn(T) -> &'static str,
    kind: &'static str,
    raw: &str,
) -> Result<T, ParseKindError> {
    let raw = raw.trim();
    all.iter()
        .copied()
        .find(|candidate| as_str(*candidate).eq_ignore_ascii_case(raw))
        .ok_or_else(|| ParseKindError {
            kind,
            value: raw.to_string(),
        })
}

// ────────────────────────────────────────────────────────────────────────────
// Enumerations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateType {
    Quiz,
    Personality,
    Form,
}

impl TemplateType {
    pub const ALL: [TemplateType; 3] = [Self::Quiz, Self::Personality, Self::Form];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiz => "Quiz",
            Self::Personality => "Personality",
            Self::Form => "Form",
        }
    }

    /// Question types a template of this type may hold. `Form` accepts all.
    pub fn allows(self, question_type: QuestionType) -> bool {
        match self {
            Self::Quiz => matches!(
                question_type,
                QuestionType::SingleChoice | QuestionType::MultiChoice
            ),
            Self::Personality => question_type == QuestionType::Likert,
            Self::Form => true,
        }
    }
}

impl FromStr for TemplateType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ignore_case(&Self::ALL, Self::as_str, "template type", s)
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateStatus {
    Draft,
    Published,
    Archived,
}

impl TemplateStatus {
    pub const ALL: [TemplateStatus; 3] = [Self::Draft, Self::Published, Self::Archived];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Published => "Published",
            Self::Archived => "Archived",
        }
    }
}

impl FromStr for TemplateStatus {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ignore_case(&Self::ALL, Self::as_str, "template status", s)
    }
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    Text,
    Textarea,
    Radio,
    Checkbox,
    Dropdown,
    SingleChoice,
    MultiChoice,
    Likert,
}

impl QuestionType {
    pub const ALL: [QuestionType; 8] = [
        Self::Text,
        Self::Textarea,
        Self::Radio,
        Self::Checkbox,
        Self::Dropdown,
        Self::SingleChoice,
        Self::MultiChoice,
        Self::Likert,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Textarea => "Textarea",
            Self::Radio => "Radio",
            Self::Checkbox => "Checkbox",
            Self::Dropdown => "Dropdown",
            Self::SingleChoice => "SingleChoice",
            Self::MultiChoice => "MultiChoice",
            Self::Likert => "Likert",
        }
    }

    /// Whether answers are picked from a list of options.
    pub fn is_option_based(self) -> bool {
        !matches!(self, Self::Text | Self::Textarea)
    }
}

impl FromStr for QuestionType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ignore_case(&Self::ALL, Self::as_str, "question type", s)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aggregate
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub version: i32,
    pub template_type: TemplateType,
    pub status: TemplateStatus,
    pub title: Option<String>,
    pub description: Option<String>,
    pub time_limit_seconds: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    /// Optimistic concurrency token, bumped by every successful save.
    pub row_version: i64,
    pub sections: Vec<Section>,
}

impl Template {
    /// A fresh Draft template with no sections.
    pub fn new(name: impl Into<String>, version: i32, template_type: TemplateType) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            version,
            template_type,
            status: TemplateStatus::Draft,
            title: None,
            description: None,
            time_limit_seconds: None,
            published_at: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            row_version: 1,
            sections: Vec::new(),
        }
    }

    pub fn section_by_order(&self, order: i32) -> Option<&Section> {
        self.sections.iter().find(|s| s.order == order)
    }

    pub fn section_by_order_mut(&mut self, order: i32) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.order == order)
    }

    /// Re-sorts sections, questions and options by `order`.
    pub fn sort_children(&mut self) {
        self.sections.sort_by_key(|s| s.order);
        for section in &mut self.sections {
            section.sort_children();
        }
    }

    pub fn active_question_count(&self) -> usize {
        self.sections.iter().map(|s| s.active_questions().count()).sum()
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.sections.iter().flat_map(|s| s.questions.iter())
    }

    pub fn options(&self) -> impl Iterator<Item = &QuestionOption> {
        self.questions().flat_map(|q| q.options.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub id: Uuid,
    pub order: i32,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Every question version placed in this section, active or not.
    pub questions: Vec<Question>,
}

impl Section {
    pub fn new(order: i32, title: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order,
            title: title.into(),
            description,
            created_at: now,
            updated_at: now,
            questions: Vec::new(),
        }
    }

    pub fn active_questions(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter().filter(|q| q.is_active)
    }

    pub fn sort_children(&mut self) {
        self.questions
            .sort_by(|a, b| a.order.cmp(&b.order).then(a.version.cmp(&b.version)));
        for question in &mut self.questions {
            question.options.sort_by_key(|o| o.order);
        }
    }

    /// Orders holding more than one active question.
    pub fn contested_slots(&self) -> Vec<i32> {
        let mut orders: Vec<i32> = self.active_questions().map(|q| q.order).collect();
        orders.sort_unstable();
        let mut contested: Vec<i32> = orders
            .windows(2)
            .filter(|w| w[0] == w[1])
            .map(|w| w[0])
            .collect();
        contested.dedup();
        contested
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub name: String,
    pub version: i32,
    pub order: i32,
    pub question_type: QuestionType,
    pub question_text: String,
    pub is_required: bool,
    pub trait_key: Option<String>,
    pub ws: Option<f64>,
    pub media_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn key(&self) -> (String, i32) {
        (self.name.clone(), self.version)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionOption {
    pub name: String,
    pub version: i32,
    pub order: i32,
    pub label: String,
    pub is_correct: Option<bool>,
    pub score: Option<f64>,
    pub weight: Option<f64>,
    pub wa: Option<f64>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuestionOption {
    pub fn key(&self) -> (String, i32) {
        (self.name.clone(), self.version)
    }
}

/// A candidate's attempt at a template version. One is enough to put the
/// version "in use".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub template_name: String,
    pub template_version: i32,
    pub candidate_ref: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(name: &str, order: i32, active: bool) -> Question {
        let now = Utc::now();
        Question {
            name: name.to_string(),
            version: 1,
            order,
            question_type: QuestionType::Text,
            question_text: name.to_string(),
            is_required: false,
            trait_key: None,
            ws: None,
            media_url: None,
            is_active: active,
            created_at: now,
            updated_at: now,
            options: vec![],
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("likert".parse::<QuestionType>(), Ok(QuestionType::Likert));
        assert_eq!(" QUIZ ".parse::<TemplateType>(), Ok(TemplateType::Quiz));
        assert_eq!(
            "published".parse::<TemplateStatus>(),
            Ok(TemplateStatus::Published)
        );
        assert!("Essay".parse::<QuestionType>().is_err());
    }

    #[test]
    fn test_option_based_types() {
        assert!(!QuestionType::Text.is_option_based());
        assert!(!QuestionType::Textarea.is_option_based());
        assert!(QuestionType::Dropdown.is_option_based());
        assert!(QuestionType::Likert.is_option_based());
    }

    #[test]
    fn test_template_type_allows() {
        assert!(TemplateType::Quiz.allows(QuestionType::MultiChoice));
        assert!(!TemplateType::Quiz.allows(QuestionType::Likert));
        assert!(TemplateType::Personality.allows(QuestionType::Likert));
        assert!(!TemplateType::Personality.allows(QuestionType::Radio));
        assert!(TemplateType::Form.allows(QuestionType::Text));
    }

    #[test]
    fn test_contested_slots_ignore_inactive() {
        let mut section = Section::new(1, "Intro", None);
        section.questions = vec![
            question("a", 1, true),
            question("b", 1, false),
            question("c", 2, true),
            question("d", 2, true),
        ];
        assert_eq!(section.contested_slots(), vec![2]);
    }

    #[test]
    fn test_sort_children_orders_everything() {
        let mut template = Template::new("t", 1, TemplateType::Form);
        let mut second = Section::new(2, "Second", None);
        second.questions = vec![question("z", 3, true), question("y", 1, true)];
        template.sections = vec![second, Section::new(1, "First", None)];

        template.sort_children();

        assert_eq!(template.sections[0].order, 1);
        assert_eq!(template.sections[1].questions[0].name, "y");
    }
}
