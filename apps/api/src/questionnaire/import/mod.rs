//! Bulk authoring from the `Import` worksheet.
//!
//! `validate` is a dry run that reports every problem with its row number;
//! `execute` re-validates and then creates a template or merges the rows
//! into an existing version through [`TemplateService`].

pub mod merge;
pub mod rows;
pub mod sheet;
pub mod validate;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::questionnaire::dto::TemplateDto;
use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::import::merge::{apply_rows, new_template_dto};
use crate::questionnaire::import::rows::{apply_carry_forward, apply_overrides, map_rows, ImportRow};
use crate::questionnaire::import::sheet::{read_rows, SheetError};
use crate::questionnaire::import::validate::validate_rows;
use crate::questionnaire::model::ParseKindError;
use crate::questionnaire::service::TemplateService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportScope {
    CreateTemplate,
    AppendToTemplate,
    AppendToSection,
}

impl ImportScope {
    pub const ALL: [ImportScope; 3] = [
        Self::CreateTemplate,
        Self::AppendToTemplate,
        Self::AppendToSection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTemplate => "CreateTemplate",
            Self::AppendToTemplate => "AppendToTemplate",
            Self::AppendToSection => "AppendToSection",
        }
    }

    pub fn is_append(self) -> bool {
        self != Self::CreateTemplate
    }
}

impl FromStr for ImportScope {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| ParseKindError {
                kind: "import scope",
                value: raw.to_string(),
            })
    }
}

impl fmt::Display for ImportScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Choices made in the upload form. Each one overrides the sheet.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub scope: Option<ImportScope>,
    pub template_name: Option<String>,
    pub template_type: Option<String>,
    pub template_version: Option<i32>,
    pub target_section_order: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    pub row_number: usize,
    pub column: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl ImportIssue {
    pub fn error(row_number: usize, column: &str, message: impl Into<String>) -> Self {
        Self {
            row_number,
            column: Some(column.to_string()),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(row_number: usize, column: &str, message: impl Into<String>) -> Self {
        Self {
            row_number,
            column: Some(column.to_string()),
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportValidation {
    pub is_valid: bool,
    pub scope: Option<ImportScope>,
    pub template_name: Option<String>,
    pub template_type: Option<String>,
    pub template_exists: bool,
    pub existing_latest_version: Option<i32>,
    pub existing_latest_in_use: bool,
    pub total_rows: usize,
    pub sections_count: usize,
    pub questions_count: usize,
    pub options_count: usize,
    pub errors: Vec<ImportIssue>,
}

impl ImportValidation {
    /// `"Row 3: ...; Row 5: ..."` over the blocking issues.
    pub fn error_summary(&self) -> String {
        let summary = self
            .errors
            .iter()
            .filter(|issue| issue.is_error())
            .map(|issue| format!("Row {}: {}", issue.row_number, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        if summary.is_empty() {
            "Import file is invalid.".to_string()
        } else {
            summary
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportExecution {
    pub template_name: String,
    pub template_version: i32,
    pub template_type: String,
    pub scope: ImportScope,
    pub created_new_template: bool,
    pub created_new_version: bool,
    pub sections_count: usize,
    pub questions_count: usize,
    pub options_count: usize,
    pub messages: Vec<ImportIssue>,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error(transparent)]
    Questionnaire(#[from] QuestionnaireError),
}

#[derive(Clone)]
pub struct TemplateImporter {
    service: TemplateService,
}

impl TemplateImporter {
    pub fn new(service: TemplateService) -> Self {
        Self { service }
    }

    pub async fn validate(
        &self,
        bytes: &[u8],
        request: &ImportRequest,
    ) -> Result<ImportValidation, ImportError> {
        let rows = prepare_rows(bytes, request)?;
        Ok(validate_rows(&self.service, &rows, request).await?)
    }

    pub async fn execute(
        &self,
        bytes: &[u8],
        request: &ImportRequest,
    ) -> Result<ImportExecution, ImportError> {
        let rows = prepare_rows(bytes, request)?;
        let validation = validate_rows(&self.service, &rows, request).await?;

        let (scope, name, template_type) = match (
            validation.is_valid,
            validation.scope,
            validation.template_name.as_deref(),
            validation.template_type.as_deref(),
        ) {
            (true, Some(scope), Some(name), Some(template_type)) => {
                (scope, name.trim().to_string(), template_type.trim().to_string())
            }
            _ => {
                return Err(QuestionnaireError::Invalid(validation.error_summary()).into());
            }
        };

        let mut messages = Vec::new();
        if scope == ImportScope::CreateTemplate {
            let mut dto = new_template_dto(&name, &template_type, &rows, request);
            apply_rows(&mut dto, scope, &rows, &mut messages);
            let created = self.service.create(dto).await?;
            info!(
                "Imported new questionnaire template {} v{} from {} rows",
                created.name,
                created.version,
                rows.len()
            );
            return Ok(execution(created, scope, true, false, messages));
        }

        let target = match request.template_version {
            Some(version) if version > 0 => self.service.find(&name, version).await?,
            _ => self.service.latest(&name).await?,
        }
        .ok_or_else(|| QuestionnaireError::NotFound(format!("Template '{name}' was not found.")))?;

        let mut dto = TemplateDto::from(&target);
        let in_use = self.service.is_in_use(&target.name, target.version).await?;
        dto.should_update_version = in_use;

        apply_rows(&mut dto, scope, &rows, &mut messages);
        let updated = self.service.update(dto).await?;
        info!(
            "Imported {} rows into questionnaire template {} v{} ({})",
            rows.len(),
            updated.name,
            updated.version,
            scope
        );
        Ok(execution(updated, scope, false, in_use, messages))
    }
}

/// Reads the sheet and applies form overrides and carry-forward defaults.
pub fn prepare_rows(bytes: &[u8], request: &ImportRequest) -> Result<Vec<ImportRow>, SheetError> {
    let cells = read_rows(bytes)?;
    let mut rows = map_rows(&cells);
    apply_overrides(&mut rows, request);
    apply_carry_forward(&mut rows);
    Ok(rows)
}

fn execution(
    dto: TemplateDto,
    scope: ImportScope,
    created_new_template: bool,
    created_new_version: bool,
    messages: Vec<ImportIssue>,
) -> ImportExecution {
    let questions = dto.sections.iter().flat_map(|s| s.questions.iter());
    let questions_count = questions.clone().count();
    let options_count = questions.map(|q| q.options.len()).sum();
    ImportExecution {
        sections_count: dto.sections.len(),
        questions_count,
        options_count,
        template_name: dto.name,
        template_version: dto.version,
        template_type: dto.template_type,
        scope,
        created_new_template,
        created_new_version,
        messages,
    }
}
