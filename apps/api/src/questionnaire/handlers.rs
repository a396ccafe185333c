use std::str::FromStr;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use tracing::debug;

use crate::errors::AppError;
use crate::questionnaire::dto::{
    CandidateTemplateDto, DeleteResult, DuplicateRequest, ListQuery, PagedResult,
    QuestionDto, QuestionHistoryDto, SubmissionRequest, TemplateDto, VersionHistoryItem,
};
use crate::questionnaire::import::{ImportExecution, ImportRequest, ImportValidation};
use crate::questionnaire::model::Submission;
use crate::state::AppState;

/// GET /api/v1/questionnaire-templates
pub async fn handle_list(
    State(state): State<AppState>,
) -> Result<Json<Vec<TemplateDto>>, AppError> {
    Ok(Json(state.templates.list_all().await?))
}

/// GET /api/v1/questionnaire-templates/filtered
pub async fn handle_list_filtered(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PagedResult<TemplateDto>>, AppError> {
    Ok(Json(state.templates.list_filtered(&query).await?))
}

/// POST /api/v1/questionnaire-templates
pub async fn handle_create(
    State(state): State<AppState>,
    Json(dto): Json<TemplateDto>,
) -> Result<(StatusCode, Json<TemplateDto>), AppError> {
    let created = state.templates.create(dto).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/questionnaire-templates/:name/latest
pub async fn handle_get_latest(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TemplateDto>, AppError> {
    Ok(Json(state.templates.get_latest(&name).await?))
}

/// GET /api/v1/questionnaire-templates/:name/versions
pub async fn handle_list_versions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<TemplateDto>>, AppError> {
    Ok(Json(state.templates.list_versions(&name).await?))
}

/// GET /api/v1/questionnaire-templates/:name/history/:entity_type
///
/// `entity_type` is `template`, `question` or `option`; `name` is the name of
/// that entity.
pub async fn handle_version_history(
    State(state): State<AppState>,
    Path((name, entity_type)): Path<(String, String)>,
) -> Result<Json<Vec<VersionHistoryItem>>, AppError> {
    Ok(Json(state.templates.version_history(&name, &entity_type).await?))
}

/// GET /api/v1/questionnaire-templates/:name/:version
pub async fn handle_get(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
) -> Result<Json<TemplateDto>, AppError> {
    Ok(Json(state.templates.get(&name, version).await?))
}

/// PUT /api/v1/questionnaire-templates/:name/:version
///
/// The path identifies the template; name and version in the body are ignored.
pub async fn handle_update(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
    Json(mut dto): Json<TemplateDto>,
) -> Result<Json<TemplateDto>, AppError> {
    dto.name = name;
    dto.version = version;
    Ok(Json(state.templates.update(dto).await?))
}

/// DELETE /api/v1/questionnaire-templates/:name/:version
pub async fn handle_delete(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
) -> Result<Json<DeleteResult>, AppError> {
    Ok(Json(state.templates.delete(&name, version).await?))
}

/// POST /api/v1/questionnaire-templates/:name/:version/publish
pub async fn handle_publish(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
) -> Result<StatusCode, AppError> {
    state.templates.publish(&name, version).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/questionnaire-templates/:name/:version/restore
pub async fn handle_restore(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
) -> Result<StatusCode, AppError> {
    state.templates.restore(&name, version).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/questionnaire-templates/:name/:version/duplicate
pub async fn handle_duplicate(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
    Json(req): Json<DuplicateRequest>,
) -> Result<(StatusCode, Json<TemplateDto>), AppError> {
    let copy = state.templates.duplicate(&name, version, &req).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

/// GET /api/v1/questionnaire-templates/:name/:version/candidate
pub async fn handle_candidate_view(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
) -> Result<Json<CandidateTemplateDto>, AppError> {
    Ok(Json(state.templates.candidate_view(&name, version).await?))
}

/// POST /api/v1/questionnaire-templates/:name/:version/submissions
pub async fn handle_start_submission(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, i32)>,
    Json(req): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let submission = state.templates.start_submission(&name, version, &req).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// POST /api/v1/questionnaire-templates/:name/:version/sections/:order/questions/:q/active/:qv
pub async fn handle_set_active_question_version(
    State(state): State<AppState>,
    Path((name, version, section_order, question, question_version)): Path<(
        String,
        i32,
        i32,
        String,
        i32,
    )>,
) -> Result<Json<TemplateDto>, AppError> {
    let dto = state
        .templates
        .set_active_question_version(&name, version, section_order, &question, question_version)
        .await?;
    Ok(Json(dto))
}

/// GET /api/v1/questionnaire-templates/questions/:q/:qv
pub async fn handle_get_question_version(
    State(state): State<AppState>,
    Path((question, version)): Path<(String, i32)>,
) -> Result<Json<QuestionDto>, AppError> {
    Ok(Json(state.templates.get_question_version(&question, version).await?))
}

/// GET /api/v1/questionnaire-templates/questions/:q/history
pub async fn handle_question_history(
    State(state): State<AppState>,
    Path(question): Path<String>,
) -> Result<Json<Vec<QuestionHistoryDto>>, AppError> {
    Ok(Json(state.templates.question_history(&question).await?))
}

// ── Import ──────────────────────────────────────────────────────────────────

/// POST /api/v1/questionnaire-templates/import/validate
pub async fn handle_import_validate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ImportValidation>, AppError> {
    let (file, request) = read_import_form(multipart).await?;
    Ok(Json(state.importer.validate(&file, &request).await?))
}

/// POST /api/v1/questionnaire-templates/import/execute
pub async fn handle_import_execute(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ImportExecution>, AppError> {
    let (file, request) = read_import_form(multipart).await?;
    Ok(Json(state.importer.execute(&file, &request).await?))
}

/// Blank values are absent; anything else must parse.
fn parse_form_value<T: FromStr>(
    field: &str,
    text: Option<String>,
) -> Result<Option<T>, AppError> {
    match text {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::Validation(format!("Invalid {field} '{raw}'."))),
    }
}

/// Collects the `file` part and the optional form fields.
async fn read_import_form(mut multipart: Multipart) -> Result<(Bytes, ImportRequest), AppError> {
    let mut file: Option<Bytes> = None;
    let mut request = ImportRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "file" {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Could not read uploaded file: {e}")))?;
            file = Some(data);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read field '{name}': {e}")))?;
        let value = value.trim();
        let text = (!value.is_empty()).then(|| value.to_string());
        match name.as_str() {
            "scope" => request.scope = parse_form_value("scope", text)?,
            "templateName" => request.template_name = text,
            "templateType" => request.template_type = text,
            "templateVersion" => {
                request.template_version = parse_form_value("templateVersion", text)?
            }
            "targetSectionOrder" => {
                request.target_section_order = parse_form_value("targetSectionOrder", text)?
            }
            "title" => request.title = text,
            "description" => request.description = text,
            other => debug!("Ignoring unknown import form field '{other}'"),
        }
    }

    match file {
        Some(data) if !data.is_empty() => Ok((data, request)),
        _ => Err(AppError::Validation("File is required.".to_string())),
    }
}
