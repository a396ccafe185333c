//! Template service: every read and write the API and the importer perform on
//! questionnaire templates.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::cache::HistoryCache;
use crate::questionnaire::dto::{
    CandidateTemplateDto, DeleteMode, DeleteResult, DuplicateRequest, ListQuery, PagedResult,
    QuestionDto, QuestionHistoryDto, SubmissionRequest, TemplateDto, VersionHistoryItem,
};
use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::model::{
    ParseKindError, Question, QuestionOption, Section, Submission, Template, TemplateStatus,
    TemplateType,
};
use crate::questionnaire::naming::{
    normalize_option_name, question_name, reserve_question_name, unique_option_name,
};
use crate::questionnaire::retry::execute_with_retry;
use crate::questionnaire::store::TemplateStore;
use crate::questionnaire::sync::{
    apply_option, apply_question, new_option, new_question, TemplateSync,
};
use crate::questionnaire::validation::validate_template;
use crate::questionnaire::versioning::{
    next_template_version, version_history, version_option, version_question, HistoryEntity,
};

const IN_USE_FIELDS: &str =
    "Template is in use. Template fields cannot be edited. Please create a new template version.";
const IN_USE_ACTIVATION: &str = "Template is in use. Changing the active question version is not allowed. Please create a new template version instead.";

fn template_not_found(name: &str, version: i32) -> QuestionnaireError {
    QuestionnaireError::NotFound(format!("Template '{name}' v{version} not found."))
}

#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn TemplateStore>,
    cache: HistoryCache,
}

impl TemplateService {
    pub fn new(store: Arc<dyn TemplateStore>, cache: HistoryCache) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &dyn TemplateStore {
        self.store.as_ref()
    }

    // ── Lookups shared with the importer ────────────────────────────────────

    /// A template version that has not been soft-deleted.
    pub async fn find(
        &self,
        name: &str,
        version: i32,
    ) -> Result<Option<Template>, QuestionnaireError> {
        Ok(self
            .store
            .find_template(name, version)
            .await?
            .filter(|t| !t.is_deleted))
    }

    async fn require(&self, name: &str, version: i32) -> Result<Template, QuestionnaireError> {
        self.find(name, version)
            .await?
            .ok_or_else(|| template_not_found(name, version))
    }

    /// Highest non-deleted version of `name`.
    pub async fn latest(&self, name: &str) -> Result<Option<Template>, QuestionnaireError> {
        Ok(self
            .store
            .list_versions(name)
            .await?
            .into_iter()
            .filter(|t| !t.is_deleted)
            .max_by_key(|t| t.version))
    }

    pub async fn is_in_use(&self, name: &str, version: i32) -> Result<bool, QuestionnaireError> {
        Ok(self.store.count_submissions(name, version).await? > 0)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub async fn list_all(&self) -> Result<Vec<TemplateDto>, QuestionnaireError> {
        Ok(self
            .store
            .list_templates()
            .await?
            .iter()
            .filter(|t| !t.is_deleted)
            .map(TemplateDto::from)
            .collect())
    }

    pub async fn list_filtered(
        &self,
        query: &ListQuery,
    ) -> Result<PagedResult<TemplateDto>, QuestionnaireError> {
        let term = query
            .search_term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        let template_type = query
            .template_type
            .as_deref()
            .and_then(|t| t.parse::<TemplateType>().ok());
        let status = query
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut matches: Vec<Template> = self
            .store
            .list_templates()
            .await?
            .into_iter()
            .filter(|t| {
                if query.only_deleted {
                    t.is_deleted
                } else {
                    query.include_deleted || !t.is_deleted
                }
            })
            .filter(|t| match &term {
                Some(term) => {
                    t.name.to_lowercase().contains(term)
                        || t.title
                            .as_deref()
                            .is_some_and(|title| title.to_lowercase().contains(term))
                }
                None => true,
            })
            .filter(|t| template_type.map_or(true, |tt| t.template_type == tt))
            .filter(|t| status.map_or(true, |s| t.status.as_str().eq_ignore_ascii_case(s)))
            .collect();

        let sort_by = query
            .sort_by
            .as_deref()
            .unwrap_or("updatedAt")
            .trim()
            .to_ascii_lowercase();
        matches.sort_by(|a, b| {
            let ordering = compare_by(&sort_by, a, b);
            if query.sort_descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let page_number = query.page_number();
        let page_size = query.page_size();
        let total_count = matches.len();
        let items = matches
            .iter()
            .skip((page_number - 1).saturating_mul(page_size))
            .take(page_size)
            .map(TemplateDto::from)
            .collect();

        Ok(PagedResult {
            items,
            total_count,
            page_number,
            page_size,
        })
    }

    pub async fn get(&self, name: &str, version: i32) -> Result<TemplateDto, QuestionnaireError> {
        Ok(TemplateDto::from(&self.require(name, version).await?))
    }

    pub async fn get_latest(&self, name: &str) -> Result<TemplateDto, QuestionnaireError> {
        self.latest(name)
            .await?
            .map(|t| TemplateDto::from(&t))
            .ok_or_else(|| QuestionnaireError::NotFound(format!("Template '{name}' not found.")))
    }

    /// Non-deleted versions of `name`, oldest first.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<TemplateDto>, QuestionnaireError> {
        Ok(self
            .store
            .list_versions(name)
            .await?
            .iter()
            .filter(|t| !t.is_deleted)
            .map(TemplateDto::from)
            .collect())
    }

    pub async fn candidate_view(
        &self,
        name: &str,
        version: i32,
    ) -> Result<CandidateTemplateDto, QuestionnaireError> {
        Ok(CandidateTemplateDto::from(&self.require(name, version).await?))
    }

    pub async fn get_question_version(
        &self,
        name: &str,
        version: i32,
    ) -> Result<QuestionDto, QuestionnaireError> {
        self.store
            .question_versions(name)
            .await?
            .iter()
            .find(|q| q.version == version)
            .map(QuestionDto::from)
            .ok_or_else(|| {
                QuestionnaireError::NotFound(format!("Question '{name}' v{version} not found."))
            })
    }

    pub async fn question_history(
        &self,
        name: &str,
    ) -> Result<Vec<QuestionHistoryDto>, QuestionnaireError> {
        Ok(self
            .store
            .question_versions(name)
            .await?
            .iter()
            .map(QuestionHistoryDto::from)
            .collect())
    }

    pub async fn version_history(
        &self,
        name: &str,
        entity_type: &str,
    ) -> Result<Vec<VersionHistoryItem>, QuestionnaireError> {
        let entity: HistoryEntity = entity_type.parse()?;
        version_history(self.store(), &self.cache, name, entity).await
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Creates version 1 of a new template name as a Draft.
    pub async fn create(&self, dto: TemplateDto) -> Result<TemplateDto, QuestionnaireError> {
        validate_template(&dto)?;
        let name = dto.name.trim().to_string();
        if self.store.latest_template_version(&name).await?.is_some() {
            return Err(QuestionnaireError::Invalid(format!(
                "A questionnaire template with name '{name}' already exists. \
                 Please use a different name or update it to create a new version."
            )));
        }

        let template_type = parse_template_type(&dto.template_type)?;
        let mut template = Template::new(&name, 1, template_type);
        template.title = dto.title.clone();
        template.description = dto.description.clone();
        template.time_limit_seconds = dto.time_limit_seconds;

        let mut question_names: HashSet<String> = given_question_names(&dto);
        let mut option_names = HashSet::new();
        for section_dto in &dto.sections {
            let mut section = Section::new(
                section_dto.order,
                section_dto.title.trim(),
                section_dto.description.clone(),
            );
            for question_dto in &section_dto.questions {
                let assigned = match question_dto.name.trim() {
                    "" => reserve_question_name(
                        &question_name(&name, 1, &question_dto.prompt_text),
                        &mut question_names,
                    ),
                    given => given.to_string(),
                };
                let question =
                    new_question(self.store(), &assigned, question_dto, &mut option_names).await?;
                section.questions.push(question);
            }
            template.sections.push(section);
        }
        template.sort_children();

        self.store.insert_template(&template).await?;
        info!(
            "Created questionnaire template {name} v1 ({} sections, {} questions)",
            template.sections.len(),
            template.active_question_count()
        );
        self.get(&name, 1).await
    }

    /// Edits a template version in place, or produces the next version when
    /// `shouldUpdateVersion` is set.
    pub async fn update(&self, dto: TemplateDto) -> Result<TemplateDto, QuestionnaireError> {
        validate_template(&dto)?;
        if dto.should_update_version {
            self.version_template(dto).await
        } else {
            self.update_in_place(dto).await
        }
    }

    async fn update_in_place(&self, dto: TemplateDto) -> Result<TemplateDto, QuestionnaireError> {
        let mut template = self.require(&dto.name, dto.version).await?;
        if let Some(token) = dto.row_version {
            if token != template.row_version {
                return Err(QuestionnaireError::Conflict(format!(
                    "Template '{}' v{} was modified by another request. Reload it and try again.",
                    template.name, template.version
                )));
            }
        }

        let in_use = self.is_in_use(&template.name, template.version).await?;
        if in_use {
            ensure_fields_unchanged(&template, &dto)?;
        } else {
            apply_template_fields(&mut template, &dto)?;
        }
        template.updated_at = Utc::now();

        let mut sync = TemplateSync::new(self.store(), &self.cache, &template, in_use);
        sync.sync_sections(&mut template, &dto.sections).await?;

        self.store.save_template(&template).await?;
        info!(
            "Updated questionnaire template {} v{} in place (in use: {in_use})",
            template.name, template.version
        );
        self.get(&template.name, template.version).await
    }

    async fn version_template(&self, dto: TemplateDto) -> Result<TemplateDto, QuestionnaireError> {
        self.require(&dto.name, dto.version).await?;
        let dto = &dto;
        execute_with_retry("version template", |_| async move {
            self.version_template_once(dto).await
        })
        .await
    }

    async fn version_template_once(
        &self,
        dto: &TemplateDto,
    ) -> Result<TemplateDto, QuestionnaireError> {
        let source = self.require(&dto.name, dto.version).await?;
        let next = next_template_version(self.store(), &dto.name, dto.version).await?;
        if let Some(existing) = self.store.find_template(&dto.name, next).await? {
            return Ok(TemplateDto::from(&existing));
        }

        let template_type = dto
            .template_type
            .parse()
            .unwrap_or(source.template_type);
        let mut template = Template::new(&source.name, next, template_type);
        template.title = dto.title.clone();
        template.description = dto.description.clone();
        template.time_limit_seconds = dto.time_limit_seconds;

        let mut question_names = given_question_names(dto);
        let mut option_names = HashSet::new();
        for section_dto in &dto.sections {
            let mut section = Section::new(
                section_dto.order,
                section_dto.title.trim(),
                section_dto.description.clone(),
            );
            let previous = source.section_by_order(section_dto.order);

            for question_dto in &section_dto.questions {
                let wanted = question_dto.name.trim();
                let matched = previous.and_then(|s| {
                    s.active_questions()
                        .find(|q| !wanted.is_empty() && q.name == wanted)
                });

                let question = match matched {
                    Some(old) => {
                        self.carry_question(old, question_dto, &mut option_names)
                            .await?
                    }
                    None => {
                        let name = match wanted {
                            "" => reserve_question_name(
                                &question_name(&source.name, next, &question_dto.prompt_text),
                                &mut question_names,
                            ),
                            given => given.to_string(),
                        };
                        new_question(self.store(), &name, question_dto, &mut option_names).await?
                    }
                };
                section.questions.push(question);
            }
            template.sections.push(section);
        }
        template.sort_children();

        self.store.insert_template(&template).await?;
        info!(
            "Versioned questionnaire template {} v{} -> v{next}",
            source.name, source.version
        );
        self.get(&source.name, next).await
    }

    /// Next version of `old` with the edits from `dto`, options included.
    async fn carry_question(
        &self,
        old: &Question,
        dto: &QuestionDto,
        option_names: &mut HashSet<String>,
    ) -> Result<Question, QuestionnaireError> {
        let mut question = version_question(self.store(), &self.cache, old).await?;
        apply_question(&mut question, dto);

        for option_dto in &dto.options {
            let wanted = option_dto.name.trim();
            let previous = old
                .options
                .iter()
                .find(|o| !wanted.is_empty() && o.name.eq_ignore_ascii_case(wanted));
            let option = match previous {
                Some(previous) => {
                    let mut option = version_option(self.store(), &self.cache, previous).await?;
                    apply_option(&mut option, option_dto);
                    option
                }
                None => {
                    let normalized =
                        normalize_option_name(&option_dto.name, &option_dto.label, &question.name);
                    let unique = unique_option_name(self.store(), &normalized, option_names).await?;
                    new_option(unique, option_dto)
                }
            };
            question.options.push(option);
        }
        Ok(question)
    }

    /// Copies a template version under a new name as v1 Draft. Questions and
    /// options get fresh names.
    pub async fn duplicate(
        &self,
        name: &str,
        version: i32,
        request: &DuplicateRequest,
    ) -> Result<TemplateDto, QuestionnaireError> {
        let new_name = request.new_name.trim();
        if new_name.is_empty() {
            return Err(QuestionnaireError::Invalid(
                "New template name is required.".to_string(),
            ));
        }
        let source = self.require(name, version).await?;
        if self.store.latest_template_version(new_name).await?.is_some() {
            return Err(QuestionnaireError::Invalid(format!(
                "A questionnaire template with name '{new_name}' already exists. Please use a different name."
            )));
        }

        let mut template = Template::new(new_name, 1, source.template_type);
        template.title = source.title.clone().filter(|_| request.include_title);
        template.description = source
            .description
            .clone()
            .filter(|_| request.include_description);
        template.time_limit_seconds = source.time_limit_seconds;

        if request.include_questions {
            let now = Utc::now();
            for section in &source.sections {
                let mut copy =
                    Section::new(section.order, &section.title, section.description.clone());
                copy.questions = section
                    .active_questions()
                    .map(|q| Question {
                        name: Uuid::new_v4().to_string(),
                        version: 1,
                        is_active: true,
                        created_at: now,
                        updated_at: now,
                        options: q
                            .options
                            .iter()
                            .map(|o| QuestionOption {
                                name: Uuid::new_v4().to_string(),
                                version: 1,
                                created_at: now,
                                updated_at: now,
                                ..o.clone()
                            })
                            .collect(),
                        ..q.clone()
                    })
                    .collect();
                template.sections.push(copy);
            }
        }

        self.store.insert_template(&template).await?;
        info!("Duplicated questionnaire template {name} v{version} as {new_name} v1");
        self.get(new_name, 1).await
    }

    /// Archives (soft-deletes) a version that is in use, removes it otherwise.
    pub async fn delete(
        &self,
        name: &str,
        version: i32,
    ) -> Result<DeleteResult, QuestionnaireError> {
        let mut template = self.require(name, version).await?;
        if self.is_in_use(name, version).await? {
            template.is_deleted = true;
            template.updated_at = Utc::now();
            self.store.save_template(&template).await?;
            info!("Archived questionnaire template {name} v{version}");
            return Ok(DeleteResult {
                mode: DeleteMode::Archived,
            });
        }

        self.store.delete_template(name, version).await?;
        info!("Deleted questionnaire template {name} v{version}");
        Ok(DeleteResult {
            mode: DeleteMode::Deleted,
        })
    }

    pub async fn restore(&self, name: &str, version: i32) -> Result<(), QuestionnaireError> {
        let mut template = self
            .store
            .find_template(name, version)
            .await?
            .ok_or_else(|| template_not_found(name, version))?;
        if !template.is_deleted {
            return Ok(());
        }
        template.is_deleted = false;
        template.updated_at = Utc::now();
        self.store.save_template(&template).await?;
        info!("Restored questionnaire template {name} v{version}");
        Ok(())
    }

    pub async fn publish(&self, name: &str, version: i32) -> Result<(), QuestionnaireError> {
        let mut template = self.require(name, version).await?;
        if template.status == TemplateStatus::Published {
            return Ok(());
        }
        let now = Utc::now();
        template.status = TemplateStatus::Published;
        template.published_at = Some(now);
        template.updated_at = now;
        self.store.save_template(&template).await?;
        info!("Published questionnaire template {name} v{version}");
        Ok(())
    }

    /// Makes `question_name` v`question_version` the active question of its
    /// slot. Every other version of the name and every other question at the
    /// same order is deactivated in the same save.
    pub async fn set_active_question_version(
        &self,
        name: &str,
        version: i32,
        section_order: i32,
        question_name: &str,
        question_version: i32,
    ) -> Result<TemplateDto, QuestionnaireError> {
        let mut template = self.require(name, version).await?;
        if self.is_in_use(name, version).await? {
            return Err(QuestionnaireError::Invalid(IN_USE_ACTIVATION.to_string()));
        }

        let section = template.section_by_order_mut(section_order).ok_or_else(|| {
            QuestionnaireError::NotFound(format!(
                "Section order {section_order} not found in template '{name}' v{version}."
            ))
        })?;
        if !section
            .questions
            .iter()
            .any(|q| q.name.eq_ignore_ascii_case(question_name))
        {
            return Err(QuestionnaireError::NotFound(format!(
                "Question '{question_name}' not found in section {section_order}."
            )));
        }
        let target = section
            .questions
            .iter()
            .position(|q| {
                q.name.eq_ignore_ascii_case(question_name) && q.version == question_version
            })
            .ok_or_else(|| {
                QuestionnaireError::NotFound(format!(
                    "Question '{question_name}' v{question_version} not found in section {section_order}."
                ))
            })?;

        let slot = section.questions[target].order;
        let now = Utc::now();
        for question in section.questions.iter_mut() {
            if question.is_active
                && (question.name.eq_ignore_ascii_case(question_name) || question.order == slot)
            {
                question.is_active = false;
                question.updated_at = now;
            }
        }
        section.questions[target].is_active = true;
        section.questions[target].updated_at = now;
        template.updated_at = now;

        self.store.save_template(&template).await?;
        info!(
            "Activated question {question_name} v{question_version} in {name} v{version} section {section_order}"
        );
        self.get(name, version).await
    }

    /// Records a candidate starting a template version, which puts the version
    /// in use.
    pub async fn start_submission(
        &self,
        name: &str,
        version: i32,
        request: &SubmissionRequest,
    ) -> Result<Submission, QuestionnaireError> {
        let candidate_ref = request.candidate_ref.trim();
        if candidate_ref.is_empty() {
            return Err(QuestionnaireError::Invalid(
                "CandidateRef is required.".to_string(),
            ));
        }
        self.require(name, version).await?;

        let submission = Submission {
            id: Uuid::new_v4(),
            template_name: name.to_string(),
            template_version: version,
            candidate_ref: candidate_ref.to_string(),
            status: "InProgress".to_string(),
            started_at: Utc::now(),
        };
        self.store.insert_submission(&submission).await?;
        info!("Started submission {} for {name} v{version}", submission.id);
        Ok(submission)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn parse_template_type(raw: &str) -> Result<TemplateType, QuestionnaireError> {
    raw.parse()
        .map_err(|e: ParseKindError| QuestionnaireError::Invalid(e.to_string()))
}

fn given_question_names(dto: &TemplateDto) -> HashSet<String> {
    dto.sections
        .iter()
        .flat_map(|s| s.questions.iter())
        .map(|q| q.name.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

fn compare_by(key: &str, a: &Template, b: &Template) -> Ordering {
    match key {
        "name" => a.name.cmp(&b.name),
        "version" => a.version.cmp(&b.version),
        "templatetype" => a.template_type.as_str().cmp(b.template_type.as_str()),
        "status" => a.status.as_str().cmp(b.status.as_str()),
        "createdat" => a.created_at.cmp(&b.created_at),
        _ => a.updated_at.cmp(&b.updated_at),
    }
}

fn ensure_fields_unchanged(
    template: &Template,
    dto: &TemplateDto,
) -> Result<(), QuestionnaireError> {
    let type_changed = dto
        .template_type
        .parse::<TemplateType>()
        .is_ok_and(|t| t != template.template_type);
    let status_changed = !template.status.as_str().eq_ignore_ascii_case(dto.status.trim());

    if type_changed
        || status_changed
        || template.title != dto.title
        || template.description != dto.description
        || template.time_limit_seconds != dto.time_limit_seconds
    {
        return Err(QuestionnaireError::Invalid(IN_USE_FIELDS.to_string()));
    }
    Ok(())
}

fn apply_template_fields(
    template: &mut Template,
    dto: &TemplateDto,
) -> Result<(), QuestionnaireError> {
    if let Ok(template_type) = dto.template_type.parse() {
        template.template_type = template_type;
    }
    let status: TemplateStatus = dto
        .status
        .parse()
        .map_err(|e: ParseKindError| QuestionnaireError::Invalid(e.to_string()))?;
    if status == TemplateStatus::Published && template.published_at.is_none() {
        template.published_at = Some(Utc::now());
    }
    template.status = status;
    template.title = dto.title.clone();
    template.description = dto.description.clone();
    template.time_limit_seconds = dto.time_limit_seconds;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questionnaire::dto::{OptionDto, SectionDto};
    use crate::questionnaire::memory::MemoryStore;

    fn service() -> TemplateService {
        TemplateService::new(Arc::new(MemoryStore::new()), HistoryCache::local())
    }

    fn sample() -> TemplateDto {
        TemplateDto {
            name: "Onboarding".into(),
            version: 7,
            template_type: "Form".into(),
            status: "Published".into(),
            title: Some("Welcome".into()),
            sections: vec![SectionDto {
                order: 1,
                title: "About you".into(),
                questions: vec![
                    QuestionDto {
                        order: 1,
                        question_type: "Radio".into(),
                        prompt_text: "Remote or office?".into(),
                        options: vec![
                            OptionDto {
                                order: 1,
                                label: "Remote".into(),
                                ..Default::default()
                            },
                            OptionDto {
                                order: 2,
                                label: "Office".into(),
                                ..Default::default()
                            },
                        ],
                        ..Default::default()
                    },
                    QuestionDto {
                        order: 2,
                        question_type: "Text".into(),
                        prompt_text: "Anything else?".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn created(svc: &TemplateService) -> TemplateDto {
        svc.create(sample()).await.unwrap()
    }

    async fn put_in_use(svc: &TemplateService, dto: &TemplateDto) {
        svc.start_submission(
            &dto.name,
            dto.version,
            &SubmissionRequest {
                candidate_ref: "cand-1".into(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_forces_v1_draft_and_names_children() {
        let svc = service();
        let dto = created(&svc).await;

        assert_eq!(dto.version, 1);
        assert_eq!(dto.status, "Draft");
        assert!(dto.published_at.is_none());
        let q = &dto.sections[0].questions;
        assert_eq!(q[0].name, "onboarding_v1_remote_or_office");
        assert_eq!(q[0].version, 1);
        assert_eq!(q[0].options[0].name, "onboarding_v1_remote_or_office_remote");
        assert_eq!(q[1].name, "onboarding_v1_anything_else");
    }

    #[tokio::test]
    async fn test_create_rejects_existing_name() {
        let svc = service();
        created(&svc).await;
        let err = svc.create(sample()).await.unwrap_err();
        assert!(matches!(err, QuestionnaireError::Invalid(ref m) if m.contains("already exists")));
    }

    #[tokio::test]
    async fn test_update_in_place_when_not_in_use() {
        let svc = service();
        let mut dto = created(&svc).await;
        dto.title = Some("Hello".into());
        dto.sections[0].questions[1].prompt_text = "Anything more?".into();

        let updated = svc.update(dto).await.unwrap();

        assert_eq!(updated.version, 1);
        assert_eq!(updated.title.as_deref(), Some("Hello"));
        assert_eq!(updated.sections[0].questions[1].prompt_text, "Anything more?");
        assert_eq!(updated.sections[0].questions[1].version, 1);
        assert_eq!(updated.row_version, Some(2));
    }

    #[tokio::test]
    async fn test_stale_row_version_is_a_conflict() {
        let svc = service();
        let dto = created(&svc).await;
        svc.update(dto.clone()).await.unwrap();

        let err = svc.update(dto).await.unwrap_err();
        assert!(matches!(err, QuestionnaireError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_in_use_refuses_template_field_edits() {
        let svc = service();
        let mut dto = created(&svc).await;
        put_in_use(&svc, &dto).await;

        dto.title = Some("Changed".into());
        let err = svc.update(dto).await.unwrap_err();
        assert_eq!(err.to_string(), IN_USE_FIELDS);
    }

    #[tokio::test]
    async fn test_in_use_question_edit_is_copy_on_write() {
        let svc = service();
        let mut dto = created(&svc).await;
        put_in_use(&svc, &dto).await;

        dto.sections[0].questions[0].prompt_text = "Remote, hybrid or office?".into();
        let updated = svc.update(dto).await.unwrap();

        let active = &updated.sections[0].questions;
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].version, 2);
        assert_eq!(active[0].prompt_text, "Remote, hybrid or office?");
        assert!(active[0].options.iter().all(|o| o.version == 2));

        let history = svc.question_history(&active[0].name).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[1].question.is_active);
        assert_eq!(history[1].question.prompt_text, "Remote or office?");
    }

    #[tokio::test]
    async fn test_version_template_bumps_versions() {
        let svc = service();
        let mut dto = created(&svc).await;
        dto.should_update_version = true;
        dto.sections[0].questions[1].prompt_text = "Anything more?".into();

        let v2 = svc.update(dto.clone()).await.unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v2.status, "Draft");
        let q = &v2.sections[0].questions;
        assert_eq!(q[0].version, 2);
        assert_eq!(q[1].version, 2);
        assert_eq!(q[1].prompt_text, "Anything more?");
        assert_ne!(v2.sections[0].id, dto.sections[0].id);

        let v1 = svc.get("Onboarding", 1).await.unwrap();
        assert_eq!(v1.sections[0].questions[1].prompt_text, "Anything else?");
        assert_eq!(v1.sections[0].questions[1].version, 1);

        let v3 = svc.update(dto).await.unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.sections[0].questions[0].version, 3);
    }

    #[tokio::test]
    async fn test_delete_soft_when_in_use_hard_otherwise() {
        let svc = service();
        let dto = created(&svc).await;
        let result = svc.delete(&dto.name, 1).await.unwrap();
        assert_eq!(result.mode, DeleteMode::Deleted);
        assert!(svc.store().find_template("Onboarding", 1).await.unwrap().is_none());

        let dto = created(&svc).await;
        put_in_use(&svc, &dto).await;
        let result = svc.delete(&dto.name, 1).await.unwrap();
        assert_eq!(result.mode, DeleteMode::Archived);
        assert!(matches!(
            svc.get("Onboarding", 1).await,
            Err(QuestionnaireError::NotFound(_))
        ));

        svc.restore("Onboarding", 1).await.unwrap();
        svc.restore("Onboarding", 1).await.unwrap();
        assert!(!svc.get("Onboarding", 1).await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let svc = service();
        created(&svc).await;
        svc.publish("Onboarding", 1).await.unwrap();
        let first = svc.get("Onboarding", 1).await.unwrap();
        svc.publish("Onboarding", 1).await.unwrap();
        let second = svc.get("Onboarding", 1).await.unwrap();

        assert!(first.is_published);
        assert_eq!(first.published_at, second.published_at);
        assert_eq!(first.row_version, second.row_version);
    }

    #[tokio::test]
    async fn test_set_active_question_version_keeps_slot_exclusive() {
        let svc = service();
        let mut dto = created(&svc).await;
        dto.should_update_version = true;
        dto.sections[0].questions[0].prompt_text = "Where do you work?".into();
        svc.update(dto).await.unwrap();

        // Park an inactive v9 of the first question next to its active v2.
        let mut template = svc.store().find_template("Onboarding", 2).await.unwrap().unwrap();
        let old = svc.store().question_versions("onboarding_v1_remote_or_office").await.unwrap();
        let mut inactive = old.into_iter().find(|q| q.version == 1).unwrap();
        inactive.is_active = false;
        inactive.version = 9;
        inactive.options.clear();
        template.sections[0].questions.push(inactive);
        svc.store().save_template(&template).await.unwrap();

        let updated = svc
            .set_active_question_version("Onboarding", 2, 1, "onboarding_v1_remote_or_office", 9)
            .await
            .unwrap();

        let q = &updated.sections[0].questions;
        assert_eq!(q.len(), 2);
        assert_eq!(q[0].version, 9);
        assert_eq!(q[0].prompt_text, "Remote or office?");

        let err = svc
            .set_active_question_version("Onboarding", 2, 1, "onboarding_v1_remote_or_office", 4)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Question 'onboarding_v1_remote_or_office' v4 not found in section 1."
        );
    }

    #[tokio::test]
    async fn test_set_active_question_version_refused_when_in_use() {
        let svc = service();
        let dto = created(&svc).await;
        put_in_use(&svc, &dto).await;
        let err = svc
            .set_active_question_version("Onboarding", 1, 1, "onboarding_v1_anything_else", 1)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), IN_USE_ACTIVATION);
    }

    #[tokio::test]
    async fn test_duplicate_renames_everything() {
        let svc = service();
        created(&svc).await;
        let copy = svc
            .duplicate(
                "Onboarding",
                1,
                &DuplicateRequest {
                    new_name: " Onboarding Copy ".into(),
                    include_questions: true,
                    include_title: false,
                    include_description: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(copy.name, "Onboarding Copy");
        assert_eq!(copy.version, 1);
        assert!(copy.title.is_none());
        let q = &copy.sections[0].questions;
        assert_eq!(q.len(), 2);
        assert!(Uuid::parse_str(&q[0].name).is_ok());
        assert!(Uuid::parse_str(&q[0].options[0].name).is_ok());

        let err = svc
            .duplicate("Onboarding", 1, &DuplicateRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "New template name is required.");
    }

    #[tokio::test]
    async fn test_list_filtered_sorts_and_pages() {
        let svc = service();
        for name in ["Charlie", "alpha", "Bravo"] {
            svc.create(TemplateDto {
                name: name.into(),
                ..sample()
            })
            .await
            .unwrap();
        }
        svc.delete("Bravo", 1).await.unwrap();

        let page = svc
            .list_filtered(&ListQuery {
                sort_by: Some("Name".into()),
                page_size: Some(1),
                page_number: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "alpha");

        let searched = svc
            .list_filtered(&ListQuery {
                search_term: Some("ALP".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.total_count, 1);
    }

    #[tokio::test]
    async fn test_list_filtered_far_page_is_empty() {
        let svc = service();
        created(&svc).await;

        let page = svc
            .list_filtered(&ListQuery {
                page_number: Some(i64::MAX),
                page_size: Some(100),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_submission_requires_live_template() {
        let svc = service();
        let err = svc
            .start_submission(
                "missing",
                1,
                &SubmissionRequest {
                    candidate_ref: "c".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestionnaireError::NotFound(_)));

        created(&svc).await;
        let err = svc
            .start_submission(
                "Onboarding",
                1,
                &SubmissionRequest {
                    candidate_ref: " ".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestionnaireError::Invalid(_)));
        assert!(!svc.is_in_use("Onboarding", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_version_history_by_entity() {
        let svc = service();
        let mut dto = created(&svc).await;
        dto.should_update_version = true;
        svc.update(dto).await.unwrap();

        let templates = svc.version_history("Onboarding", "Template").await.unwrap();
        assert_eq!(templates.iter().map(|i| i.version).collect::<Vec<_>>(), vec![2, 1]);

        let questions = svc
            .version_history("onboarding_v1_anything_else", "question")
            .await
            .unwrap();
        assert_eq!(questions.len(), 2);

        assert!(svc.version_history("Onboarding", "section").await.is_err());
    }
}
