//! In-place synchronisation of an edited template body onto the stored graph.
//!
//! Sections are matched by order, questions by name (active rows only),
//! options by normalised name. When the template version is in use, adds and
//! removals are refused and edited questions are copied forward into a new
//! question version instead of being mutated.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::debug;

use crate::cache::HistoryCache;
use crate::questionnaire::dto::{OptionDto, QuestionDto, SectionDto};
use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::model::{Question, QuestionOption, QuestionType, Section, Template};
use crate::questionnaire::naming::{
    normalize_option_name, question_name, reserve_question_name, unique_option_name,
};
use crate::questionnaire::store::TemplateStore;
use crate::questionnaire::versioning::{
    first_free_question_version, version_option, version_question,
};

const IN_USE_HINT: &str = "Template is in use. Please version the template first.";

fn refused(action: &str) -> QuestionnaireError {
    QuestionnaireError::Invalid(format!("Cannot {action}. {IN_USE_HINT}"))
}

pub struct TemplateSync<'a> {
    store: &'a dyn TemplateStore,
    cache: &'a HistoryCache,
    in_use: bool,
    template_name: String,
    template_version: i32,
    question_names: HashSet<String>,
    option_names: HashSet<String>,
}

impl<'a> TemplateSync<'a> {
    pub fn new(
        store: &'a dyn TemplateStore,
        cache: &'a HistoryCache,
        template: &Template,
        in_use: bool,
    ) -> Self {
        Self {
            store,
            cache,
            in_use,
            template_name: template.name.clone(),
            template_version: template.version,
            question_names: template.questions().map(|q| q.name.clone()).collect(),
            option_names: HashSet::new(),
        }
    }

    /// Applies `incoming` to `template.sections`, then rejects the result if
    /// any slot ends up with two active questions.
    pub async fn sync_sections(
        &mut self,
        template: &mut Template,
        incoming: &[SectionDto],
    ) -> Result<(), QuestionnaireError> {
        let incoming_orders: HashSet<i32> = incoming.iter().map(|s| s.order).collect();
        if self.in_use
            && template
                .sections
                .iter()
                .any(|s| !incoming_orders.contains(&s.order))
        {
            return Err(refused("remove section"));
        }
        template
            .sections
            .retain(|s| incoming_orders.contains(&s.order));

        for dto in incoming {
            let title = dto.title.trim();
            match template.section_by_order_mut(dto.order) {
                Some(section) => {
                    if self.in_use
                        && (section.title != title || section.description != dto.description)
                    {
                        return Err(refused("edit section"));
                    }
                    section.title = title.to_string();
                    section.description = dto.description.clone();
                    section.updated_at = Utc::now();
                    self.sync_questions(section, &dto.questions).await?;
                }
                None => {
                    if self.in_use {
                        return Err(refused("add section"));
                    }
                    let mut section = Section::new(dto.order, title, dto.description.clone());
                    self.sync_questions(&mut section, &dto.questions).await?;
                    template.sections.push(section);
                }
            }
        }

        template.sort_children();
        for section in &template.sections {
            if let Some(order) = section.contested_slots().first() {
                return Err(QuestionnaireError::Invalid(format!(
                    "Section {} has more than one active question at order {order}.",
                    section.order
                )));
            }
        }
        Ok(())
    }

    async fn sync_questions(
        &mut self,
        section: &mut Section,
        incoming: &[QuestionDto],
    ) -> Result<(), QuestionnaireError> {
        let resolved: Vec<(String, &QuestionDto)> = incoming
            .iter()
            .map(|dto| {
                let name = if dto.name.trim().is_empty() {
                    let desired =
                        question_name(&self.template_name, self.template_version, &dto.prompt_text);
                    reserve_question_name(&desired, &mut self.question_names)
                } else {
                    dto.name.trim().to_string()
                };
                (name, dto)
            })
            .collect();

        let incoming_names: HashSet<&str> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        let dropped: HashSet<String> = section
            .active_questions()
            .filter(|q| !incoming_names.contains(q.name.as_str()))
            .map(|q| q.name.clone())
            .collect();
        if !dropped.is_empty() {
            if self.in_use {
                return Err(refused("remove question"));
            }
            section.questions.retain(|q| !dropped.contains(&q.name));
        }

        for (name, dto) in resolved {
            let existing = section
                .questions
                .iter()
                .position(|q| q.is_active && q.name == name);

            let Some(idx) = existing else {
                if self.in_use {
                    return Err(refused("add new question"));
                }
                let question =
                    new_question(self.store, &name, dto, &mut self.option_names).await?;
                section.questions.push(question);
                continue;
            };

            if question_changed(&section.questions[idx], dto) && self.in_use {
                self.copy_forward(section, idx, dto).await?;
                continue;
            }

            apply_question(&mut section.questions[idx], dto);
            self.sync_options(section, idx, &dto.options).await?;
        }
        Ok(())
    }

    async fn sync_options(
        &mut self,
        section: &mut Section,
        idx: usize,
        incoming: &[OptionDto],
    ) -> Result<(), QuestionnaireError> {
        let question_name = section.questions[idx].name.clone();
        let normalized: Vec<(String, &OptionDto)> = incoming
            .iter()
            .map(|dto| (normalize_option_name(&dto.name, &dto.label, &question_name), dto))
            .collect();

        let wanted: HashSet<String> = normalized.iter().map(|(n, _)| n.to_lowercase()).collect();
        let kept = |option: &QuestionOption| {
            wanted.contains(&option.name.to_lowercase())
                || base_name(&option.name, &question_name)
                    .is_some_and(|base| wanted.contains(&base.to_lowercase()))
        };
        if section.questions[idx].options.iter().any(|o| !kept(o)) {
            if self.in_use {
                return Err(refused("remove option"));
            }
            section.questions[idx].options.retain(|o| kept(o));
        }

        for (name, dto) in normalized {
            let lookup = option_lookup(&section.questions[idx]);
            match lookup.get(&name.to_lowercase()).copied() {
                Some(opt_idx) => {
                    let changed = option_changed(&section.questions[idx].options[opt_idx], dto);
                    if changed && self.in_use {
                        let mut replacement = QuestionDto::from(&section.questions[idx]);
                        replacement.options[opt_idx] = OptionDto {
                            name: section.questions[idx].options[opt_idx].name.clone(),
                            ..dto.clone()
                        };
                        self.copy_forward(section, idx, &replacement).await?;
                        return Ok(());
                    }
                    apply_option(&mut section.questions[idx].options[opt_idx], dto);
                }
                None => {
                    if self.in_use {
                        let mut replacement = QuestionDto::from(&section.questions[idx]);
                        replacement.options.push(dto.clone());
                        self.copy_forward(section, idx, &replacement).await?;
                        return Ok(());
                    }
                    let unique =
                        unique_option_name(self.store, &name, &mut self.option_names).await?;
                    let option = new_option(unique, dto);
                    section.questions[idx].options.push(option);
                }
            }
        }
        Ok(())
    }

    /// Deactivates `section.questions[idx]` and appends its next version with
    /// `dto` applied. Matching options are versioned, the rest created.
    async fn copy_forward(
        &mut self,
        section: &mut Section,
        idx: usize,
        dto: &QuestionDto,
    ) -> Result<(), QuestionnaireError> {
        let current = &mut section.questions[idx];
        current.is_active = false;
        current.updated_at = Utc::now();
        let current = current.clone();

        let mut next = version_question(self.store, self.cache, &current).await?;
        apply_question(&mut next, dto);
        debug!(
            "Copy-on-write {} v{} -> v{} in {} v{}",
            current.name, current.version, next.version, self.template_name, self.template_version
        );

        let lookup = option_lookup(&current);
        for opt_dto in &dto.options {
            let normalized = normalize_option_name(&opt_dto.name, &opt_dto.label, &next.name);
            let matched = lookup
                .get(&opt_dto.name.to_lowercase())
                .or_else(|| lookup.get(&normalized.to_lowercase()))
                .copied();
            let option = match matched {
                Some(opt_idx) => {
                    let mut option =
                        version_option(self.store, self.cache, &current.options[opt_idx]).await?;
                    apply_option(&mut option, opt_dto);
                    option
                }
                None => {
                    let unique =
                        unique_option_name(self.store, &normalized, &mut self.option_names).await?;
                    new_option(unique, opt_dto)
                }
            };
            next.options.push(option);
        }

        section.questions.push(next);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Field-level helpers
// ────────────────────────────────────────────────────────────────────────────

/// Builds a brand-new active question under `name`. Option names are
/// normalised against the question and made unique at version 1.
pub(crate) async fn new_question(
    store: &dyn TemplateStore,
    name: &str,
    dto: &QuestionDto,
    option_names: &mut HashSet<String>,
) -> Result<Question, QuestionnaireError> {
    let now = Utc::now();
    let mut question = Question {
        name: name.to_string(),
        version: first_free_question_version(store, name).await?,
        order: dto.order,
        question_type: dto.question_type.parse().unwrap_or(QuestionType::Text),
        question_text: dto.prompt_text.trim().to_string(),
        is_required: dto.is_required,
        trait_key: dto.trait_key.clone(),
        ws: dto.ws,
        media_url: dto.media_url.clone(),
        is_active: true,
        created_at: now,
        updated_at: now,
        options: Vec::new(),
    };
    for opt_dto in &dto.options {
        let normalized = normalize_option_name(&opt_dto.name, &opt_dto.label, name);
        let unique = unique_option_name(store, &normalized, option_names).await?;
        question.options.push(new_option(unique, opt_dto));
    }
    Ok(question)
}

/// `q1_yes` → `yes` for an option owned by question `q1`.
fn base_name<'n>(option_name: &'n str, question_name: &str) -> Option<&'n str> {
    let prefix_len = question_name.len() + 1;
    if option_name.len() > prefix_len
        && option_name.as_bytes()[question_name.len()] == b'_'
        && option_name[..question_name.len()].eq_ignore_ascii_case(question_name)
    {
        Some(&option_name[prefix_len..])
    } else {
        None
    }
}

/// Lower-cased option name (and its base name, when not shadowed) → index.
fn option_lookup(question: &Question) -> HashMap<String, usize> {
    let mut lookup = HashMap::new();
    for (idx, option) in question.options.iter().enumerate() {
        lookup.insert(option.name.to_lowercase(), idx);
    }
    for (idx, option) in question.options.iter().enumerate() {
        if let Some(base) = base_name(&option.name, &question.name) {
            lookup.entry(base.to_lowercase()).or_insert(idx);
        }
    }
    lookup
}

pub(crate) fn new_option(name: String, dto: &OptionDto) -> QuestionOption {
    let now = Utc::now();
    QuestionOption {
        name,
        version: 1,
        order: dto.order,
        label: dto.label.trim().to_string(),
        is_correct: dto.is_correct,
        score: dto.score,
        weight: dto.weight,
        wa: dto.wa,
        media_url: dto.media_url.clone(),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn apply_question(question: &mut Question, dto: &QuestionDto) {
    question.order = dto.order;
    if let Ok(question_type) = dto.question_type.parse() {
        question.question_type = question_type;
    }
    question.question_text = dto.prompt_text.trim().to_string();
    question.is_required = dto.is_required;
    question.trait_key = dto.trait_key.clone();
    question.ws = dto.ws;
    question.media_url = dto.media_url.clone();
    question.updated_at = Utc::now();
}

pub(crate) fn apply_option(option: &mut QuestionOption, dto: &OptionDto) {
    option.order = dto.order;
    option.label = dto.label.trim().to_string();
    option.is_correct = dto.is_correct;
    option.score = dto.score;
    option.weight = dto.weight;
    option.wa = dto.wa;
    option.media_url = dto.media_url.clone();
    option.updated_at = Utc::now();
}

fn question_changed(question: &Question, dto: &QuestionDto) -> bool {
    let type_changed = dto
        .question_type
        .parse::<QuestionType>()
        .is_ok_and(|t| t != question.question_type);
    question.order != dto.order
        || type_changed
        || question.question_text != dto.prompt_text.trim()
        || question.is_required != dto.is_required
        || question.trait_key != dto.trait_key
        || question.ws != dto.ws
        || question.media_url != dto.media_url
}

fn option_changed(option: &QuestionOption, dto: &OptionDto) -> bool {
    option.order != dto.order
        || option.label != dto.label.trim()
        || option.is_correct != dto.is_correct
        || option.score != dto.score
        || option.weight != dto.weight
        || option.wa != dto.wa
        || option.media_url != dto.media_url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questionnaire::dto::TemplateDto;
    use crate::questionnaire::memory::MemoryStore;
    use crate::questionnaire::model::TemplateType;

    fn stored_template() -> Template {
        let now = Utc::now();
        let mut t = Template::new("quiz", 1, TemplateType::Form);
        let mut s = Section::new(1, "Basics", None);
        s.questions.push(Question {
            name: "q1".into(),
            version: 1,
            order: 1,
            question_type: QuestionType::Radio,
            question_text: "Pick one".into(),
            is_required: true,
            trait_key: None,
            ws: None,
            media_url: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            options: vec![
                new_option(
                    "q1_yes".into(),
                    &OptionDto {
                        order: 1,
                        label: "Yes".into(),
                        ..Default::default()
                    },
                ),
                new_option(
                    "q1_no".into(),
                    &OptionDto {
                        order: 2,
                        label: "No".into(),
                        ..Default::default()
                    },
                ),
            ],
        });
        t.sections.push(s);
        t
    }

    async fn seeded() -> (MemoryStore, Template) {
        let store = MemoryStore::new();
        store.insert_template(&stored_template()).await.unwrap();
        let loaded = store.find_template("quiz", 1).await.unwrap().unwrap();
        (store, loaded)
    }

    fn body(template: &Template) -> Vec<SectionDto> {
        TemplateDto::from(template).sections
    }

    #[tokio::test]
    async fn test_edit_in_place_when_not_in_use() {
        let (store, mut template) = seeded().await;
        let cache = HistoryCache::local();
        let mut sections = body(&template);
        sections[0].questions[0].prompt_text = "Pick exactly one".into();
        sections[0].questions[0].options.push(OptionDto {
            name: "option_3".into(),
            order: 3,
            label: "Maybe".into(),
            ..Default::default()
        });

        let mut sync = TemplateSync::new(&store, &cache, &template, false);
        sync.sync_sections(&mut template, &sections).await.unwrap();

        let q = &template.sections[0].questions;
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].version, 1);
        assert_eq!(q[0].question_text, "Pick exactly one");
        assert_eq!(q[0].options[2].name, "q1_option_3");
    }

    #[tokio::test]
    async fn test_copy_on_write_when_in_use() {
        let (store, mut template) = seeded().await;
        let cache = HistoryCache::local();
        let mut sections = body(&template);
        sections[0].questions[0].prompt_text = "Pick exactly one".into();

        let mut sync = TemplateSync::new(&store, &cache, &template, true);
        sync.sync_sections(&mut template, &sections).await.unwrap();

        let section = &template.sections[0];
        assert_eq!(section.questions.len(), 2);
        let old = section.questions.iter().find(|q| q.version == 1).unwrap();
        let new = section.questions.iter().find(|q| q.version == 2).unwrap();
        assert!(!old.is_active);
        assert_eq!(old.question_text, "Pick one");
        assert!(new.is_active);
        assert_eq!(new.question_text, "Pick exactly one");
        assert_eq!(new.options.len(), 2);
        assert!(new.options.iter().all(|o| o.version == 2));
        assert!(section.contested_slots().is_empty());
    }

    #[tokio::test]
    async fn test_option_change_in_use_versions_the_question() {
        let (store, mut template) = seeded().await;
        let cache = HistoryCache::local();
        let mut sections = body(&template);
        sections[0].questions[0].options[1].label = "Nope".into();

        let mut sync = TemplateSync::new(&store, &cache, &template, true);
        sync.sync_sections(&mut template, &sections).await.unwrap();

        let active: Vec<&Question> = template.sections[0].active_questions().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, 2);
        let labels: Vec<&str> = active[0].options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Yes", "Nope"]);
    }

    #[tokio::test]
    async fn test_in_use_refuses_structural_changes() {
        let (store, template) = seeded().await;
        let cache = HistoryCache::local();

        let mut removed_question = body(&template);
        removed_question[0].questions.clear();
        let mut t = template.clone();
        let err = TemplateSync::new(&store, &cache, &template, true)
            .sync_sections(&mut t, &removed_question)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot remove question."));

        let mut added_section = body(&template);
        added_section.push(SectionDto {
            order: 2,
            title: "More".into(),
            ..Default::default()
        });
        let mut t = template.clone();
        let err = TemplateSync::new(&store, &cache, &template, true)
            .sync_sections(&mut t, &added_section)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot add section. Template is in use. Please version the template first."
        );

        let mut removed_option = body(&template);
        removed_option[0].questions[0].options.pop();
        let mut t = template.clone();
        let err = TemplateSync::new(&store, &cache, &template, true)
            .sync_sections(&mut t, &removed_option)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot remove option."));
    }

    #[tokio::test]
    async fn test_new_question_gets_generated_name() {
        let (store, mut template) = seeded().await;
        let cache = HistoryCache::local();
        let mut sections = body(&template);
        sections[0].questions.push(QuestionDto {
            order: 2,
            question_type: "Text".into(),
            prompt_text: "Anything else?".into(),
            ..Default::default()
        });

        let mut sync = TemplateSync::new(&store, &cache, &template, false);
        sync.sync_sections(&mut template, &sections).await.unwrap();

        let names: Vec<&str> = template.sections[0]
            .questions
            .iter()
            .map(|q| q.name.as_str())
            .collect();
        assert_eq!(names, vec!["q1", "quiz_v1_anything_else"]);
    }

    #[tokio::test]
    async fn test_contested_slot_is_rejected() {
        let (store, mut template) = seeded().await;
        let cache = HistoryCache::local();
        let mut sections = body(&template);
        sections[0].questions.push(QuestionDto {
            order: 1,
            question_type: "Text".into(),
            prompt_text: "Same slot".into(),
            ..Default::default()
        });

        let mut sync = TemplateSync::new(&store, &cache, &template, false);
        let err = sync.sync_sections(&mut template, &sections).await.unwrap_err();
        assert!(matches!(err, QuestionnaireError::Invalid(_)));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("q1_yes", "q1"), Some("yes"));
        assert_eq!(base_name("Q1_yes", "q1"), Some("yes"));
        assert_eq!(base_name("q1_", "q1"), None);
        assert_eq!(base_name("other", "q1"), None);
    }
}
