//! Dry-run checks over prepared import rows. Every problem becomes an
//! [`ImportIssue`]; only `Error` issues block execution.

use std::collections::{HashMap, HashSet};

use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::import::rows::{
    first_non_empty, parse_decimal, parse_positive_int, same_text, ImportRow,
};
use crate::questionnaire::import::{
    ImportIssue, ImportRequest, ImportScope, ImportValidation, Severity,
};
use crate::questionnaire::model::{QuestionType, Template, TemplateType};
use crate::questionnaire::service::TemplateService;

pub async fn validate_rows(
    service: &TemplateService,
    rows: &[ImportRow],
    request: &ImportRequest,
) -> Result<ImportValidation, QuestionnaireError> {
    let Some(first_row) = rows.first().map(|r| r.row_number) else {
        return Ok(ImportValidation {
            is_valid: false,
            errors: vec![ImportIssue {
                row_number: 1,
                column: None,
                message: "The import sheet contains no data rows.".to_string(),
                severity: Severity::Error,
            }],
            ..Default::default()
        });
    };

    let mut errors = Vec::new();

    let mut template_name = first_non_empty([request.template_name.as_deref()])
        .or_else(|| first_non_empty(rows.iter().map(|r| r.template_name.as_deref())));
    let mut template_type = first_non_empty([request.template_type.as_deref()])
        .or_else(|| first_non_empty(rows.iter().map(|r| r.template_type.as_deref())));
    let scope = match request.scope {
        Some(scope) => Some(scope),
        None => first_non_empty(rows.iter().map(|r| r.scope.as_deref()))
            .and_then(|raw| raw.parse::<ImportScope>().ok()),
    };
    let requested_version = request.template_version;

    if scope.is_none() {
        errors.push(ImportIssue::error(
            first_row,
            "Scope",
            "Scope is required and must be CreateTemplate, AppendToTemplate, or AppendToSection.",
        ));
    }
    if template_name.is_none() {
        errors.push(ImportIssue::error(first_row, "TemplateName", "TemplateName is required."));
    }

    let target_section = match request.target_section_order {
        Some(order) => (order > 0).then_some(order),
        None => parse_positive_int(
            first_non_empty(rows.iter().map(|r| r.target_section_order.as_deref())).as_deref(),
        ),
    };

    match &template_type {
        Some(raw) if raw.parse::<TemplateType>().is_err() => errors.push(ImportIssue::error(
            first_row,
            "TemplateType",
            "TemplateType must be Quiz, Personality, or Form.",
        )),
        None if scope == Some(ImportScope::CreateTemplate) => errors.push(ImportIssue::error(
            first_row,
            "TemplateType",
            "TemplateType is required and must be Quiz, Personality, or Form.",
        )),
        _ => {}
    }

    // Append scopes work against the version picked in the form.
    let is_append = scope.is_some_and(ImportScope::is_append);
    let mut existing: Option<Template> = None;
    if let (true, Some(name), Some(version)) = (is_append, &template_name, requested_version) {
        if version > 0 {
            existing = service.find(name, version).await?;
            match &existing {
                None => errors.push(ImportIssue::error(
                    first_row,
                    "TemplateVersion",
                    format!("Template '{name}' v{version} was not found."),
                )),
                Some(template) => {
                    let actual = template.template_type.as_str();
                    let given = template_type.get_or_insert_with(|| actual.to_string());
                    if !given.eq_ignore_ascii_case(actual) {
                        errors.push(ImportIssue::error(
                            first_row,
                            "TemplateType",
                            format!(
                                "TemplateType '{given}' does not match existing template type '{actual}'."
                            ),
                        ));
                    }
                    if let (Some(ImportScope::AppendToSection), Some(order)) =
                        (scope, target_section)
                    {
                        if template.section_by_order(order).is_none() {
                            errors.push(ImportIssue::error(
                                first_row,
                                "TargetSectionOrder",
                                format!(
                                    "Section order {order} was not found in template '{name}' v{version}."
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }

    if is_append && !requested_version.is_some_and(|v| v > 0) {
        errors.push(ImportIssue::error(
            first_row,
            "TemplateVersion",
            "TemplateVersion is required for append imports.",
        ));
    }
    if scope == Some(ImportScope::AppendToSection) && target_section.is_none() {
        errors.push(ImportIssue::error(
            first_row,
            "TargetSectionOrder",
            "TargetSectionOrder is required for AppendToSection and must be a positive integer.",
        ));
    }

    let parsed_template_type = template_type
        .as_deref()
        .and_then(|t| t.parse::<TemplateType>().ok());
    let existing_prompts: Option<HashMap<i32, HashSet<String>>> = existing.as_ref().map(|t| {
        t.sections
            .iter()
            .map(|s| {
                let prompts = s
                    .active_questions()
                    .map(|q| q.question_text.trim().to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect();
                (s.order, prompts)
            })
            .collect()
    });

    let mut counts = RowCounts::default();
    let mut titled_sections: HashSet<i32> = HashSet::new();
    let mut prompt_by_question: HashMap<(i32, i32), String> = HashMap::new();
    let mut prompts_by_section: HashMap<i32, HashSet<String>> = HashMap::new();

    for row in rows {
        let n = row.row_number;

        let section_order = if scope == Some(ImportScope::AppendToSection) {
            // The target error is already recorded.
            let Some(target) = target_section else { continue };
            let row_section = parse_positive_int(row.section_order.as_deref()).unwrap_or(target);
            if row_section != target {
                errors.push(ImportIssue::warning(
                    n,
                    "SectionOrder",
                    format!(
                        "Row will be ignored because SectionOrder={row_section} does not match TargetSectionOrder={target}."
                    ),
                ));
                continue;
            }
            target
        } else {
            let Some(order) = parse_positive_int(row.section_order.as_deref()) else {
                errors.push(ImportIssue::error(
                    n,
                    "SectionOrder",
                    "SectionOrder is required and must be a positive integer.",
                ));
                continue;
            };
            match (scope, &existing) {
                (Some(ImportScope::CreateTemplate), _) => {
                    if !titled_sections.contains(&order) {
                        if row.section_title.is_some() {
                            titled_sections.insert(order);
                        } else {
                            errors.push(ImportIssue::error(
                                n,
                                "SectionTitle",
                                "SectionTitle is required for the first row of a section.",
                            ));
                        }
                    }
                }
                (Some(ImportScope::AppendToTemplate), Some(template)) => {
                    if template.section_by_order(order).is_none() && row.section_title.is_none() {
                        errors.push(ImportIssue::error(
                            n,
                            "SectionTitle",
                            "SectionTitle is required when adding a new section.",
                        ));
                    }
                }
                (Some(ImportScope::AppendToTemplate), None) => {
                    if row.section_title.is_none() {
                        errors.push(ImportIssue::error(
                            n,
                            "SectionTitle",
                            "SectionTitle is required.",
                        ));
                    }
                }
                _ => {}
            }
            order
        };

        let Some(question_order) = parse_positive_int(row.question_order.as_deref()) else {
            errors.push(ImportIssue::error(
                n,
                "QuestionOrder",
                "QuestionOrder is required and must be a positive integer.",
            ));
            continue;
        };

        let Some(question_type) = row
            .question_type
            .as_deref()
            .and_then(|raw| raw.parse::<QuestionType>().ok())
        else {
            errors.push(ImportIssue::error(
                n,
                "QuestionType",
                "QuestionType is required and must be a valid questionnaire question type.",
            ));
            continue;
        };

        match row.question_title.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push(ImportIssue::error(n, "QuestionTitle", "QuestionTitle is required."));
            }
            Some(prompt) => {
                let key = (section_order, question_order);
                match prompt_by_question.get(&key) {
                    None => {
                        prompt_by_question.insert(key, prompt.to_string());
                        let seen = prompts_by_section.entry(section_order).or_default();
                        if !seen.insert(prompt.to_lowercase()) {
                            errors.push(ImportIssue::warning(
                                n,
                                "QuestionTitle",
                                format!(
                                    "Duplicate question prompt detected in section {section_order}. It will be skipped during import: '{prompt}'."
                                ),
                            ));
                        }
                        let in_target = existing_prompts
                            .as_ref()
                            .and_then(|by_section| by_section.get(&section_order))
                            .is_some_and(|prompts| prompts.contains(&prompt.to_lowercase()));
                        if in_target {
                            errors.push(ImportIssue::warning(
                                n,
                                "QuestionTitle",
                                format!(
                                    "Duplicate question prompt already exists in target template section {section_order}. It will be skipped: '{prompt}'."
                                ),
                            ));
                        }
                    }
                    Some(first) if !same_text(first, prompt) => {
                        errors.push(ImportIssue::error(
                            n,
                            "QuestionTitle",
                            format!(
                                "QuestionTitle differs across rows for Section {section_order}, Question {question_order}. Keep it consistent (one question = one title)."
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        if let Some(template_type) = parsed_template_type {
            if !template_type.allows(question_type) {
                let message = match template_type {
                    TemplateType::Quiz => format!(
                        "Template type is not correct: Quiz allows only SingleChoice and MultiChoice. This question has type '{question_type}'."
                    ),
                    _ => format!(
                        "Template type is not correct: Personality templates allow only Likert questions. This question has type '{question_type}'."
                    ),
                };
                errors.push(ImportIssue::error(n, "QuestionType", message));
            }
        }

        let is_likert = question_type == QuestionType::Likert;
        if is_likert {
            if row.trait_key.is_none() {
                errors.push(ImportIssue::error(
                    n,
                    "TraitKey",
                    "TraitKey is required for Likert questions.",
                ));
            }
            if parse_decimal(row.ws.as_deref()).is_none() {
                errors.push(ImportIssue::error(
                    n,
                    "Ws",
                    "Ws is required for Likert questions and must be a number.",
                ));
            }
        }

        if question_type.is_option_based() {
            if parse_positive_int(row.option_order.as_deref()).is_none() {
                errors.push(ImportIssue::error(
                    n,
                    "OptionOrder",
                    "OptionOrder is required for option-based question types and must be a positive integer.",
                ));
            } else {
                counts.options += 1;
                if row.option_label.is_none() {
                    errors.push(ImportIssue::error(
                        n,
                        "OptionLabel",
                        "OptionLabel is required for option-based question types.",
                    ));
                }
                if is_likert && parse_decimal(row.wa.as_deref()).is_none() {
                    errors.push(ImportIssue::error(
                        n,
                        "Wa",
                        "Wa is required for Likert options and must be a number.",
                    ));
                }
            }
        } else if row.option_order.is_some()
            || row.option_label.is_some()
            || row.score.is_some()
            || row.wa.is_some()
            || row.is_correct.is_some()
        {
            errors.push(ImportIssue::warning(
                n,
                "OptionOrder",
                "This question type does not support options. Remove option columns for this row.",
            ));
        }

        counts.sections.insert(section_order);
        counts.questions.insert((section_order, question_order));
    }

    let mut template_exists = false;
    let mut existing_latest_version = None;
    let mut existing_latest_in_use = false;
    if let Some(name) = template_name.as_mut() {
        *name = name.trim().to_string();
        if let Some(latest) = service.store().latest_template_version(name).await? {
            template_exists = true;
            existing_latest_version = Some(latest);
            existing_latest_in_use = service.is_in_use(name, latest).await?;
            if scope == Some(ImportScope::CreateTemplate) {
                errors.push(ImportIssue::error(
                    first_row,
                    "TemplateName",
                    format!(
                        "Template '{name}' already exists. Use AppendToTemplate / AppendToSection instead."
                    ),
                ));
            }
        }
    }

    Ok(ImportValidation {
        is_valid: !errors.iter().any(ImportIssue::is_error),
        scope,
        template_name,
        template_type,
        template_exists,
        existing_latest_version,
        existing_latest_in_use,
        total_rows: rows.len(),
        sections_count: counts.sections.len(),
        questions_count: counts.questions.len(),
        options_count: counts.options,
        errors,
    })
}

#[derive(Default)]
struct RowCounts {
    sections: HashSet<i32>,
    questions: HashSet<(i32, i32)>,
    options: usize,
}
