//! Folds validated import rows into a [`TemplateDto`] that the template
//! service then creates or updates.

use crate::questionnaire::dto::{OptionDto, QuestionDto, SectionDto, TemplateDto};
use crate::questionnaire::import::rows::{
    first_non_empty, non_blank, parse_bool, parse_decimal, parse_nullable_bool,
    parse_positive_int, same_text, ImportRow,
};
use crate::questionnaire::import::{ImportIssue, ImportRequest, ImportScope};
use crate::questionnaire::model::{QuestionType, TemplateStatus};
use crate::questionnaire::naming::stable_question_name;

/// Draft v1 shell for a `CreateTemplate` import. Title and description come
/// from the form, or the first row that has them.
pub fn new_template_dto(
    name: &str,
    template_type: &str,
    rows: &[ImportRow],
    request: &ImportRequest,
) -> TemplateDto {
    let title = first_non_empty([request.title.as_deref()])
        .or_else(|| first_non_empty(rows.iter().map(|r| r.title.as_deref())));
    let description = first_non_empty([request.description.as_deref()])
        .or_else(|| first_non_empty(rows.iter().map(|r| r.description.as_deref())));

    TemplateDto {
        name: name.to_string(),
        version: 1,
        template_type: template_type.to_string(),
        status: TemplateStatus::Draft.to_string(),
        title,
        description,
        ..Default::default()
    }
}

/// Sections, questions and options are matched by order and created when
/// missing. Rows that would duplicate a prompt or option label are skipped
/// and reported in `messages`.
pub fn apply_rows(
    target: &mut TemplateDto,
    scope: ImportScope,
    rows: &[ImportRow],
    messages: &mut Vec<ImportIssue>,
) {
    let target_section = match scope {
        ImportScope::AppendToSection => parse_positive_int(
            first_non_empty(rows.iter().map(|r| r.target_section_order.as_deref())).as_deref(),
        ),
        _ => None,
    };

    for row in rows {
        let section_order = match target_section {
            Some(target) => {
                let row_section =
                    parse_positive_int(row.section_order.as_deref()).unwrap_or(target);
                if row_section != target {
                    continue;
                }
                target
            }
            None => match parse_positive_int(row.section_order.as_deref()) {
                Some(order) => order,
                None => continue,
            },
        };
        let Some(question_order) = parse_positive_int(row.question_order.as_deref()) else {
            continue;
        };

        let template_name = target.name.clone();
        let template_version = target.version;
        let section = section_for(target, section_order, row, scope);
        let prompt = non_blank(row.question_title.as_deref());

        let q_idx = match section.questions.iter().position(|q| q.order == question_order) {
            None => {
                if let Some(prompt) = &prompt {
                    if section.questions.iter().any(|q| same_text(&q.prompt_text, prompt)) {
                        messages.push(ImportIssue::warning(
                            row.row_number,
                            "QuestionTitle",
                            format!(
                                "Skipped duplicate question prompt in section {section_order}: \
                                 '{prompt}'."
                            ),
                        ));
                        continue;
                    }
                }
                let prompt = prompt.unwrap_or_default();
                section.questions.push(QuestionDto {
                    name: stable_question_name(
                        &template_name,
                        template_version,
                        section_order,
                        question_order,
                        &prompt,
                    ),
                    version: 1,
                    order: question_order,
                    question_type: non_blank(row.question_type.as_deref())
                        .unwrap_or_else(|| QuestionType::Text.to_string()),
                    prompt_text: prompt,
                    is_required: parse_bool(row.is_required.as_deref()),
                    trait_key: non_blank(row.trait_key.as_deref()),
                    ws: parse_decimal(row.ws.as_deref()),
                    ..Default::default()
                });
                section.questions.len() - 1
            }
            Some(idx) => {
                if let Some(prompt) = &prompt {
                    let used_elsewhere = section.questions.iter().any(|q| {
                        q.order != question_order && same_text(&q.prompt_text, prompt)
                    });
                    if used_elsewhere {
                        messages.push(ImportIssue::warning(
                            row.row_number,
                            "QuestionTitle",
                            format!(
                                "Skipped row because question prompt duplicates another question in section {section_order}: '{prompt}'."
                            ),
                        ));
                        continue;
                    }
                }
                let question = &mut section.questions[idx];
                if let Some(question_type) = non_blank(row.question_type.as_deref()) {
                    question.question_type = question_type;
                }
                question.is_required = parse_bool(row.is_required.as_deref());
                if let Some(prompt) = prompt {
                    question.prompt_text = prompt;
                }
                question.trait_key = non_blank(row.trait_key.as_deref());
                if let Some(ws) = parse_decimal(row.ws.as_deref()) {
                    question.ws = Some(ws);
                }
                idx
            }
        };

        let question = &mut section.questions[q_idx];
        let option_based = question
            .question_type
            .parse::<QuestionType>()
            .is_ok_and(QuestionType::is_option_based);
        if !option_based {
            continue;
        }
        let Some(option_order) = parse_positive_int(row.option_order.as_deref()) else {
            continue;
        };
        let label = non_blank(row.option_label.as_deref());

        let o_idx = match question.options.iter().position(|o| o.order == option_order) {
            Some(idx) => idx,
            None => {
                if let Some(label) = &label {
                    if question.options.iter().any(|o| same_text(&o.label, label)) {
                        messages.push(ImportIssue::warning(
                            row.row_number,
                            "OptionLabel",
                            format!(
                                "Skipped duplicate option label for section {section_order}, question {question_order}: '{label}'."
                            ),
                        ));
                        continue;
                    }
                }
                question.options.push(OptionDto {
                    name: format!("option_{option_order}"),
                    version: 1,
                    order: option_order,
                    ..Default::default()
                });
                question.options.len() - 1
            }
        };

        let option = &mut question.options[o_idx];
        if let Some(label) = label {
            option.label = label;
        }
        option.is_correct = parse_nullable_bool(row.is_correct.as_deref());
        if let Some(score) = parse_decimal(row.score.as_deref()) {
            option.score = Some(score);
        }
        if let Some(wa) = parse_decimal(row.wa.as_deref()) {
            option.wa = Some(wa);
        }
    }

    target.sections.sort_by_key(|s| s.order);
    for section in &mut target.sections {
        section.questions.sort_by_key(|q| q.order);
        for question in &mut section.questions {
            question.options.sort_by_key(|o| o.order);
        }
    }
}

/// Finds the section with `order`, creating it when missing. Outside
/// `AppendToSection` a titled row renames an existing section.
fn section_for<'t>(
    target: &'t mut TemplateDto,
    order: i32,
    row: &ImportRow,
    scope: ImportScope,
) -> &'t mut SectionDto {
    let title = non_blank(row.section_title.as_deref());
    let idx = match target.sections.iter().position(|s| s.order == order) {
        Some(idx) => {
            if let (Some(title), false) = (&title, scope == ImportScope::AppendToSection) {
                target.sections[idx].title = title.clone();
            }
            idx
        }
        None => {
            target.sections.push(SectionDto {
                id: None,
                order,
                title: title.unwrap_or_else(|| format!("Section {order}")),
                description: None,
                questions: Vec::new(),
            });
            target.sections.len() - 1
        }
    };
    &mut target.sections[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: usize, section: &str, question: &str, prompt: &str) -> ImportRow {
        ImportRow {
            row_number: n,
            section_order: Some(section.into()),
            question_order: Some(question.into()),
            question_type: Some("Radio".into()),
            question_title: Some(prompt.into()),
            ..Default::default()
        }
    }

    fn with_option(mut r: ImportRow, order: &str, label: &str) -> ImportRow {
        r.option_order = Some(order.into());
        r.option_label = Some(label.into());
        r
    }

    fn template() -> TemplateDto {
        TemplateDto {
            name: "Team Survey".into(),
            version: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_new_template_prefers_form_values() {
        let rows = vec![ImportRow {
            title: Some("Sheet title".into()),
            description: Some("Sheet description".into()),
            ..Default::default()
        }];
        let request = ImportRequest {
            title: Some("Form title".into()),
            description: Some("  ".into()),
            ..Default::default()
        };
        let dto = new_template_dto("t", "Form", &rows, &request);
        assert_eq!(dto.title.as_deref(), Some("Form title"));
        assert_eq!(dto.description.as_deref(), Some("Sheet description"));
        assert_eq!(dto.status, "Draft");
        assert_eq!(dto.version, 1);
    }

    #[test]
    fn test_builds_sorted_tree_with_generated_names() {
        let mut dto = template();
        let mut titled = with_option(row(3, "2", "1", "Favourite day?"), "2", "Friday");
        titled.section_title = Some("Habits".into());
        let rows = vec![
            titled,
            with_option(row(4, "2", "1", "Favourite day?"), "1", "Monday"),
            row(5, "1", "1", "Anything else?"),
        ];
        let mut messages = Vec::new();
        apply_rows(&mut dto, ImportScope::AppendToTemplate, &rows, &mut messages);

        assert!(messages.is_empty());
        assert_eq!(dto.sections.iter().map(|s| s.order).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(dto.sections[0].title, "Section 1");
        assert_eq!(dto.sections[1].title, "Habits");

        let question = &dto.sections[1].questions[0];
        assert_eq!(question.name, "team_survey_v2_s2_q1_favourite_day");
        assert_eq!(
            question.options.iter().map(|o| o.label.as_str()).collect::<Vec<_>>(),
            vec!["Monday", "Friday"]
        );
        assert_eq!(question.options[0].name, "option_1");
    }

    #[test]
    fn test_duplicates_are_skipped_with_warnings() {
        let mut dto = template();
        let rows = vec![
            with_option(row(3, "1", "1", "Pick"), "1", "Yes"),
            with_option(row(4, "1", "1", "Pick"), "2", "yes"),
            row(5, "1", "2", "pick"),
        ];
        let mut messages = Vec::new();
        apply_rows(&mut dto, ImportScope::CreateTemplate, &rows, &mut messages);

        assert_eq!(dto.sections[0].questions.len(), 1);
        assert_eq!(dto.sections[0].questions[0].options.len(), 1);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].column.as_deref(), Some("OptionLabel"));
        assert_eq!(messages[1].message, "Skipped duplicate question prompt in section 1: 'pick'.");
    }

    #[test]
    fn test_append_to_section_keeps_title_and_filters_rows() {
        let mut dto = template();
        dto.sections.push(SectionDto {
            order: 3,
            title: "Existing".into(),
            ..Default::default()
        });
        let mut renamed = row(3, "3", "1", "New question");
        renamed.section_title = Some("Renamed".into());
        renamed.target_section_order = Some("3".into());
        let mut other = row(4, "1", "1", "Other section");
        other.target_section_order = Some("3".into());

        let mut messages = Vec::new();
        apply_rows(&mut dto, ImportScope::AppendToSection, &[renamed, other], &mut messages);

        assert_eq!(dto.sections.len(), 1);
        assert_eq!(dto.sections[0].title, "Existing");
        assert_eq!(dto.sections[0].questions.len(), 1);
    }

    #[test]
    fn test_existing_question_is_updated_in_place() {
        let mut dto = template();
        dto.sections.push(SectionDto {
            order: 1,
            title: "Intro".into(),
            questions: vec![QuestionDto {
                name: "kept_name".into(),
                order: 1,
                question_type: "Likert".into(),
                prompt_text: "I like rust".into(),
                trait_key: Some("openness".into()),
                ws: Some(1.0),
                options: vec![OptionDto {
                    name: "kept_name_agree".into(),
                    order: 1,
                    label: "Agree".into(),
                    wa: Some(2.0),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        });
        let mut r = with_option(row(3, "1", "1", "I like Rust a lot"), "1", "Strongly agree");
        r.question_type = Some("Likert".into());
        r.is_required = Some("yes".into());
        r.trait_key = Some("openness".into());

        let mut messages = Vec::new();
        apply_rows(&mut dto, ImportScope::AppendToTemplate, &[r], &mut messages);

        let question = &dto.sections[0].questions[0];
        assert_eq!(question.name, "kept_name");
        assert_eq!(question.prompt_text, "I like Rust a lot");
        assert!(question.is_required);
        assert_eq!(question.ws, Some(1.0));
        assert_eq!(question.options[0].name, "kept_name_agree");
        assert_eq!(question.options[0].label, "Strongly agree");
        assert_eq!(question.options[0].wa, Some(2.0));
    }
}
