use crate::questionnaire::dto::TemplateDto;
use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::model::{QuestionType, TemplateStatus, TemplateType};

const MAX_NAME_LEN: usize = 255;

/// Checks a template body before create or update. All failures are reported
/// together, joined with `"; "`.
pub fn validate_template(dto: &TemplateDto) -> Result<(), QuestionnaireError> {
    let errors = collect_errors(dto);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(QuestionnaireError::Invalid(errors.join("; ")))
    }
}

fn collect_errors(dto: &TemplateDto) -> Vec<String> {
    let mut errors = Vec::new();

    if dto.name.trim().is_empty() {
        errors.push("Template name is required".to_string());
    } else if dto.name.chars().count() > MAX_NAME_LEN {
        errors.push("Template name cannot exceed 255 characters".to_string());
    }

    if dto.version <= 0 {
        errors.push("Version must be greater than zero".to_string());
    }

    if dto.template_type.parse::<TemplateType>().is_err() {
        errors.push("TemplateType must be Quiz, Personality, or Form".to_string());
    }

    if dto.status.parse::<TemplateStatus>().is_err() {
        errors.push("Status must be Draft, Published, or Archived".to_string());
    }

    if let Some(title) = &dto.title {
        if title.chars().count() > MAX_NAME_LEN {
            errors.push("Title cannot exceed 255 characters".to_string());
        }
    }

    if matches!(dto.time_limit_seconds, Some(limit) if limit <= 0) {
        errors.push("TimeLimitSeconds must be greater than zero".to_string());
    }

    for section in &dto.sections {
        if section.order <= 0 {
            errors.push("Section order must be greater than zero".to_string());
        }
        if section.title.trim().is_empty() {
            errors.push("Section title is required".to_string());
        } else if section.title.chars().count() > MAX_NAME_LEN {
            errors.push("Section title cannot exceed 255 characters".to_string());
        }

        for question in &section.questions {
            if question.order <= 0 {
                errors.push("Question order must be greater than zero".to_string());
            }
            let question_type = question.question_type.parse::<QuestionType>();
            if question_type.is_err() {
                errors.push("QuestionType is invalid".to_string());
            }
            if question.prompt_text.trim().is_empty() {
                errors.push("Question is required".to_string());
            }
            if question_type == Ok(QuestionType::Likert) {
                if question.ws.is_none() {
                    errors.push("Ws is required for Likert questions".to_string());
                }
                if question
                    .trait_key
                    .as_deref()
                    .map_or(true, |k| k.trim().is_empty())
                {
                    errors.push("TraitKey is required for Likert questions".to_string());
                }
            }

            for option in &question.options {
                if option.order <= 0 {
                    errors.push("Option order must be greater than zero".to_string());
                }
                if option.label.trim().is_empty() {
                    errors.push("Option label is required".to_string());
                }
            }
        }
    }

    errors
}
