//! Stable names for questions and options.

use std::collections::HashSet;

use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::store::TemplateStore;

const MAX_SLUG_LEN: usize = 255;
const MAX_NUMERIC_SUFFIX: u32 = 50;

/// Lowercases, trims, truncates and collapses every run of characters outside
/// `[a-z0-9]` into a single `_`, with no leading or trailing `_`.
pub fn slugify(text: &str) -> String {
    let lowered: String = text
        .trim()
        .to_lowercase()
        .chars()
        .take(MAX_SLUG_LEN)
        .collect();

    let mut slug = String::with_capacity(lowered.len());
    let mut pending_separator = false;
    for ch in lowered.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(ch);
        } else {
            pending_separator = true;
        }
    }
    slug
}

/// Name for a question created through the API without one.
pub fn question_name(template_name: &str, template_version: i32, prompt: &str) -> String {
    format!(
        "{}_v{}_{}",
        slugify(template_name),
        template_version,
        slugify(prompt)
    )
}

/// Name for a question created by a spreadsheet import.
pub fn stable_question_name(
    template_name: &str,
    template_version: i32,
    section_order: i32,
    question_order: i32,
    prompt: &str,
) -> String {
    format!(
        "{}_v{}_s{}_q{}_{}",
        slugify(template_name),
        template_version,
        section_order,
        question_order,
        slugify(prompt)
    )
}

/// Blank names derive from the label, `option_*`/`opt_*` placeholders are
/// scoped to the owning question, anything else is kept.
pub fn normalize_option_name(name: &str, label: &str, question_name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return format!("{question_name}_{}", slugify(label));
    }

    let lowered = name.to_ascii_lowercase();
    if lowered.starts_with("option_") || lowered.starts_with("opt_") {
        return format!("{question_name}_{name}");
    }

    name.to_string()
}

/// Picks a name for a new option whose `(name, 1)` key is free both in the
/// store and among names already handed out for the current save.
pub async fn unique_option_name(
    store: &dyn TemplateStore,
    desired: &str,
    taken: &mut HashSet<String>,
) -> Result<String, QuestionnaireError> {
    let candidate = desired.trim();
    if candidate.is_empty() {
        return Err(QuestionnaireError::Invalid(
            "Option name cannot be empty.".to_string(),
        ));
    }

    if is_free(store, candidate, taken).await? {
        taken.insert(candidate.to_string());
        return Ok(candidate.to_string());
    }

    for suffix in 2..=MAX_NUMERIC_SUFFIX {
        let with_suffix = format!("{candidate}_{suffix}");
        if is_free(store, &with_suffix, taken).await? {
            taken.insert(with_suffix.clone());
            return Ok(with_suffix);
        }
    }

    let random = uuid::Uuid::new_v4().simple().to_string();
    let fallback = format!("{candidate}_{}", &random[..8]);
    taken.insert(fallback.clone());
    Ok(fallback)
}

async fn is_free(
    store: &dyn TemplateStore,
    name: &str,
    taken: &HashSet<String>,
) -> Result<bool, QuestionnaireError> {
    if taken.contains(name) {
        return Ok(false);
    }
    Ok(!store.option_exists(name, 1).await?)
}

/// Makes a question name unique among names handed out for the current save.
pub fn reserve_question_name(desired: &str, taken: &mut HashSet<String>) -> String {
    let base = desired.trim().to_string();
    if taken.insert(base.clone()) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}_{suffix}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questionnaire::memory::MemoryStore;
    use crate::questionnaire::model::{
        Question, QuestionOption, QuestionType, Section, Template, TemplateType,
    };
    use chrono::Utc;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  How do you handle Conflict?  "), "how_do_you_handle_conflict");
        assert_eq!(slugify("C++ / Rust -- 2024"), "c_rust_2024");
        assert_eq!(slugify("___"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_slugify_truncates_before_cleaning() {
        let long = "a".repeat(300);
        assert_eq!(slugify(&long).len(), 255);
    }

    #[test]
    fn test_question_names() {
        assert_eq!(
            question_name("Onboarding Quiz", 2, "What is Rust?"),
            "onboarding_quiz_v2_what_is_rust"
        );
        assert_eq!(
            stable_question_name("Onboarding Quiz", 1, 3, 4, "Pick one"),
            "onboarding_quiz_v1_s3_q4_pick_one"
        );
    }

    #[test]
    fn test_normalize_option_name() {
        assert_eq!(normalize_option_name("", "Strongly Agree", "q1"), "q1_strongly_agree");
        assert_eq!(normalize_option_name("option_2", "B", "q1"), "q1_option_2");
        assert_eq!(normalize_option_name("OPT_x", "B", "q1"), "q1_OPT_x");
        assert_eq!(normalize_option_name(" custom ", "B", "q1"), "custom");
    }

    #[test]
    fn test_reserve_question_name_suffixes_duplicates() {
        let mut taken = HashSet::new();
        assert_eq!(reserve_question_name("q", &mut taken), "q");
        assert_eq!(reserve_question_name("q", &mut taken), "q_2");
        assert_eq!(reserve_question_name("q", &mut taken), "q_3");
    }

    fn template_with_option(option_name: &str) -> Template {
        let now = Utc::now();
        let mut template = Template::new("t", 1, TemplateType::Form);
        let mut section = Section::new(1, "S", None);
        section.questions.push(Question {
            name: "q".into(),
            version: 1,
            order: 1,
            question_type: QuestionType::Radio,
            question_text: "Pick".into(),
            is_required: false,
            trait_key: None,
            ws: None,
            media_url: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            options: vec![QuestionOption {
                name: option_name.into(),
                version: 1,
                order: 1,
                label: "A".into(),
                is_correct: None,
                score: None,
                weight: None,
                wa: None,
                media_url: None,
                created_at: now,
                updated_at: now,
            }],
        });
        template.sections.push(section);
        template
    }

    #[tokio::test]
    async fn test_unique_option_name_suffixes_store_and_batch_collisions() {
        let store = MemoryStore::new();
        store
            .insert_template(&template_with_option("q_yes"))
            .await
            .unwrap();

        let mut taken = HashSet::new();
        let first = unique_option_name(&store, "q_yes", &mut taken).await.unwrap();
        let second = unique_option_name(&store, "q_yes", &mut taken).await.unwrap();
        let fresh = unique_option_name(&store, "q_no", &mut taken).await.unwrap();

        assert_eq!(first, "q_yes_2");
        assert_eq!(second, "q_yes_3");
        assert_eq!(fresh, "q_no");
    }

    #[tokio::test]
    async fn test_unique_option_name_rejects_blank() {
        let store = MemoryStore::new();
        let mut taken = HashSet::new();
        let result = unique_option_name(&store, "  ", &mut taken).await;
        assert!(matches!(result, Err(QuestionnaireError::Invalid(_))));
    }
}
