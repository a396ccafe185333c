//! Version arithmetic for templates, questions and options, and the version
//! history read model.

use std::str::FromStr;

use chrono::Utc;

use crate::cache::HistoryCache;
use crate::questionnaire::dto::VersionHistoryItem;
use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::model::{Question, QuestionOption};
use crate::questionnaire::store::TemplateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEntity {
    Template,
    Question,
    Option,
}

impl HistoryEntity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Question => "question",
            Self::Option => "option",
        }
    }
}

impl FromStr for HistoryEntity {
    type Err = QuestionnaireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "template" => Ok(Self::Template),
            "question" => Ok(Self::Question),
            "option" => Ok(Self::Option),
            other => Err(QuestionnaireError::Invalid(format!(
                "Unknown entity type '{other}'. Expected template, question, or option."
            ))),
        }
    }
}

/// `latest + 1`, or `current + 1` when nothing is stored under `name`.
pub async fn next_template_version(
    store: &dyn TemplateStore,
    name: &str,
    current: i32,
) -> Result<i32, QuestionnaireError> {
    let latest = store.latest_template_version(name).await?;
    Ok(latest.unwrap_or(current) + 1)
}

/// Version for a brand-new question key: 1, or one past whatever is already
/// stored under the same name.
pub async fn first_free_question_version(
    store: &dyn TemplateStore,
    name: &str,
) -> Result<i32, QuestionnaireError> {
    Ok(store
        .latest_question_version(name)
        .await?
        .map_or(1, |latest| latest + 1))
}

/// Copies `source` into the next version of its name. The copy is active and
/// carries no options; the caller attaches them.
pub async fn version_question(
    store: &dyn TemplateStore,
    cache: &HistoryCache,
    source: &Question,
) -> Result<Question, QuestionnaireError> {
    let latest = store.latest_question_version(&source.name).await?;
    let now = Utc::now();
    let copy = Question {
        version: latest.unwrap_or(source.version).max(source.version) + 1,
        is_active: true,
        created_at: now,
        updated_at: now,
        options: Vec::new(),
        ..source.clone()
    };
    cache
        .invalidate(&HistoryCache::key(HistoryEntity::Question.as_str(), &source.name))
        .await;
    Ok(copy)
}

pub async fn version_option(
    store: &dyn TemplateStore,
    cache: &HistoryCache,
    source: &QuestionOption,
) -> Result<QuestionOption, QuestionnaireError> {
    let latest = store.latest_option_version(&source.name).await?;
    let now = Utc::now();
    let copy = QuestionOption {
        version: latest.unwrap_or(source.version).max(source.version) + 1,
        created_at: now,
        updated_at: now,
        ..source.clone()
    };
    cache
        .invalidate(&HistoryCache::key(HistoryEntity::Option.as_str(), &source.name))
        .await;
    Ok(copy)
}

/// Versions of `name`, newest first. Question and option histories are
/// cached; template history is read straight from the store.
pub async fn version_history(
    store: &dyn TemplateStore,
    cache: &HistoryCache,
    name: &str,
    entity: HistoryEntity,
) -> Result<Vec<VersionHistoryItem>, QuestionnaireError> {
    if entity == HistoryEntity::Template {
        let mut items: Vec<VersionHistoryItem> = store
            .list_versions(name)
            .await?
            .iter()
            .map(|t| VersionHistoryItem {
                version: t.version,
                created_at: t.created_at,
                updated_at: t.updated_at,
                is_deleted: t.is_deleted,
            })
            .collect();
        items.sort_by(|a, b| b.version.cmp(&a.version));
        return Ok(items);
    }

    let key = HistoryCache::key(entity.as_str(), name);
    if let Some(cached) = cache.get(&key).await {
        return Ok(cached);
    }

    let items: Vec<VersionHistoryItem> = match entity {
        HistoryEntity::Question => store
            .question_versions(name)
            .await?
            .iter()
            .map(|q| VersionHistoryItem {
                version: q.version,
                created_at: q.created_at,
                updated_at: q.updated_at,
                is_deleted: false,
            })
            .collect(),
        _ => store
            .option_versions(name)
            .await?
            .iter()
            .map(|o| VersionHistoryItem {
                version: o.version,
                created_at: o.created_at,
                updated_at: o.updated_at,
                is_deleted: false,
            })
            .collect(),
    };

    cache.set(&key, &items).await;
    Ok(items)
}
