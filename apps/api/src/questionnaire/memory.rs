//! In-process `TemplateStore`, selected with `STORE_BACKEND=memory`.
//!
//! Enforces the same keys as the Postgres schema so service behaviour is
//! identical on both backends.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::questionnaire::model::{Question, QuestionOption, Submission, Template};
use crate::questionnaire::store::{StoreError, TemplateStore};

#[derive(Default)]
struct Inner {
    templates: BTreeMap<(String, i32), Template>,
    submissions: Vec<Submission>,
}

impl Inner {
    /// Rejects question/option keys or section ids owned by another template
    /// version, and active-slot collisions inside `template`.
    fn check_keys(&self, template: &Template) -> Result<(), StoreError> {
        let own_key = (template.name.clone(), template.version);

        let mut questions = HashSet::new();
        let mut options = HashSet::new();
        let mut sections = HashSet::new();
        for section in &template.sections {
            if !sections.insert(section.id) {
                return Err(StoreError::UniqueViolation(format!(
                    "section id {} used twice",
                    section.id
                )));
            }
            if let Some(order) = section.contested_slots().first() {
                return Err(StoreError::UniqueViolation(format!(
                    "more than one active question at order {order} in section {}",
                    section.order
                )));
            }
            for question in &section.questions {
                if !questions.insert(question.key()) {
                    return Err(StoreError::UniqueViolation(format!(
                        "question {} v{} used twice",
                        question.name, question.version
                    )));
                }
                for option in &question.options {
                    if !options.insert(option.key()) {
                        return Err(StoreError::UniqueViolation(format!(
                            "option {} v{} used twice",
                            option.name, option.version
                        )));
                    }
                }
            }
        }

        for (key, other) in &self.templates {
            if *key == own_key {
                continue;
            }
            for section in &other.sections {
                if sections.contains(&section.id) {
                    return Err(StoreError::UniqueViolation(format!(
                        "section id {} belongs to {} v{}",
                        section.id, other.name, other.version
                    )));
                }
                for question in &section.questions {
                    if questions.contains(&question.key()) {
                        return Err(StoreError::UniqueViolation(format!(
                            "question {} v{} already exists",
                            question.name, question.version
                        )));
                    }
                    for option in &question.options {
                        if options.contains(&option.key()) {
                            return Err(StoreError::UniqueViolation(format!(
                                "option {} v{} already exists",
                                option.name, option.version
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn all_questions(&self) -> impl Iterator<Item = &Question> {
        self.templates.values().flat_map(|t| t.questions())
    }

    fn all_options(&self) -> impl Iterator<Item = &QuestionOption> {
        self.templates.values().flat_map(|t| t.options())
    }
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.templates.values().cloned().collect())
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<Template>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .templates
            .values()
            .filter(|t| t.name == name)
            .cloned()
            .collect())
    }

    async fn find_template(
        &self,
        name: &str,
        version: i32,
    ) -> Result<Option<Template>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.templates.get(&(name.to_string(), version)).cloned())
    }

    async fn latest_template_version(&self, name: &str) -> Result<Option<i32>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .templates
            .keys()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .max())
    }

    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (template.name.clone(), template.version);
        if inner.templates.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!(
                "template {} v{} already exists",
                template.name, template.version
            )));
        }
        inner.check_keys(template)?;

        let mut stored = template.clone();
        stored.row_version = 1;
        stored.sort_children();
        inner.templates.insert(key, stored);
        Ok(())
    }

    async fn save_template(&self, template: &Template) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (template.name.clone(), template.version);
        let current = inner
            .templates
            .get(&key)
            .map(|t| t.row_version)
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "template {} v{}",
                    template.name, template.version
                ))
            })?;
        if current != template.row_version {
            return Err(StoreError::ConcurrencyConflict {
                name: template.name.clone(),
                version: template.version,
            });
        }
        inner.check_keys(template)?;

        let mut stored = template.clone();
        stored.row_version = current + 1;
        stored.sort_children();
        inner.templates.insert(key, stored);
        Ok(current + 1)
    }

    async fn delete_template(&self, name: &str, version: i32) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .templates
            .remove(&(name.to_string(), version))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("template {name} v{version}")))
    }

    async fn count_submissions(&self, name: &str, version: i32) -> Result<i64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .submissions
            .iter()
            .filter(|s| s.template_name == name && s.template_version == version)
            .count() as i64)
    }

    async fn insert_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (
            submission.template_name.clone(),
            submission.template_version,
        );
        if !inner.templates.contains_key(&key) {
            return Err(StoreError::NotFound(format!(
                "template {} v{}",
                submission.template_name, submission.template_version
            )));
        }
        inner.submissions.push(submission.clone());
        Ok(())
    }

    async fn latest_question_version(&self, name: &str) -> Result<Option<i32>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .all_questions()
            .filter(|q| q.name == name)
            .map(|q| q.version)
            .max())
    }

    async fn latest_option_version(&self, name: &str) -> Result<Option<i32>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .all_options()
            .filter(|o| o.name == name)
            .map(|o| o.version)
            .max())
    }

    async fn option_exists(&self, name: &str, version: i32) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        let found = inner
            .all_options()
            .any(|o| o.name == name && o.version == version);
        Ok(found)
    }

    async fn question_versions(&self, name: &str) -> Result<Vec<Question>, StoreError> {
        let inner = self.inner.read().await;
        let mut versions: Vec<Question> = inner
            .all_questions()
            .filter(|q| q.name == name)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn option_versions(&self, name: &str) -> Result<Vec<QuestionOption>, StoreError> {
        let inner = self.inner.read().await;
        let mut versions: Vec<QuestionOption> = inner
            .all_options()
            .filter(|o| o.name == name)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }
}
