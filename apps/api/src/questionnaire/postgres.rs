//! Postgres-backed `TemplateStore`.
//!
//! Graphs are loaded in four batched queries (templates, sections, questions,
//! options). Saves run in one transaction guarded by the template's
//! `row_version`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::questionnaire::{OptionRow, QuestionRow, SectionRow, TemplateRow};
use crate::questionnaire::model::{Question, QuestionOption, Section, Submission, Template};
use crate::questionnaire::store::{StoreError, TemplateStore};

pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches sections, questions and options to template headers.
    async fn load_graphs(&self, rows: Vec<TemplateRow>) -> Result<Vec<Template>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = rows.iter().map(|r| r.name.clone()).collect();
        let versions: Vec<i32> = rows.iter().map(|r| r.version).collect();

        let section_rows: Vec<SectionRow> = sqlx::query_as(
            r#"
            SELECT s.*
            FROM questionnaire_sections s
            JOIN UNNEST($1::text[], $2::int[]) AS k(name, version)
              ON s.template_name = k.name AND s.template_version = k.version
            ORDER BY s.sort_order
            "#,
        )
        .bind(&names)
        .bind(&versions)
        .fetch_all(&self.pool)
        .await?;

        let section_ids: Vec<Uuid> = section_rows.iter().map(|s| s.id).collect();
        let question_rows: Vec<QuestionRow> = sqlx::query_as(
            r#"
            SELECT * FROM questionnaire_questions
            WHERE section_id = ANY($1)
            ORDER BY sort_order, version
            "#,
        )
        .bind(&section_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options = self.load_options(&question_rows).await?;

        let mut questions_by_section: HashMap<Uuid, Vec<Question>> = HashMap::new();
        for row in question_rows {
            let opts = options
                .remove(&(row.name.clone(), row.version))
                .unwrap_or_default();
            let section_id = row.section_id;
            questions_by_section
                .entry(section_id)
                .or_default()
                .push(question_from_row(row, opts)?);
        }

        let mut sections_by_template: HashMap<(String, i32), Vec<Section>> = HashMap::new();
        for row in section_rows {
            let questions = questions_by_section.remove(&row.id).unwrap_or_default();
            sections_by_template
                .entry((row.template_name.clone(), row.template_version))
                .or_default()
                .push(Section {
                    id: row.id,
                    order: row.sort_order,
                    title: row.title,
                    description: row.description,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                    questions,
                });
        }

        rows.into_iter()
            .map(|row| {
                let sections = sections_by_template
                    .remove(&(row.name.clone(), row.version))
                    .unwrap_or_default();
                let mut template = template_from_row(row, sections)?;
                template.sort_children();
                Ok(template)
            })
            .collect()
    }

    async fn load_options(
        &self,
        questions: &[QuestionRow],
    ) -> Result<HashMap<(String, i32), Vec<QuestionOption>>, StoreError> {
        let mut by_question: HashMap<(String, i32), Vec<QuestionOption>> = HashMap::new();
        if questions.is_empty() {
            return Ok(by_question);
        }

        let names: Vec<String> = questions.iter().map(|q| q.name.clone()).collect();
        let versions: Vec<i32> = questions.iter().map(|q| q.version).collect();
        let rows: Vec<OptionRow> = sqlx::query_as(
            r#"
            SELECT o.*
            FROM questionnaire_question_options o
            JOIN UNNEST($1::text[], $2::int[]) AS k(name, version)
              ON o.question_name = k.name AND o.question_version = k.version
            ORDER BY o.sort_order
            "#,
        )
        .bind(&names)
        .bind(&versions)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            by_question
                .entry((row.question_name.clone(), row.question_version))
                .or_default()
                .push(option_from_row(row));
        }
        Ok(by_question)
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        let rows: Vec<TemplateRow> =
            sqlx::query_as("SELECT * FROM questionnaire_templates ORDER BY name, version")
                .fetch_all(&self.pool)
                .await?;
        self.load_graphs(rows).await
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<Template>, StoreError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT * FROM questionnaire_templates WHERE name = $1 ORDER BY version",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        self.load_graphs(rows).await
    }

    async fn find_template(
        &self,
        name: &str,
        version: i32,
    ) -> Result<Option<Template>, StoreError> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT * FROM questionnaire_templates WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.load_graphs(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn latest_template_version(&self, name: &str) -> Result<Option<i32>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT MAX(version) FROM questionnaire_templates WHERE name = $1")
                .bind(name)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO questionnaire_templates
                (name, version, template_type, status, title, description,
                 time_limit_seconds, published_at, created_at, updated_at, is_deleted, row_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1)
            "#,
        )
        .bind(&template.name)
        .bind(template.version)
        .bind(template.template_type.as_str())
        .bind(template.status.as_str())
        .bind(&template.title)
        .bind(&template.description)
        .bind(template.time_limit_seconds)
        .bind(template.published_at)
        .bind(template.created_at)
        .bind(template.updated_at)
        .bind(template.is_deleted)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        write_children(&mut tx, template).await?;
        tx.commit().await?;

        info!(
            "Inserted questionnaire template {} v{} ({} sections)",
            template.name,
            template.version,
            template.sections.len()
        );
        Ok(())
    }

    async fn save_template(&self, template: &Template) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let token: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE questionnaire_templates
            SET template_type = $3, status = $4, title = $5, description = $6,
                time_limit_seconds = $7, published_at = $8, updated_at = $9,
                is_deleted = $10, row_version = row_version + 1
            WHERE name = $1 AND version = $2 AND row_version = $11
            RETURNING row_version
            "#,
        )
        .bind(&template.name)
        .bind(template.version)
        .bind(template.template_type.as_str())
        .bind(template.status.as_str())
        .bind(&template.title)
        .bind(&template.description)
        .bind(template.time_limit_seconds)
        .bind(template.published_at)
        .bind(template.updated_at)
        .bind(template.is_deleted)
        .bind(template.row_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(token) = token else {
            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM questionnaire_templates WHERE name = $1 AND version = $2
                )
                "#,
            )
            .bind(&template.name)
            .bind(template.version)
            .fetch_one(&mut *tx)
            .await?;
            return Err(if exists {
                StoreError::ConcurrencyConflict {
                    name: template.name.clone(),
                    version: template.version,
                }
            } else {
                StoreError::NotFound(format!("template {} v{}", template.name, template.version))
            });
        };

        let section_ids: Vec<Uuid> = template.sections.iter().map(|s| s.id).collect();
        sqlx::query(
            r#"
            DELETE FROM questionnaire_sections
            WHERE template_name = $1 AND template_version = $2 AND id <> ALL($3)
            "#,
        )
        .bind(&template.name)
        .bind(template.version)
        .bind(&section_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let (question_names, question_versions): (Vec<String>, Vec<i32>) =
            template.questions().map(|q| q.key()).unzip();
        sqlx::query(
            r#"
            DELETE FROM questionnaire_questions q
            USING questionnaire_sections s
            WHERE q.section_id = s.id
              AND s.template_name = $1 AND s.template_version = $2
              AND NOT EXISTS (
                  SELECT 1 FROM UNNEST($3::text[], $4::int[]) AS k(name, version)
                  WHERE k.name = q.name AND k.version = q.version)
            "#,
        )
        .bind(&template.name)
        .bind(template.version)
        .bind(&question_names)
        .bind(&question_versions)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let (option_names, option_versions): (Vec<String>, Vec<i32>) =
            template.options().map(|o| o.key()).unzip();
        sqlx::query(
            r#"
            DELETE FROM questionnaire_question_options o
            USING questionnaire_questions q, questionnaire_sections s
            WHERE o.question_name = q.name AND o.question_version = q.version
              AND q.section_id = s.id
              AND s.template_name = $1 AND s.template_version = $2
              AND NOT EXISTS (
                  SELECT 1 FROM UNNEST($3::text[], $4::int[]) AS k(name, version)
                  WHERE k.name = o.name AND k.version = o.version)
            "#,
        )
        .bind(&template.name)
        .bind(template.version)
        .bind(&option_names)
        .bind(&option_versions)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Clear every slot first so reordering never trips the active-slot index.
        sqlx::query(
            r#"
            UPDATE questionnaire_questions q
            SET is_active = FALSE
            FROM questionnaire_sections s
            WHERE q.section_id = s.id AND q.is_active
              AND s.template_name = $1 AND s.template_version = $2
            "#,
        )
        .bind(&template.name)
        .bind(template.version)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        write_children(&mut tx, template).await?;
        tx.commit().await?;

        debug!(
            "Saved questionnaire template {} v{} (row_version {token})",
            template.name, template.version
        );
        Ok(token)
    }

    async fn delete_template(&self, name: &str, version: i32) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM questionnaire_templates WHERE name = $1 AND version = $2")
                .bind(name)
                .bind(version)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("template {name} v{version}")));
        }
        info!("Deleted questionnaire template {name} v{version}");
        Ok(())
    }

    async fn count_submissions(&self, name: &str, version: i32) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM questionnaire_submissions
            WHERE template_name = $1 AND template_version = $2
            "#,
        )
        .bind(name)
        .bind(version)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn insert_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO questionnaire_submissions
                (id, template_name, template_version, candidate_ref, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(submission.id)
        .bind(&submission.template_name)
        .bind(submission.template_version)
        .bind(&submission.candidate_ref)
        .bind(&submission.status)
        .bind(submission.started_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn latest_question_version(&self, name: &str) -> Result<Option<i32>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT MAX(version) FROM questionnaire_questions WHERE name = $1")
                .bind(name)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn latest_option_version(&self, name: &str) -> Result<Option<i32>, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT MAX(version) FROM questionnaire_question_options WHERE name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn option_exists(&self, name: &str, version: i32) -> Result<bool, StoreError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM questionnaire_question_options WHERE name = $1 AND version = $2
            )
            "#,
        )
        .bind(name)
        .bind(version)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn question_versions(&self, name: &str) -> Result<Vec<Question>, StoreError> {
        let rows: Vec<QuestionRow> = sqlx::query_as(
            "SELECT * FROM questionnaire_questions WHERE name = $1 ORDER BY version DESC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let mut options = self.load_options(&rows).await?;
        rows.into_iter()
            .map(|row| {
                let opts = options
                    .remove(&(row.name.clone(), row.version))
                    .unwrap_or_default();
                question_from_row(row, opts)
            })
            .collect()
    }

    async fn option_versions(&self, name: &str) -> Result<Vec<QuestionOption>, StoreError> {
        let rows: Vec<OptionRow> = sqlx::query_as(
            "SELECT * FROM questionnaire_question_options WHERE name = $1 ORDER BY version DESC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(option_from_row).collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Writes shared by insert and save
// ────────────────────────────────────────────────────────────────────────────

/// Upserts sections, questions and options. A key already owned by another
/// section or question surfaces as `UniqueViolation`.
async fn write_children(
    tx: &mut Transaction<'_, Postgres>,
    template: &Template,
) -> Result<(), StoreError> {
    let now = Utc::now();

    for section in &template.sections {
        let written = sqlx::query(
            r#"
            INSERT INTO questionnaire_sections
                (id, template_name, template_version, sort_order, title, description,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET sort_order = EXCLUDED.sort_order, title = EXCLUDED.title,
                description = EXCLUDED.description, updated_at = $9
            WHERE questionnaire_sections.template_name = EXCLUDED.template_name
              AND questionnaire_sections.template_version = EXCLUDED.template_version
            "#,
        )
        .bind(section.id)
        .bind(&template.name)
        .bind(template.version)
        .bind(section.order)
        .bind(&section.title)
        .bind(&section.description)
        .bind(section.created_at)
        .bind(section.updated_at)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        if written.rows_affected() == 0 {
            return Err(StoreError::UniqueViolation(format!(
                "section id {} belongs to another template",
                section.id
            )));
        }

        for question in &section.questions {
            let written = sqlx::query(
                r#"
                INSERT INTO questionnaire_questions
                    (name, version, section_id, sort_order, question_type, question_text,
                     is_required, trait_key, ws, media_url, is_active, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (name, version) DO UPDATE
                SET sort_order = EXCLUDED.sort_order, question_type = EXCLUDED.question_type,
                    question_text = EXCLUDED.question_text, is_required = EXCLUDED.is_required,
                    trait_key = EXCLUDED.trait_key, ws = EXCLUDED.ws,
                    media_url = EXCLUDED.media_url, is_active = EXCLUDED.is_active,
                    updated_at = EXCLUDED.updated_at
                WHERE questionnaire_questions.section_id = EXCLUDED.section_id
                "#,
            )
            .bind(&question.name)
            .bind(question.version)
            .bind(section.id)
            .bind(question.order)
            .bind(question.question_type.as_str())
            .bind(&question.question_text)
            .bind(question.is_required)
            .bind(&question.trait_key)
            .bind(question.ws)
            .bind(&question.media_url)
            .bind(question.is_active)
            .bind(question.created_at)
            .bind(question.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
            if written.rows_affected() == 0 {
                return Err(StoreError::UniqueViolation(format!(
                    "question {} v{} already exists",
                    question.name, question.version
                )));
            }

            for option in &question.options {
                let written = sqlx::query(
                    r#"
                    INSERT INTO questionnaire_question_options
                        (name, version, question_name, question_version, sort_order, label,
                         is_correct, score, weight, wa, media_url, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    ON CONFLICT (name, version) DO UPDATE
                    SET sort_order = EXCLUDED.sort_order, label = EXCLUDED.label,
                        is_correct = EXCLUDED.is_correct, score = EXCLUDED.score,
                        weight = EXCLUDED.weight, wa = EXCLUDED.wa,
                        media_url = EXCLUDED.media_url, updated_at = EXCLUDED.updated_at
                    WHERE questionnaire_question_options.question_name = EXCLUDED.question_name
                      AND questionnaire_question_options.question_version = EXCLUDED.question_version
                    "#,
                )
                .bind(&option.name)
                .bind(option.version)
                .bind(&question.name)
                .bind(question.version)
                .bind(option.order)
                .bind(&option.label)
                .bind(option.is_correct)
                .bind(option.score)
                .bind(option.weight)
                .bind(option.wa)
                .bind(&option.media_url)
                .bind(option.created_at)
                .bind(option.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
                if written.rows_affected() == 0 {
                    return Err(StoreError::UniqueViolation(format!(
                        "option {} v{} already exists",
                        option.name, option.version
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Maps constraint failures onto the typed store errors the retry handler
/// understands.
fn db_err(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::UniqueViolation(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            return StoreError::NotFound(db.message().to_string());
        }
    }
    StoreError::Database(e)
}

fn template_from_row(row: TemplateRow, sections: Vec<Section>) -> Result<Template, StoreError> {
    Ok(Template {
        template_type: row
            .template_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", row.name)))?,
        status: row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", row.name)))?,
        name: row.name,
        version: row.version,
        title: row.title,
        description: row.description,
        time_limit_seconds: row.time_limit_seconds,
        published_at: row.published_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        is_deleted: row.is_deleted,
        row_version: row.row_version,
        sections,
    })
}

fn question_from_row(
    row: QuestionRow,
    options: Vec<QuestionOption>,
) -> Result<Question, StoreError> {
    Ok(Question {
        question_type: row
            .question_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", row.name)))?,
        name: row.name,
        version: row.version,
        order: row.sort_order,
        question_text: row.question_text,
        is_required: row.is_required,
        trait_key: row.trait_key,
        ws: row.ws,
        media_url: row.media_url,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
        options,
    })
}

fn option_from_row(row: OptionRow) -> QuestionOption {
    QuestionOption {
        name: row.name,
        version: row.version,
        order: row.sort_order,
        label: row.label,
        is_correct: row.is_correct,
        score: row.score,
        weight: row.weight,
        wa: row.wa,
        media_url: row.media_url,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
