//! Typed view of a sheet row plus the defaults applied before validation.

use crate::questionnaire::import::sheet::SheetRow;
use crate::questionnaire::import::ImportRequest;

/// Sheet rows keep their cells as text so the validator can report exactly
/// which column is malformed. `None` means the cell was blank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRow {
    pub row_number: usize,
    pub scope: Option<String>,
    pub template_name: Option<String>,
    pub template_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub target_section_order: Option<String>,
    pub section_order: Option<String>,
    pub section_title: Option<String>,
    pub question_order: Option<String>,
    pub question_type: Option<String>,
    pub is_required: Option<String>,
    pub question_title: Option<String>,
    pub trait_key: Option<String>,
    pub ws: Option<String>,
    pub option_order: Option<String>,
    pub option_label: Option<String>,
    pub is_correct: Option<String>,
    pub score: Option<String>,
    pub wa: Option<String>,
}

/// Data rows start on spreadsheet row 3.
const FIRST_DATA_ROW: usize = 3;

impl ImportRow {
    pub fn from_sheet(cells: &SheetRow, index: usize) -> Self {
        let get = |key: &str| cells.get(key).cloned();
        Self {
            row_number: index + FIRST_DATA_ROW,
            scope: get("scope"),
            template_name: get("templatename"),
            template_type: get("templatetype"),
            title: get("title"),
            description: get("description"),
            target_section_order: get("targetsectionorder"),
            section_order: get("sectionorder"),
            section_title: get("sectiontitle"),
            question_order: get("questionorder"),
            question_type: get("questiontype"),
            is_required: get("isrequired"),
            question_title: get("questiontitle").or_else(|| get("prompttext")),
            trait_key: get("traitkey"),
            ws: get("ws"),
            option_order: get("optionorder"),
            option_label: get("optionlabel"),
            is_correct: get("iscorrect"),
            score: get("score"),
            wa: get("wa"),
        }
    }

    fn has_option_data(&self) -> bool {
        self.option_order.is_some()
            || self.option_label.is_some()
            || self.score.is_some()
            || self.wa.is_some()
            || self.is_correct.is_some()
    }

    fn has_question_or_option_data(&self) -> bool {
        self.question_order.is_some()
            || self.question_type.is_some()
            || self.is_required.is_some()
            || self.question_title.is_some()
            || self.trait_key.is_some()
            || self.ws.is_some()
            || self.has_option_data()
    }
}

pub fn map_rows(cells: &[SheetRow]) -> Vec<ImportRow> {
    cells
        .iter()
        .enumerate()
        .map(|(index, row)| ImportRow::from_sheet(row, index))
        .collect()
}

/// Values chosen in the upload form win over whatever the sheet says.
pub fn apply_overrides(rows: &mut [ImportRow], request: &ImportRequest) {
    let template_name = non_blank(request.template_name.as_deref());
    let template_type = non_blank(request.template_type.as_deref());
    for row in rows.iter_mut() {
        if let Some(scope) = request.scope {
            row.scope = Some(scope.as_str().to_string());
        }
        if let Some(name) = &template_name {
            row.template_name = Some(name.clone());
        }
        if let Some(template_type) = &template_type {
            row.template_type = Some(template_type.clone());
        }
        if let Some(order) = request.target_section_order {
            row.target_section_order = Some(order.to_string());
        }
    }
}

fn inherit(slot: &mut Option<String>, previous: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(previous);
    }
}

/// Blank cells repeat the previous row where the sheet layout makes the
/// intent unambiguous.
///
/// Template-level columns always carry forward. A blank `SectionOrder` is
/// inherited by rows with question or option data whose `SectionTitle` is
/// blank or repeats the previous title. Question identity carries into option
/// rows only from the second option on, so a new question that forgot its
/// `QuestionOrder` fails validation instead of merging into its predecessor.
pub fn apply_carry_forward(rows: &mut [ImportRow]) {
    for i in 1..rows.len() {
        let (head, tail) = rows.split_at_mut(i);
        let prev = &head[i - 1];
        let row = &mut tail[0];

        inherit(&mut row.scope, &prev.scope);
        inherit(&mut row.template_name, &prev.template_name);
        inherit(&mut row.template_type, &prev.template_type);
        inherit(&mut row.title, &prev.title);
        inherit(&mut row.description, &prev.description);
        inherit(&mut row.target_section_order, &prev.target_section_order);

        let continues_section = match (&row.section_title, &prev.section_title) {
            (None, _) => true,
            (Some(title), Some(prev_title)) => same_text(title, prev_title),
            (Some(_), None) => false,
        };
        if row.has_question_or_option_data() && row.section_order.is_none() && continues_section {
            row.section_order.clone_from(&prev.section_order);
        }

        let later_option = row.has_option_data()
            && parse_positive_int(row.option_order.as_deref()).is_some_and(|order| order > 1);
        if later_option {
            inherit(&mut row.section_order, &prev.section_order);
            inherit(&mut row.section_title, &prev.section_title);
            inherit(&mut row.question_order, &prev.question_order);
            inherit(&mut row.question_type, &prev.question_type);
            inherit(&mut row.is_required, &prev.is_required);
            inherit(&mut row.question_title, &prev.question_title);
            inherit(&mut row.trait_key, &prev.trait_key);
            inherit(&mut row.ws, &prev.ws);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cell parsing
// ────────────────────────────────────────────────────────────────────────────

pub fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn first_non_empty<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    values.into_iter().find_map(non_blank)
}

/// Case-insensitive comparison of trimmed text.
pub fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Accepts `"3"` as well as whole decimals such as `"3.0"`.
pub fn parse_positive_int(raw: Option<&str>) -> Option<i32> {
    let text = raw?.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = text.parse::<i64>() {
        return i32::try_from(value).ok().filter(|v| *v > 0);
    }
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() || value <= 0.0 || value.fract() != 0.0 || value > f64::from(i32::MAX) {
        return None;
    }
    Some(value as i32)
}

pub fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_bool(raw: Option<&str>) -> bool {
    parse_nullable_bool(raw) == Some(true)
}

pub fn parse_nullable_bool(raw: Option<&str>) -> Option<bool> {
    let text = raw?.trim();
    if ["true", "yes", "1"].iter().any(|t| text.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if ["false", "no", "0"].iter().any(|t| text.eq_ignore_ascii_case(t)) {
        Some(false)
    } else {
        None
    }
}
