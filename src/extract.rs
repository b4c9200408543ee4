use crate::keywords::{detect_subject, KeywordTable};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

/// How many leading rows (or text lines) feed subject detection.
const HEADER_ROWS: usize = 8;
/// Leading sequence numbers are small positive integers below this bound.
const MAX_ROW_INDEX: f64 = 1000.0;
const MAX_SUBJECT_SCORE: f64 = 10.0;
/// Absence counts are integers in `0..MAX_ABSENCES`.
const MAX_ABSENCES: f64 = 60.0;

/// Optional leading index, a name prefix and an optional trailing short token.
static TEXT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d{1,3})[.)]?\s+)?(.+?)(?:\s+(\d+(?:[.,]\d+)?|[\p{L}\p{N}]{1,4}))?$")
        .expect("text line pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// One score or rating per student for a single subject.
    Subject,
    /// Academic result, conduct rating and absence count per student.
    Homeroom,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "homeroom" => Some(Self::Homeroom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "SUBJECT",
            Self::Homeroom => "HOMEROOM",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Maps a decoded JSON cell onto the three cell kinds. Booleans become text.
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Blank,
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Blank),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Bool(b) => Self::Text(if *b { "TRUE" } else { "FALSE" }.into()),
            _ => Self::Blank,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.trim()).filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Blank => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(_) => false,
        }
    }

    /// Numeric value of the cell; text is coerced accepting `,` as the
    /// decimal separator.
    fn number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n).filter(|n| n.is_finite()),
            Self::Text(s) => parse_number(s),
            Self::Blank => None,
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

fn as_integer(n: f64) -> Option<u32> {
    if n.fract() == 0.0 && n >= 0.0 && n <= f64::from(u32::MAX) {
        Some(n as u32)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conduct_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absences: Option<u32>,
    pub comment: String,
    pub is_processing: bool,
}

impl StudentRecord {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name,
            subject_score: None,
            subject_rating: None,
            academic_result: None,
            conduct_rating: None,
            absences: None,
            comment: String::new(),
            is_processing: false,
        }
    }

    pub fn has_data(&self) -> bool {
        self.subject_score.is_some()
            || self.subject_rating.is_some()
            || self.academic_result.is_some()
            || self.conduct_rating.is_some()
            || self.absences.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub students: Vec<StudentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_subject: Option<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// Extracts student records from one decoded sheet.
pub fn extract_grid(rows: &[Vec<Cell>], role: Role, keywords: &KeywordTable) -> Extraction {
    let header: Vec<String> = rows
        .iter()
        .take(HEADER_ROWS)
        .flat_map(|row| row.iter().filter_map(cell_header_text))
        .collect();
    let detected_subject = detect_subject(&header.join(" ")).map(str::to_string);

    let students = rows
        .iter()
        .filter_map(|row| classify_row(row, role, keywords))
        .collect();

    Extraction {
        students,
        detected_subject,
    }
}

/// Extracts student records from pasted text, one student per line.
pub fn extract_text(text: &str, role: Role, keywords: &KeywordTable) -> Extraction {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let header = lines
        .iter()
        .take(HEADER_ROWS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let detected_subject = detect_subject(&header).map(str::to_string);

    let students = lines
        .iter()
        .filter_map(|line| classify_line(line, role, keywords))
        .collect();

    Extraction {
        students,
        detected_subject,
    }
}

fn cell_header_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn classify_row(cells: &[Cell], role: Role, keywords: &KeywordTable) -> Option<StudentRecord> {
    let has_index = cells.first().is_some_and(is_row_index);
    let (name, name_end) = name_span(cells, keywords)?;
    if !is_valid_name(&name, keywords) {
        return None;
    }

    let mut record = StudentRecord::new(name);
    let tail = &cells[name_end + 1..];
    match role {
        Role::Subject => scan_subject(tail, keywords, &mut record),
        Role::Homeroom => scan_homeroom(tail, keywords, &mut record),
    }

    if !has_index && !record.has_data() {
        return None;
    }
    Some(record)
}

fn is_row_index(cell: &Cell) -> bool {
    cell.number()
        .is_some_and(|n| n.fract() == 0.0 && (1.0..MAX_ROW_INDEX).contains(&n))
}

fn is_name_part(cell: &Cell, keywords: &KeywordTable) -> bool {
    let Some(text) = cell.text() else {
        return false;
    };
    if text.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    let lower = text.to_lowercase();
    if text.chars().count() < 2 && !keywords.is_single_letter_name(&lower) {
        return false;
    }
    !keywords.is_stopword(&lower)
}

/// Finds the first run of name-bearing cells. Returns the joined name and
/// the index of its last cell.
fn name_span(cells: &[Cell], keywords: &KeywordTable) -> Option<(String, usize)> {
    let start = match cells.first() {
        Some(c) if c.number().is_some() => 1,
        _ => 0,
    };
    let first = (start..cells.len()).find(|&i| is_name_part(&cells[i], keywords))?;

    let mut parts: Vec<&str> = Vec::new();
    let mut end = first;
    let mut i = first;
    while i < cells.len() {
        if is_name_part(&cells[i], keywords) {
            parts.push(cells[i].text().unwrap_or_default());
            end = i;
            i += 1;
        } else if cells[i].is_blank()
            && cells
                .get(i + 1)
                .is_some_and(|next| is_name_part(next, keywords))
        {
            i += 1;
        } else {
            break;
        }
    }

    let name = parts
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    Some((name, end))
}

fn is_valid_name(name: &str, keywords: &KeywordTable) -> bool {
    let len = name.chars().count();
    if len == 0 {
        return false;
    }
    if len < 2 && !keywords.is_single_letter_name(&name.to_lowercase()) {
        return false;
    }
    if keywords.is_letterhead_or_footer(&name.to_uppercase()) {
        return false;
    }
    !(name.contains('-') && !name.contains(' ') && len > 5)
}

/// Walks from the last cell back to the name; the first score in range or
/// rating code wins.
fn scan_subject(tail: &[Cell], keywords: &KeywordTable, record: &mut StudentRecord) {
    for cell in tail.iter().rev() {
        if let Some(n) = cell.number() {
            if (0.0..=MAX_SUBJECT_SCORE).contains(&n) {
                record.subject_score = Some(n);
                return;
            }
            continue;
        }
        if let Some(text) = cell.text() {
            if keywords.is_rating_code(text) {
                record.subject_rating = Some(text.to_string());
                return;
            }
        }
    }
}

/// Walks forward from the name; ratings fill academic result then conduct,
/// small integers are absences (last one wins).
fn scan_homeroom(tail: &[Cell], keywords: &KeywordTable, record: &mut StudentRecord) {
    let mut ratings: Vec<String> = Vec::new();
    for cell in tail {
        if let Some(text) = cell.text() {
            if keywords.is_rating_code(text) {
                ratings.push(text.to_string());
                continue;
            }
        }
        if let Some(n) = cell.number().filter(|n| *n < MAX_ABSENCES).and_then(as_integer) {
            record.absences = Some(n);
        }
    }
    let mut ratings = ratings.into_iter();
    record.academic_result = ratings.next();
    record.conduct_rating = ratings.next();
}

fn classify_line(line: &str, role: Role, keywords: &KeywordTable) -> Option<StudentRecord> {
    let lower = line.to_lowercase();
    if keywords.is_letterhead_or_footer(&line.to_uppercase()) || keywords.starts_with_header(&lower)
    {
        return None;
    }

    let (has_index, name, value) = if line.contains('\t') {
        split_tabbed(line, keywords)?
    } else {
        split_inline(line, keywords)?
    };

    if !is_name_part(&Cell::Text(name.clone()), keywords) || !is_valid_name(&name, keywords) {
        return None;
    }

    let mut record = StudentRecord::new(name);
    if let Some(v) = value {
        assign_single(&v, role, keywords, &mut record);
    }
    if !has_index && !record.has_data() {
        return None;
    }
    Some(record)
}

/// Tab-separated line: reuse the grid name scan, then take the last segment
/// after the name that holds a value.
fn split_tabbed(line: &str, keywords: &KeywordTable) -> Option<(bool, String, Option<String>)> {
    let cells: Vec<Cell> = line
        .split('\t')
        .map(|s| {
            let t = s.trim();
            if t.is_empty() {
                Cell::Blank
            } else {
                Cell::Text(t.to_string())
            }
        })
        .collect();
    let has_index = cells.first().is_some_and(is_row_index);
    let (name, end) = name_span(&cells, keywords)?;
    let value = cells[end + 1..]
        .iter()
        .rev()
        .filter_map(Cell::text)
        .find(|t| is_value_token(t, keywords))
        .map(str::to_string);
    Some((has_index, name, value))
}

fn split_inline(line: &str, keywords: &KeywordTable) -> Option<(bool, String, Option<String>)> {
    let caps = TEXT_LINE.captures(line)?;
    let has_index = caps
        .get(1)
        .and_then(|m| parse_number(m.as_str()))
        .is_some_and(|n| (1.0..MAX_ROW_INDEX).contains(&n));
    let prefix = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

    let (name, value) = match caps.get(3).map(|m| m.as_str()) {
        Some(suffix) if is_value_token(suffix, keywords) => {
            (prefix.to_string(), Some(suffix.to_string()))
        }
        Some(suffix) => (format!("{prefix} {suffix}"), None),
        None => (prefix.to_string(), None),
    };
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    Some((has_index, name, value))
}

fn is_value_token(s: &str, keywords: &KeywordTable) -> bool {
    parse_number(s).is_some() || keywords.is_rating_code(s)
}

fn assign_single(value: &str, role: Role, keywords: &KeywordTable, record: &mut StudentRecord) {
    let number = parse_number(value);
    match role {
        Role::Subject => {
            if let Some(n) = number.filter(|n| (0.0..=MAX_SUBJECT_SCORE).contains(n)) {
                record.subject_score = Some(n);
            } else if keywords.is_rating_code(value) {
                record.subject_rating = Some(value.trim().to_string());
            }
        }
        Role::Homeroom => {
            if keywords.is_rating_code(value) {
                record.academic_result = Some(value.trim().to_string());
            } else if let Some(n) = number.filter(|n| *n < MAX_ABSENCES).and_then(as_integer) {
                record.absences = Some(n);
            }
        }
    }
}
