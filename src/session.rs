use crate::extract::{Extraction, Role, StudentRecord};
use crate::params::{parse_nullable_string, parse_string_max};
use serde_json::{Map, Value};

const MAX_NAME_CHARS: usize = 120;
const MAX_COMMENT_CHARS: usize = 2000;
const MAX_CODE_CHARS: usize = 16;

/// The in-memory working set: the last imported batch and its role.
#[derive(Debug, Default)]
pub struct Session {
    pub role: Option<Role>,
    pub detected_subject: Option<String>,
    pub students: Vec<StudentRecord>,
}

impl Session {
    /// Replaces the working set with a fresh batch. Imports never merge.
    pub fn replace(&mut self, role: Role, extraction: Extraction) {
        self.role = Some(role);
        self.detected_subject = extraction.detected_subject;
        self.students = extraction.students;
    }

    pub fn get(&self, id: &str) -> Option<&StudentRecord> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut StudentRecord> {
        self.students.iter_mut().find(|s| s.id == id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.students.len();
        self.students.retain(|s| s.id != id);
        self.students.len() != before
    }

    pub fn clear(&mut self) -> usize {
        let n = self.students.len();
        self.students.clear();
        self.detected_subject = None;
        n
    }

    pub fn set_processing(&mut self, ids: &[String], value: bool) {
        for s in self.students.iter_mut() {
            if ids.iter().any(|id| *id == s.id) {
                s.is_processing = value;
            }
        }
    }
}

/// Applies a user edit. Setting a subject score clears the rating and the
/// other way round, so a record never carries both.
pub fn apply_patch(record: &mut StudentRecord, patch: &Map<String, Value>) -> Result<(), String> {
    let mut next = record.clone();
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let s = parse_string_max(v, k, MAX_NAME_CHARS)?;
                if s.is_empty() {
                    return Err("name must not be empty".into());
                }
                next.name = s;
            }
            "comment" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| "comment must be string".to_string())?;
                if s.chars().count() > MAX_COMMENT_CHARS {
                    return Err(format!("comment length must be <= {}", MAX_COMMENT_CHARS));
                }
                next.comment = s.to_string();
            }
            "subjectScore" => {
                if v.is_null() {
                    next.subject_score = None;
                } else {
                    let n = v
                        .as_f64()
                        .ok_or_else(|| "subjectScore must be a number".to_string())?;
                    if !(0.0..=10.0).contains(&n) {
                        return Err("subjectScore must be in 0..=10".into());
                    }
                    next.subject_score = Some(n);
                    next.subject_rating = None;
                }
            }
            "subjectRating" => {
                next.subject_rating = parse_nullable_string(v, k, MAX_CODE_CHARS)?;
                if next.subject_rating.is_some() {
                    next.subject_score = None;
                }
            }
            "academicResult" => {
                next.academic_result = parse_nullable_string(v, k, MAX_CODE_CHARS)?;
            }
            "conductRating" => {
                next.conduct_rating = parse_nullable_string(v, k, MAX_CODE_CHARS)?;
            }
            "absences" => {
                next.absences = if v.is_null() {
                    None
                } else {
                    let n = v
                        .as_u64()
                        .ok_or_else(|| "absences must be a non-negative integer".to_string())?;
                    Some(u32::try_from(n).map_err(|_| "absences out of range".to_string())?)
                };
            }
            _ => return Err(format!("unknown student field: {}", k)),
        }
    }
    *record = next;
    Ok(())
}
