use crate::config::AppConfig;
use crate::extract::{Role, StudentRecord};
use crate::retry::retry_with_backoff;
use crate::session::Session;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum GenerateError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("service busy: {0}")]
    Transient(String),
    #[error("request rejected: {0}")]
    Fatal(String),
    #[error("unreadable model response: {0}")]
    BadResponse(String),
}

impl GenerateError {
    /// Rate limits, overloads and garbled answers are worth another try.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::BadResponse(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "missing_api_key",
            _ => "generation_failed",
        }
    }
}

/// The external generative API. One call per student group.
#[async_trait]
pub trait CommentProvider: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String, GenerateError>;

    async fn transcribe(
        &self,
        data: &[u8],
        mime: &str,
        prompt: &str,
        model: &str,
    ) -> Result<String, GenerateError>;
}

#[derive(Debug, Clone)]
pub struct PromptContext {
    pub role: Role,
    pub subject: Option<String>,
    pub extra_instructions: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub requested: usize,
    pub updated: usize,
    pub groups: usize,
    pub groups_completed: usize,
    #[serde(skip)]
    pub error: Option<GenerateError>,
}

fn student_payload(s: &StudentRecord) -> Value {
    let mut v = json!({ "id": s.id, "name": s.name });
    if let Some(n) = s.subject_score {
        v["subjectScore"] = json!(n);
    }
    if let Some(r) = &s.subject_rating {
        v["subjectRating"] = json!(r);
    }
    if let Some(r) = &s.academic_result {
        v["academicResult"] = json!(r);
    }
    if let Some(r) = &s.conduct_rating {
        v["conductRating"] = json!(r);
    }
    if let Some(n) = s.absences {
        v["absences"] = json!(n);
    }
    v
}

pub fn build_prompt(ctx: &PromptContext, students: &[&StudentRecord]) -> String {
    let mut out = String::new();
    match ctx.role {
        Role::Subject => {
            let subject = ctx.subject.as_deref().unwrap_or("the subject");
            out.push_str(&format!(
                "You are a subject teacher of {subject} writing end-of-term remarks.\n"
            ));
            out.push_str(
                "Each student has either subjectScore (0-10) or subjectRating \
                 (T = Tốt, K = Khá, Đ = Đạt, CĐ = Chưa đạt).\n",
            );
        }
        Role::Homeroom => {
            out.push_str("You are a homeroom teacher writing end-of-term remarks.\n");
            out.push_str(
                "Each student may have academicResult and conductRating \
                 (T = Tốt, K = Khá, Đ = Đạt, CĐ = Chưa đạt) and absences (days absent).\n",
            );
        }
    }
    out.push_str(&format!(
        "Write one short, encouraging comment (1-2 sentences) per student in {}. \
         Match the tone to the student's results and do not repeat the raw numbers.\n",
        ctx.language
    ));
    if let Some(extra) = ctx
        .extra_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        out.push_str(extra);
        out.push('\n');
    }
    out.push_str(
        "Answer with JSON only: an array of objects {\"id\": string, \"comment\": string}, \
         one per student, using the ids given.\n",
    );
    let payload: Vec<Value> = students.iter().map(|s| student_payload(s)).collect();
    out.push_str("Students:\n");
    out.push_str(&serde_json::to_string(&payload).unwrap_or_else(|_| "[]".to_string()));
    out
}

pub fn transcription_prompt(role: Role) -> String {
    let columns = match role {
        Role::Subject => "row number, full name, score or rating",
        Role::Homeroom => "row number, full name, academic result, conduct rating, absences",
    };
    format!(
        "This image is a class roster. Transcribe every student row as plain text, \
         one student per line, columns separated by a tab: {columns}. \
         Keep names exactly as written, including Vietnamese diacritics. \
         Include the title line if there is one. Output the text only."
    )
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().trim_end_matches("```").trim()
}

/// Reads the model answer: an array of `{id, comment}` or an object mapping
/// id to comment.
pub fn parse_comments(text: &str) -> Result<HashMap<String, String>, GenerateError> {
    let body = strip_code_fence(text);
    let start = body
        .find(&['[', '{'][..])
        .ok_or_else(|| GenerateError::BadResponse("no JSON in answer".into()))?;
    let value: Value = serde_json::from_str(&body[start..])
        .map_err(|e| GenerateError::BadResponse(e.to_string()))?;

    let mut out = HashMap::new();
    match value {
        Value::Array(items) => {
            for item in items {
                let id = item.get("id").and_then(|v| v.as_str());
                let comment = item.get("comment").and_then(|v| v.as_str());
                if let (Some(id), Some(comment)) = (id, comment) {
                    out.insert(id.to_string(), comment.trim().to_string());
                }
            }
        }
        Value::Object(map) => {
            for (id, v) in map {
                if let Some(comment) = v.as_str() {
                    out.insert(id, comment.trim().to_string());
                }
            }
        }
        _ => return Err(GenerateError::BadResponse("answer is not a list".into())),
    }
    Ok(out)
}

/// Generates comments for `ids` group by group. Comments already written stay
/// when a later group fails; every record touched ends with
/// `is_processing == false`.
pub async fn generate_comments(
    provider: &dyn CommentProvider,
    config: &AppConfig,
    ctx: &PromptContext,
    session: &mut Session,
    ids: &[String],
) -> BatchReport {
    let batch_size = config.batch_size.max(1);
    let mut report = BatchReport {
        requested: ids.len(),
        groups: ids.len().div_ceil(batch_size),
        ..BatchReport::default()
    };
    if config.api_key().is_none() {
        report.error = Some(GenerateError::MissingApiKey);
        return report;
    }

    session.set_processing(ids, true);
    let delays = config.retry_delays();

    for (gi, group) in ids.chunks(batch_size).enumerate() {
        if gi > 0 && !config.batch_delay().is_zero() {
            tokio::time::sleep(config.batch_delay()).await;
        }

        let prompt = {
            let students: Vec<&StudentRecord> =
                group.iter().filter_map(|id| session.get(id)).collect();
            build_prompt(ctx, &students)
        };

        info!(
            "generating group {}/{} ({} students, model {})",
            gi + 1,
            report.groups,
            group.len(),
            config.active_model
        );
        let result = retry_with_backoff(
            || async {
                let text = provider.complete(&prompt, &config.active_model).await?;
                parse_comments(&text)
            },
            &delays,
            GenerateError::is_transient,
        )
        .await;

        match result {
            Ok(comments) => {
                for id in group {
                    if let (Some(rec), Some(comment)) = (session.get_mut(id), comments.get(id)) {
                        rec.comment = comment.clone();
                        report.updated += 1;
                    }
                }
                session.set_processing(group, false);
                report.groups_completed += 1;
            }
            Err(e) => {
                warn!("generation aborted at group {}: {e}", gi + 1);
                let remaining = &ids[gi * batch_size..];
                session.set_processing(remaining, false);
                report.error = Some(e);
                return report;
            }
        }
    }

    report
}

/// Sends a roster image or PDF to the provider and returns its transcript.
pub async fn transcribe_roster(
    provider: &dyn CommentProvider,
    config: &AppConfig,
    data: &[u8],
    mime: &str,
    role: Role,
) -> Result<String, GenerateError> {
    if config.api_key().is_none() {
        return Err(GenerateError::MissingApiKey);
    }
    let prompt = transcription_prompt(role);
    retry_with_backoff(
        || provider.transcribe(data, mime, &prompt, &config.active_model),
        &config.retry_delays(),
        GenerateError::is_transient,
    )
    .await
}
