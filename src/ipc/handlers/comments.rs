use crate::generate::{generate_comments, PromptContext};
use crate::ipc::error::{err, ok, student_not_found};
use crate::ipc::types::{AppState, Request};
use crate::provider::OpenAiCompatProvider;
use serde_json::json;

const MAX_INSTRUCTIONS_CHARS: usize = 1000;

fn optional_string(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be string", key),
                None,
            )),
        },
    }
}

fn requested_ids(state: &AppState, req: &Request) -> Result<Vec<String>, serde_json::Value> {
    let Some(raw) = req.params.get("studentIds").filter(|v| !v.is_null()) else {
        return Ok(state.session.students.iter().map(|s| s.id.clone()).collect());
    };
    let Some(arr) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", "studentIds must be an array", None));
    };
    let mut ids = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(id) = v.as_str() else {
            return Err(err(&req.id, "bad_params", "studentIds must be strings", None));
        };
        if state.session.get(id).is_none() {
            return Err(student_not_found(&req.id, id));
        }
        if !ids.iter().any(|x: &String| x == id) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

fn handle_comments_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(role) = state.session.role.filter(|_| !state.session.students.is_empty()) else {
        return err(&req.id, "no_students", "import a roster first", None);
    };
    let subject = match optional_string(req, "subject") {
        Ok(s) => s.or_else(|| state.session.detected_subject.clone()),
        Err(resp) => return resp,
    };
    let extra_instructions = match optional_string(req, "extraInstructions") {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if extra_instructions
        .as_ref()
        .is_some_and(|s| s.chars().count() > MAX_INSTRUCTIONS_CHARS)
    {
        return err(
            &req.id,
            "bad_params",
            format!("extraInstructions length must be <= {}", MAX_INSTRUCTIONS_CHARS),
            None,
        );
    }
    let ids = match requested_ids(state, req) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };
    if ids.is_empty() {
        return err(&req.id, "no_students", "no students selected", None);
    }

    let provider = match OpenAiCompatProvider::new(&state.config) {
        Ok(p) => p,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };
    let ctx = PromptContext {
        role,
        subject,
        extra_instructions,
        language: state.config.comment_language.clone(),
    };
    let report = state.runtime.block_on(generate_comments(
        &provider,
        &state.config,
        &ctx,
        &mut state.session,
        &ids,
    ));

    match &report.error {
        None => ok(
            &req.id,
            json!({ "report": report, "students": state.session.students }),
        ),
        Some(e) => err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "report": report, "students": state.session.students })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "comments.generate" => Some(handle_comments_generate(state, req)),
        _ => None,
    }
}
