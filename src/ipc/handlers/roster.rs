use crate::extract::{extract_grid, extract_text, Cell, Extraction, Role};
use crate::generate::transcribe_roster;
use crate::ipc::error::{err, ok, read_failed};
use crate::ipc::types::{AppState, Request};
use crate::keywords::KeywordTable;
use crate::provider::{mime_for_path, OpenAiCompatProvider};
use crate::sheet;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// Largest scan accepted by `roster.importImage`.
const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

fn parse_role(req: &Request) -> Result<Role, serde_json::Value> {
    let Some(raw) = req.params.get("role").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing params.role", None));
    };
    Role::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "role must be SUBJECT or HOMEROOM",
            Some(json!({ "role": raw })),
        )
    })
}

fn param_path(req: &Request) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", "missing params.path", None))
}

fn keywords(state: &AppState) -> KeywordTable {
    KeywordTable::vietnamese().with_extra_stopwords(state.config.extra_stopwords.iter().cloned())
}

/// An empty result leaves the current working set alone.
fn finish_import(
    state: &mut AppState,
    req: &Request,
    role: Role,
    extraction: Extraction,
) -> serde_json::Value {
    if extraction.is_empty() {
        info!("import produced no students; keeping current list");
        return ok(
            &req.id,
            json!({ "students": [], "detectedSubject": null, "empty": true }),
        );
    }
    info!(
        "imported {} students ({})",
        extraction.students.len(),
        role.as_str()
    );
    state.session.replace(role, extraction);
    ok(
        &req.id,
        json!({
            "students": state.session.students,
            "detectedSubject": state.session.detected_subject,
            "empty": false,
        }),
    )
}

fn handle_import_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let role = match parse_role(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.rows", None);
    };
    let mut grid: Vec<Vec<Cell>> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let Some(cells) = row.as_array() else {
            return err(
                &req.id,
                "bad_params",
                "rows must be arrays",
                Some(json!({ "row": i })),
            );
        };
        grid.push(cells.iter().map(Cell::from_json).collect());
    }
    let extraction = extract_grid(&grid, role, &keywords(state));
    finish_import(state, req, role, extraction)
}

fn handle_import_text(state: &mut AppState, req: &Request) -> serde_json::Value {
    let role = match parse_role(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.text", None);
    };
    let extraction = extract_text(text, role, &keywords(state));
    finish_import(state, req, role, extraction)
}

fn is_plain_text(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
}

fn handle_import_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let role = match parse_role(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let path = match param_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let table = keywords(state);

    let extraction = if is_plain_text(&path) {
        match std::fs::read_to_string(&path) {
            Ok(text) => extract_text(&text, role, &table),
            Err(e) => return read_failed(&req.id, &path, e),
        }
    } else {
        match sheet::read_grid(&path) {
            Ok(grid) => extract_grid(&grid, role, &table),
            Err(e) => return read_failed(&req.id, &path, e),
        }
    };
    finish_import(state, req, role, extraction)
}

fn handle_import_image(state: &mut AppState, req: &Request) -> serde_json::Value {
    let role = match parse_role(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let path = match param_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let mime = match req.params.get("mime").and_then(|v| v.as_str()) {
        Some(m) => m.to_string(),
        None => match mime_for_path(&path) {
            Some(m) => m.to_string(),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "cannot infer mime type; pass params.mime",
                    None,
                )
            }
        },
    };

    match std::fs::metadata(&path) {
        Ok(meta) if meta.len() > MAX_IMAGE_BYTES => {
            return err(
                &req.id,
                "bad_params",
                format!("file exceeds {} bytes", MAX_IMAGE_BYTES),
                None,
            )
        }
        Ok(_) => {}
        Err(e) => return read_failed(&req.id, &path, e),
    }
    let data = match std::fs::read(&path) {
        Ok(d) => d,
        Err(e) => return read_failed(&req.id, &path, e),
    };

    let provider = match OpenAiCompatProvider::new(&state.config) {
        Ok(p) => p,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };
    let transcript = state.runtime.block_on(transcribe_roster(
        &provider,
        &state.config,
        &data,
        &mime,
        role,
    ));
    let text = match transcript {
        Ok(t) => t,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };
    let extraction = extract_text(&text, role, &keywords(state));
    finish_import(state, req, role, extraction)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.importGrid" => Some(handle_import_grid(state, req)),
        "roster.importText" => Some(handle_import_text(state, req)),
        "roster.importFile" => Some(handle_import_file(state, req)),
        "roster.importImage" => Some(handle_import_image(state, req)),
        _ => None,
    }
}
