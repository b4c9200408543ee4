use crate::export;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Clone, Copy)]
enum ExportFormat {
    Csv,
    Xlsx,
}

fn handle_export(state: &mut AppState, req: &Request, format: ExportFormat) -> serde_json::Value {
    let Some(out_path) = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.outPath", None);
    };
    let Some(role) = state.session.role.filter(|_| !state.session.students.is_empty()) else {
        return err(&req.id, "no_students", "nothing to export", None);
    };

    let students = &state.session.students;
    let written = match format {
        ExportFormat::Csv => export::write_csv(role, students, &out_path),
        ExportFormat::Xlsx => {
            let sheet_name = state
                .session
                .detected_subject
                .as_deref()
                .unwrap_or("Nhận xét");
            export::write_xlsx(role, students, sheet_name, &out_path)
        }
    };
    match written {
        Ok(row_count) => {
            info!("exported {} rows to {}", row_count, out_path.to_string_lossy());
            ok(
                &req.id,
                json!({ "path": out_path.to_string_lossy(), "rowCount": row_count }),
            )
        }
        Err(e) => err(&req.id, "export_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.csv" => Some(handle_export(state, req, ExportFormat::Csv)),
        "export.xlsx" => Some(handle_export(state, req, ExportFormat::Xlsx)),
        _ => None,
    }
}
