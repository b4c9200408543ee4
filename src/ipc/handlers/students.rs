use crate::ipc::error::{err, ok, student_not_found};
use crate::ipc::types::{AppState, Request};
use crate::session::apply_patch;
use serde_json::json;

fn student_id(req: &Request) -> Result<&str, serde_json::Value> {
    req.params
        .get("studentId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", "missing params.studentId", None))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "role": state.session.role,
            "detectedSubject": state.session.detected_subject,
            "students": state.session.students,
        }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match student_id(req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing params.patch", None);
    };
    let Some(record) = state.session.get_mut(id) else {
        return student_not_found(&req.id, id);
    };
    match apply_patch(record, patch) {
        Ok(()) => ok(&req.id, json!({ "student": record })),
        Err(message) => err(&req.id, "bad_params", message, None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match student_id(req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if !state.session.remove(id) {
        return student_not_found(&req.id, id);
    }
    ok(&req.id, json!({ "deleted": id }))
}

fn handle_students_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cleared = state.session.clear();
    ok(&req.id, json!({ "cleared": cleared }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.clear" => Some(handle_students_clear(state, req)),
        _ => None,
    }
}
