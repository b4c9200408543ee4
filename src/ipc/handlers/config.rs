use super::core::CONFIG_KEY;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::keywords::subject_labels;
use serde_json::json;

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let subjects: Vec<&str> = subject_labels().collect();
    ok(
        &req.id,
        json!({ "config": state.config.masked_json(), "subjects": subjects }),
    )
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing params.patch", None);
    };
    let mut next = state.config.clone();
    if let Err(message) = next.merge_patch(patch) {
        return err(&req.id, "bad_params", message, None);
    }
    if let Some(conn) = state.db.as_ref() {
        let value = match serde_json::to_value(&next) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
        };
        if let Err(e) = db::settings_set_json(conn, CONFIG_KEY, &value) {
            return err(&req.id, "db_write_failed", format!("{e:?}"), None);
        }
    }
    state.config = next;
    ok(&req.id, json!({ "config": state.config.masked_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
