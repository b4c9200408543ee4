use crate::export::comments_model;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

fn handle_comments_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(role) = state.session.role else {
        return err(&req.id, "no_students", "import a roster first", None);
    };
    let title = req.params.get("title").and_then(|v| v.as_str());
    ok(
        &req.id,
        comments_model(
            role,
            state.session.detected_subject.as_deref(),
            title,
            &state.session.students,
        ),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.commentsModel" => Some(handle_comments_model(state, req)),
        _ => None,
    }
}
