use serde_json::{json, Value};

pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message.into() });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({ "id": id, "ok": false, "error": error })
}

/// `not_found` for a student id missing from the working set.
pub fn student_not_found(id: &str, student_id: &str) -> Value {
    err(
        id,
        "not_found",
        "student not found",
        Some(json!({ "studentId": student_id })),
    )
}

/// `read_failed` carrying the offending path.
pub fn read_failed(id: &str, path: &std::path::Path, cause: impl std::fmt::Display) -> Value {
    err(
        id,
        "read_failed",
        format!("could not read file: {cause}"),
        Some(json!({ "path": path.to_string_lossy() })),
    )
}
