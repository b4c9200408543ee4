mod test_support;

use serde_json::json;
use test_support::{spawn_sidecar, temp_dir};

#[test]
fn export_without_students_is_rejected() {
    let dir = temp_dir("remarkd-export-empty");
    let mut sidecar = spawn_sidecar();
    let code = sidecar.request_err(
        "1",
        "export.csv",
        json!({ "outPath": dir.join("out.csv").to_string_lossy() }),
    );
    assert_eq!(code, "no_students");
    let code = sidecar.request_err("2", "export.xlsx", json!({}));
    assert_eq!(code, "bad_params");
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn homeroom_csv_and_xlsx_exports() {
    let dir = temp_dir("remarkd-export-homeroom");
    let mut sidecar = spawn_sidecar();
    let imported = sidecar.request_ok(
        "1",
        "roster.importGrid",
        json!({ "role": "HOMEROOM", "rows": [["3", "Lê Văn Cường", "T", "Đ", "2"]] }),
    );
    let id = imported["students"][0]["id"].as_str().expect("id").to_string();
    sidecar.request_ok(
        "2",
        "students.update",
        json!({ "studentId": id, "patch": { "comment": "Ngoan, lễ phép" } }),
    );

    let csv_path = dir.join("out/homeroom.csv");
    let out = sidecar.request_ok(
        "3",
        "export.csv",
        json!({ "outPath": csv_path.to_string_lossy() }),
    );
    assert_eq!(out["rowCount"], json!(1));
    let text = std::fs::read_to_string(&csv_path).expect("read csv");
    let text = text.trim_start_matches('\u{feff}');
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "STT,Họ và tên,Học tập,Rèn luyện,Vắng,Nhận xét");
    assert_eq!(lines[1], "1,Lê Văn Cường,T,Đ,2,\"Ngoan, lễ phép\"");

    let xlsx_path = dir.join("homeroom.xlsx");
    sidecar.request_ok(
        "4",
        "export.xlsx",
        json!({ "outPath": xlsx_path.to_string_lossy() }),
    );
    let reimported = sidecar.request_ok(
        "5",
        "roster.importFile",
        json!({ "role": "HOMEROOM", "path": xlsx_path.to_string_lossy() }),
    );
    let s = &reimported["students"][0];
    assert_eq!(s["name"], json!("Lê Văn Cường"));
    assert_eq!(s["academicResult"], json!("T"));
    assert_eq!(s["conductRating"], json!("Đ"));
    assert_eq!(s["absences"], json!(2));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn comments_model_lists_rows_in_order() {
    let mut sidecar = spawn_sidecar();
    sidecar.request_ok(
        "1",
        "roster.importGrid",
        json!({
            "role": "SUBJECT",
            "rows": [["BẢNG ĐIỂM MÔN Toán"], ["1", "Nguyễn Văn An", "8.5"], ["2", "Trần Thị Bình", "K"]]
        }),
    );
    let model = sidecar.request_ok(
        "2",
        "reports.commentsModel",
        json!({ "title": "Lớp 6A" }),
    );
    assert_eq!(model["title"], json!("Lớp 6A"));
    assert_eq!(model["subject"], json!("Toán"));
    assert_eq!(model["rowCount"], json!(2));
    assert_eq!(model["rows"][1]["index"], json!(2));
    assert_eq!(model["rows"][1]["subjectRating"], json!("K"));
    assert!(model["generatedAt"].as_str().is_some());
}

#[test]
fn config_persists_in_the_workspace() {
    let workspace = temp_dir("remarkd-config-persist");
    {
        let mut sidecar = spawn_sidecar();
        sidecar.request_ok("1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
        sidecar.request_ok(
            "2",
            "config.update",
            json!({ "patch": { "batchSize": 4, "extraStopwords": ["dân tộc"] } }),
        );
    }
    let mut sidecar = spawn_sidecar();
    sidecar.request_ok("1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let cfg = sidecar.request_ok("2", "config.get", json!({}));
    assert_eq!(cfg["config"]["batchSize"], json!(4));
    assert_eq!(cfg["config"]["extraStopwords"], json!(["dân tộc"]));
    let _ = std::fs::remove_dir_all(workspace);
}
