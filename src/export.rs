use crate::extract::{Role, StudentRecord};
use anyhow::Context;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Clone, PartialEq)]
enum OutCell {
    Text(String),
    Number(f64),
    Empty,
}

fn headers(role: Role) -> &'static [&'static str] {
    match role {
        Role::Subject => &["STT", "Họ và tên", "Điểm", "Mức đạt", "Nhận xét"],
        Role::Homeroom => &["STT", "Họ và tên", "Học tập", "Rèn luyện", "Vắng", "Nhận xét"],
    }
}

fn opt_text(v: &Option<String>) -> OutCell {
    v.as_ref()
        .map(|s| OutCell::Text(s.clone()))
        .unwrap_or(OutCell::Empty)
}

fn row_cells(role: Role, index: usize, s: &StudentRecord) -> Vec<OutCell> {
    let mut out = vec![OutCell::Number((index + 1) as f64), OutCell::Text(s.name.clone())];
    match role {
        Role::Subject => {
            out.push(s.subject_score.map(OutCell::Number).unwrap_or(OutCell::Empty));
            out.push(opt_text(&s.subject_rating));
        }
        Role::Homeroom => {
            out.push(opt_text(&s.academic_result));
            out.push(opt_text(&s.conduct_rating));
            out.push(
                s.absences
                    .map(|n| OutCell::Number(f64::from(n)))
                    .unwrap_or(OutCell::Empty),
            );
        }
    }
    out.push(OutCell::Text(s.comment.clone()));
    out
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub fn render_csv(role: Role, students: &[StudentRecord]) -> String {
    let mut out = String::new();
    out.push_str(&headers(role).join(","));
    out.push('\n');
    for (i, s) in students.iter().enumerate() {
        let line: Vec<String> = row_cells(role, i, s)
            .into_iter()
            .map(|c| match c {
                OutCell::Text(t) => csv_quote(&t),
                OutCell::Number(n) => format_number(n),
                OutCell::Empty => String::new(),
            })
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn ensure_parent(out_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    Ok(())
}

/// Writes UTF-8 CSV with a BOM so spreadsheet apps pick the right encoding.
pub fn write_csv(role: Role, students: &[StudentRecord], out_path: &Path) -> anyhow::Result<usize> {
    ensure_parent(out_path)?;
    let mut bytes = b"\xEF\xBB\xBF".to_vec();
    bytes.extend_from_slice(render_csv(role, students).as_bytes());
    std::fs::write(out_path, bytes)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    Ok(students.len())
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c if (c as u32) < 0x20 && c != '\n' && c != '\t' && c != '\r' => {}
            c => out.push(c),
        }
    }
    out
}

fn column_name(mut idx: usize) -> String {
    let mut name = String::new();
    loop {
        name.insert(0, (b'A' + (idx % 26) as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    name
}

fn sheet_xml(role: Role, students: &[StudentRecord]) -> String {
    let mut rows: Vec<Vec<OutCell>> = vec![headers(role)
        .iter()
        .map(|h| OutCell::Text(h.to_string()))
        .collect()];
    rows.extend(
        students
            .iter()
            .enumerate()
            .map(|(i, s)| row_cells(role, i, s)),
    );

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData>",
    );
    for (r, row) in rows.iter().enumerate() {
        let row_no = r + 1;
        xml.push_str(&format!("<row r=\"{row_no}\">"));
        for (c, cell) in row.iter().enumerate() {
            let cell_ref = format!("{}{}", column_name(c), row_no);
            match cell {
                OutCell::Text(t) => xml.push_str(&format!(
                    "<c r=\"{cell_ref}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                    xml_escape(t)
                )),
                OutCell::Number(n) => {
                    xml.push_str(&format!("<c r=\"{cell_ref}\"><v>{}</v></c>", format_number(*n)))
                }
                OutCell::Empty => {}
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <sheets><sheet name=\"{}\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>",
        xml_escape(sheet_name)
    )
}

/// Writes a single-sheet workbook with inline strings.
pub fn write_xlsx(
    role: Role,
    students: &[StudentRecord],
    sheet_name: &str,
    out_path: &Path,
) -> anyhow::Result<usize> {
    ensure_parent(out_path)?;
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let sheet_name: String = sheet_name.chars().take(31).collect();
    let entries: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml(&sheet_name)),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(role, students)),
    ];
    for (name, body) in entries {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start entry {name}"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write entry {name}"))?;
    }
    zip.finish().context("failed to finalize workbook")?;
    Ok(students.len())
}

/// Print model for the front end's PDF and image renderers.
pub fn comments_model(
    role: Role,
    subject: Option<&str>,
    title: Option<&str>,
    students: &[StudentRecord],
) -> Value {
    let rows: Vec<Value> = students
        .iter()
        .enumerate()
        .map(|(i, s)| {
            json!({
                "index": i + 1,
                "id": s.id,
                "name": s.name,
                "subjectScore": s.subject_score,
                "subjectRating": s.subject_rating,
                "academicResult": s.academic_result,
                "conductRating": s.conduct_rating,
                "absences": s.absences,
                "comment": s.comment,
            })
        })
        .collect();
    let default_title = match role {
        Role::Subject => "Nhận xét môn học",
        Role::Homeroom => "Nhận xét của giáo viên chủ nhiệm",
    };
    json!({
        "title": title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or(default_title),
        "role": role.as_str(),
        "subject": subject,
        "columns": headers(role),
        "generatedAt": chrono::Local::now().to_rfc3339(),
        "rowCount": rows.len(),
        "rows": rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Cell;
    use crate::sheet::{decode, SheetKind};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn students() -> Vec<StudentRecord> {
        let mut a = StudentRecord::new("Nguyễn Văn An".into());
        a.subject_score = Some(8.5);
        a.comment = "Chăm chỉ, \"tích cực\", tiến bộ".into();
        let mut b = StudentRecord::new("Trần Thị Bình".into());
        b.subject_rating = Some("K".into());
        vec![a, b]
    }

    #[test]
    fn csv_quotes_comments_and_numbers_rows() {
        let csv = render_csv(Role::Subject, &students());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "STT,Họ và tên,Điểm,Mức đạt,Nhận xét");
        assert_eq!(
            lines[1],
            "1,Nguyễn Văn An,8.5,,\"Chăm chỉ, \"\"tích cực\"\", tiến bộ\""
        );
        assert_eq!(lines[2], "2,Trần Thị Bình,,K,");
    }

    #[test]
    fn homeroom_csv_has_three_data_columns() {
        let mut s = StudentRecord::new("Lê Văn Cường".into());
        s.academic_result = Some("T".into());
        s.conduct_rating = Some("Đ".into());
        s.absences = Some(2);
        let csv = render_csv(Role::Homeroom, &[s]);
        assert!(csv.lines().nth(1).is_some_and(|l| l == "1,Lê Văn Cường,T,Đ,2,"));
    }

    #[test]
    fn xlsx_is_readable_by_the_importer() {
        let dir = temp_dir("remarkd-export");
        let out = dir.join("nested/out.xlsx");
        let n = write_xlsx(Role::Subject, &students(), "Toán <6A>", &out).expect("write xlsx");
        assert_eq!(n, 2);

        let bytes = std::fs::read(&out).expect("read back");
        let grid = decode(&bytes, SheetKind::Xlsx).expect("decode");
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0][1], Cell::Text("Họ và tên".into()));
        assert_eq!(grid[1][2], Cell::Number(8.5));
        assert_eq!(grid[2][3], Cell::Text("K".into()));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn column_names_roll_over() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
    }

    #[test]
    fn model_uses_default_title() {
        let v = comments_model(Role::Homeroom, None, Some("  "), &[]);
        assert_eq!(v["title"], json!("Nhận xét của giáo viên chủ nhiệm"));
        assert_eq!(v["role"], json!("HOMEROOM"));
        assert_eq!(v["rowCount"], json!(0));
    }
}
