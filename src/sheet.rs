use crate::extract::Cell;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;
use zip::ZipArchive;

const SHARED_STRINGS_ENTRY: &str = "xl/sharedStrings.xml";
const FIRST_SHEET_ENTRY: &str = "xl/worksheets/sheet1.xml";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a readable spreadsheet: {0}")]
    Container(String),
    #[error("malformed sheet xml: {0}")]
    Xml(String),
    #[error("file is not valid UTF-8 text")]
    Encoding,
    #[error("unsupported file type: {0}")]
    Unsupported(String),
}

impl From<zip::result::ZipError> for SheetError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Container(e.to_string())
    }
}

impl From<quick_xml::Error> for SheetError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    Xlsx,
    Csv,
    Tsv,
}

impl SheetKind {
    pub fn from_path(path: &Path) -> Result<Self, SheetError> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" => Ok(Self::Xlsx),
            "csv" => Ok(Self::Csv),
            "tsv" | "tab" => Ok(Self::Tsv),
            other => Err(SheetError::Unsupported(if other.is_empty() {
                "(no extension)".to_string()
            } else {
                other.to_string()
            })),
        }
    }
}

pub fn read_grid(path: &Path) -> Result<Vec<Vec<Cell>>, SheetError> {
    let kind = SheetKind::from_path(path)?;
    let bytes = std::fs::read(path)?;
    decode(&bytes, kind)
}

pub fn decode(bytes: &[u8], kind: SheetKind) -> Result<Vec<Vec<Cell>>, SheetError> {
    match kind {
        SheetKind::Xlsx => decode_xlsx(bytes),
        SheetKind::Csv => {
            let text = std::str::from_utf8(strip_bom(bytes)).map_err(|_| SheetError::Encoding)?;
            Ok(text.lines().map(|l| to_cells(parse_csv_record(l))).collect())
        }
        SheetKind::Tsv => {
            let text = std::str::from_utf8(strip_bom(bytes)).map_err(|_| SheetError::Encoding)?;
            Ok(text
                .lines()
                .map(|l| to_cells(l.split('\t').map(str::to_string).collect()))
                .collect())
        }
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// CSV fields stay textual; numeric typing happens in the extractor.
fn to_cells(fields: Vec<String>) -> Vec<Cell> {
    fields
        .into_iter()
        .map(|f| {
            if f.trim().is_empty() {
                Cell::Blank
            } else {
                Cell::Text(f)
            }
        })
        .collect()
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(std::mem::take(&mut buf));
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String, SheetError> {
    let mut entry = archive.by_name(name)?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| SheetError::Container(format!("{name}: {e}")))?;
    Ok(xml)
}

/// Picks `sheet1.xml`, else the lowest-numbered worksheet in the package.
fn first_sheet_name(archive: &ZipArchive<Cursor<&[u8]>>) -> Option<String> {
    let mut sheets: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n
                .strip_prefix("xl/worksheets/sheet")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    if sheets.iter().any(|(_, n)| n == FIRST_SHEET_ENTRY) {
        return Some(FIRST_SHEET_ENTRY.to_string());
    }
    sheets.sort();
    sheets.into_iter().next().map(|(_, n)| n)
}

fn decode_xlsx(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, SheetError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let shared = if archive.file_names().any(|n| n == SHARED_STRINGS_ENTRY) {
        parse_shared_strings(&read_entry(&mut archive, SHARED_STRINGS_ENTRY)?)?
    } else {
        Vec::new()
    };
    let Some(sheet_name) = first_sheet_name(&archive) else {
        return Err(SheetError::Container("workbook has no worksheet".into()));
    };
    let xml = read_entry(&mut archive, &sheet_name)?;
    parse_worksheet(&xml, &shared)
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, SheetError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SheetError::Xml(err.to_string()))?;
        if attr.key.local_name().as_ref() == key {
            let v = attr
                .unescape_value()
                .map_err(|err| SheetError::Xml(err.to_string()))?;
            return Ok(Some(v.into_owned()));
        }
    }
    Ok(None)
}

/// Appends the text of a text or entity-reference event to `buf`.
fn push_text(event: &Event<'_>, buf: &mut String) -> Result<(), SheetError> {
    match event {
        Event::Text(t) => {
            let s = t.decode().map_err(|err| SheetError::Xml(err.to_string()))?;
            buf.push_str(&s);
        }
        Event::CData(t) => {
            let s = t.decode().map_err(|err| SheetError::Xml(err.to_string()))?;
            buf.push_str(&s);
        }
        Event::GeneralRef(r) => {
            if let Some(ch) = r
                .resolve_char_ref()
                .map_err(|err| SheetError::Xml(err.to_string()))?
            {
                buf.push(ch);
            } else {
                let name = r.decode().map_err(|err| SheetError::Xml(err.to_string()))?;
                if let Some(v) = quick_xml::escape::resolve_xml_entity(&name) {
                    buf.push_str(v);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// One string per `<si>`; rich-text runs are concatenated.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, SheetError> {
    let mut reader = Reader::from_str(xml);
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the text and must be skipped.
    let mut in_phonetic = false;
    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" => in_t = in_si && !in_phonetic,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = false;
                    out.push(std::mem::take(&mut current));
                }
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            other if in_t => push_text(other, &mut current)?,
            _ => {}
        }
    }
    Ok(out)
}

/// Highest zero-based column a worksheet may use (`XFD`).
const MAX_COLUMN: usize = 16_383;

/// Zero-based column index from a cell reference such as `AB12`. References
/// past `XFD` are rejected rather than allocated.
fn column_index(cell_ref: &str) -> Result<Option<usize>, SheetError> {
    let letters: Vec<char> = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return Ok(None);
    }
    let out_of_range = || SheetError::Xml(format!("cell reference out of range: {cell_ref}"));
    if letters.len() > 3 {
        return Err(out_of_range());
    }
    let mut col = 0usize;
    for ch in letters {
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(digit))
            .ok_or_else(out_of_range)?;
    }
    if col - 1 > MAX_COLUMN {
        return Err(out_of_range());
    }
    Ok(Some(col - 1))
}

#[derive(Default)]
struct PendingCell {
    col: usize,
    kind: Option<String>,
    value: String,
}

impl PendingCell {
    fn resolve(self, shared: &[String]) -> Cell {
        let v = self.value;
        match self.kind.as_deref() {
            Some("s") => v
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i))
                .map(|s| text_cell(s))
                .unwrap_or(Cell::Blank),
            Some("inlineStr") | Some("str") => text_cell(&v),
            Some("b") => Cell::Text(if v.trim() == "1" { "TRUE" } else { "FALSE" }.into()),
            Some("e") => Cell::Blank,
            _ => match v.trim().parse::<f64>() {
                Ok(n) => Cell::Number(n),
                Err(_) => text_cell(&v),
            },
        }
    }
}

fn text_cell(s: &str) -> Cell {
    if s.trim().is_empty() {
        Cell::Blank
    } else {
        Cell::Text(s.to_string())
    }
}

fn parse_worksheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<Cell>>, SheetError> {
    let mut reader = Reader::from_str(xml);
    let mut rows: BTreeMap<usize, Vec<Cell>> = BTreeMap::new();
    let mut row_no = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut capture = false;

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"row" => {
                        row_no = attr_value(e, b"r")?
                            .and_then(|r| r.parse::<usize>().ok())
                            .unwrap_or(row_no + 1);
                        next_col = 0;
                        rows.entry(row_no).or_default();
                    }
                    b"c" => {
                        let col = match attr_value(e, b"r")? {
                            Some(r) => column_index(&r)?.unwrap_or(next_col),
                            None => next_col,
                        };
                        if col > MAX_COLUMN {
                            return Err(SheetError::Xml("too many columns in row".into()));
                        }
                        next_col = col + 1;
                        let pending = PendingCell {
                            col,
                            kind: attr_value(e, b"t")?,
                            value: String::new(),
                        };
                        if is_empty {
                            place(&mut rows, row_no, pending.col, Cell::Blank);
                        } else {
                            cell = Some(pending);
                        }
                    }
                    b"v" | b"t" if !is_empty => capture = cell.is_some(),
                    _ => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(done) = cell.take() {
                        let col = done.col;
                        let resolved = done.resolve(shared);
                        place(&mut rows, row_no, col, resolved);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            other if capture => {
                if let Some(pending) = cell.as_mut() {
                    push_text(other, &mut pending.value)?;
                }
            }
            _ => {}
        }
    }

    Ok(rows.into_values().collect())
}

fn place(rows: &mut BTreeMap<usize, Vec<Cell>>, row_no: usize, col: usize, value: Cell) {
    let row = rows.entry(row_no).or_default();
    if row.len() <= col {
        row.resize(col + 1, Cell::Blank);
    }
    row[col] = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn xlsx_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            for (name, body) in entries {
                zip.start_file(*name, FileOptions::default())
                    .expect("start entry");
                zip.write_all(body.as_bytes()).expect("write entry");
            }
            zip.finish().expect("finish zip");
        }
        buf.into_inner()
    }

    const SHARED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="4" uniqueCount="4">
<si><t>BẢNG ĐIỂM MÔN TOÁN</t></si>
<si><t>Nguyễn Văn An</t></si>
<si><r><t>Trần Thị </t></r><r><t>Bình</t></r></si>
<si><t>Đ &amp; K</t></si>
</sst>"#;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="B1" t="s"><v>0</v></c></row>
<row r="3"><c r="A3"><v>1</v></c><c r="B3" t="s"><v>1</v></c><c r="D3"><v>8.5</v></c></row>
<row r="4"><c r="A4"><v>2</v></c><c r="B4" t="s"><v>2</v></c><c r="C4" t="inlineStr"><is><t>K</t></is></c><c r="D4" t="s"><v>3</v></c></row>
</sheetData></worksheet>"#;

    #[test]
    fn xlsx_cells_land_in_their_columns() {
        let bytes = xlsx_bytes(&[(SHARED_STRINGS_ENTRY, SHARED), (FIRST_SHEET_ENTRY, SHEET)]);
        let grid = decode(&bytes, SheetKind::Xlsx).expect("decode xlsx");
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0], vec![Cell::Blank, Cell::Text("BẢNG ĐIỂM MÔN TOÁN".into())]);
        assert_eq!(grid[1][0], Cell::Number(1.0));
        assert_eq!(grid[1][1], Cell::Text("Nguyễn Văn An".into()));
        assert_eq!(grid[1][2], Cell::Blank);
        assert_eq!(grid[1][3], Cell::Number(8.5));
        assert_eq!(grid[2][1], Cell::Text("Trần Thị Bình".into()));
        assert_eq!(grid[2][2], Cell::Text("K".into()));
        assert_eq!(grid[2][3], Cell::Text("Đ & K".into()));
    }

    #[test]
    fn xlsx_falls_back_to_lowest_numbered_sheet() {
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>x</t></is></c></row></sheetData></worksheet>"#;
        let bytes = xlsx_bytes(&[
            ("xl/worksheets/sheet7.xml", "<worksheet/>"),
            ("xl/worksheets/sheet2.xml", sheet),
        ]);
        let grid = decode(&bytes, SheetKind::Xlsx).expect("decode xlsx");
        assert_eq!(grid, vec![vec![Cell::Text("x".into())]]);
    }

    #[test]
    fn garbage_bytes_are_a_container_error() {
        let err = decode(b"definitely not a zip", SheetKind::Xlsx).expect_err("should fail");
        assert!(matches!(err, SheetError::Container(_)));
    }

    #[test]
    fn zip_without_worksheet_is_a_container_error() {
        let bytes = xlsx_bytes(&[("docProps/app.xml", "<Properties/>")]);
        let err = decode(&bytes, SheetKind::Xlsx).expect_err("should fail");
        assert!(matches!(err, SheetError::Container(_)));
    }

    #[test]
    fn csv_handles_quotes_and_bom() {
        let data = "\u{feff}STT,Họ và tên,Điểm\n1,\"Nguyễn, Văn An\",\"8,5\"\n";
        let grid = decode(data.as_bytes(), SheetKind::Csv).expect("decode csv");
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[0][0], Cell::Text("STT".into()));
        assert_eq!(grid[1][1], Cell::Text("Nguyễn, Văn An".into()));
        assert_eq!(grid[1][2], Cell::Text("8,5".into()));
    }

    #[test]
    fn csv_rejects_non_utf8() {
        let err = decode(&[0xff, 0xfe, 0x00, 0x41], SheetKind::Csv).expect_err("should fail");
        assert!(matches!(err, SheetError::Encoding));
    }

    #[test]
    fn kind_follows_extension() {
        assert_eq!(SheetKind::from_path(Path::new("a.XLSX")).ok(), Some(SheetKind::Xlsx));
        assert_eq!(SheetKind::from_path(Path::new("a.tsv")).ok(), Some(SheetKind::Tsv));
        assert!(matches!(
            SheetKind::from_path(Path::new("a.doc")),
            Err(SheetError::Unsupported(_))
        ));
    }

    #[test]
    fn column_index_reads_letters() {
        assert_eq!(column_index("A1").ok().flatten(), Some(0));
        assert_eq!(column_index("Z9").ok().flatten(), Some(25));
        assert_eq!(column_index("AB12").ok().flatten(), Some(27));
        assert_eq!(column_index("XFD1").ok().flatten(), Some(MAX_COLUMN));
        assert_eq!(column_index("12").ok().flatten(), None);
    }

    #[test]
    fn oversized_cell_references_are_xml_errors() {
        assert!(matches!(column_index("XFE1"), Err(SheetError::Xml(_))));
        assert!(matches!(column_index("ZZZZ1"), Err(SheetError::Xml(_))));
        let xml = r#"<worksheet><sheetData><row r="1"><c r="ZZZZZZZZZZ1"><v>1</v></c></row></sheetData></worksheet>"#;
        assert!(matches!(parse_worksheet(xml, &[]), Err(SheetError::Xml(_))));
        let bytes = xlsx_bytes(&[(FIRST_SHEET_ENTRY, xml)]);
        assert!(matches!(decode(&bytes, SheetKind::Xlsx), Err(SheetError::Xml(_))));
    }
}
