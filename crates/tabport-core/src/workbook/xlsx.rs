//! Office Open XML (`.xlsx`) encoding for [`Workbook`].
//!
//! The writer emits a minimal package (content types, relationships, workbook
//! and one worksheet part per sheet) using inline strings, so no shared
//! string table is required.  The reader accepts both inline and shared
//! strings so templates saved by spreadsheet applications load as well.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{CellValue, Sheet, Workbook, WorkbookError};

/// MIME type of an `.xlsx` package.
pub const CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PKG_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

// ── Writer ────────────────────────────────────────────────────────────────────

/// Serialize `workbook` into `.xlsx` bytes.
pub fn write(workbook: &Workbook) -> Result<Vec<u8>, WorkbookError> {
    let fallback;
    let sheets: &[Sheet] = if workbook.sheets().is_empty() {
        fallback = [Sheet::new("Sheet1")];
        &fallback
    } else {
        workbook.sheets()
    };

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(content_types_xml(sheets.len()).as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(root_rels_xml().as_bytes())?;

    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(workbook_xml(sheets).as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(workbook_rels_xml(sheets.len()).as_bytes())?;

    for (i, sheet) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
        zip.write_all(sheet_xml(sheet).as_bytes())?;
    }

    Ok(zip.finish()?.into_inner())
}

fn content_types_xml(sheet_count: usize) -> String {
    let mut xml = String::from(XML_DECL);
    xml.push_str(
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    );
    xml.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
    xml.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    xml.push_str(r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#);
    for i in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{i}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn root_rels_xml() -> String {
    format!(
        r#"{XML_DECL}<Relationships xmlns="{NS_PKG_REL}"><Relationship Id="rId1" Type="{NS_REL}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
    )
}

fn workbook_xml(sheets: &[Sheet]) -> String {
    let mut xml = format!(
        r#"{XML_DECL}<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_REL}"><sheets>"#
    );
    for (i, sheet) in sheets.iter().enumerate() {
        let n = i + 1;
        xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
            escape(sheet.name())
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut xml = format!(r#"{XML_DECL}<Relationships xmlns="{NS_PKG_REL}">"#);
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="{NS_REL}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

fn sheet_xml(sheet: &Sheet) -> String {
    let mut xml = format!(r#"{XML_DECL}<worksheet xmlns="{NS_MAIN}"><sheetData>"#);
    for (row_idx, row) in sheet.rows() {
        let r = row_idx + 1;
        xml.push_str(&format!(r#"<row r="{r}">"#));
        for (col, value) in row.cells() {
            let reference = format!("{}{r}", column_name(col));
            push_cell(&mut xml, &reference, value);
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn push_cell(xml: &mut String, reference: &str, value: &CellValue) {
    match value {
        CellValue::Blank => xml.push_str(&format!(r#"<c r="{reference}"/>"#)),
        CellValue::Number(n) if n.is_finite() => {
            xml.push_str(&format!(r#"<c r="{reference}"><v>{n}</v></c>"#))
        }
        CellValue::Number(n) => push_inline_str(xml, reference, &n.to_string()),
        CellValue::Bool(b) => xml.push_str(&format!(
            r#"<c r="{reference}" t="b"><v>{}</v></c>"#,
            u8::from(*b)
        )),
        CellValue::Text(s) => push_inline_str(xml, reference, s),
    }
}

fn push_inline_str(xml: &mut String, reference: &str, text: &str) {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();
    xml.push_str(&format!(
        r#"<c r="{reference}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        escape(cleaned.as_str())
    ));
}

/// Zero-based column index to spreadsheet letters (`0 → A`, `26 → AA`).
pub fn column_name(col: u16) -> String {
    let mut n = u32::from(col) + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Parse a reference such as `C12` into zero-based `(row, col)`.
pub fn parse_reference(reference: &str) -> Result<(u32, u16), WorkbookError> {
    let invalid = || WorkbookError::InvalidReference(reference.to_owned());
    let split = reference
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return Err(invalid());
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(invalid());
        }
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        if col > u32::from(u16::MAX) {
            return Err(invalid());
        }
    }
    let row: u32 = digits.parse().map_err(|_| invalid())?;
    if row == 0 {
        return Err(invalid());
    }
    Ok((row - 1, (col - 1) as u16))
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Decode `.xlsx` bytes into a [`Workbook`].
pub fn read(bytes: &[u8]) -> Result<Workbook, WorkbookError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let shared = match read_part(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let workbook_xml = read_part(&mut archive, "xl/workbook.xml")?
        .ok_or_else(|| WorkbookError::MissingPart("xl/workbook.xml".into()))?;
    let rels = match read_part(&mut archive, "xl/_rels/workbook.xml.rels")? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let mut workbook = Workbook::new();
    for (index, (name, rel_id)) in parse_sheet_list(&workbook_xml)?.into_iter().enumerate() {
        let path = match rels.get(&rel_id) {
            Some(target) => resolve_target(target),
            None => format!("xl/worksheets/sheet{}.xml", index + 1),
        };
        let xml = read_part(&mut archive, &path)?
            .ok_or_else(|| WorkbookError::MissingPart(path.clone()))?;
        workbook.push_sheet(parse_sheet(&name, &xml, &shared)?);
    }
    Ok(workbook)
}

fn read_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, WorkbookError> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(Some(contents))
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_owned(),
        None => format!("xl/{target}"),
    }
}

fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, WorkbookError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_sheet_list(xml: &str) -> Result<Vec<(String, String)>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, b"name")?.unwrap_or_default();
                let rel_id = attribute(&e, b"id")?.unwrap_or_default();
                sheets.push((name, rel_id));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut rels = HashMap::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) =
                    (attribute(&e, b"Id")?, attribute(&e, b"Target")?)
                {
                    rels.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::CData(t) if in_text => current.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

/// Cell currently being decoded.
struct PendingCell {
    row: u32,
    col: u16,
    kind: Option<String>,
}

fn parse_sheet(name: &str, xml: &str, shared: &[String]) -> Result<Sheet, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut sheet = Sheet::new(name);

    let mut row_idx: u32 = 0;
    let mut next_row: u32 = 0;
    let mut next_col: u16 = 0;
    let mut pending: Option<PendingCell> = None;
    let mut text = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                row_idx = row_index(&e, next_row)?;
                next_col = 0;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                next_row = row_index(&e, next_row)? + 1;
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => {
                next_row = row_idx + 1;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let (row, col) = cell_position(&e, row_idx, next_col)?;
                pending = Some(PendingCell {
                    row,
                    col,
                    kind: attribute(&e, b"t")?,
                });
                text.clear();
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let (row, col) = cell_position(&e, row_idx, next_col)?;
                sheet.row_mut(row).set(col, CellValue::Blank);
                next_col = col.saturating_add(1);
            }
            Event::Start(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => {
                in_value = pending.is_some();
            }
            Event::Text(t) if in_value => text.push_str(&t.unescape()?),
            Event::CData(t) if in_value => text.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => {
                in_value = false;
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => {
                if let Some(cell) = pending.take() {
                    let value = decode_cell(cell.kind.as_deref(), &text, shared);
                    sheet.row_mut(cell.row).set(cell.col, value);
                    next_col = cell.col.saturating_add(1);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheet)
}

fn row_index(e: &BytesStart<'_>, fallback: u32) -> Result<u32, WorkbookError> {
    match attribute(e, b"r")? {
        Some(r) => r
            .parse::<u32>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or(WorkbookError::InvalidReference(r)),
        None => Ok(fallback),
    }
}

fn cell_position(
    e: &BytesStart<'_>,
    row: u32,
    next_col: u16,
) -> Result<(u32, u16), WorkbookError> {
    match attribute(e, b"r")? {
        Some(reference) => parse_reference(&reference),
        None => Ok((row, next_col)),
    }
}

fn decode_cell(kind: Option<&str>, text: &str, shared: &[String]) -> CellValue {
    match kind {
        Some("s") => text
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map(|s| CellValue::Text(s.clone()))
            .unwrap_or(CellValue::Blank),
        Some("inlineStr") | Some("str") | Some("e") => CellValue::Text(text.to_owned()),
        Some("b") => CellValue::Bool(text.trim() == "1"),
        _ if text.trim().is_empty() => CellValue::Blank,
        _ => match text.trim().parse::<f64>() {
            Ok(n) => CellValue::Number(n),
            Err(_) => CellValue::Text(text.to_owned()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_follow_spreadsheet_lettering() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn references_parse_to_zero_based_positions() {
        assert_eq!(parse_reference("A1").unwrap(), (0, 0));
        assert_eq!(parse_reference("AB12").unwrap(), (11, 27));
        assert!(parse_reference("12").is_err());
        assert!(parse_reference("A0").is_err());
        assert!(parse_reference("A").is_err());
    }

    #[test]
    fn written_package_reads_back_with_every_cell_kind() {
        let mut wb = Workbook::new();
        let sheet = wb.create_sheet("Report & Co");
        sheet.row_mut(0).set(0, "Name <first>");
        sheet.row_mut(0).set(1, 42.5);
        sheet.row_mut(0).set(2, true);
        sheet.row_mut(0).set(3, CellValue::Blank);
        sheet.row_mut(4).set(27, "  padded  ");
        wb.create_sheet("Second").row_mut(0).set(0, "x");

        let bytes = wb.to_xlsx().expect("encode");
        let decoded = Workbook::from_xlsx(&bytes).expect("decode");

        assert_eq!(decoded, wb);
    }

    #[test]
    fn empty_workbook_still_produces_a_sheet() {
        let bytes = Workbook::new().to_xlsx().expect("encode");
        let decoded = Workbook::from_xlsx(&bytes).expect("decode");
        assert_eq!(decoded.sheets().len(), 1);
        assert_eq!(decoded.sheet(0).unwrap().name(), "Sheet1");
    }

    #[test]
    fn shared_strings_resolve_by_index() {
        let xml = r#"<sst xmlns="x"><si><t>Alpha</t></si><si><r><t>Be</t></r><r><t>ta</t></r></si></sst>"#;
        let shared = parse_shared_strings(xml).unwrap();
        assert_eq!(shared, vec!["Alpha".to_owned(), "Beta".to_owned()]);

        let sheet_xml = r#"<worksheet><sheetData><row r="2"><c r="B2" t="s"><v>1</v></c><c t="s"><v>0</v></c></row></sheetData></worksheet>"#;
        let sheet = parse_sheet("S", sheet_xml, &shared).unwrap();
        assert_eq!(sheet.cell(1, 1), Some(&CellValue::Text("Beta".into())));
        assert_eq!(sheet.cell(1, 2), Some(&CellValue::Text("Alpha".into())));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(matches!(
            Workbook::from_xlsx(b"not a zip"),
            Err(WorkbookError::Zip(_))
        ));
    }
}
