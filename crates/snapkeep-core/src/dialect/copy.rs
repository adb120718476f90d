//! `COPY ... FROM stdin` blocks in plain-format dump scripts
//!
//! Locating one table's data inside a whole-database script is textual:
//! a block starts at a `COPY <schema>.<table> (<columns>) FROM stdin;` line
//! and ends at a line holding only `\.`. Values use the COPY text format
//! (tab separated, `\N` for null, backslash escapes).

use super::{DialectError, SqlValue, TableRows};

const BLOCK_END: &str = "\\.";
const NULL_MARKER: &str = "\\N";

/// Location of one table's data block inside a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyBlock {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    /// Byte range of the data lines, terminator excluded
    pub data: std::ops::Range<usize>,
}

/// Scan a script for every COPY block
///
/// # Errors
/// Returns an error if a block is never terminated
pub fn scan_blocks(script: &str) -> Result<Vec<CopyBlock>, DialectError> {
    let mut blocks = Vec::new();
    let mut offset = 0;
    let mut lines = script.split_inclusive('\n');

    while let Some(line) = lines.next() {
        let line_start = offset;
        offset += line.len();

        let Some((schema, table, columns)) = parse_header(line.trim_end_matches(['\n', '\r']))
        else {
            continue;
        };

        let data_start = offset;
        let mut data_end = None;
        for data_line in lines.by_ref() {
            let start = offset;
            offset += data_line.len();
            if data_line.trim_end_matches(['\n', '\r']) == BLOCK_END {
                data_end = Some(start);
                break;
            }
        }

        let data_end = data_end.ok_or_else(|| {
            DialectError::Parse(format!(
                "COPY block for {table} at byte {line_start} is not terminated"
            ))
        })?;

        blocks.push(CopyBlock {
            schema,
            table,
            columns,
            data: data_start..data_end,
        });
    }

    Ok(blocks)
}

/// Decode a block's data lines into rows
///
/// # Errors
/// Returns an error if a line has the wrong number of fields
pub fn decode_rows(script: &str, block: &CopyBlock) -> Result<TableRows, DialectError> {
    let mut rows = TableRows::new(&block.table, block.columns.clone());

    for line in script[block.data.clone()].lines() {
        let fields: Vec<SqlValue> = line.split('\t').map(decode_field).collect();
        if fields.len() != block.columns.len() {
            return Err(DialectError::Parse(format!(
                "{}: expected {} fields, found {}",
                block.table,
                block.columns.len(),
                fields.len()
            )));
        }
        rows.rows.push(fields);
    }

    Ok(rows)
}

/// Encode rows as a COPY block for `qualified_table`
#[must_use]
pub fn encode_block(qualified_table: &str, rows: &TableRows) -> String {
    let columns = rows
        .columns
        .iter()
        .map(|c| super::quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = format!("COPY {qualified_table} ({columns}) FROM stdin;\n");
    for row in &rows.rows {
        let line = row.iter().map(encode_field).collect::<Vec<_>>().join("\t");
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(BLOCK_END);
    out.push('\n');
    out
}

/// Parse `COPY schema.table (a, b) FROM stdin;`
fn parse_header(line: &str) -> Option<(Option<String>, String, Vec<String>)> {
    let body = line.strip_prefix("COPY ")?.strip_suffix(" FROM stdin;")?;
    let open = find_unquoted(body, '(')?;
    let name = body[..open].trim();
    let column_list = body[open + 1..].trim().strip_suffix(')')?;

    let mut parts = split_idents(name, '.');
    let table = parts.pop()?;
    let schema = parts.pop();
    let columns = split_idents(column_list, ',');

    Some((schema, table, columns))
}

/// Index of `needle` outside double-quoted identifiers
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split an identifier list, unquoting `"..."` parts
fn split_idents(s: &str, sep: char) -> Vec<String> {
    let mut idents = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                idents.push(std::mem::take(&mut current).trim().to_string());
            }
            c => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() {
        idents.push(last.to_string());
    }
    idents
}

fn decode_field(field: &str) -> SqlValue {
    if field == NULL_MARKER {
        return SqlValue::Null;
    }

    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    SqlValue::Text(out)
}

fn encode_field(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => NULL_MARKER.to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(t) => escape_text(t),
        SqlValue::TextBytes(b) => escape_text(&String::from_utf8_lossy(b)),
        SqlValue::Blob(b) => {
            let mut hex = String::from("\\\\x");
            for byte in b {
                hex.push_str(&format!("{byte:02x}"));
            }
            hex
        }
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}
