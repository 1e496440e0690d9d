//! CSV codec: rows to CSV text and back, plus structural validation.
//!
//! The dialect is deliberately small. Fields are comma separated and wrapped
//! in double quotes only when they contain a comma or a double quote; inner
//! quotes are doubled. Records are newline separated and blank lines are
//! ignored on the way in.
//!
//! # Example
//! ```ignore
//! use csvsync::parser::{csv_to_objects, objects_to_csv};
//! use serde_json::json;
//!
//! let rows = vec![json!({ "a": 1, "b": 2 }).as_object().cloned().unwrap()];
//! let csv = objects_to_csv(&rows);
//! assert_eq!(csv, "a,b\n1,2");
//!
//! let back = csv_to_objects(&csv, true);
//! assert_eq!(back[0]["a"], "1");
//! ```

use serde_json::Value;
use std::borrow::Cow;

use crate::error::{CsvError, CsvResult};
use crate::models::{Row, Table};

/// Prefix of the metadata comment written at the top of saved files.
pub const METADATA_PREFIX: &str = "# Last updated: ";

/// Result of decoding and parsing raw bytes.
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Column headers (synthetic `columnN` when the input has no header row)
    pub headers: Vec<String>,
    /// Parsed rows, all values as strings
    pub rows: Vec<Row>,
    /// Detected encoding
    pub encoding: String,
}

// =============================================================================
// Writing
// =============================================================================

/// Stringify a JSON value for a CSV field.
fn field_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Bool(b) => Cow::Owned(b.to_string()),
        Value::Number(n) => Cow::Owned(n.to_string()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Quote a field if it contains a comma or a double quote.
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains(',') || field.contains('"') {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Render the header line.
pub fn header_line(headers: &[String]) -> String {
    headers
        .iter()
        .map(|h| escape_field(h))
        .collect::<Vec<_>>()
        .join(",")
}

fn row_line(row: &Row, headers: &[String]) -> String {
    headers
        .iter()
        .map(|h| match row.get(h) {
            Some(v) => escape_field(&field_text(v)).into_owned(),
            None => String::new(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Serialize rows, taking headers from the first row's keys.
///
/// Returns an empty string when there are no rows.
pub fn objects_to_csv(rows: &[Row]) -> String {
    match rows.first() {
        Some(first) => {
            let headers: Vec<String> = first.keys().cloned().collect();
            objects_to_csv_with_headers(rows, &headers)
        }
        None => String::new(),
    }
}

/// Serialize rows against an explicit header list.
///
/// With no rows, emits the header line terminated by a newline (or nothing
/// when `headers` is empty too).
pub fn objects_to_csv_with_headers(rows: &[Row], headers: &[String]) -> String {
    if rows.is_empty() {
        if headers.is_empty() {
            return String::new();
        }
        return format!("{}\n", header_line(headers));
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(header_line(headers));
    lines.extend(rows.iter().map(|row| row_line(row, headers)));
    lines.join("\n")
}

/// Metadata comment line stamped at the top of saved files.
pub fn metadata_line(timestamp: &str) -> String {
    format!("{}{}", METADATA_PREFIX, timestamp)
}

/// Drop leading `#` comment lines (and blank lines around them).
pub fn strip_metadata(content: &str) -> &str {
    let mut rest = content;
    loop {
        let trimmed = rest.trim_start_matches(['\r', '\n']);
        if !trimmed.starts_with('#') {
            return trimmed;
        }
        rest = match trimmed.find('\n') {
            Some(i) => &trimmed[i + 1..],
            None => "",
        };
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Split one line into fields, honouring double quotes.
///
/// A `"` toggles quoted mode, a `,` separates fields only outside quotes, and
/// `""` inside quotes is a literal quote.
pub fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Non-blank lines, split on LF or CRLF.
fn data_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty())
}

fn zip_row(headers: &[String], values: Vec<String>) -> Row {
    let mut values = values.into_iter();
    headers
        .iter()
        .map(|h| (h.clone(), Value::String(values.next().unwrap_or_default())))
        .collect()
}

/// Parse CSV text into a table.
///
/// With `header_row` false, headers are `column0..columnN` sized from the
/// first line, and the first line is data.
pub fn csv_to_table(content: &str, header_row: bool) -> Table {
    let mut lines = data_lines(content).peekable();

    let headers: Vec<String> = match lines.peek().copied() {
        None => return Table::default(),
        Some(first) if header_row => {
            let headers = parse_line(first);
            lines.next();
            headers
        }
        Some(first) => (0..parse_line(first).len())
            .map(|i| format!("column{}", i))
            .collect(),
    };

    let rows = lines.map(|line| zip_row(&headers, parse_line(line))).collect();
    Table { headers, rows }
}

/// Parse CSV text into rows. Empty input yields no rows.
pub fn csv_to_objects(content: &str, header_row: bool) -> Vec<Row> {
    csv_to_table(content, header_row).rows
}

// =============================================================================
// Validation
// =============================================================================

/// Check that `content` is non-empty, carries every required header, and
/// that every data row has as many fields as the header row.
pub fn validate_csv<S: AsRef<str>>(content: &str, required_headers: &[S]) -> CsvResult<()> {
    let mut lines = data_lines(content);
    let header = lines.next().ok_or(CsvError::Empty)?;
    let headers = parse_line(header);

    let missing: Vec<String> = required_headers
        .iter()
        .map(|h| h.as_ref())
        .filter(|h| !headers.iter().any(|x| x == h))
        .map(String::from)
        .collect();
    if !missing.is_empty() {
        return Err(CsvError::MissingHeaders(missing));
    }

    for (i, line) in lines.enumerate() {
        let found = parse_line(line).len();
        if found != headers.len() {
            return Err(CsvError::ColumnCount {
                row: i + 1,
                expected: headers.len(),
                found,
            });
        }
    }

    Ok(())
}

// =============================================================================
// Bytes
// =============================================================================

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes using the given encoding label.
pub fn decode_content(bytes: &[u8], encoding: &str) -> CsvResult<String> {
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "iso-8859-1" | "latin-1" | "latin1" => {
            Ok(encoding_rs::ISO_8859_15.decode(bytes).0.into_owned())
        }
        "windows-1252" | "cp1252" => Ok(encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned()),
        label => encoding_rs::Encoding::for_label(label.as_bytes())
            .map(|enc| enc.decode(bytes).0.into_owned())
            .ok_or_else(|| CsvError::Encoding(format!("unsupported encoding '{}'", label))),
    }
}

/// Decode and parse CSV bytes (for example a spreadsheet export).
pub fn parse_bytes(bytes: &[u8], header_row: bool) -> CsvResult<ParseResult> {
    let encoding = detect_encoding(bytes);
    // chardet can name charsets encoding_rs does not know
    let content = decode_content(bytes, &encoding)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned());
    let content = content.trim_start_matches('\u{feff}');

    if content.trim().is_empty() {
        return Err(CsvError::Empty);
    }

    let table = csv_to_table(strip_metadata(content), header_row);
    Ok(ParseResult {
        headers: table.headers,
        rows: table.rows,
        encoding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_header_default() {
        let csv = objects_to_csv(&[row(json!({ "a": 1, "b": 2 }))]);
        assert_eq!(csv, "a,b\n1,2");
    }

    #[test]
    fn test_empty_rows() {
        assert_eq!(objects_to_csv(&[]), "");
        assert_eq!(objects_to_csv_with_headers(&[], &[]), "");

        let headers = vec!["id".to_string(), "name".to_string()];
        assert_eq!(objects_to_csv_with_headers(&[], &headers), "id,name\n");
    }

    #[test]
    fn test_quoting_rule() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_null_and_missing_fields() {
        let headers = vec!["id".to_string(), "owner".to_string(), "done".to_string()];
        let rows = vec![row(json!({ "id": "r-1", "owner": null, "done": true }))];
        assert_eq!(objects_to_csv_with_headers(&rows, &headers), "id,owner,done\nr-1,,true");

        let rows = vec![row(json!({ "id": "r-2" }))];
        assert_eq!(objects_to_csv_with_headers(&rows, &headers), "id,owner,done\nr-2,,");
    }

    #[test]
    fn test_round_trip() {
        let rows = vec![
            row(json!({ "id": "kpis-1", "name": "Uptime", "target": 99.9 })),
            row(json!({ "id": "kpis-2", "name": "Tickets, closed", "target": 40 })),
        ];

        let back = csv_to_objects(&objects_to_csv(&rows), true);

        assert_eq!(back.len(), 2);
        assert_eq!(back[0], row(json!({ "id": "kpis-1", "name": "Uptime", "target": "99.9" })));
        assert_eq!(back[1]["name"], "Tickets, closed");
        assert_eq!(back[1]["target"], "40");
    }

    #[test]
    fn test_comma_and_quote_round_trip() {
        let rows = vec![row(json!({ "name": "John", "address": "Lives in NY, \"home\"" }))];
        let back = csv_to_objects(&objects_to_csv(&rows), true);
        assert_eq!(back[0]["address"], "Lives in NY, \"home\"");
    }

    #[test]
    fn test_parse_line_quotes() {
        assert_eq!(parse_line("a,\"b,c\",d"), vec!["a", "b,c", "d"]);
        assert_eq!(parse_line("\"x \"\"y\"\"\",z"), vec!["x \"y\"", "z"]);
        assert_eq!(parse_line("a,,"), vec!["a", "", ""]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let rows = csv_to_objects("id,name\r\n1,A\r\n\r\n2,B\r\n", true);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], "B");
    }

    #[test]
    fn test_missing_trailing_fields() {
        let rows = csv_to_objects("a,b,c\n1", true);
        assert_eq!(rows[0]["a"], "1");
        assert_eq!(rows[0]["b"], "");
        assert_eq!(rows[0]["c"], "");
    }

    #[test]
    fn test_no_header_mode() {
        let rows = csv_to_objects("John,30,New York\nJane,25,San Francisco", false);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["column0", "column1", "column2"]);
        assert_eq!(rows[1]["column2"], "San Francisco");
    }

    #[test]
    fn test_empty_input() {
        assert!(csv_to_objects("", true).is_empty());
        assert!(csv_to_objects("\n\n", false).is_empty());
    }

    #[test]
    fn test_validate_missing_header() {
        let err = validate_csv("id,description\n1,x", &["id", "name", "description"]).unwrap_err();
        assert_eq!(err, CsvError::MissingHeaders(vec!["name".into()]));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_validate_ragged_rows() {
        let err = validate_csv::<&str>("id,name\n1,A\n2", &[]).unwrap_err();
        assert_eq!(err, CsvError::ColumnCount { row: 2, expected: 2, found: 1 });
    }

    #[test]
    fn test_validate_empty_and_ok() {
        assert_eq!(validate_csv::<&str>("", &[]), Err(CsvError::Empty));
        assert!(validate_csv::<&str>("id,name\n1,\"A, B\"", &[]).is_ok());
        assert!(validate_csv("id,name\n1,A", &["id"]).is_ok());
    }

    #[test]
    fn test_strip_metadata() {
        let content = format!("{}\nid,name\n1,A", metadata_line("2024-01-01T00:00:00.000Z"));
        assert_eq!(strip_metadata(&content), "id,name\n1,A");
        assert_eq!(strip_metadata("id\n1"), "id\n1");
        assert_eq!(strip_metadata("# only a comment"), "");
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1").unwrap();
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_parse_bytes_skips_metadata() {
        let bytes = b"# Last updated: 2024-01-01T00:00:00.000Z\nid,name\n1,A\n";
        let result = parse_bytes(bytes, true).unwrap();
        assert_eq!(result.headers, vec!["id", "name"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], "A");
    }

    #[test]
    fn test_parse_bytes_empty() {
        assert!(matches!(parse_bytes(b"", true), Err(CsvError::Empty)));
    }

    #[test]
    fn test_unknown_encoding() {
        assert!(matches!(
            decode_content(b"abc", "no-such-charset"),
            Err(CsvError::Encoding(_))
        ));
    }
}
