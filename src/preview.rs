//! Preview normalization
//!
//! CSV and TSV previews are re-emitted comma separated after sniffing the
//! source delimiter. JSON is compacted when it parses. Anything else is
//! returned as read.

use tracing::warn;

/// Delimiters considered when sniffing a tabular file, in preference order
const DELIMITERS: [char; 4] = [',', '|', ';', '\t'];

/// Bytes of the body inspected by the sniffer
const SNIFF_LEN: usize = 1024;

/// Lowercased extension after the last dot, empty when there is none
pub fn file_type(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Content type of a streamed preview
pub fn media_type(file_type: &str) -> &'static str {
    match file_type {
        "csv" | "tsv" => "text/csv",
        "json" => "application/json",
        _ => "text/plain; charset=utf-8",
    }
}

/// Normalize a preview body for `file_type`.
///
/// `truncated` means the body stops before the end of the file, so a
/// tabular body loses its last, partial line.
pub fn normalize(file_type: &str, body: &str, truncated: bool) -> String {
    match file_type {
        "csv" | "tsv" => normalize_delimited(body, truncated),
        "json" => match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(error = %e, truncated, "JSON preview does not parse, returned as is");
                body.to_string()
            }
        },
        _ => body.to_string(),
    }
}

fn normalize_delimited(body: &str, truncated: bool) -> String {
    let complete = match (truncated, body.rfind('\n')) {
        (true, Some(end)) => &body[..end],
        _ => body,
    };
    let delimiter = sniff_delimiter(complete);
    parse_records(complete, delimiter)
        .iter()
        .map(|record| write_record(record))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pick the delimiter whose per-line count is steady across the sample
fn sniff_delimiter(body: &str) -> char {
    let mut end = body.len().min(SNIFF_LEN);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let sample = &body[..end];
    // the last sampled line is usually cut short
    let lines: Vec<&str> = match sample.rfind('\n') {
        Some(cut) if end < body.len() => sample[..cut].lines().collect(),
        _ => sample.lines().collect(),
    };

    let mut best: Option<(bool, usize, char)> = None;
    for delimiter in DELIMITERS {
        let counts: Vec<usize> = lines
            .iter()
            .filter(|l| !l.is_empty())
            .map(|l| count_unquoted(l, delimiter))
            .collect();
        let total: usize = counts.iter().sum();
        if total == 0 {
            continue;
        }
        let steady = counts.windows(2).all(|w| w[0] == w[1]);
        let candidate = (steady, total, delimiter);
        if best.map_or(true, |(s, t, _)| (steady, total) > (s, t)) {
            best = Some(candidate);
        }
    }
    best.map_or(',', |(_, _, delimiter)| delimiter)
}

fn count_unquoted(line: &str, delimiter: char) -> usize {
    let mut quoted = false;
    line.chars()
        .filter(|&c| {
            if c == '"' {
                quoted = !quoted;
            }
            c == delimiter && !quoted
        })
        .count()
}

/// Split `body` into records, honouring double-quoted fields
fn parse_records(body: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

fn write_record(record: &[String]) -> String {
    record
        .iter()
        .map(|field| {
            if field.contains(&[',', '"', '\n', '\r'][..]) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
