//! CSV rendering for resident and audit exports.

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};

/// One CSV field. Fields containing a comma, quote, CR or LF are wrapped in
/// quotes with inner quotes doubled; other control characters become spaces.
pub fn escape_csv(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_control() && c != '\n' && c != '\r' { ' ' } else { c })
        .collect();
    if cleaned.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", cleaned.replace('"', "\"\""))
    } else {
        cleaned
    }
}

pub fn csv_row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields.into_iter().map(|f| escape_csv(f.as_ref())).collect::<Vec<_>>().join(",");
    line.push_str("\r\n");
    line
}

pub fn opt(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}

/// `text/csv` attachment named `<prefix>-<YYYY-MM-DD>.csv`.
pub fn csv_attachment(prefix: &str, body: String) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
    let disposition = format!("attachment; filename=\"{}-{}.csv\"", prefix, crate::types::today_utc());
    if let Ok(header_val) = HeaderValue::from_str(&disposition) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, header_val);
    }
    response
}
