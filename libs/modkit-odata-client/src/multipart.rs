//! `multipart/mixed` batch encoding and decoding.
//!
//! A save is encoded as one batch containing a single change set. Responses
//! are decoded leniently: nested change sets are flattened, and both CRLF and
//! bare LF line endings are accepted.

use std::fmt::{self, Write};

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use uuid::Uuid;

use crate::batch::{BatchEnvelope, CONTENT_ID, PartResponse};
use crate::error::ODataError;

const CRLF: &str = "\r\n";

/// An encoded batch request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedBatch {
    pub content_type: String,
    pub body: String,
}

/// Encode the envelope as a batch with freshly generated boundaries.
#[must_use]
pub fn encode_batch(envelope: &BatchEnvelope) -> EncodedBatch {
    encode_batch_with_boundaries(
        envelope,
        &format!("batch_{}", Uuid::new_v4()),
        &format!("changeset_{}", Uuid::new_v4()),
    )
}

/// Encode the envelope with the given boundaries.
#[must_use]
pub fn encode_batch_with_boundaries(
    envelope: &BatchEnvelope,
    batch: &str,
    changeset: &str,
) -> EncodedBatch {
    let mut body = String::new();
    // writing into a String cannot fail
    write_batch(&mut body, envelope, batch, changeset).ok();

    tracing::trace!(parts = envelope.len(), bytes = body.len(), "Batch encoded");

    EncodedBatch {
        content_type: format!("multipart/mixed; boundary={batch}"),
        body,
    }
}

fn write_batch(
    body: &mut String,
    envelope: &BatchEnvelope,
    batch: &str,
    changeset: &str,
) -> fmt::Result {
    write!(body, "--{batch}{CRLF}")?;
    write!(
        body,
        "Content-Type: multipart/mixed; boundary={changeset}{CRLF}{CRLF}"
    )?;

    for (index, request) in envelope.requests().iter().enumerate() {
        let content_id = request
            .headers
            .get(CONTENT_ID)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| (index + 1).to_string(), str::to_owned);

        write!(body, "--{changeset}{CRLF}")?;
        write!(body, "Content-Type: application/http{CRLF}")?;
        write!(body, "Content-Transfer-Encoding: binary{CRLF}")?;
        write!(body, "Content-ID: {content_id}{CRLF}{CRLF}")?;

        write!(body, "{} {} HTTP/1.1{CRLF}", request.method, request.uri)?;
        for (name, value) in &request.headers {
            if name == CONTENT_ID {
                continue;
            }
            if let Ok(value) = value.to_str() {
                write!(body, "{}: {value}{CRLF}", display_name(name))?;
            }
        }
        body.push_str(CRLF);
        if let Some(json) = &request.body {
            write!(body, "{json}{CRLF}")?;
        }
    }

    write!(body, "--{changeset}--{CRLF}")?;
    write!(body, "--{batch}--{CRLF}")
}

/// Decode a batch response into its parts, in order.
///
/// # Errors
/// Returns a protocol error when the content type carries no boundary or a
/// part cannot be parsed as an HTTP response.
pub fn decode_batch(content_type: &str, body: &[u8]) -> Result<Vec<PartResponse>, ODataError> {
    let boundary = boundary_of(content_type).ok_or_else(|| {
        ODataError::protocol(format!("batch response without boundary: '{content_type}'"))
    })?;
    let text = String::from_utf8_lossy(body);
    let mut parts = Vec::new();
    decode_into(&text, &boundary, &mut parts)?;
    tracing::trace!(parts = parts.len(), "Batch decoded");
    Ok(parts)
}

fn decode_into(text: &str, boundary: &str, out: &mut Vec<PartResponse>) -> Result<(), ODataError> {
    let delimiter = format!("--{boundary}");

    // first segment is the preamble
    for segment in text.split(delimiter.as_str()).skip(1) {
        if segment.starts_with("--") {
            break;
        }
        let segment = strip_line_end(segment.trim_start_matches([' ', '\t']));
        let segment = segment
            .strip_prefix(CRLF)
            .or_else(|| segment.strip_prefix('\n'))
            .unwrap_or(segment);

        let (head, content) = split_head(segment);
        let headers = parse_headers(head);
        let content_type = header_str(&headers, "content-type").unwrap_or_default();

        if let Some(mime) = multipart_mixed(&content_type) {
            let nested = boundary_param(&mime).ok_or_else(|| {
                ODataError::protocol("nested change set without boundary".to_owned())
            })?;
            decode_into(content, &nested, out)?;
        } else {
            out.push(parse_http_response(content)?);
        }
    }
    Ok(())
}

/// Parse an embedded `HTTP/1.1 <status> <reason>` response.
fn parse_http_response(content: &str) -> Result<PartResponse, ODataError> {
    let content = content.trim_start_matches(['\r', '\n']);
    let (status_line, rest) = match content.find('\n') {
        Some(pos) => (&content[..pos], &content[pos + 1..]),
        None => (content, ""),
    };
    let status_line = status_line.trim_end_matches('\r');

    let mut fields = status_line.splitn(3, ' ');
    let version = fields.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ODataError::protocol(format!(
            "malformed batch part status line: '{status_line}'"
        )));
    }
    let status = fields
        .next()
        .and_then(|code| code.trim().parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok());
    let status_text = fields.next().unwrap_or_default().trim().to_owned();

    let (head, body) = if rest.starts_with(CRLF) || rest.starts_with('\n') {
        ("", rest.trim_start_matches(['\r', '\n']))
    } else {
        split_head(rest)
    };

    Ok(PartResponse {
        status,
        status_text,
        headers: parse_headers(head),
        body: body.trim_end_matches(['\r', '\n']).as_bytes().to_vec(),
    })
}

/// Split at the first blank line into (headers, content).
fn split_head(text: &str) -> (&str, &str) {
    let crlf = text.find("\r\n\r\n").map(|pos| (pos, 4));
    let lf = text.find("\n\n").map(|pos| (pos, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((pos, len)) => (&text[..pos], &text[pos + len..]),
        None => (text, ""),
    }
}

fn strip_line_end(text: &str) -> &str {
    text.strip_suffix(CRLF)
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

fn parse_headers(head: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in head.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) else {
            tracing::trace!(line, "Skipping unparsable batch header");
            continue;
        };
        headers.append(name, value);
    }
    headers
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// The content type parsed as `multipart/mixed`, if it is one.
fn multipart_mixed(content_type: &str) -> Option<mime::Mime> {
    let mime: mime::Mime = content_type.trim().parse().ok()?;
    (mime.type_() == mime::MULTIPART && mime.subtype() == "mixed").then_some(mime)
}

fn boundary_param(mime: &mime::Mime) -> Option<String> {
    mime.get_param(mime::BOUNDARY)
        .map(|b| b.as_str().to_owned())
        .filter(|b| !b.is_empty())
}

fn boundary_of(content_type: &str) -> Option<String> {
    multipart_mixed(content_type).and_then(|mime| boundary_param(&mime))
}

/// `content-type` → `Content-Type`
fn display_name(name: &HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
