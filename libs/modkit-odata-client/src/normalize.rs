//! Error body normalization.
//!
//! OData services bury the useful message at varying depths: `error`,
//! `innererror` and `internalexception` chains, sometimes under a legacy
//! `odata.error` envelope, with `message` either a string or `{ "value": .. }`.

use http::StatusCode;
use serde_json::Value;

use crate::error::{ODataError, ODataErrorKind, TransportError};

/// What went wrong with a request.
#[derive(Debug, Clone, Copy)]
pub enum Failure<'a> {
    /// No HTTP status was received.
    Transport(&'a TransportError),
    /// A (part) response with a failing or missing status.
    Response {
        status: Option<StatusCode>,
        status_text: &'a str,
        body: &'a [u8],
    },
}

/// Turn a failure into an [`ODataError`]. Never fails.
#[must_use]
pub fn normalize(failure: Failure<'_>, url: &str) -> ODataError {
    let mut err = match failure {
        Failure::Transport(err) => {
            let rendered = err.to_string();
            let mut out = ODataError::new(ODataErrorKind::Transport, rendered.clone());
            out.status_text = rendered;
            out
        }
        Failure::Response {
            status,
            status_text,
            body,
        } => {
            let mut out = ODataError::new(ODataErrorKind::Protocol, status_text);
            out.status = status;
            out.status_text = status_text.to_owned();

            if !body.is_empty() {
                let raw = String::from_utf8_lossy(body).into_owned();
                if let Ok(json) = serde_json::from_str::<Value>(&raw) {
                    let message = accumulate_messages(&json);
                    if !message.is_empty() {
                        out.message = message;
                    }
                }
                out.body = Some(raw);
            }
            out
        }
    };

    if !url.is_empty() {
        err.url = Some(url.to_owned());
    }
    err
}

/// Concatenate every `message`/`Message` along the nested error chain.
fn accumulate_messages(body: &Value) -> String {
    let mut node = body.get("odata.error").unwrap_or(body);
    let mut message = String::new();

    loop {
        if let Some(text) = node
            .get("message")
            .or_else(|| node.get("Message"))
            .and_then(message_text)
        {
            message.push_str(text);
            message.push_str("; ");
        }

        let next = ["error", "innererror", "internalexception"]
            .iter()
            .find_map(|key| node.get(*key).filter(|v| v.is_object()));
        match next {
            Some(inner) => node = inner,
            None => break,
        }
    }

    message
}

fn message_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(_) => value.get("value").and_then(Value::as_str),
        _ => None,
    }
}
