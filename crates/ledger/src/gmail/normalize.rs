//! Gmail API response normalization

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{TimeZone, Utc};

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::MailMessage;

/// Normalize a full Gmail message.
///
/// The body prefers the `text/plain` part and falls back to tag-stripped
/// HTML, then to the snippet.
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<MailMessage> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .context("Message has no payload")?;

    let subject = extract_header(payload, "Subject").unwrap_or_default();
    let sender = extract_header(payload, "From").unwrap_or_default();

    // internalDate is milliseconds since epoch
    let internal_date: i64 = gmail_msg
        .internal_date
        .parse()
        .with_context(|| format!("Invalid internalDate: {}", gmail_msg.internal_date))?;
    let timestamp = Utc
        .timestamp_millis_opt(internal_date)
        .single()
        .context("internalDate out of range")?;

    let body = find_body(payload, "text/plain")
        .or_else(|| find_body(payload, "text/html").map(|html| strip_html(&html)))
        .unwrap_or_else(|| decode_html_entities(&gmail_msg.snippet));

    Ok(MailMessage {
        id: gmail_msg.id,
        subject,
        sender,
        timestamp,
        body,
    })
}

fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn find_body(payload: &MessagePayload, mime: &str) -> Option<String> {
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && payload.mime_type.as_ref().is_some_and(|m| m.starts_with(mime))
    {
        return decode_base64_body(data);
    }

    find_in_parts(payload.parts.as_deref()?, mime)
}

/// Depth-first search through multipart content
fn find_in_parts(parts: &[MessagePart], mime: &str) -> Option<String> {
    for part in parts {
        if part.mime_type.as_ref().is_some_and(|m| m.starts_with(mime))
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_in_parts(nested, mime)
        {
            return Some(text);
        }
    }
    None
}

/// Gmail uses URL-safe base64 but padding varies
fn decode_base64_body(data: &str) -> Option<String> {
    let decoders: [&base64::engine::GeneralPurpose; 4] = [
        &BASE64_URL_SAFE_NO_PAD,
        &BASE64_URL_SAFE,
        &BASE64_STANDARD,
        &BASE64_STANDARD_NO_PAD,
    ];

    decoders
        .iter()
        .find_map(|decoder| decoder.decode(data).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Drop tags, scripts and styles and collapse whitespace
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let lower = after.get(..7).unwrap_or("").to_ascii_lowercase();

        let skip_to = if lower.starts_with("<script") {
            find_ci(after, "</script>").map(|i| i + "</script>".len())
        } else if lower.starts_with("<style") {
            find_ci(after, "</style>").map(|i| i + "</style>".len())
        } else {
            after.find('>').map(|i| i + 1)
        };

        match skip_to {
            Some(n) => {
                out.push(' ');
                rest = &after[n..];
            }
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);

    decode_html_entities(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

fn decode_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::{Header, MessageBody};

    fn encode(s: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(s)
    }

    fn part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessageBody {
                size: Some(text.len() as u32),
                data: Some(encode(text)),
            }),
            parts: None,
        }
    }

    fn message(parts: Vec<MessagePart>) -> GmailMessage {
        GmailMessage {
            id: "18c2".to_string(),
            snippet: "Receipt &amp; invoice".to_string(),
            internal_date: "1736935200000".to_string(),
            payload: Some(MessagePayload {
                headers: Some(vec![
                    Header {
                        name: "SUBJECT".to_string(),
                        value: "Your Replit receipt".to_string(),
                    },
                    Header {
                        name: "From".to_string(),
                        value: "Replit <billing@replit.com>".to_string(),
                    },
                ]),
                body: None,
                parts: Some(parts),
                mime_type: Some("multipart/alternative".to_string()),
            }),
        }
    }

    #[test]
    fn test_prefers_plain_text() {
        let msg = normalize_message(message(vec![
            part("text/html", "<p>html</p>"),
            part("text/plain", "Invoice INV-1"),
        ]))
        .unwrap();

        assert_eq!(msg.id, "18c2");
        assert_eq!(msg.subject, "Your Replit receipt");
        assert_eq!(msg.sender, "Replit <billing@replit.com>");
        assert_eq!(msg.body, "Invoice INV-1");
        assert_eq!(msg.timestamp.to_rfc3339(), "2025-01-15T10:00:00+00:00");
    }

    #[test]
    fn test_falls_back_to_stripped_html() {
        let html = "<html><style>p{color:red}</style><body><p>Total:&nbsp;$20</p><script>x()</script></body></html>";
        let nested = MessagePart {
            mime_type: Some("multipart/related".to_string()),
            body: None,
            parts: Some(vec![part("text/html", html)]),
        };
        let msg = normalize_message(message(vec![nested])).unwrap();
        assert_eq!(msg.body, "Total: $20");
    }

    #[test]
    fn test_falls_back_to_snippet() {
        let msg = normalize_message(message(vec![])).unwrap();
        assert_eq!(msg.body, "Receipt & invoice");
    }

    #[test]
    fn test_decode_base64_body() {
        assert_eq!(
            decode_base64_body("SGVsbG8sIFdvcmxkIQ"),
            Some("Hello, World!".to_string())
        );
    }
}
