//! MIME decoding of fetched messages.

use crate::error::{Error, Result};
use crate::fetcher::RawMessage;
use chrono::{DateTime, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use tracing::debug;

/// Headers and body extracted from a raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEmail {
    pub uid: u32,
    /// `Message-ID` header, trimmed. `None` when absent or blank.
    pub message_id: Option<String>,
    /// Subject with RFC 2047 encoded words decoded.
    pub subject: String,
    /// `From` header value.
    pub sender: String,
    /// Parsed `Date` header.
    pub date: Option<DateTime<Utc>>,
    /// HTML part when present, else the first non-empty plain-text part.
    pub body: String,
}

/// Decodes a fetched message.
///
/// # Errors
///
/// Returns [`Error::ParseEmail`] if the message structure cannot be parsed.
pub fn decode(raw: &RawMessage) -> Result<DecodedEmail> {
    let parsed = parse_mail(&raw.bytes).map_err(|source| Error::ParseEmail { source })?;

    let subject = header_value(&parsed, "Subject");
    let sender = header_value(&parsed, "From");
    let message_id = Some(header_value(&parsed, "Message-ID"))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|value| mailparse::dateparse(&value).ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    let body = extract_body(&parsed);

    debug!(
        uid = raw.uid,
        has_message_id = message_id.is_some(),
        body_len = body.len(),
        "Decoded message"
    );

    Ok(DecodedEmail {
        uid: raw.uid,
        message_id,
        subject,
        sender,
        date,
        body,
    })
}

/// Decoded header value, falling back to the raw bytes when decoding yields nothing.
fn header_value(parsed: &ParsedMail<'_>, name: &str) -> String {
    let Some(header) = parsed.headers.get_first_header(name) else {
        return String::new();
    };
    let decoded = header.get_value();
    if decoded.trim().is_empty() {
        String::from_utf8_lossy(header.get_value_raw()).trim().to_string()
    } else {
        decoded.trim().to_string()
    }
}

/// Picks the body used for classification.
///
/// Multipart messages are walked depth-first: the first non-empty `text/html` part wins,
/// otherwise the first non-empty `text/plain` part. Single-part messages yield their
/// payload whatever the declared type.
pub(crate) fn extract_body(parsed: &ParsedMail<'_>) -> String {
    if parsed.subparts.is_empty() {
        return part_text(parsed);
    }

    let mut plain: Option<String> = None;
    for part in parsed.parts().filter(|p| p.subparts.is_empty()) {
        match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/html" => {
                let text = part_text(part);
                if !text.trim().is_empty() {
                    return text;
                }
            }
            "text/plain" if plain.is_none() => {
                let text = part_text(part);
                if !text.trim().is_empty() {
                    plain = Some(text);
                }
            }
            _ => {}
        }
    }

    plain.unwrap_or_default()
}

/// Transfer- and charset-decoded text of one part, lossy on failure.
fn part_text(part: &ParsedMail<'_>) -> String {
    part.get_body().unwrap_or_else(|e| {
        debug!(error = %e, "Charset decoding failed, using lossy UTF-8");
        part.get_body_raw()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bytes: &[u8]) -> RawMessage {
        RawMessage {
            uid: 1,
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_single_part_body() {
        let msg = raw(b"From: info@account.netflix.com\r\nSubject: Hello\r\n\r\nYour code is 123456.");
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.subject, "Hello");
        assert_eq!(decoded.sender, "info@account.netflix.com");
        assert!(decoded.body.contains("123456"));
        assert!(decoded.message_id.is_none());
    }

    #[test]
    fn test_encoded_subject_is_decoded() {
        let msg = raw(
            b"From: a@b.c\r\nSubject: =?UTF-8?B?WW91ciBOZXRmbGl4IGhvdXNlaG9sZA==?=\r\n\r\nbody",
        );
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.subject, "Your Netflix household");
    }

    #[test]
    fn test_multi_word_encoded_subject() {
        let msg = raw(b"From: a@b.c\r\nSubject: =?UTF-8?Q?Temporary?= =?UTF-8?Q?_access_code?=\r\n\r\nbody");
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.subject, "Temporary access code");
    }

    #[test]
    fn test_multipart_prefers_html() {
        let msg = raw(concat!(
            "From: a@b.c\r\n",
            "Message-ID: <abc@mail>\r\n",
            "Date: Tue, 14 Oct 2025 10:00:00 +0000\r\n",
            "Content-Type: multipart/alternative; boundary=\"XX\"\r\n",
            "\r\n",
            "--XX\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain version\r\n",
            "--XX\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html version</p>\r\n",
            "--XX--\r\n",
        )
        .as_bytes());
        let decoded = decode(&msg).unwrap();
        assert!(decoded.body.contains("html version"));
        assert_eq!(decoded.message_id.as_deref(), Some("<abc@mail>"));
        assert_eq!(
            decoded.date.map(|d| d.to_rfc3339()),
            Some("2025-10-14T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_multipart_falls_back_to_plain() {
        let msg = raw(concat!(
            "From: a@b.c\r\n",
            "Content-Type: multipart/mixed; boundary=\"XX\"\r\n",
            "\r\n",
            "--XX\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "\r\n",
            "--XX\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "second plain\r\n",
            "--XX\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
            "binary\r\n",
            "--XX--\r\n",
        )
        .as_bytes());
        let decoded = decode(&msg).unwrap();
        assert!(decoded.body.contains("second plain"));
    }

    #[test]
    fn test_nested_multipart_html_found() {
        let msg = raw(concat!(
            "From: a@b.c\r\n",
            "Content-Type: multipart/mixed; boundary=\"OUT\"\r\n",
            "\r\n",
            "--OUT\r\n",
            "Content-Type: multipart/alternative; boundary=\"IN\"\r\n",
            "\r\n",
            "--IN\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain\r\n",
            "--IN\r\n",
            "Content-Type: text/html\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "<a href=3D\"https://www.netflix.com/account/household\">x</a>\r\n",
            "--IN--\r\n",
            "--OUT--\r\n",
        )
        .as_bytes());
        let decoded = decode(&msg).unwrap();
        assert!(decoded
            .body
            .contains("href=\"https://www.netflix.com/account/household\""));
    }
}
