//! Classification of vendor notifications.
//!
//! [`classify`] is a pure function of `(subject, body)`: no I/O, no clock, no state.
//! Rules are checked in order and the first match wins, all case-insensitive:
//!
//! 1. Temporary access: subject mentions a temporary/access code, or the body mentions
//!    a temporary access code.
//! 2. Household update: subject or body contains a household keyword.
//! 3. Anything else is [`EmailKind::Other`].
//!
//! ```
//! use household_watch::classifier::classify;
//! use household_watch::EmailKind;
//!
//! let body = r#"<a href="https://www.netflix.com/account/update-primary-location?nftoken=abc">Yes, this was me</a>"#;
//! let result = classify("Your Netflix household", body);
//! assert_eq!(result.kind, EmailKind::HouseholdUpdate);
//! assert_eq!(
//!     result.verification_link.as_deref(),
//!     Some("https://www.netflix.com/account/update-primary-location?nftoken=abc")
//! );
//! ```

use crate::matcher::{CodeMatcher, FirstOf, Matcher, RegexMatcher};
use crate::models::EmailKind;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Subject phrases that mark a temporary access email.
pub const TEMPORARY_SUBJECT_KEYWORDS: &[&str] =
    &["temporary access", "access code", "temporary code"];

/// Body phrases that mark a temporary access email.
pub const TEMPORARY_BODY_KEYWORDS: &[&str] =
    &["temporary access code", "get a temporary access code"];

/// Phrases that mark a household update email, in subject or body.
pub const HOUSEHOLD_KEYWORDS: &[&str] = &[
    "household",
    "update your netflix",
    "primary location",
    "this was me",
    "netflix household",
];

/// Recipient used when no greeting is found.
pub const UNKNOWN_RECIPIENT: &str = "Unknown";

static LINK_MATCHER: LazyLock<FirstOf<RegexMatcher>> = LazyLock::new(|| {
    let patterns = [
        r#"href=["']?(https://www\.netflix\.com/account/update-primary-location\?[^"'>\s]+)"#,
        r#"href=["']?(https://www\.netflix\.com/account/household[^"'>\s]*)"#,
        r#"href=["']?(https://www\.netflix\.com/account/travel[^"'>\s]*)"#,
        r#"href=["']?(https://www\.netflix\.com/[^"'>\s]*update[^"'>\s]*location[^"'>\s]*)"#,
    ];
    FirstOf::new(
        patterns
            .iter()
            .map(|p| RegexMatcher::case_insensitive(p).expect("valid regex"))
            .collect(),
        "verification link",
    )
});

static CODE_MATCHER: LazyLock<CodeMatcher> = LazyLock::new(CodeMatcher::six_digit);

// "Device: TV" on one line, or a "Device" label line followed by its value on the
// next non-blank line.
static DEVICE_MATCHER: LazyLock<RegexMatcher> = LazyLock::new(|| {
    RegexMatcher::with_description(
        r"^[ \t]*device\b[ \t]*:?\s*([^\r\n]+)",
        true,
        "device label",
    )
    .expect("valid regex")
});

static RECIPIENT_MATCHER: LazyLock<RegexMatcher> = LazyLock::new(|| {
    RegexMatcher::with_description(r"\bhi[ \t]+([^,<\r\n!]+)", true, "greeting")
        .expect("valid regex")
});

static INVISIBLE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(style|script|head)\b.*?</(style|script|head)\s*>").expect("valid regex")
});

static LINE_BREAK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|tr|td|th|li|h[1-6]|table)\s*>").expect("valid regex")
});

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Output of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: EmailKind,
    /// Household / travel verification URL, `&amp;` unescaped.
    pub verification_link: Option<String>,
    /// Six-digit code. Temporary access emails only.
    pub access_code: Option<String>,
    /// Text after a "Device" label. Temporary access emails only.
    pub device_info: Option<String>,
    /// Name from a "Hi <name>" greeting, or [`UNKNOWN_RECIPIENT`].
    pub recipient: String,
}

impl Classification {
    /// Whether the message should be recorded.
    #[must_use]
    pub fn is_relevant(&self) -> bool {
        self.kind != EmailKind::Other
    }
}

/// Determines the kind only.
#[must_use]
pub fn classify_kind(subject: &str, body: &str) -> EmailKind {
    let subject = subject.to_lowercase();
    let body = body.to_lowercase();

    let contains_any = |haystack: &str, needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if contains_any(&subject, TEMPORARY_SUBJECT_KEYWORDS)
        || contains_any(&body, TEMPORARY_BODY_KEYWORDS)
    {
        EmailKind::TemporaryAccess
    } else if contains_any(&subject, HOUSEHOLD_KEYWORDS) || contains_any(&body, HOUSEHOLD_KEYWORDS)
    {
        EmailKind::HouseholdUpdate
    } else {
        EmailKind::Other
    }
}

/// Classifies a message and extracts the fields relevant to its kind.
#[must_use]
pub fn classify(subject: &str, body: &str) -> Classification {
    let kind = classify_kind(subject, body);
    if kind == EmailKind::Other {
        return Classification {
            kind,
            verification_link: None,
            access_code: None,
            device_info: None,
            recipient: UNKNOWN_RECIPIENT.to_string(),
        };
    }

    let text = visible_text(body);

    let verification_link = extract_link(body);
    let recipient = RECIPIENT_MATCHER
        .find_match(&text)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_RECIPIENT.to_string());

    let (access_code, device_info) = if kind == EmailKind::TemporaryAccess {
        (
            CODE_MATCHER.find_match(&text).map(Cow::into_owned),
            DEVICE_MATCHER
                .find_match(&text)
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        )
    } else {
        (None, None)
    };

    Classification {
        kind,
        verification_link,
        access_code,
        device_info,
        recipient,
    }
}

/// First verification link in an HTML body.
#[must_use]
pub fn extract_link(body: &str) -> Option<String> {
    LINK_MATCHER
        .find_match(body)
        .map(|link| link.replace("&amp;", "&"))
}

/// Body text with markup removed and block-level tags turned into line breaks.
///
/// Plain-text bodies are returned unchanged.
pub(crate) fn visible_text(body: &str) -> Cow<'_, str> {
    if !body.contains('<') {
        return Cow::Borrowed(body);
    }
    let without_blocks = INVISIBLE_BLOCKS.replace_all(body, " ");
    let with_breaks = LINE_BREAK_TAGS.replace_all(&without_blocks, "\n");
    let text = TAGS.replace_all(&with_breaks, " ");
    Cow::Owned(
        text.replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&#39;", "'"),
    )
}
