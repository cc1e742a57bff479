//! Content extraction from email bodies.
//!
//! This module provides the [`Matcher`] trait and the regex-based implementations the
//! classifier is assembled from.
//!
//! # Example
//!
//! ```
//! use household_watch::matcher::{CodeMatcher, FirstOf, Matcher, RegexMatcher};
//!
//! let code = CodeMatcher::six_digit();
//! assert_eq!(code.find_match("Your code is 123456.").as_deref(), Some("123456"));
//!
//! let links = FirstOf::new(
//!     vec![
//!         RegexMatcher::case_insensitive(r"href=(https://a\.example/\S+)").unwrap(),
//!         RegexMatcher::case_insensitive(r"href=(https://b\.example/\S+)").unwrap(),
//!     ],
//!     "example links",
//! );
//! assert_eq!(links.find_match("HREF=https://b.example/x").as_deref(), Some("https://b.example/x"));
//! ```

use regex::{Regex, RegexBuilder};
use std::borrow::Cow;

/// Trait for matching and extracting content from email text.
pub trait Matcher: Send + Sync {
    /// Attempts to find and extract matching content from the text.
    ///
    /// Returns `Some(matched_value)` if found, `None` otherwise.
    /// Uses `Cow<str>` to avoid allocations when the match can be borrowed
    /// directly from the input text.
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>>;

    /// Returns a human-readable description of what this matcher looks for.
    fn description(&self) -> &str;
}

/// Regex-based matcher that extracts the first capture group.
///
/// ```
/// use household_watch::matcher::{Matcher, RegexMatcher};
///
/// let matcher = RegexMatcher::new(r"code:\s*(\d+)").unwrap();
/// assert_eq!(matcher.find_match("Your code: 42"), Some("42".into()));
/// ```
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a case-sensitive matcher. The first capture group is extracted.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Self::build(pattern, false, format!("regex pattern: {pattern}"))
    }

    /// Creates a case-insensitive matcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn case_insensitive(pattern: &str) -> Result<Self, regex::Error> {
        Self::build(pattern, true, format!("regex pattern (?i): {pattern}"))
    }

    /// Creates a matcher with a custom description.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn with_description(
        pattern: &str,
        case_insensitive: bool,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Self::build(pattern, case_insensitive, description.into())
    }

    fn build(
        pattern: &str,
        case_insensitive: bool,
        description: String,
    ) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .multi_line(true)
            .build()?;
        Ok(Self { regex, description })
    }
}

impl Matcher for RegexMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| Cow::Borrowed(m.as_str()))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Ordered list of matchers; the first one that matches wins.
#[derive(Debug, Clone)]
pub struct FirstOf<M> {
    matchers: Vec<M>,
    description: String,
}

impl<M: Matcher> FirstOf<M> {
    #[must_use]
    pub fn new(matchers: Vec<M>, description: impl Into<String>) -> Self {
        Self {
            matchers,
            description: description.into(),
        }
    }
}

impl<M: Matcher> Matcher for FirstOf<M> {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.matchers.iter().find_map(|m| m.find_match(text))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Matcher for standalone numeric codes.
///
/// ```
/// use household_watch::matcher::{CodeMatcher, Matcher};
///
/// let code = CodeMatcher::six_digit();
/// assert_eq!(code.find_match("Code: 12345"), None);
/// assert_eq!(code.find_match("Code: 1234567"), None);
/// ```
#[derive(Debug, Clone)]
pub struct CodeMatcher {
    inner: RegexMatcher,
}

impl CodeMatcher {
    /// Creates a matcher for 6-digit codes.
    #[must_use]
    pub fn six_digit() -> Self {
        Self::n_digit(6)
    }

    /// Creates a matcher for N-digit codes bounded by non-word characters.
    ///
    /// # Panics
    ///
    /// Panics if `digits` is 0.
    #[must_use]
    pub fn n_digit(digits: usize) -> Self {
        assert!(digits > 0, "digits must be > 0");
        let pattern = format!(r"\b(\d{{{digits}}})\b");
        Self {
            inner: RegexMatcher::with_description(
                &pattern,
                false,
                format!("{digits}-digit code"),
            )
            .expect("valid regex"),
        }
    }
}

impl Matcher for CodeMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.inner.find_match(text)
    }

    fn description(&self) -> &str {
        self.inner.description()
    }
}
