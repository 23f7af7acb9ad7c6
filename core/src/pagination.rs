//! Cursor pagination carried in `Link` response headers.
//!
//! # Design
//! ATC list endpoints answer with links such as
//!
//! ```text
//! Link: <https://ci.example.com/api/v1/builds?until=40&limit=10>; rel="next",
//!       <https://ci.example.com/api/v1/builds?since=51&limit=10>; rel="previous"
//! ```
//!
//! All header parsing lives here; callers only see `Page` and `Pagination`.
//! A response without `Link` headers is the last page. A `Link` header that
//! is present but cannot be read is an error rather than a silent "no more
//! pages".

use thiserror::Error;
use url::Url;

use crate::http::Headers;

const REL_NEXT: &str = "next";
const REL_PREVIOUS: &str = "previous";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("malformed link entry '{0}'")]
    MalformedLink(String),

    #[error("invalid link target '{0}'")]
    InvalidUrl(String),

    #[error("invalid value '{value}' for '{key}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// Which way a page moves through the (newest-first) listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Items newer than `since`.
    Newer,
    /// Items older than `until`.
    Older,
}

/// A request for one page of a listing. Zero / `None` fields are omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u64>,
}

impl Page {
    pub fn first(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn since(since: u64, limit: u64) -> Self {
        Self {
            since: Some(since),
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn until(until: u64, limit: u64) -> Self {
        Self {
            until: Some(until),
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match (nonzero(self.since), nonzero(self.until)) {
            (Some(_), _) => Some(Direction::Newer),
            (None, Some(_)) => Some(Direction::Older),
            (None, None) => None,
        }
    }

    /// Query pairs in `since`, `until`, `limit` order.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        [("since", self.since), ("until", self.until), ("limit", self.limit)]
            .into_iter()
            .filter_map(|(key, value)| nonzero(value).map(|v| (key, v.to_string())))
            .collect()
    }
}

fn nonzero(value: Option<u64>) -> Option<u64> {
    value.filter(|v| *v != 0)
}

/// Follow-on pages advertised by a list response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub previous: Option<Page>,
    pub next: Option<Page>,
}

impl Pagination {
    pub fn is_terminal(&self) -> bool {
        self.previous.is_none() && self.next.is_none()
    }

    pub fn from_headers(headers: &Headers) -> Result<Self, PaginationError> {
        let mut pagination = Pagination::default();
        for value in headers.get_all("link") {
            for entry in split_entries(value) {
                let (target, rel) = parse_entry(entry)?;
                let page = match rel.as_str() {
                    REL_NEXT | REL_PREVIOUS => page_from_target(target)?,
                    _ => continue,
                };
                if rel == REL_NEXT {
                    pagination.next = Some(page);
                } else {
                    pagination.previous = Some(page);
                }
            }
        }
        Ok(pagination)
    }
}

/// Splits a header value into link entries.
fn split_entries(value: &str) -> impl Iterator<Item = &str> {
    split_outside(value, ',').into_iter().filter(|e| !e.is_empty())
}

/// Splits on `sep` wherever it is outside `<...>` and outside quoted
/// strings, honouring backslash escapes inside quotes. Pieces are trimmed.
fn split_outside(value: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        if quoted {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => quoted = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth == 0 => quoted = true,
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                pieces.push(value[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    pieces.push(value[start..].trim());
    pieces
}

/// `<target>; rel="name"; other=params` → (target, rel).
fn parse_entry(entry: &str) -> Result<(&str, String), PaginationError> {
    let malformed = || PaginationError::MalformedLink(entry.to_string());

    let rest = entry.strip_prefix('<').ok_or_else(malformed)?;
    let close = rest.find('>').ok_or_else(malformed)?;
    let target = &rest[..close];
    let params = rest[close + 1..].trim_start();

    if !params.is_empty() && !params.starts_with(';') {
        return Err(malformed());
    }

    let mut rel = None;
    for param in split_outside(params, ';').into_iter().filter(|p| !p.is_empty()) {
        let (key, value) = param.split_once('=').ok_or_else(malformed)?;
        if key.trim().eq_ignore_ascii_case("rel") {
            rel = Some(value.trim().trim_matches('"').to_ascii_lowercase());
        }
    }

    Ok((target, rel.ok_or_else(malformed)?))
}

fn page_from_target(target: &str) -> Result<Page, PaginationError> {
    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://link.invalid/")
            .and_then(|base| base.join(target))
            .map_err(|_| PaginationError::InvalidUrl(target.to_string()))?,
        Err(_) => return Err(PaginationError::InvalidUrl(target.to_string())),
    };

    let mut page = Page::default();
    for (key, value) in url.query_pairs() {
        let slot = match &*key {
            "since" => (&mut page.since, "since"),
            "until" => (&mut page.until, "until"),
            "limit" => (&mut page.limit, "limit"),
            _ => continue,
        };
        let number = value.parse::<u64>().map_err(|_| PaginationError::InvalidNumber {
            key: slot.1,
            value: value.to_string(),
        })?;
        *slot.0 = Some(number);
    }
    Ok(page)
}
