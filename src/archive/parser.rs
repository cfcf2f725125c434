use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use url::Url;

use crate::models::CandidateEntry;
use crate::error::ParseError;

/// Day headers carry e.g. "Mon Mar 01 2021"; chrono rejects a weekday that
/// does not match the date.
const DAY_HEADER_FORMAT: &str = "%a %b %d %Y";

const TEASER_WIDTH: usize = 80;
const TEASER_MAX_CHARS: usize = 280;

fn body_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<body[\s>]").expect("static regex"))
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<h2[^>]*>(?P<day>[^<]*)</h2>|<li[^>]*>(?P<item>.*?)</li>")
            .expect("static regex")
    })
}

fn leading_anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)^\s*<a\b[^>]*?\bhref\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#)
            .expect("static regex")
    })
}

fn strip_anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*<a\b[^>]*>.*?</a>").expect("static regex"))
}

/// Parse one month's archive page into candidate entries.
///
/// The page is treated as a flat sequence of day headers and list items in
/// document order: each `<h2>` day header opens a day, each following `<li>`
/// belongs to it and is numbered from 1. A malformed item is skipped; a
/// malformed day header or an unrecognizable document aborts the parse.
/// Output is document order; callers re-sort by `(day, relative_number)` if
/// an order is needed.
pub fn parse_month_page(html: &str, base_url: &Url) -> Result<Vec<CandidateEntry>, ParseError> {
    if !body_regex().is_match(html) {
        return Err(ParseError::MalformedDocument);
    }

    let mut candidates = Vec::new();
    let mut current_day: Option<NaiveDate> = None;
    let mut relative_number: i64 = 0;

    for token in token_regex().captures_iter(html) {
        if let Some(header) = token.name("day") {
            let text = header.as_str().trim();
            let day = NaiveDate::parse_from_str(text, DAY_HEADER_FORMAT)
                .map_err(|_| ParseError::DateFormat(text.to_string()))?;
            current_day = Some(day);
            relative_number = 0;
        } else if let Some(item) = token.name("item") {
            let Some(day) = current_day else {
                // Malformed leading content before the first day header.
                tracing::debug!("dropping list item before first day header");
                continue;
            };
            relative_number += 1;
            match candidate_from_item(item.as_str(), base_url, day, relative_number) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => tracing::debug!("{}", e),
            }
        }
    }

    Ok(candidates)
}

/// Validate one list item and snapshot it as a candidate entry.
///
/// The item must start with a permalink: a link resolving to the archive's
/// own host whose query carries a hex `ts` id. The permalink anchor is
/// stripped before the remaining markup is captured as content, so stored
/// entries do not re-embed a self-link.
fn candidate_from_item(
    item_html: &str,
    base_url: &Url,
    day: NaiveDate,
    relative_number: i64,
) -> Result<CandidateEntry, ParseError> {
    let anchor = leading_anchor_regex()
        .captures(item_html)
        .ok_or_else(|| ParseError::ItemStructure("first child is not a link".to_string()))?;
    let href = anchor
        .name("dq")
        .or_else(|| anchor.name("sq"))
        .map(|m| m.as_str())
        .unwrap_or_default();

    let target = base_url
        .join(href)
        .map_err(|e| ParseError::ItemStructure(format!("unresolvable link target: {e}")))?;
    if target.host_str() != base_url.host_str() {
        return Err(ParseError::ItemStructure(format!(
            "link leaves the archive host: {target}"
        )));
    }

    let ts = target
        .query_pairs()
        .find(|(key, _)| key == "ts")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| ParseError::ItemStructure("permalink carries no ts marker".to_string()))?;
    let entry_id = i64::from_str_radix(ts.trim(), 16)
        .map_err(|_| ParseError::ItemStructure(format!("ts value {ts:?} is not hex")))?;

    let content = strip_anchor_regex().replace(item_html, "").trim().to_string();
    let teaser = teaser_from_html(&content);

    Ok(CandidateEntry {
        entry_id,
        day,
        relative_number,
        content,
        teaser,
    })
}

/// Flatten entry markup into a single-line plain-text preview.
fn teaser_from_html(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), TEASER_WIDTH).unwrap_or_default();
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > TEASER_MAX_CHARS {
        flat.chars().take(TEASER_MAX_CHARS).collect()
    } else {
        flat
    }
}
