use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::KiraError;
use crate::registration::RemoteFetcher;

pub const LISTING_QUERY: &str = "?C=M;O=D";
pub const RECENT_WINDOW_DAYS: i64 = 30;

static ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("row pattern compiles"));
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("cell pattern compiles"));
static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a[^>]*>(.*?)</a>").expect("anchor pattern compiles"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern compiles"));

/// `YYYY-MM` prefix of the month `RECENT_WINDOW_DAYS` before `now`.
pub fn default_since(now: DateTime<Utc>) -> String {
    let then = now - Duration::days(RECENT_WINDOW_DAYS);
    format!("{}-{:02}", then.year(), then.month())
}

pub fn recent_metadata_urls(html: &str, urlpath: &str, since: Option<&str>) -> Vec<String> {
    let since = since.map_or_else(|| default_since(Utc::now()), str::to_string);
    let mut urls = Vec::new();
    for row in ROW.captures_iter(html) {
        let cells = CELL
            .captures_iter(&row[1])
            .map(|cell| cell.get(1).map_or("", |m| m.as_str()).to_string())
            .collect::<Vec<_>>();
        let [_, name_cell, modified_cell, _, _] = cells.as_slice() else {
            continue;
        };
        if !text_of(modified_cell).trim_start().starts_with(&since) {
            continue;
        }
        let Some(anchor) = ANCHOR.captures(name_cell) else {
            continue;
        };
        let name = text_of(&anchor[1]);
        if name.ends_with(".json") {
            urls.push(format!("{urlpath}{name}"));
        }
    }
    debug!(since = %since, found = urls.len(), "scanned directory listing");
    urls
}

pub fn fetch_recent_metadata_urls<F: RemoteFetcher + ?Sized>(
    fetcher: &F,
    urlpath: &str,
    since: Option<&str>,
) -> Result<Vec<String>, KiraError> {
    let response = fetcher.get(&format!("{urlpath}{LISTING_QUERY}"))?;
    if response.status != 200 {
        return Err(KiraError::HttpStatus {
            status: response.status,
            message: format!("directory listing {urlpath} unavailable"),
        });
    }
    let html = String::from_utf8_lossy(&response.body);
    Ok(recent_metadata_urls(&html, urlpath, since))
}

fn text_of(fragment: &str) -> String {
    TAG.replace_all(fragment, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
