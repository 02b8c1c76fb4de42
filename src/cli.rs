use clap::Parser;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;
use tracing::warn;

pub const USAGE: &str = "grab [--header <header> [--header <header>]] [[rate limit:]url...]";

const AFTER_HELP: &str = "\
--header: Specify your HTTP header in the format \"key:value\"
rate limit: limits the download speed, unit is in KBs
url...: URLs to download";

/// Download several files at once, with per-file speed limits and resume.
#[derive(Parser, Debug)]
#[command(name = "grab", version, about, override_usage = USAGE, after_help = AFTER_HELP)]
pub struct Args {
    /// HTTP header to send with every request, as "key:value". Repeatable.
    #[arg(long = "header", short = 'H', value_name = "key:value")]
    pub headers: Vec<String>,

    /// Directory to save the files into.
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// URLs to download, each optionally prefixed with "<limit>:" in KB/s.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
}

/// Splits an optional `"<limit>:"` prefix off a URL.
///
/// Returns `-1` and the input untouched when the part before the first colon
/// is not an integer, which is the case for a plain `http://...` URL.
pub fn extract_rate_limit(raw: &str) -> (i64, &str) {
    match raw.split_once(':') {
        Some((prefix, rest)) => match parse_int(prefix) {
            Some(limit) => (limit, rest),
            None => (-1, raw),
        },
        None => (-1, raw),
    }
}

/// Integer with an optional sign and `0x`/`0o`/`0b` radix prefix.
fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let lower = digits.to_ascii_lowercase();
    let (radix, digits) = if let Some(hex) = lower.strip_prefix("0x") {
        (16, hex)
    } else if let Some(oct) = lower.strip_prefix("0o") {
        (8, oct)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        (2, bin)
    } else {
        (10, lower.as_str())
    };

    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let value = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -value } else { value })
}

/// Builds the request headers from repeated `key:value` flags.
///
/// Entries without a colon are dropped silently; entries that are not valid
/// HTTP header names or values are dropped with a warning. A later entry for
/// the same name replaces an earlier one.
pub fn parse_headers(entries: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Ignoring invalid header {:?}", entry),
        }
    }
    headers
}
