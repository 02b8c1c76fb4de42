//! Destination file name derivation.
//!
//! The name comes from the `Content-Disposition` header when the server sends
//! one, otherwise from the last segment of the response URL path. Anything
//! that could escape the output directory is rejected.
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::Url;
use std::path::{Component, Path};
use tracing::debug;

use crate::downloader::DownloadError;

/// Derives the destination file name from the response headers and URL.
pub fn extract_filename(headers: &HeaderMap, url: &Url) -> Result<String, DownloadError> {
    let from_header = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(disposition_filename);

    let candidate = match from_header {
        Some(name) => name,
        None => percent_decode_str(url.path()).decode_utf8_lossy().into_owned(),
    };

    sanitize(&candidate)
}

/// Reduces a raw name to a single, safe path component.
pub fn sanitize(raw: &str) -> Result<String, DownloadError> {
    if raw.is_empty() || raw.ends_with('/') || raw.ends_with('\\') || raw.contains('\0') {
        return Err(DownloadError::MissingFilename);
    }

    let path = Path::new(raw);
    if path.components().any(|c| matches!(c, Component::ParentDir)) || raw.split('\\').any(|part| part == "..") {
        return Err(DownloadError::MissingFilename);
    }

    // Only the last normal component survives, so `/a/b/c.txt` becomes `c.txt`.
    let name = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .last()
        .and_then(|last| last.rsplit('\\').next())
        .unwrap_or_default();

    if name.is_empty() || name == "." {
        return Err(DownloadError::MissingFilename);
    }
    Ok(name.to_string())
}

/// Pulls the file name parameter out of a `Content-Disposition` value.
///
/// `filename*` (RFC 5987, `charset'lang'percent-encoded`) wins over
/// `filename`. A `filename*` that does not decode to UTF-8 is ignored.
/// Returns `None` when neither parameter is usable.
fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(value).into_iter().skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();

        match key.as_str() {
            "filename*" => {
                let encoded = match raw.find("''") {
                    Some(pos) => &raw[pos + 2..],
                    None => raw,
                };
                match percent_decode_str(encoded.trim_matches('"')).decode_utf8() {
                    Ok(decoded) => extended = Some(decoded.into_owned()),
                    Err(e) => debug!("Ignoring undecodable filename* parameter: {}", e),
                }
            }
            "filename" => plain = Some(unquote(raw)),
            _ => {}
        }
    }

    extended.or(plain)
}

/// Splits a header value on `;`, leaving separators inside quoted strings
/// alone. Backslash escapes inside quotes are kept for `unquote`.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return raw.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn disposition(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn falls_back_to_url_path() {
        let name = extract_filename(&HeaderMap::new(), &url("https://example.com/pub/archive.tar.gz?x=1")).unwrap();
        assert_eq!(name, "archive.tar.gz");

        let name = extract_filename(&HeaderMap::new(), &url("https://example.com/my%20photo.jpg")).unwrap();
        assert_eq!(name, "my photo.jpg");
    }

    #[test]
    fn prefers_content_disposition() {
        let headers = disposition("attachment; filename=\"report.pdf\"");
        let name = extract_filename(&headers, &url("https://example.com/download?id=7")).unwrap();
        assert_eq!(name, "report.pdf");

        let headers = disposition("attachment; filename=plain.txt");
        let name = extract_filename(&headers, &url("https://example.com/x")).unwrap();
        assert_eq!(name, "plain.txt");
    }

    #[test]
    fn extended_filename_wins() {
        let headers = disposition("attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve%20file.txt");
        let name = extract_filename(&headers, &url("https://example.com/x")).unwrap();
        assert_eq!(name, "naïve file.txt");
    }

    #[test]
    fn semicolon_inside_quotes_is_part_of_the_name() {
        let headers = disposition("attachment; filename=\"a;b.txt\"");
        let name = extract_filename(&headers, &url("https://example.com/x")).unwrap();
        assert_eq!(name, "a;b.txt");

        let headers = disposition("attachment; filename=\"say \\\"hi\\\"; now.txt\"; size=3");
        let name = extract_filename(&headers, &url("https://example.com/x")).unwrap();
        assert_eq!(name, "say \"hi\"; now.txt");
    }

    #[test]
    fn undecodable_extended_name_falls_back_to_plain() {
        let headers = disposition("attachment; filename=\"good.txt\"; filename*=UTF-8''%FF%FE.txt");
        let name = extract_filename(&headers, &url("https://example.com/x")).unwrap();
        assert_eq!(name, "good.txt");
    }

    #[test]
    fn disposition_without_filename_uses_path() {
        let headers = disposition("inline");
        let name = extract_filename(&headers, &url("https://example.com/files/data.bin")).unwrap();
        assert_eq!(name, "data.bin");
    }

    #[test]
    fn rejects_missing_name() {
        assert!(matches!(
            extract_filename(&HeaderMap::new(), &url("https://example.com/")),
            Err(DownloadError::MissingFilename)
        ));
        assert!(matches!(
            extract_filename(&HeaderMap::new(), &url("https://example.com/dir/")),
            Err(DownloadError::MissingFilename)
        ));
    }

    #[test]
    fn rejects_traversal_nul_and_trailing_separator() {
        for raw in ["../etc/passwd", "a/../../b", "..\\win.ini", "bad\0name", "dir/", "dir\\", "..", ""] {
            assert!(
                matches!(sanitize(raw), Err(DownloadError::MissingFilename)),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn traversal_in_header_is_rejected() {
        let headers = disposition("attachment; filename=\"../../evil.sh\"");
        assert!(matches!(
            extract_filename(&headers, &url("https://example.com/ok.bin")),
            Err(DownloadError::MissingFilename)
        ));
    }

    #[test]
    fn keeps_last_component_only() {
        assert_eq!(sanitize("/var/tmp/file.iso").unwrap(), "file.iso");
        assert_eq!(sanitize("./notes.md").unwrap(), "notes.md");
        assert_eq!(sanitize("c:\\temp\\setup.exe").unwrap(), "setup.exe");
    }
}
