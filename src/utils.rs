//! Utility functions for artifact naming and path manipulation

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// File name used when a URL has no usable last path segment
const FALLBACK_ARTIFACT_NAME: &str = "download";

/// Derive a local file name from the last segment of a URL path
///
/// The segment is percent-decoded. Unlike a display name, the extension is
/// kept because the decompressor dispatches on it.
///
/// # Examples
///
/// ```
/// use corpus_dl::utils::artifact_name_from_url;
///
/// assert_eq!(
///     artifact_name_from_url("https://example.com/main/comments.json.bz2"),
///     "comments.json.bz2"
/// );
/// assert_eq!(artifact_name_from_url("https://example.com/"), "download");
/// ```
pub fn artifact_name_from_url(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        let decoded = urlencoding::decode(last_segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last_segment.to_string());

        // A decoded "/" would escape data_dir
        if !decoded.contains('/') && !decoded.contains('\\') && decoded != ".." {
            return decoded;
        }
    }

    FALLBACK_ARTIFACT_NAME.to_string()
}

/// Append `suffix` to the full file name of `path`
///
/// `with_suffix("a/sarc.json.bz2", ".part")` yields `a/sarc.json.bz2.part`,
/// unlike [`Path::with_extension`] which would replace `bz2`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Directory a path lives in, treating a bare file name as the working directory
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_is_percent_decoded() {
        assert_eq!(
            artifact_name_from_url("https://example.com/files/my%20corpus.json.gz"),
            "my corpus.json.gz"
        );
    }

    #[test]
    fn artifact_name_ignores_query_string() {
        assert_eq!(
            artifact_name_from_url("https://example.com/c.json.bz2?token=abc"),
            "c.json.bz2"
        );
    }

    #[test]
    fn artifact_name_falls_back_for_unusable_urls() {
        assert_eq!(artifact_name_from_url("not a url"), "download");
        assert_eq!(artifact_name_from_url("https://example.com"), "download");
        assert_eq!(
            artifact_name_from_url("https://example.com/a%2F..%2Fetc"),
            "download",
            "encoded separators must not produce a nested path"
        );
    }

    #[test]
    fn with_suffix_keeps_existing_extension() {
        assert_eq!(
            with_suffix(Path::new("dir/sarc.json.bz2"), ".part"),
            PathBuf::from("dir/sarc.json.bz2.part")
        );
    }

    #[test]
    fn parent_dir_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("sarc.csv")), Path::new("."));
        assert_eq!(parent_dir(Path::new("out/sarc.csv")), Path::new("out"));
    }
}
