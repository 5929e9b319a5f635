//! Output path resolution.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use fastget::Url;
use percent_encoding::percent_decode_str;

/// File name used when the URL has no usable last segment.
pub const FALLBACK_FILE_NAME: &str = "download.bin";

/// Derive a file name from the URL's last path segment.
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8_lossy()
                .replace(['/', '\\'], "_")
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Resolve `-o`: a directory (existing, or spelled with a trailing
/// separator) receives the URL's file name, anything else is the file.
pub fn resolve_output(url: &Url, output: &Path) -> PathBuf {
    let looks_like_dir = output.to_string_lossy().ends_with(MAIN_SEPARATOR)
        || output.to_string_lossy().ends_with('/');

    if output.is_dir() || looks_like_dir {
        output.join(file_name_from_url(url))
    } else {
        output.to_path_buf()
    }
}
