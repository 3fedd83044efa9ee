//! Heuristics deciding whether a request or response body is file content
//! that should pass through the cipher. Structured payloads (WebDAV XML,
//! form posts, API responses) are forwarded untouched.

/// Content types that indicate a structured payload rather than a file.
const NON_FILE_CONTENT_TYPES: [&str; 8] = [
    "text/html",
    "text/xml",
    "application/xml",
    "application/json",
    "text/css",
    "application/javascript",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
];

const FILE_CONTENT_TYPES: [&str; 12] = [
    "application/octet-stream",
    "application/pdf",
    "image/",
    "video/",
    "audio/",
    "text/plain",
    "application/msword",
    "application/vnd.",
    "application/zip",
    "application/x-rar-compressed",
    "application/x-tar",
    "application/x-gzip",
];

const FILE_EXTENSIONS: [&str; 45] = [
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".mp4", ".avi", ".mov",
    ".wmv", ".flv", ".mkv", ".webm", ".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a", ".doc",
    ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".zip", ".rar", ".7z", ".tar", ".gz", ".bz2",
    ".txt", ".log", ".csv", ".json", ".xml", ".yaml", ".yml", ".exe", ".dmg", ".pkg", ".deb",
    ".rpm",
];

/// Whether a `Content-Type` value looks like file content. Types that are
/// neither blacklisted nor whitelisted default to file.
pub fn is_file_content_type(content_type: &str) -> bool {
    if NON_FILE_CONTENT_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
    {
        return false;
    }
    // Everything past the blacklist counts as a file, so this whitelist
    // only documents the types commonly seen; it never changes the result.
    if FILE_CONTENT_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
    {
        return true;
    }
    true
}

/// Whether the URL path ends in a known file extension (case-insensitive).
pub fn has_file_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_types_are_not_files() {
        assert!(!is_file_content_type("application/json"));
        assert!(!is_file_content_type("application/json; charset=utf-8"));
        assert!(!is_file_content_type("text/html"));
        assert!(!is_file_content_type("multipart/form-data; boundary=x"));
    }

    #[test]
    fn known_file_types_are_files() {
        assert!(is_file_content_type("application/octet-stream"));
        assert!(is_file_content_type("image/png"));
        assert!(is_file_content_type("video/mp4"));
        assert!(is_file_content_type(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ));
    }

    #[test]
    fn unlisted_types_default_to_file() {
        assert!(is_file_content_type(""));
        assert!(is_file_content_type("application/x-custom"));
    }

    #[test]
    fn extensions_match_case_insensitively() {
        assert!(has_file_extension("/docs/report.PDF"));
        assert!(has_file_extension("/photos/cat.jpeg"));
        assert!(has_file_extension("/backup/archive.tar"));
        assert!(!has_file_extension("/api/items"));
        assert!(!has_file_extension("/folder/"));
    }
}
