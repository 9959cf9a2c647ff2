//! MIME type detection for exposed files.
//!
//! Served copies keep the source extension, so the type can be inferred from the copy alone.

use std::path::Path;

/// Detect MIME type by file extension.
pub fn detect_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        // Images
        "jpg" | "jpeg" => "image/jpeg",
        "png"          => "image/png",
        "gif"          => "image/gif",
        "webp"         => "image/webp",
        "svg"          => "image/svg+xml",
        "avif"         => "image/avif",
        "bmp"          => "image/bmp",
        "ico"          => "image/x-icon",
        "tiff" | "tif" => "image/tiff",
        "heic"         => "image/heic",

        // Audio
        "mp3"          => "audio/mpeg",
        "ogg"          => "audio/ogg",
        "wav"          => "audio/wav",
        "flac"         => "audio/flac",
        "m4a"          => "audio/mp4",
        "opus"         => "audio/opus",
        "aac"          => "audio/aac",

        // Video
        "mp4"          => "video/mp4",
        "webm"         => "video/webm",
        "mkv"          => "video/x-matroska",
        "mov"          => "video/quicktime",
        "avi"          => "video/x-msvideo",
        "ogv"          => "video/ogg",

        // Documents and archives
        "pdf"          => "application/pdf",
        "txt" | "log"  => "text/plain",
        "md"           => "text/markdown",
        "html" | "htm" => "text/html",
        "css"          => "text/css",
        "js"           => "text/javascript",
        "json"         => "application/json",
        "xml"          => "application/xml",
        "csv"          => "text/csv",
        "zip"          => "application/zip",
        "gz"           => "application/gzip",
        "tar"          => "application/x-tar",
        "docx"         => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx"         => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx"         => "application/vnd.openxmlformats-officedocument.presentationml.presentation",

        _              => "application/octet-stream",
    }
}

/// Whether a file is safe to render inline rather than force a download.
///
/// HTML, SVG and JavaScript are excluded: served inline from a public URL they would run
/// script under the tunnel's origin.
pub fn is_inline_safe(mime: &str) -> bool {
    matches!(
        mime,
        "image/jpeg" | "image/png" | "image/gif" | "image/webp" | "image/avif"
        | "audio/mpeg" | "audio/ogg" | "audio/wav" | "audio/mp4"
        | "video/mp4" | "video/webm"
        | "text/plain" | "application/pdf"
    )
}
