use url::Url;

use crate::error::CrawlError;
use crate::types::Fingerprint;

/// Extensions treated as static files (matched against the last path
/// segment, case-insensitive).
pub const STATIC_EXTENSIONS: &[&str] = &[
    // images
    "avif", "apng", "bmp", "gif", "ico", "jpg", "jpeg", "png", "svg", "tif", "tiff", "webp",
    "heic", // fonts
    "woff", "woff2", "ttf", "otf", "eot", // styles and scripts
    "css", "js", "mjs", // documents and archives
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "tar", "gz", "7z", "rar",
    // audio
    "mp3", "ogg", "wav", "flac", // video
    "mp4", "webm", "mkv", "mov", "avi", // data
    "xml", "json", "txt", "csv",
];

/// Parse and normalize an absolute URL: lowercase scheme and host, default
/// port stripped, dot segments collapsed, fragment dropped, percent
/// encodings upper-hexed. Idempotent.
pub fn canonicalize(raw: &str) -> Result<Url, CrawlError> {
    let url = Url::parse(raw).map_err(|e| CrawlError::InvalidUrl(format!("{raw}: {e}")))?;
    Ok(normalize(url))
}

/// Resolve `raw` against `base`, then normalize.
pub fn canonicalize_in(base: &Url, raw: &str) -> Result<Url, CrawlError> {
    let url = base
        .join(raw)
        .map_err(|e| CrawlError::InvalidUrl(format!("{raw}: {e}")))?;
    Ok(normalize(url))
}

fn normalize(mut url: Url) -> Url {
    url.set_fragment(None);
    let upper = upper_percent(url.as_str());
    if upper != url.as_str() {
        if let Ok(reparsed) = Url::parse(&upper) {
            return reparsed;
        }
    }
    url
}

/// The canonical identity string a fingerprint is computed over.
pub fn canonical_string(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    upper_percent(u.as_str())
}

pub fn fingerprint(url: &Url) -> Fingerprint {
    Fingerprint::of(&canonical_string(url))
}

/// `host:port` with the scheme default filled in; distinct ports are
/// distinct origins.
pub fn origin_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    let port = url.port_or_known_default().unwrap_or(0);
    format!("{host}:{port}")
}

pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

pub fn is_static_extension(url: &Url) -> bool {
    let segment = url.path().rsplit('/').next().unwrap_or("");
    match segment.rsplit_once('.') {
        Some((_, ext)) => STATIC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Case-insensitive host glob: `*` matches any run of characters, so
/// `*.cdn.example` matches `img.cdn.example` but not `cdn.example`.
pub fn host_matches_glob(host: &str, glob: &str) -> bool {
    glob_match(&host.to_ascii_lowercase(), &glob.to_ascii_lowercase())
}

fn glob_match(text: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return text == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            let rest = &text[pos..];
            if !rest.ends_with(part) {
                return false;
            }
            pos = text.len();
        } else {
            match text[pos..].find(part) {
                Some(idx) => pos = pos + idx + part.len(),
                None => return false,
            }
        }
    }
    true
}

fn upper_percent(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push(b'%');
            out.push(bytes[i + 1].to_ascii_uppercase());
            out.push(bytes[i + 2].to_ascii_uppercase());
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).unwrap_or_else(|_| s.to_string())
}
