use serde_json::Value;
use tracing::debug;
use url::Url;

use siteaudit_core::SourceAttr;

use crate::{resolve, Extraction};

/// Web app manifest: `icons[].src` and `start_url`.
pub fn extract(body: &[u8], base: &Url) -> Extraction {
    let mut out = Extraction::default();
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            debug!(url = %base, error = %e, "manifest is not valid json");
            out.notices.push(format!("manifest parse failed: {e}"));
            return out;
        }
    };
    if let Some(icons) = parsed.get("icons").and_then(Value::as_array) {
        for icon in icons {
            if let Some(src) = icon.get("src").and_then(Value::as_str) {
                if let Some(url) = resolve(base, src) {
                    out.push(url, SourceAttr::Manifest);
                }
            }
        }
    }
    if let Some(start) = parsed.get("start_url").and_then(Value::as_str) {
        if let Some(url) = resolve(base, start) {
            out.push(url, SourceAttr::Manifest);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteaudit_core::url as urlmod;

    fn base() -> Url {
        urlmod::canonicalize("https://ex.com/app.webmanifest").expect("base parses")
    }

    #[test]
    fn icons_and_start_url() {
        let body = br#"{
            "name": "App",
            "start_url": "/home",
            "icons": [
                {"src": "icon-192.png", "sizes": "192x192"},
                {"src": "/icons/icon-512.png"}
            ]
        }"#;
        let out = extract(body, &base());
        let urls: Vec<String> = out.links.iter().map(|l| l.url.as_str().to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "https://ex.com/icon-192.png",
                "https://ex.com/icons/icon-512.png",
                "https://ex.com/home"
            ]
        );
        assert!(out.links.iter().all(|l| l.attr == SourceAttr::Manifest));
    }

    #[test]
    fn invalid_json_notices() {
        let out = extract(b"not json", &base());
        assert!(out.links.is_empty());
        assert_eq!(out.notices.len(), 1);
    }
}
