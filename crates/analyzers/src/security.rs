use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};

use siteaudit_core::{
    header_value, header_values, row, Column, ContentTypeId, Severity, SortDirection, SummaryItem,
    SummaryStatus, SuperTable, UrlAnalysis,
};
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer, PageView};

#[derive(Default, Clone)]
struct RuleCount {
    ok: u64,
    notice: u64,
    warning: u64,
    critical: u64,
}

impl RuleCount {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Ok => self.ok += 1,
            Severity::Notice => self.notice += 1,
            Severity::Warning => self.warning += 1,
            Severity::Critical => self.critical += 1,
        }
    }
}

/// Security-header rules plus HTML mixed-content checks on HTTPS pages.
/// Evaluated per HTML response; aggregated into a rule table at finalize.
#[derive(Default)]
pub struct SecurityAnalyzer {
    counts: Mutex<BTreeMap<&'static str, RuleCount>>,
}

#[async_trait]
impl Analyzer for SecurityAnalyzer {
    fn name(&self) -> &'static str {
        "security"
    }

    fn order(&self) -> i32 {
        20
    }

    fn on_fetched(&self, page: &PageView<'_>) -> Result<Option<UrlAnalysis>> {
        if page.visited.content_type != ContentTypeId::Html || !page.visited.is_success() {
            return Ok(None);
        }
        let is_https = page.visited.url.scheme() == "https";
        let mut analysis = UrlAnalysis::default();
        let mut findings: Vec<(&'static str, Severity, String)> =
            header_rules(page.headers, is_https);
        if is_https {
            if let Some(dom) = page.dom {
                findings.extend(content_rules(dom));
            }
        }
        let mut counts = lock(&self.counts);
        for (rule, severity, message) in findings {
            counts.entry(rule).or_default().bump(severity);
            analysis.add(severity, rule, message);
        }
        Ok(Some(analysis))
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let counts = lock(&self.counts).clone();
        let mut table = SuperTable::new(
            "security-headers",
            "Security rule results",
            vec![
                Column::new("rule", "Rule"),
                Column::new("ok", "OK"),
                Column::new("notice", "Notices"),
                Column::new("warning", "Warnings"),
                Column::new("critical", "Critical"),
            ],
        )
        .sorted_by("critical", SortDirection::Desc);
        let mut warnings = 0u64;
        let mut criticals = 0u64;
        for (rule, count) in &counts {
            warnings += count.warning;
            criticals += count.critical;
            table.push_row(row! {
                "rule" => *rule,
                "ok" => count.ok,
                "notice" => count.notice,
                "warning" => count.warning,
                "critical" => count.critical,
            });
        }
        table.sort_rows();
        store.append_table(table);

        let status = if criticals > 0 {
            SummaryStatus::Critical
        } else if warnings > 0 {
            SummaryStatus::Warning
        } else {
            SummaryStatus::Ok
        };
        store.add_summary(SummaryItem {
            code: "security".to_string(),
            message: format!(
                "security rules: {criticals} critical and {warnings} warning findings across {} rules",
                counts.len()
            ),
            status,
        });
        Ok(())
    }
}

fn header_rules(
    headers: &[(String, String)],
    is_https: bool,
) -> Vec<(&'static str, Severity, String)> {
    let mut findings = Vec::new();
    let mut push = |rule, severity, message: String| findings.push((rule, severity, message));

    match header_value(headers, "access-control-allow-origin") {
        Some("*") => push(
            "access-control-allow-origin",
            Severity::Notice,
            "CORS allows any origin".to_string(),
        ),
        Some(_) => push(
            "access-control-allow-origin",
            Severity::Ok,
            "CORS origin is restricted".to_string(),
        ),
        None => {}
    }

    if is_https {
        match header_value(headers, "strict-transport-security") {
            None => push(
                "strict-transport-security",
                Severity::Warning,
                "HSTS header missing on an HTTPS page".to_string(),
            ),
            Some(value) => {
                let max_age = value
                    .split(';')
                    .filter_map(|d| d.trim().strip_prefix("max-age="))
                    .filter_map(|v| v.parse::<i64>().ok())
                    .next()
                    .unwrap_or(0);
                if max_age < 31_536_000 {
                    push(
                        "strict-transport-security",
                        Severity::Notice,
                        format!("HSTS max-age {max_age} is below one year"),
                    );
                } else {
                    push(
                        "strict-transport-security",
                        Severity::Ok,
                        "HSTS configured".to_string(),
                    );
                }
            }
        }
    }

    let has_frame_ancestors = header_value(headers, "content-security-policy")
        .is_some_and(|csp| csp.contains("frame-ancestors"));
    match header_value(headers, "x-frame-options") {
        Some(_) => push("x-frame-options", Severity::Ok, "framing restricted".to_string()),
        None if has_frame_ancestors => push(
            "x-frame-options",
            Severity::Ok,
            "framing restricted via CSP frame-ancestors".to_string(),
        ),
        None => push(
            "x-frame-options",
            Severity::Notice,
            "no framing restriction (X-Frame-Options or frame-ancestors)".to_string(),
        ),
    }

    if let Some(value) = header_value(headers, "x-xss-protection") {
        if value.trim().starts_with('1') {
            push(
                "x-xss-protection",
                Severity::Notice,
                "X-XSS-Protection auditor is deprecated and can introduce issues".to_string(),
            );
        } else {
            push("x-xss-protection", Severity::Ok, "auditor disabled".to_string());
        }
    }

    match header_value(headers, "x-content-type-options") {
        Some(v) if v.trim().eq_ignore_ascii_case("nosniff") => push(
            "x-content-type-options",
            Severity::Ok,
            "nosniff set".to_string(),
        ),
        _ => push(
            "x-content-type-options",
            Severity::Warning,
            "X-Content-Type-Options: nosniff missing".to_string(),
        ),
    }

    match header_value(headers, "referrer-policy") {
        Some(_) => push("referrer-policy", Severity::Ok, "referrer policy set".to_string()),
        None => push(
            "referrer-policy",
            Severity::Notice,
            "no Referrer-Policy header".to_string(),
        ),
    }

    match header_value(headers, "content-security-policy") {
        Some(_) => push(
            "content-security-policy",
            Severity::Ok,
            "CSP present".to_string(),
        ),
        None => push(
            "content-security-policy",
            Severity::Warning,
            "no Content-Security-Policy header".to_string(),
        ),
    }

    if header_value(headers, "feature-policy").is_some() {
        push(
            "feature-policy",
            Severity::Notice,
            "Feature-Policy is superseded by Permissions-Policy".to_string(),
        );
    }
    match header_value(headers, "permissions-policy") {
        Some(_) => push(
            "permissions-policy",
            Severity::Ok,
            "permissions policy set".to_string(),
        ),
        None => push(
            "permissions-policy",
            Severity::Notice,
            "no Permissions-Policy header".to_string(),
        ),
    }

    if let Some(server) = header_value(headers, "server") {
        if server.chars().any(|c| c.is_ascii_digit()) {
            push(
                "server",
                Severity::Notice,
                format!("Server header discloses a version: {server}"),
            );
        } else {
            push("server", Severity::Ok, "Server header without version".to_string());
        }
    }

    if let Some(powered) = header_value(headers, "x-powered-by") {
        push(
            "x-powered-by",
            Severity::Warning,
            format!("X-Powered-By discloses the stack: {powered}"),
        );
    }

    for cookie in header_values(headers, "set-cookie") {
        let lower = cookie.to_ascii_lowercase();
        let name = cookie.split('=').next().unwrap_or("cookie");
        if is_https && !lower.contains("secure") {
            push(
                "set-cookie",
                Severity::Warning,
                format!("cookie {name} lacks the Secure flag"),
            );
        }
        if !lower.contains("httponly") {
            push(
                "set-cookie",
                Severity::Notice,
                format!("cookie {name} lacks HttpOnly"),
            );
        }
        if !lower.contains("samesite") {
            push(
                "set-cookie",
                Severity::Notice,
                format!("cookie {name} lacks SameSite"),
            );
        }
    }

    findings
}

/// Mixed-content checks: plain-http form targets and iframes on HTTPS pages.
fn content_rules(dom: &Html) -> Vec<(&'static str, Severity, String)> {
    let mut findings = Vec::new();
    if let Ok(sel) = Selector::parse("form[action]") {
        for el in dom.select(&sel) {
            let action = el.value().attr("action").unwrap_or_default();
            if action.trim_start().to_ascii_lowercase().starts_with("http://") {
                findings.push((
                    "mixed-content",
                    Severity::Critical,
                    format!("form submits over plain http: {action}"),
                ));
            }
        }
    }
    if let Ok(sel) = Selector::parse("iframe[src]") {
        for el in dom.select(&sel) {
            let src = el.value().attr("src").unwrap_or_default();
            if src.trim_start().to_ascii_lowercase().starts_with("http://") {
                findings.push((
                    "mixed-content",
                    Severity::Critical,
                    format!("iframe loads over plain http: {src}"),
                ));
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{html_page, page_view};

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn missing_csp_is_a_warning() {
        let analyzer = SecurityAnalyzer::default();
        let (visited, dom) = html_page("https://ex.com/", "<html></html>");
        let hdrs = headers(&[("content-type", "text/html")]);
        let analysis = analyzer
            .on_fetched(&page_view(&visited, Some(&dom), &hdrs))
            .expect("hook succeeds")
            .expect("analysis produced");
        assert!(analysis
            .findings
            .iter()
            .any(|f| f.analysis == "content-security-policy" && f.severity == Severity::Warning));

        let store = ResultStore::new(1024);
        analyzer.finalize(&store).await.expect("finalize succeeds");
        let item = store
            .summary_items()
            .into_iter()
            .find(|i| i.code == "security")
            .expect("summary item");
        assert_eq!(item.status, SummaryStatus::Warning);
    }

    #[tokio::test]
    async fn hardened_response_is_ok() {
        let analyzer = SecurityAnalyzer::default();
        let (visited, dom) = html_page("https://ex.com/", "<html></html>");
        let hdrs = headers(&[
            ("strict-transport-security", "max-age=63072000"),
            ("x-content-type-options", "nosniff"),
            ("content-security-policy", "default-src 'self'; frame-ancestors 'none'"),
            ("referrer-policy", "no-referrer"),
            ("permissions-policy", "camera=()"),
        ]);
        let analysis = analyzer
            .on_fetched(&page_view(&visited, Some(&dom), &hdrs))
            .expect("hook succeeds")
            .expect("analysis produced");
        assert_eq!(analysis.count(Severity::Warning), 0);
        assert_eq!(analysis.count(Severity::Critical), 0);
    }

    #[test]
    fn insecure_cookies_flagged() {
        let hdrs = headers(&[
            ("set-cookie", "sid=1; Path=/"),
            ("set-cookie", "pref=2; Secure; HttpOnly; SameSite=Lax"),
        ]);
        let findings = header_rules(&hdrs, true);
        let cookie_warnings: Vec<_> = findings
            .iter()
            .filter(|(rule, severity, _)| *rule == "set-cookie" && *severity == Severity::Warning)
            .collect();
        assert_eq!(cookie_warnings.len(), 1);
        assert!(cookie_warnings[0].2.contains("sid"));
    }

    #[test]
    fn http_form_on_https_page_is_critical() {
        let dom = Html::parse_document(r#"<form action="http://ex.com/login"></form>"#);
        let findings = content_rules(&dom);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].1, Severity::Critical);
    }

    #[test]
    fn version_disclosure_is_noticed() {
        let findings = header_rules(&headers(&[("server", "nginx/1.25.3")]), false);
        assert!(findings
            .iter()
            .any(|(rule, severity, _)| *rule == "server" && *severity == Severity::Notice));
        let findings = header_rules(&headers(&[("server", "nginx")]), false);
        assert!(findings
            .iter()
            .any(|(rule, severity, _)| *rule == "server" && *severity == Severity::Ok));
    }
}
