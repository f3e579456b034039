use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Severity buckets for per-URL findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Notice,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub severity: Severity,
    /// Name of the analysis rule that produced this finding.
    pub analysis: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Per-URL, per-analyzer findings. Produced during the per-URL hook,
/// read-only afterward.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UrlAnalysis {
    pub findings: Vec<Finding>,
}

impl UrlAnalysis {
    pub fn add(&mut self, severity: Severity, analysis: &str, message: impl Into<String>) {
        self.findings.push(Finding {
            severity,
            analysis: analysis.to_string(),
            message: message.into(),
            details: Vec::new(),
        });
    }

    pub fn add_with_details(
        &mut self,
        severity: Severity,
        analysis: &str,
        message: impl Into<String>,
        details: Vec<String>,
    ) {
        self.findings.push(Finding {
            severity,
            analysis: analysis.to_string(),
            message: message.into(),
            details,
        });
    }

    pub fn ok(&mut self, analysis: &str, message: impl Into<String>) {
        self.add(Severity::Ok, analysis, message);
    }

    pub fn notice(&mut self, analysis: &str, message: impl Into<String>) {
        self.add(Severity::Notice, analysis, message);
    }

    pub fn warning(&mut self, analysis: &str, message: impl Into<String>) {
        self.add(Severity::Warning, analysis, message);
    }

    pub fn critical(&mut self, analysis: &str, message: impl Into<String>) {
        self.add(Severity::Critical, analysis, message);
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// Status of a summary line in the final health record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Ok,
    Notice,
    Warning,
    Critical,
    Info,
}

impl SummaryStatus {
    /// Render order: worst first, info last.
    pub fn rank(&self) -> u8 {
        match self {
            SummaryStatus::Critical => 0,
            SummaryStatus::Warning => 1,
            SummaryStatus::Notice => 2,
            SummaryStatus::Ok => 3,
            SummaryStatus::Info => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Ok => "ok",
            SummaryStatus::Notice => "notice",
            SummaryStatus::Warning => "warning",
            SummaryStatus::Critical => "critical",
            SummaryStatus::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryItem {
    /// Unique within the summary; last write wins.
    pub code: String,
    pub message: String,
    pub status: SummaryStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub key: String,
    pub name: String,
}

impl Column {
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

pub type Row = HashMap<String, Value>;

/// Tabular analyzer output consumed by reporters.
#[derive(Debug, Clone, Serialize)]
pub struct SuperTable {
    pub code: String,
    pub title: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub sort_key: Option<String>,
    pub sort_direction: SortDirection,
}

impl SuperTable {
    pub fn new(code: &str, title: &str, columns: Vec<Column>) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
            columns,
            rows: Vec::new(),
            sort_key: None,
            sort_direction: SortDirection::Asc,
        }
    }

    pub fn sorted_by(mut self, key: &str, direction: SortDirection) -> Self {
        self.sort_key = Some(key.to_string());
        self.sort_direction = direction;
        self
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Apply the configured sort. Numbers sort numerically, everything else
    /// by string representation.
    pub fn sort_rows(&mut self) {
        let Some(key) = self.sort_key.clone() else {
            return;
        };
        let direction = self.sort_direction;
        self.rows.sort_by(|a, b| {
            let ord = compare_cells(a.get(&key), b.get(&key));
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => cell_text(x).cmp(&cell_text(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds one table row from `(key, value)` pairs.
#[macro_export]
macro_rules! row {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut row = $crate::report::Row::new();
        $(row.insert($key.to_string(), ::serde_json::json!($value));)*
        row
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn analysis_buckets() {
        let mut analysis = UrlAnalysis::default();
        analysis.ok("title", "title present");
        analysis.warning("title", "title too long");
        analysis.critical("csp", "missing CSP");
        assert_eq!(analysis.count(Severity::Ok), 1);
        assert_eq!(analysis.count(Severity::Warning), 1);
        assert_eq!(analysis.count(Severity::Critical), 1);
        assert_eq!(analysis.count(Severity::Notice), 0);
    }

    #[test]
    fn table_numeric_sort() {
        let mut table = SuperTable::new("t", "T", vec![Column::new("n", "N")])
            .sorted_by("n", SortDirection::Desc);
        table.push_row(crate::row! {"n" => 2});
        table.push_row(crate::row! {"n" => 10});
        table.push_row(crate::row! {"n" => 1});
        table.sort_rows();
        let values: Vec<i64> = table
            .rows
            .iter()
            .map(|r| r.get("n").and_then(Value::as_i64).unwrap_or(0))
            .collect();
        assert_eq!(values, vec![10, 2, 1]);
    }

    #[test]
    fn table_string_sort() {
        let mut table = SuperTable::new("t", "T", vec![Column::new("s", "S")])
            .sorted_by("s", SortDirection::Asc);
        table.push_row(crate::row! {"s" => "b"});
        table.push_row(crate::row! {"s" => "a"});
        table.sort_rows();
        assert_eq!(table.rows[0].get("s"), Some(&json!("a")));
    }

    #[test]
    fn severity_rank_order() {
        assert!(SummaryStatus::Critical.rank() < SummaryStatus::Warning.rank());
        assert!(SummaryStatus::Ok.rank() < SummaryStatus::Info.rank());
    }
}
