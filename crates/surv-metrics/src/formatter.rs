//! Result formatting: JSON, Table, and Markdown output.

use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Value};

use crate::arrivals::{Completeness, CompletenessPoint, SeriesPoint};

/// Output format for aggregation results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
    Markdown,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// Rows of labelled values, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

const STATS_COLUMNS: [&str; 5] = ["expected", "arrived", "prompt", "completeness", "promptness"];

fn stats_values(completeness: &Completeness) -> Vec<Value> {
    match completeness.stats() {
        Some(s) => vec![
            json!(s.expected),
            json!(s.arrived),
            json!(s.prompt),
            json!(s.completeness),
            json!(s.promptness),
        ],
        None => vec![Value::Null; STATS_COLUMNS.len()],
    }
}

fn columns(leading: &[&str]) -> Vec<String> {
    leading
        .iter()
        .chain(STATS_COLUMNS.iter())
        .map(|c| (*c).to_string())
        .collect()
}

impl Report {
    /// One row for a single aggregation of `entity` over `period`.
    #[must_use]
    pub fn completeness(entity: &str, period: &str, completeness: &Completeness) -> Self {
        let mut row = vec![json!(entity), json!(period)];
        row.extend(stats_values(completeness));
        Self {
            columns: columns(&["entity", "period"]),
            rows: vec![row],
        }
    }

    #[must_use]
    pub fn points(points: &[CompletenessPoint]) -> Self {
        Self {
            columns: columns(&["entity", "name"]),
            rows: points
                .iter()
                .map(|p| {
                    let mut row = vec![json!(p.entity), json!(p.name)];
                    row.extend(stats_values(&p.completeness));
                    row
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn series(series: &[SeriesPoint]) -> Self {
        Self {
            columns: columns(&["period"]),
            rows: series
                .iter()
                .map(|p| {
                    let mut row = vec![json!(p.period.strid())];
                    row.extend(stats_values(&p.completeness));
                    row
                })
                .collect(),
        }
    }
}

/// Format a report in the specified output format. JSON renders one object
/// per row.
#[must_use]
pub fn format_report(report: &Report, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(report),
        OutputFormat::Table => format_table(report),
        OutputFormat::Markdown => format_markdown(report),
    }
}

fn format_json(report: &Report) -> String {
    let objects: Vec<serde_json::Map<String, Value>> = report
        .rows
        .iter()
        .map(|row| report.columns.iter().cloned().zip(row.iter().cloned()).collect())
        .collect();
    serde_json::to_string_pretty(&objects).unwrap_or_else(|_| "[]".to_string())
}

fn format_table(report: &Report) -> String {
    if report.rows.is_empty() {
        return "(no results)".to_string();
    }

    let mut widths: Vec<usize> = report.columns.iter().map(String::len).collect();
    for row in &report.rows {
        for (i, val) in row.iter().enumerate() {
            widths[i] = widths[i].max(value_to_display(val).len());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = report
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    output.push_str(&header.join(" | "));
    output.push('\n');

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&sep.join("-+-"));
    output.push('\n');

    for row in &report.rows {
        let vals: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, val)| format!("{:width$}", value_to_display(val), width = widths[i]))
            .collect();
        output.push_str(&vals.join(" | "));
        output.push('\n');
    }

    output
}

fn format_markdown(report: &Report) -> String {
    if report.rows.is_empty() {
        return "*No results*\n".to_string();
    }

    let mut output = String::new();

    output.push_str("| ");
    output.push_str(&report.columns.join(" | "));
    output.push_str(" |\n");

    output.push_str("| ");
    let seps: Vec<&str> = report.columns.iter().map(|_| "---").collect();
    output.push_str(&seps.join(" | "));
    output.push_str(" |\n");

    for row in &report.rows {
        output.push_str("| ");
        let vals: Vec<String> = row.iter().map(value_to_display).collect();
        output.push_str(&vals.join(" | "));
        output.push_str(" |\n");
    }

    output
}

fn value_to_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "n/a".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.2}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrivals::ArrivalStats;

    fn measured() -> Completeness {
        Completeness::Measured(ArrivalStats {
            expected: 5,
            arrived: 3,
            prompt: 2,
            completeness: 0.6,
            promptness: 0.4,
        })
    }

    fn sample_report() -> Report {
        Report::points(&[
            CompletenessPoint {
                entity: "kinshasa".to_string(),
                name: "Kinshasa".to_string(),
                completeness: measured(),
            },
            CompletenessPoint {
                entity: "gombe-a".to_string(),
                name: "Gombe A".to_string(),
                completeness: Completeness::NotExpected,
            },
        ])
    }

    #[test]
    fn format_as_json() {
        let output = format_report(&sample_report(), OutputFormat::Json);
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["entity"], "kinshasa");
        assert_eq!(parsed[0]["completeness"], 0.6);
        assert_eq!(parsed[1]["completeness"], Value::Null);
    }

    #[test]
    fn format_as_table() {
        let output = format_report(&sample_report(), OutputFormat::Table);
        assert!(output.starts_with("entity"));
        assert!(output.contains("completeness"));
        assert!(output.contains("0.60"));
        assert!(output.contains("n/a"));
        assert!(output.contains("-+-"));
    }

    #[test]
    fn format_as_markdown() {
        let output = format_report(&sample_report(), OutputFormat::Markdown);
        assert!(output.starts_with("| entity | name | expected"));
        assert!(output.contains("| --- |"));
        assert!(output.contains("| kinshasa | Kinshasa | 5 | 3 | 2 | 0.60 | 0.40 |"));
    }

    #[test]
    fn format_empty_report() {
        let report = Report::default();
        assert_eq!(format_report(&report, OutputFormat::Table), "(no results)");
        assert_eq!(
            format_report(&report, OutputFormat::Markdown),
            "*No results*\n"
        );
        assert_eq!(format_report(&report, OutputFormat::Json), "[]");
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
