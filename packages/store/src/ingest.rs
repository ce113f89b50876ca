//! Parsing of tool JSON reports into store rows.
//!
//! Only the fields the store consumes are modeled; everything else in the
//! reports is ignored. Paths inside the reports are expected to already be
//! workspace-root-relative (the engine normalizes them before ingestion).

use color_eyre::{Result, eyre::Context};
use serde::Deserialize;

use crate::db::{FindingRow, TestFailureRow};

/// Longest failure message retained, in bytes. Vitest failure messages can
/// embed entire diffs; the delta path only needs enough to identify the
/// defect.
const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
struct VitestReport {
    #[serde(default, rename = "testResults")]
    test_results: Vec<VitestFileResult>,
    #[serde(default, rename = "numFailedTests")]
    num_failed_tests: u64,
}

#[derive(Debug, Deserialize)]
struct VitestFileResult {
    name: String,
    #[serde(default, rename = "assertionResults")]
    assertion_results: Vec<VitestAssertion>,
}

#[derive(Debug, Deserialize)]
struct VitestAssertion {
    status: String,
    #[serde(default, rename = "fullName")]
    full_name: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "ancestorTitles")]
    ancestor_titles: Vec<String>,
    #[serde(default, rename = "failureMessages")]
    failure_messages: Vec<String>,
}

impl VitestAssertion {
    /// The human-readable breadcrumb identifying this test within its file.
    fn breadcrumb(&self) -> String {
        match &self.full_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self
                .ancestor_titles
                .iter()
                .map(String::as_str)
                .chain([self.title.as_str()])
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" > "),
        }
    }
}

/// Parse a vitest JSON report into failure rows.
///
/// Returns the rows along with the report's total failed-test count, which
/// may exceed the row count if failures repeat a stable id.
pub fn parse_vitest(content: &[u8]) -> Result<(Vec<TestFailureRow>, u64)> {
    let report =
        serde_json::from_slice::<VitestReport>(content).context("parse vitest report")?;

    let mut rows = Vec::new();
    for file in &report.test_results {
        for assertion in &file.assertion_results {
            if assertion.status != "failed" {
                continue;
            }
            let breadcrumb = assertion.breadcrumb();
            rows.push(TestFailureRow {
                stable_id: format!("{}::{}", file.name, breadcrumb),
                test_id: breadcrumb,
                file: file.name.clone(),
                message: truncate(&assertion.failure_messages.join("\n")),
            });
        }
    }

    let row_count = rows.len() as u64;
    Ok((rows, report.num_failed_tests.max(row_count)))
}

#[derive(Debug, Deserialize)]
struct EslintFileResult {
    #[serde(rename = "filePath")]
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
struct EslintMessage {
    #[serde(default, rename = "ruleId")]
    rule_id: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
    #[serde(default, rename = "endLine")]
    end_line: Option<u32>,
    #[serde(default, rename = "endColumn")]
    end_column: Option<u32>,
}

/// Parse an eslint JSON report into finding rows.
pub fn parse_eslint(content: &[u8]) -> Result<Vec<FindingRow>> {
    let files =
        serde_json::from_slice::<Vec<EslintFileResult>>(content).context("parse eslint report")?;

    let mut rows = Vec::new();
    for file in &files {
        for message in &file.messages {
            let rule = message.rule_id.as_deref().unwrap_or("unknown");
            let start_line = message.line.unwrap_or(1).max(1);
            let start_column = message.column.unwrap_or(1).max(1);
            rows.push(FindingRow {
                stable_id: format!(
                    "{}::{}::{}:{}",
                    file.file_path, rule, start_line, start_column
                ),
                tool: "eslint".to_string(),
                rule: rule.to_string(),
                file: file.file_path.clone(),
                start_line,
                start_column,
                end_line: message.end_line.unwrap_or(start_line).max(1),
                end_column: message.end_column.unwrap_or(start_column).max(1),
                message: truncate(&message.message),
            });
        }
    }

    Ok(rows)
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn vitest_failures_become_rows() {
        let report = serde_json::json!({
            "numTotalTests": 3,
            "numFailedTests": 2,
            "testResults": [
                {
                    "name": "src/math.test.ts",
                    "assertionResults": [
                        {
                            "status": "failed",
                            "fullName": "math > adds",
                            "title": "adds",
                            "ancestorTitles": ["math"],
                            "failureMessages": ["expected 2 to equal 3"]
                        },
                        {
                            "status": "passed",
                            "fullName": "math > subtracts",
                            "title": "subtracts",
                            "ancestorTitles": ["math"],
                            "failureMessages": []
                        }
                    ]
                },
                {
                    "name": "src/str.test.ts",
                    "assertionResults": [
                        {
                            "status": "failed",
                            "title": "trims",
                            "ancestorTitles": ["str"],
                            "failureMessages": ["expected \"a \" to equal \"a\""]
                        }
                    ]
                }
            ]
        });

        let (rows, failed) = parse_vitest(report.to_string().as_bytes()).unwrap();
        pretty_assert_eq!(failed, 2);
        pretty_assert_eq!(rows.len(), 2);
        pretty_assert_eq!(rows[0].stable_id, "src/math.test.ts::math > adds");
        pretty_assert_eq!(rows[0].file, "src/math.test.ts");
        // Without fullName, the breadcrumb is rebuilt from ancestors + title.
        pretty_assert_eq!(rows[1].stable_id, "src/str.test.ts::str > trims");
    }

    #[test]
    fn eslint_messages_become_rows() {
        let report = serde_json::json!([
            {
                "filePath": "src/app.ts",
                "messages": [
                    {
                        "ruleId": "no-unused-vars",
                        "severity": 2,
                        "message": "'x' is defined but never used",
                        "line": 3,
                        "column": 7,
                        "endLine": 3,
                        "endColumn": 8
                    },
                    {
                        "ruleId": null,
                        "severity": 2,
                        "message": "Parsing error",
                        "line": 10,
                        "column": 1
                    }
                ]
            }
        ]);

        let rows = parse_eslint(report.to_string().as_bytes()).unwrap();
        pretty_assert_eq!(rows.len(), 2);
        pretty_assert_eq!(rows[0].stable_id, "src/app.ts::no-unused-vars::3:7");
        pretty_assert_eq!(rows[0].end_column, 8);
        pretty_assert_eq!(rows[1].rule, "unknown");
        pretty_assert_eq!(rows[1].end_line, 10);
    }

    #[test]
    fn missing_positions_default_to_one() {
        let report = serde_json::json!([
            {
                "filePath": "src/app.ts",
                "messages": [{ "ruleId": "semi", "message": "missing semicolon" }]
            }
        ]);

        let rows = parse_eslint(report.to_string().as_bytes()).unwrap();
        pretty_assert_eq!(rows[0].stable_id, "src/app.ts::semi::1:1");
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(MAX_MESSAGE_LEN * 2);
        let report = serde_json::json!([
            {
                "filePath": "src/app.ts",
                "messages": [{ "ruleId": "semi", "message": long }]
            }
        ]);

        let rows = parse_eslint(report.to_string().as_bytes()).unwrap();
        pretty_assert_eq!(rows[0].message.len(), MAX_MESSAGE_LEN);
    }
}
