//! Argument decoding and result formatting shared by the tool handlers

use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::database::{ColumnInfo, QueryResult, TableInfo};
use crate::errors::ToolError;

pub fn parse_arguments<T: DeserializeOwned>(
    tool: &'static str,
    arguments: Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|err| ToolError::invalid_arguments(tool, err.to_string()))
}

pub fn require_non_empty<'a>(
    tool: &'static str,
    field: &'static str,
    value: &'a str,
) -> Result<&'a str, ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::invalid_arguments(
            tool,
            format!("{field} is required and must be a non-empty string"),
        ));
    }
    Ok(value)
}

pub fn filter_tables_by_schema(tables: Vec<TableInfo>, schema: Option<&str>) -> Vec<TableInfo> {
    match schema.map(str::trim).filter(|value| !value.is_empty()) {
        Some(schema) => tables
            .into_iter()
            .filter(|table| table.table_schema.eq_ignore_ascii_case(schema))
            .collect(),
        None => tables,
    }
}

pub fn format_tables(tables: &[TableInfo]) -> Result<String, ToolError> {
    let payload = serde_json::to_string_pretty(tables)?;
    Ok(format!("Found {} tables:\n\n{payload}", tables.len()))
}

pub fn format_columns(table_name: &str, columns: &[ColumnInfo]) -> Result<String, ToolError> {
    let payload = serde_json::to_string_pretty(columns)?;
    Ok(format!(
        "Table '{table_name}' has {} columns:\n\n{payload}",
        columns.len()
    ))
}

pub fn format_query_result(result: &QueryResult, max_rows: usize) -> Result<String, ToolError> {
    if result.row_count == 0 {
        return Ok("Query returned no rows.".to_string());
    }

    let payload = serde_json::to_string_pretty(result)?;
    let mut text = format!(
        "Query executed successfully. Returned {} rows across {} columns:\n\n{payload}",
        result.row_count,
        result.columns.len()
    );
    if result.row_count >= max_rows {
        text.push_str(&format!(
            "\n\nResult limited to {max_rows} rows (MAX_ROWS setting)"
        ));
    }
    Ok(text)
}

pub fn format_plan(plan: &QueryResult) -> Result<String, ToolError> {
    let payload = serde_json::to_string_pretty(plan)?;
    Ok(format!("Query execution plan:\n\n{payload}"))
}

pub fn text_result(text: String) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}

pub fn error_result(err: &ToolError) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(
            format!("Error: {err}"),
            None,
            None,
        ))],
        is_error: Some(true),
        meta: None,
        structured_content: None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn result_with_rows(count: usize) -> QueryResult {
        QueryResult {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: (0..count)
                .map(|index| Map::from_iter([("id".to_string(), json!(index))]))
                .collect(),
            row_count: count,
        }
    }

    #[test]
    fn empty_result_has_fixed_message() {
        let text = format_query_result(&result_with_rows(0), 10).expect("format");
        assert_eq!(text, "Query returned no rows.");
    }

    #[test]
    fn header_reports_row_and_column_counts() {
        let text = format_query_result(&result_with_rows(3), 10).expect("format");
        assert!(text.starts_with("Query executed successfully. Returned 3 rows across 2 columns:"));
        assert!(!text.contains("Result limited"));
    }

    #[test]
    fn truncation_notice_when_cap_reached() {
        let text = format_query_result(&result_with_rows(5), 5).expect("format");
        assert!(text.ends_with("Result limited to 5 rows (MAX_ROWS setting)"));
    }

    #[test]
    fn schema_filter_is_case_insensitive_and_optional() {
        let tables = vec![
            TableInfo {
                table_name: "a".to_string(),
                table_schema: "main".to_string(),
                table_type: "BASE TABLE".to_string(),
            },
            TableInfo {
                table_name: "b".to_string(),
                table_schema: "aux".to_string(),
                table_type: "VIEW".to_string(),
            },
        ];

        assert_eq!(filter_tables_by_schema(tables.clone(), None).len(), 2);
        assert_eq!(filter_tables_by_schema(tables.clone(), Some(" ")).len(), 2);
        let filtered = filter_tables_by_schema(tables, Some("MAIN"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].table_name, "a");
    }

    #[test]
    fn blank_required_argument_is_rejected() {
        let err = require_non_empty("describe_table", "table_name", "  ")
            .expect_err("blank must fail");
        assert!(err.to_string().contains("table_name is required"));
    }

    #[test]
    fn error_result_sets_flag_and_prefix() {
        let result = error_result(&ToolError::invalid_arguments("explain_query", "missing field"));
        assert_eq!(result.is_error, Some(true));

        let value = serde_json::to_value(&result).expect("serialize");
        let text = value["content"][0]["text"].as_str().expect("text block");
        assert!(text.starts_with("Error: invalid arguments for explain_query"));
        assert_eq!(value["content"][0]["type"], "text");
    }
}
