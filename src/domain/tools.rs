//! Database-inspection tools exposed via Model Context Protocol
//!
//! The registry is built once and owned by the dispatcher. Every invocation
//! runs under a single deadline covering validation and the adapter call.

use std::{sync::Arc, time::Duration};

use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::database::DatabaseAdapter;
use crate::domain::utils::{
    filter_tables_by_schema, format_columns, format_plan, format_query_result, format_tables,
    parse_arguments, require_non_empty, text_result,
};
use crate::errors::ToolError;
use crate::security::{validate_identifier, QueryValidator};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ROWS: usize = 1_000;

#[macros::mcp_tool(
    name = "list_tables",
    description = "Lists all tables in the connected database. Returns table names, schemas, and types."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ListTablesTool {
    /// Only return tables that belong to this schema
    pub schema: Option<String>,
}

#[macros::mcp_tool(
    name = "describe_table",
    description = "Describes the schema of a specific table. Returns column names, data types, nullability, defaults, and keys."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct DescribeTableTool {
    /// The name of the table to describe
    pub table_name: String,
}

#[macros::mcp_tool(
    name = "execute_readonly_query",
    description = "Executes a read-only SQL query (SELECT only). Write operations are strictly blocked. Returns column names and rows."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ExecuteReadonlyQueryTool {
    /// The SQL SELECT query to execute
    pub query: String,
}

#[macros::mcp_tool(
    name = "explain_query",
    description = "Returns the execution plan for a SQL query without executing it. Useful for understanding query performance."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ExplainQueryTool {
    /// The SQL query to explain
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ListTables,
    DescribeTable,
    ExecuteReadonlyQuery,
    ExplainQuery,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::ListTables,
        ToolKind::DescribeTable,
        ToolKind::ExecuteReadonlyQuery,
        ToolKind::ExplainQuery,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ListTables => "list_tables",
            Self::DescribeTable => "describe_table",
            Self::ExecuteReadonlyQuery => "execute_readonly_query",
            Self::ExplainQuery => "explain_query",
        }
    }

    fn definition(self) -> Tool {
        match self {
            Self::ListTables => ListTablesTool::tool(),
            Self::DescribeTable => DescribeTableTool::tool(),
            Self::ExecuteReadonlyQuery => ExecuteReadonlyQueryTool::tool(),
            Self::ExplainQuery => ExplainQueryTool::tool(),
        }
    }
}

/// Immutable name → handler table.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    kinds: Vec<ToolKind>,
    definitions: Vec<Tool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let kinds = ToolKind::ALL.to_vec();
        let definitions = kinds.iter().map(|kind| kind.definition()).collect();
        Self { kinds, definitions }
    }

    pub fn definitions(&self) -> &[Tool] {
        &self.definitions
    }

    pub fn lookup(&self, name: &str) -> Option<ToolKind> {
        self.kinds.iter().copied().find(|kind| kind.name() == name)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

pub struct ToolInvoker {
    adapter: Arc<dyn DatabaseAdapter>,
    validator: QueryValidator,
    max_rows: usize,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(
        adapter: Arc<dyn DatabaseAdapter>,
        validator: QueryValidator,
        max_rows: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            validator,
            max_rows: max_rows.max(1),
            timeout,
        }
    }

    pub async fn invoke(
        &self,
        kind: ToolKind,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, ToolError> {
        let deadline = Instant::now() + self.timeout;
        match tokio::time::timeout_at(deadline, self.run(kind, arguments, deadline)).await {
            Ok(result) => result.map(text_result),
            Err(_) => Err(ToolError::Timeout {
                tool: kind.name(),
                timeout: self.timeout,
            }),
        }
    }

    async fn run(
        &self,
        kind: ToolKind,
        arguments: Map<String, Value>,
        deadline: Instant,
    ) -> Result<String, ToolError> {
        let tool = kind.name();
        match kind {
            ToolKind::ListTables => {
                let args: ListTablesTool = parse_arguments(tool, arguments)?;
                let tables = self
                    .adapter
                    .list_tables(deadline)
                    .await
                    .map_err(ToolError::database("list tables"))?;
                format_tables(&filter_tables_by_schema(tables, args.schema.as_deref()))
            }
            ToolKind::DescribeTable => {
                let args: DescribeTableTool = parse_arguments(tool, arguments)?;
                let table_name = require_non_empty(tool, "table_name", &args.table_name)?;
                validate_identifier(table_name)?;
                let columns = self
                    .adapter
                    .describe_table(deadline, table_name)
                    .await
                    .map_err(ToolError::database("describe table"))?;
                format_columns(table_name, &columns)
            }
            ToolKind::ExecuteReadonlyQuery => {
                let args: ExecuteReadonlyQueryTool = parse_arguments(tool, arguments)?;
                let query = require_non_empty(tool, "query", &args.query)?;
                self.validator.validate_read_only_query(query)?;
                let result = self
                    .adapter
                    .execute_query(deadline, query, self.max_rows)
                    .await
                    .map_err(ToolError::database("execute query"))?;
                format_query_result(&result, self.max_rows)
            }
            ToolKind::ExplainQuery => {
                let args: ExplainQueryTool = parse_arguments(tool, arguments)?;
                let query = require_non_empty(tool, "query", &args.query)?;
                self.validator.validate_read_only_query(query)?;
                let plan = self
                    .adapter
                    .explain_query(deadline, query)
                    .await
                    .map_err(ToolError::database("explain query"))?;
                format_plan(&plan)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::database::testing::MockAdapter;
    use crate::security::Rejection;

    fn invoker(adapter: Arc<MockAdapter>, max_rows: usize) -> ToolInvoker {
        ToolInvoker::new(
            adapter,
            QueryValidator::default(),
            max_rows,
            Duration::from_secs(5),
        )
    }

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    fn text_of(result: &CallToolResult) -> String {
        let value = serde_json::to_value(result).expect("serialize");
        value["content"][0]["text"]
            .as_str()
            .expect("text block")
            .to_string()
    }

    #[test]
    fn registry_lists_tools_in_registration_order() {
        let registry = ToolRegistry::new();
        let names: Vec<&str> = registry
            .definitions()
            .iter()
            .map(|tool| tool.name.as_str())
            .collect();

        assert_eq!(
            names,
            vec![
                "list_tables",
                "describe_table",
                "execute_readonly_query",
                "explain_query"
            ]
        );
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.lookup("explain_query"), Some(ToolKind::ExplainQuery));
        assert_eq!(registry.lookup("drop_everything"), None);
    }

    #[test]
    fn required_arguments_appear_in_input_schema() {
        let registry = ToolRegistry::new();
        let schema = serde_json::to_value(&registry.definitions()[1]).expect("serialize tool");
        assert_eq!(schema["inputSchema"]["required"], json!(["table_name"]));
    }

    #[tokio::test]
    async fn list_tables_applies_schema_filter() {
        let adapter = Arc::new(MockAdapter::healthy());
        let result = invoker(adapter, 10)
            .invoke(ToolKind::ListTables, arguments(json!({"schema": "archive"})))
            .await
            .expect("list tables");

        let text = text_of(&result);
        assert!(text.starts_with("Found 1 tables:"));
        assert!(text.contains("audit_log"));
        assert!(!text.contains("orders"));
    }

    #[tokio::test]
    async fn describe_table_rejects_dangerous_identifier_before_adapter() {
        let adapter = Arc::new(MockAdapter::healthy());
        let err = invoker(adapter, 10)
            .invoke(
                ToolKind::DescribeTable,
                arguments(json!({"table_name": "users;DROP"})),
            )
            .await
            .expect_err("identifier must be rejected");

        assert!(matches!(
            err,
            ToolError::Rejected(Rejection::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn describe_table_reports_column_count() {
        let adapter = Arc::new(MockAdapter::healthy());
        let result = invoker(adapter, 10)
            .invoke(ToolKind::DescribeTable, arguments(json!({"table_name": "orders"})))
            .await
            .expect("describe");

        assert!(text_of(&result).starts_with("Table 'orders' has 1 columns:"));
    }

    #[tokio::test]
    async fn execute_requires_string_query() {
        let adapter = Arc::new(MockAdapter::healthy());
        let invoker = invoker(Arc::clone(&adapter), 10);

        for args in [json!({}), json!({"query": 42}), json!({"query": ""})] {
            let err = invoker
                .invoke(ToolKind::ExecuteReadonlyQuery, arguments(args))
                .await
                .expect_err("invalid arguments");
            assert!(matches!(err, ToolError::InvalidArguments { .. }));
        }
        assert!(adapter.executed().is_empty());
    }

    #[tokio::test]
    async fn execute_blocks_write_query_before_adapter() {
        let adapter = Arc::new(MockAdapter::healthy());
        let err = invoker(Arc::clone(&adapter), 10)
            .invoke(
                ToolKind::ExecuteReadonlyQuery,
                arguments(json!({"query": "SELECT * FROM users; DROP TABLE users"})),
            )
            .await
            .expect_err("write must be blocked");

        assert!(err.to_string().contains("DROP"));
        assert!(adapter.executed().is_empty());
    }

    #[tokio::test]
    async fn execute_appends_truncation_notice_at_row_cap() {
        let adapter = Arc::new(MockAdapter::healthy());
        let result = invoker(Arc::clone(&adapter), 2)
            .invoke(
                ToolKind::ExecuteReadonlyQuery,
                arguments(json!({"query": "SELECT id FROM orders"})),
            )
            .await
            .expect("execute");

        let text = text_of(&result);
        assert!(text.contains("Returned 2 rows across 1 columns"));
        assert!(text.contains("Result limited to 2 rows"));
        assert_eq!(adapter.executed(), vec!["SELECT id FROM orders".to_string()]);
    }

    #[tokio::test]
    async fn adapter_failure_surfaces_as_tool_error() {
        let adapter = Arc::new(MockAdapter::failing());
        let err = invoker(adapter, 10)
            .invoke(ToolKind::ExplainQuery, arguments(json!({"query": "SELECT 1"})))
            .await
            .expect_err("adapter failure");

        assert!(err.to_string().starts_with("failed to explain query"));
    }

    #[tokio::test]
    async fn deadline_bounds_slow_adapter() {
        let adapter = Arc::new(MockAdapter::slow(Duration::from_millis(500)));
        let invoker = ToolInvoker::new(
            adapter,
            QueryValidator::default(),
            10,
            Duration::from_millis(50),
        );

        let err = invoker
            .invoke(
                ToolKind::ExecuteReadonlyQuery,
                arguments(json!({"query": "SELECT 1"})),
            )
            .await
            .expect_err("deadline must fire");
        assert!(matches!(err, ToolError::Timeout { tool: "execute_readonly_query", .. }));
    }
}
