// SPDX-License-Identifier: Apache-2.0

//! SQL text builders for the DDL executor
//!
//! All statements the engine sends to Postgres are assembled here so that
//! quoting and escaping live in one place. Statement lists are executed one
//! statement per call inside a single transaction.

use crate::plugin::types::PluginSchema;

/// Name of the foreign-data-wrapper server that fronts the plugins.
pub const FDW_SERVER: &str = "steampipe";

/// Schema holding the engine's own tables.
pub const INTERNAL_SCHEMA: &str = "datafab_internal";

/// NOTIFY channel clients listen on for schema changes.
pub const NOTIFY_CHANNEL: &str = "steampipe_schema";

/// Advisory-lock key bounding the refresh lifetime; one refresh per server.
pub const REFRESH_LOCK_KEY: i64 = 0x64617461666162; // "datafab"

/// Double-quoted Postgres identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quoted Postgres string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Maps a fully-qualified plugin identifier to the remote schema name the
/// wrapper exposes for it, e.g.
/// `hub.example.com/plugins/acme/aws@latest` -> `hub_example_com_plugins_acme_aws_latest`.
pub fn plugin_remote_schema(plugin_fqn: &str) -> String {
    let mut name: String = plugin_fqn
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    // Postgres identifier length limit.
    name.truncate(63);
    name
}

/// Statements that (re)materialise a connection's foreign schema.
///
/// The schema is dropped and recreated; foreign-table rows are not preserved
/// across an update.
pub fn update_connection_statements(connection: &str, remote_schema: &str) -> Vec<String> {
    let schema = quote_ident(connection);
    vec![
        format!("drop schema if exists {schema} cascade"),
        format!("create schema {schema}"),
        format!(
            "import foreign schema {} from server {} into {}",
            quote_ident(remote_schema),
            FDW_SERVER,
            schema
        ),
    ]
}

/// Statement that removes a connection's foreign schema.
pub fn delete_connection_statement(connection: &str) -> String {
    format!("drop schema if exists {} cascade", quote_ident(connection))
}

/// Statement that clones an already-materialised foreign schema into a
/// sibling connection without re-introspecting the plugin. The helper
/// function is provided by the wrapper extension.
pub fn clone_schema_statement(exemplar: &str, target: &str, plugin: &str) -> String {
    format!(
        "select clone_foreign_schema({}, {}, {})",
        quote_literal(exemplar),
        quote_literal(target),
        quote_literal(plugin)
    )
}

/// Comment statements for every documented table and column of a connection.
pub fn comment_statements(connection: &str, schema: &PluginSchema) -> Vec<String> {
    let schema_ident = quote_ident(connection);
    let mut statements = Vec::new();

    for table in &schema.tables {
        let table_ref = format!("{}.{}", schema_ident, quote_ident(&table.name));
        if let Some(comment) = &table.comment {
            statements.push(format!(
                "comment on foreign table {} is {}",
                table_ref,
                quote_literal(comment)
            ));
        }
        for column in &table.columns {
            if let Some(comment) = &column.comment {
                statements.push(format!(
                    "comment on column {}.{} is {}",
                    table_ref,
                    quote_ident(&column.name),
                    quote_literal(comment)
                ));
            }
        }
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::types::{ColumnDef, SchemaMode, TableDef};

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("aws1"), "\"aws1\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_plugin_remote_schema() {
        assert_eq!(
            plugin_remote_schema("hub.example.com/plugins/acme/aws@latest"),
            "hub_example_com_plugins_acme_aws_latest"
        );
        let long = "x".repeat(100);
        assert_eq!(plugin_remote_schema(&long).len(), 63);
    }

    #[test]
    fn test_update_statements_drop_create_import() {
        let statements = update_connection_statements("aws1", "acme_aws");
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "drop schema if exists \"aws1\" cascade");
        assert_eq!(statements[1], "create schema \"aws1\"");
        assert_eq!(
            statements[2],
            "import foreign schema \"acme_aws\" from server steampipe into \"aws1\""
        );
    }

    #[test]
    fn test_clone_statement() {
        assert_eq!(
            clone_schema_statement("aws1", "aws2", "acme/aws"),
            "select clone_foreign_schema('aws1', 'aws2', 'acme/aws')"
        );
    }

    #[test]
    fn test_comment_statements_skip_undocumented() {
        let schema = PluginSchema {
            tables: vec![TableDef {
                name: "aws_s3_bucket".to_string(),
                columns: vec![
                    ColumnDef {
                        name: "name".to_string(),
                        pg_type: "text".to_string(),
                        nullable: false,
                        comment: Some("Bucket name".to_string()),
                    },
                    ColumnDef {
                        name: "tags".to_string(),
                        pg_type: "jsonb".to_string(),
                        nullable: true,
                        comment: None,
                    },
                ],
                comment: Some("S3 buckets".to_string()),
            }],
            schema_mode: SchemaMode::Static,
        };

        let statements = comment_statements("aws1", &schema);
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0],
            "comment on foreign table \"aws1\".\"aws_s3_bucket\" is 'S3 buckets'"
        );
        assert_eq!(
            statements[1],
            "comment on column \"aws1\".\"aws_s3_bucket\".\"name\" is 'Bucket name'"
        );
    }
}
