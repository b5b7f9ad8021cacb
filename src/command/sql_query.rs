//! SqlQuery Command
//!
//! Runs a batch of SQL statements against a SQLite database inside one
//! transaction. Each statement that returns rows produces a result set; the
//! n-th result set is written as a tab-delimited file to `OutputFileNN` when
//! that parameter is supplied.
//!
//! # Parameters
//!
//! - `ConnectionString`: database path, optionally prefixed with `sqlite:`;
//!   `:memory:` opens a private in-memory database
//! - `SQL`: one or more statements separated by `;`
//! - `OutputFile01`, `OutputFile02`, ...: result set files (no upper bound)

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, info, warn};
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, OpenFlags, Statement};

use super::{numbered_name, Command, CommandContext, ParameterDescriptor, ParameterKind, Parameters};
use crate::error::CommandError;

const CONNECTION_STRING: &str = "ConnectionString";
const SQL: &str = "SQL";
const OUTPUT_FILE: &str = "OutputFile";

/// Typed view of the parameters, resolved just before execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQueryParameters {
    pub database: String,
    pub sql: String,
    pub outputs: Vec<(u32, String)>,
}

impl SqlQueryParameters {
    pub fn from_parameters(params: &Parameters) -> Result<Self, CommandError> {
        let connection = params.required(CONNECTION_STRING, SqlQuery::TYPE_NAME)?;
        let sql = params.required(SQL, SqlQuery::TYPE_NAME)?;

        let database = connection
            .trim()
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .to_string();

        Ok(Self {
            database,
            sql: sql.to_string(),
            outputs: params
                .numbered(OUTPUT_FILE)
                .into_iter()
                .map(|(n, name)| (n, name.trim().to_string()))
                .collect(),
        })
    }
}

/// Executes SQL against SQLite and exports result sets.
#[derive(Debug, Default)]
pub struct SqlQuery {
    parameters: Parameters,
}

impl SqlQuery {
    pub const TYPE_NAME: &'static str = "SqlQuery";

    fn open(database: &str) -> Result<Connection, CommandError> {
        let connection = if database == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open_with_flags(
                database,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
            )
        };
        connection.map_err(|e| fail(format!("cannot open database '{}': {}", database, e)))
    }
}

fn fail(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> CommandError {
    CommandError::execution(SqlQuery::TYPE_NAME, source)
}

impl Command for SqlQuery {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn declare_parameters(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::required(
                CONNECTION_STRING,
                ParameterKind::String,
                "Path of the SQLite database",
            ),
            ParameterDescriptor::required(
                SQL,
                ParameterKind::MultilineText,
                "The SQL statement(s) to execute",
            ),
            ParameterDescriptor::numbered(
                OUTPUT_FILE,
                ParameterKind::Filename,
                "Tab-delimited output file for the matching result set (OutputFile01, OutputFile02, ...)",
            ),
        ]
    }

    fn set_parameters(&mut self, values: &HashMap<String, String>) {
        self.parameters = Parameters::from(values);
        debug!("SqlQuery parameters set: {} values", self.parameters.len());
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn execute(&mut self, ctx: &CommandContext) -> Result<(), CommandError> {
        let params = SqlQueryParameters::from_parameters(&self.parameters)?;

        // Resolve every output path before touching the database.
        let mut targets = Vec::with_capacity(params.outputs.len());
        for (number, name) in &params.outputs {
            let parameter = numbered_name(OUTPUT_FILE, *number);
            targets.push((*number, ctx.output_path(&parameter, Self::TYPE_NAME, name)?));
        }

        let mut connection = Self::open(&params.database)?;
        let tx = connection.transaction().map_err(fail)?;

        let mut result_sets = 0u32;
        {
            let mut batch = Batch::new(&tx, &params.sql);
            while let Some(mut statement) = batch.next().map_err(fail)? {
                if statement.column_count() == 0 {
                    let changed = statement.execute([]).map_err(fail)?;
                    debug!("Statement changed {} rows", changed);
                    continue;
                }

                result_sets += 1;
                match targets.iter().find(|(n, _)| *n == result_sets) {
                    Some((_, path)) => {
                        let rows = write_result_set(&mut statement, path)?;
                        info!(
                            "Result set {} ({} rows) written to {}",
                            result_sets,
                            rows,
                            path.display()
                        );
                    }
                    None => {
                        let rows = drain_result_set(&mut statement)?;
                        debug!("Result set {} ({} rows) has no output file", result_sets, rows);
                    }
                }
            }
        }

        tx.commit().map_err(fail)?;

        for (number, _) in &params.outputs {
            if *number > result_sets {
                warn!(
                    "{} was supplied but the SQL produced only {} result set(s)",
                    numbered_name(OUTPUT_FILE, *number),
                    result_sets
                );
            }
        }

        Ok(())
    }
}

/// Writes a header line plus one tab-delimited line per row.
fn write_result_set(statement: &mut Statement<'_>, path: &Path) -> Result<usize, CommandError> {
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(clean_cell)
        .collect();
    let column_count = columns.len();

    let file = File::create(path).map_err(fail)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", columns.join("\t")).map_err(fail)?;

    let mut rows = statement.query([]).map_err(fail)?;
    let mut count = 0;
    while let Some(row) = rows.next().map_err(fail)? {
        let mut cells = Vec::with_capacity(column_count);
        for i in 0..column_count {
            cells.push(format_value(row.get_ref(i).map_err(fail)?));
        }
        writeln!(out, "{}", cells.join("\t")).map_err(fail)?;
        count += 1;
    }

    out.flush().map_err(fail)?;
    Ok(count)
}

fn drain_result_set(statement: &mut Statement<'_>) -> Result<usize, CommandError> {
    let mut rows = statement.query([]).map_err(fail)?;
    let mut count = 0;
    while rows.next().map_err(fail)?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn format_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => clean_cell(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

/// Tabs and line breaks would break the file layout.
fn clean_cell(text: &str) -> String {
    text.replace(['\t', '\r', '\n'], " ")
}
