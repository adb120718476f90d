//! Client-server engine adapter (`PostgreSQL`)
//!
//! Everything goes through the engine's own tools: `pg_dump` produces one
//! plain-format script, `psql` answers catalogue queries and applies
//! replaces. Granular restores lift a single table's COPY block out of the
//! script; see [`super::copy`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, Output, Stdio};
use std::thread;
use tracing::{debug, info};

use super::copy::{decode_rows, encode_block, scan_blocks, CopyBlock};
use super::{quote_ident, DialectAdapter, DialectError, DumpSource, TableRows};
use crate::config::PostgresConfig;
use crate::manifest::DbType;

/// File name of the client-server dump inside an archive
pub const POSTGRES_DUMP_FILE: &str = "database.sql";

/// Adapter driving `pg_dump` and `psql`
pub struct PostgresAdapter {
    config: PostgresConfig,
}

impl PostgresAdapter {
    #[must_use]
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    fn connect_args(&self, cmd: &mut Command) {
        if let Some(host) = self.config.host.as_deref() {
            cmd.arg("--host").arg(host);
        }
        if let Some(port) = self.config.port {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(user) = self.config.user.as_deref() {
            cmd.arg("--username").arg(user);
        }
        cmd.arg("--dbname").arg(&self.config.dbname);
        if let Some(password) = self.config.password.as_deref() {
            cmd.env("PGPASSWORD", password);
        }
    }

    fn psql(&self) -> Command {
        let mut cmd = Command::new(&self.config.psql);
        cmd.args(["-X", "-q", "-A", "-t", "-v", "ON_ERROR_STOP=1"]);
        self.connect_args(&mut cmd);
        cmd
    }

    /// Run one query, returning non-empty output lines
    fn query_lines(&self, sql: &str) -> Result<Vec<String>, DialectError> {
        let mut cmd = self.psql();
        cmd.arg("-c").arg(sql);
        let output = checked("psql", cmd.output()?)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Pipe a script into psql on stdin
    ///
    /// Stdin is fed from its own thread while the output pipes drain, and
    /// the child is always waited on. When psql stops reading early its
    /// exit status and stderr are what get reported.
    fn run_script(&self, script: &str) -> Result<(), DialectError> {
        let mut child = self
            .psql()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();

        let (output, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || feed_stdin(stdin, script.as_bytes()));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "stdin writer panicked")));
            (output, written)
        });

        checked("psql", output?)?;
        written?;
        Ok(())
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.config.schema), quote_ident(table))
    }
}

impl DialectAdapter for PostgresAdapter {
    fn db_type(&self) -> DbType {
        DbType::ClientServer
    }

    fn dump(&self, dest_dir: &Path) -> Result<PathBuf, DialectError> {
        let dest = dest_dir.join(POSTGRES_DUMP_FILE);

        let mut cmd = Command::new(&self.config.pg_dump);
        cmd.args([
            "--format=plain",
            "--no-owner",
            "--no-acl",
            "--clean",
            "--if-exists",
        ]);
        cmd.arg("--file").arg(&dest);
        self.connect_args(&mut cmd);

        debug!(dest = %dest.display(), "Running pg_dump");
        checked("pg_dump", cmd.output()?)?;
        Ok(dest)
    }

    fn live_columns(&self, table: &str) -> Result<Vec<String>, DialectError> {
        self.query_lines(&format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
            quote_literal(&self.config.schema),
            quote_literal(table)
        ))
    }

    fn open_dump(&self, extracted_dir: &Path) -> Result<Box<dyn DumpSource>, DialectError> {
        let path = extracted_dir.join(POSTGRES_DUMP_FILE);
        if !path.is_file() {
            return Err(DialectError::DumpMissing(path));
        }
        let script = fs::read_to_string(&path)?;
        Ok(Box::new(PostgresDump::parse(script, &self.config.schema)?))
    }

    fn replace(&self, table: &str, rows: &TableRows) -> Result<usize, DialectError> {
        let script = replace_script(&self.qualified(table), rows);
        self.run_script(&script)?;
        Ok(rows.len())
    }

    fn cascading_dependents(&self, table: &str) -> Result<Vec<String>, DialectError> {
        self.query_lines(&cascading_dependents_sql(&self.config.schema, table))
    }

    fn replay_full(&self, extracted_dir: &Path) -> Result<bool, DialectError> {
        if !self.config.replay_full_dump {
            return Ok(false);
        }

        let path = extracted_dir.join(POSTGRES_DUMP_FILE);
        if !path.is_file() {
            return Err(DialectError::DumpMissing(path));
        }

        info!(script = %path.display(), "Replaying full dump");
        let mut cmd = self.psql();
        cmd.arg("--single-transaction").arg("--file").arg(&path);
        checked("psql", cmd.output()?)?;
        Ok(true)
    }
}

/// Dump script with its COPY blocks indexed
pub struct PostgresDump {
    script: String,
    blocks: Vec<CopyBlock>,
}

impl PostgresDump {
    /// Index the COPY blocks belonging to `schema`
    ///
    /// # Errors
    /// Returns an error if a block is malformed
    pub fn parse(script: String, schema: &str) -> Result<Self, DialectError> {
        let blocks = scan_blocks(&script)?
            .into_iter()
            .filter(|b| b.schema.as_deref().map_or(true, |s| s == schema))
            .collect();
        Ok(Self { script, blocks })
    }
}

impl DumpSource for PostgresDump {
    fn tables(&self) -> Vec<String> {
        self.blocks.iter().map(|b| b.table.clone()).collect()
    }

    fn rows_of(&self, table: &str) -> Result<Option<TableRows>, DialectError> {
        self.blocks
            .iter()
            .find(|b| b.table == table)
            .map(|block| decode_rows(&self.script, block))
            .transpose()
    }

    fn row_count(&self, table: &str) -> Result<Option<u64>, DialectError> {
        Ok(self
            .blocks
            .iter()
            .find(|b| b.table == table)
            .map(|block| self.script[block.data.clone()].lines().count() as u64))
    }
}

/// Transactional delete-then-copy script for one table
fn replace_script(qualified_table: &str, rows: &TableRows) -> String {
    let mut script = String::from("BEGIN;\n");
    script.push_str(&format!("DELETE FROM {qualified_table};\n"));
    if !rows.columns.is_empty() && !rows.is_empty() {
        script.push_str(&encode_block(qualified_table, rows));
    }
    script.push_str("COMMIT;\n");
    script
}

fn feed_stdin(stdin: Option<ChildStdin>, bytes: &[u8]) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(bytes) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Tables outside `table` whose foreign keys act on delete of its rows
fn cascading_dependents_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT DISTINCT child.relname FROM pg_catalog.pg_constraint con \
         JOIN pg_catalog.pg_class parent ON parent.oid = con.confrelid \
         JOIN pg_catalog.pg_namespace ns ON ns.oid = parent.relnamespace \
         JOIN pg_catalog.pg_class child ON child.oid = con.conrelid \
         WHERE con.contype = 'f' AND con.confdeltype IN ('c', 'n', 'd') \
         AND ns.nspname = {} AND parent.relname = {} AND child.oid <> parent.oid \
         ORDER BY 1",
        quote_literal(schema),
        quote_literal(table)
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn checked(tool: &str, output: Output) -> Result<Output, DialectError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(DialectError::Tool {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
