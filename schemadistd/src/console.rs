// Copyright 2018-2022 Cargill Incorporated
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Commands read from the daemon's standard input.
//!
//! Each line names the node whose client runs the command, followed by the command and its
//! arguments, for example `1 create-table shop orders 12 1`. Empty lines and lines starting
//! with `#` are ignored.

use schemadist::cluster::memory::MemoryCluster;
use schemadist::cluster::{Cluster, ColumnDef, ColumnType, NodeId, TableDef, TableName};
use schemadist::node::SchemaDistNode;
use schemadist::sdist::{SchemaDistError, SchemaDistOutcome, Session};

use crate::error::UserError;

const USAGE: &str = "<node> create-db <db> <id> <version> | alter-db <db> <id> <version> | \
                     drop-db <db> | create-table <db> <table> <id> <version> | \
                     alter-table <db> <table> <id> <version> | \
                     truncate-table <db> <table> <id> <version> | \
                     rename-table <db> <table> <new db> <new table> <id> <version> | \
                     drop-table <db> <table> <id> <version> | \
                     create-tablespace <name> <id> <version> | \
                     alter-tablespace <name> <id> <version> | \
                     drop-tablespace <name> <id> <version> | \
                     create-logfile-group <name> <id> <version> | \
                     alter-logfile-group <name> <id> <version> | \
                     drop-logfile-group <name> <id> <version> | acl <statement> | \
                     acl-snapshot <user>... | stats";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateDb {
        db: String,
        id: u32,
        version: u32,
    },
    AlterDb {
        db: String,
        id: u32,
        version: u32,
    },
    DropDb {
        db: String,
    },
    CreateTable {
        table: TableName,
        id: u32,
        version: u32,
    },
    AlterTable {
        table: TableName,
        id: u32,
        version: u32,
    },
    TruncateTable {
        table: TableName,
        id: u32,
        version: u32,
    },
    RenameTable {
        table: TableName,
        new_name: TableName,
        id: u32,
        version: u32,
    },
    DropTable {
        table: TableName,
        id: u32,
        version: u32,
    },
    CreateTablespace {
        name: String,
        id: u32,
        version: u32,
    },
    AlterTablespace {
        name: String,
        id: u32,
        version: u32,
    },
    DropTablespace {
        name: String,
        id: u32,
        version: u32,
    },
    CreateLogfileGroup {
        name: String,
        id: u32,
        version: u32,
    },
    AlterLogfileGroup {
        name: String,
        id: u32,
        version: u32,
    },
    DropLogfileGroup {
        name: String,
        id: u32,
        version: u32,
    },
    Acl {
        statement: String,
    },
    AclSnapshot {
        users: Vec<String>,
    },
    Stats,
}

fn invalid(message: String) -> UserError {
    UserError::InvalidArgument(format!("{}; usage: {}", message, USAGE))
}

fn number(args: &[&str], index: usize, name: &str) -> Result<u32, UserError> {
    let arg = args
        .get(index)
        .ok_or_else(|| invalid(format!("missing {}", name)))?;
    arg.parse()
        .map_err(|_| invalid(format!("{} is not a number: {}", name, arg)))
}

fn word(args: &[&str], index: usize, name: &str) -> Result<String, UserError> {
    args.get(index)
        .map(|arg| arg.to_string())
        .ok_or_else(|| invalid(format!("missing {}", name)))
}

fn expect_args(command: &str, args: &[&str], count: usize) -> Result<(), UserError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(invalid(format!(
            "{} takes {} argument(s), {} given",
            command,
            count,
            args.len()
        )))
    }
}

/// Parses one console line into the node which runs it and the command.
///
/// Returns `None` for empty lines and comments.
pub fn parse_line(line: &str) -> Result<Option<(NodeId, Command)>, UserError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    let node_id = number(&words, 0, "node")?;
    let command = word(&words, 1, "command")?;
    let args = &words[2..];

    let command = match command.as_str() {
        "create-db" | "alter-db" => {
            expect_args(&command, args, 3)?;
            let db = word(args, 0, "db")?;
            let id = number(args, 1, "id")?;
            let version = number(args, 2, "version")?;
            if command == "create-db" {
                Command::CreateDb { db, id, version }
            } else {
                Command::AlterDb { db, id, version }
            }
        }
        "drop-db" => {
            expect_args(&command, args, 1)?;
            Command::DropDb {
                db: word(args, 0, "db")?,
            }
        }
        "create-table" | "alter-table" | "truncate-table" | "drop-table" => {
            expect_args(&command, args, 4)?;
            let table = TableName::new(args[0], args[1]);
            let id = number(args, 2, "id")?;
            let version = number(args, 3, "version")?;
            match command.as_str() {
                "create-table" => Command::CreateTable { table, id, version },
                "alter-table" => Command::AlterTable { table, id, version },
                "truncate-table" => Command::TruncateTable { table, id, version },
                _ => Command::DropTable { table, id, version },
            }
        }
        "rename-table" => {
            expect_args(&command, args, 6)?;
            Command::RenameTable {
                table: TableName::new(args[0], args[1]),
                new_name: TableName::new(args[2], args[3]),
                id: number(args, 4, "id")?,
                version: number(args, 5, "version")?,
            }
        }
        "create-tablespace"
        | "alter-tablespace"
        | "drop-tablespace"
        | "create-logfile-group"
        | "alter-logfile-group"
        | "drop-logfile-group" => {
            expect_args(&command, args, 3)?;
            let name = word(args, 0, "name")?;
            let id = number(args, 1, "id")?;
            let version = number(args, 2, "version")?;
            match command.as_str() {
                "create-tablespace" => Command::CreateTablespace { name, id, version },
                "alter-tablespace" => Command::AlterTablespace { name, id, version },
                "drop-tablespace" => Command::DropTablespace { name, id, version },
                "create-logfile-group" => Command::CreateLogfileGroup { name, id, version },
                "alter-logfile-group" => Command::AlterLogfileGroup { name, id, version },
                _ => Command::DropLogfileGroup { name, id, version },
            }
        }
        "acl" => {
            if args.is_empty() {
                return Err(invalid("acl needs a statement".to_string()));
            }
            Command::Acl {
                statement: args.join(" "),
            }
        }
        "acl-snapshot" => {
            if args.is_empty() {
                return Err(invalid("acl-snapshot needs at least one user".to_string()));
            }
            Command::AclSnapshot {
                users: args.iter().map(|user| user.to_string()).collect(),
            }
        }
        "stats" => {
            expect_args(&command, args, 0)?;
            Command::Stats
        }
        _ => return Err(invalid(format!("unknown command: {}", command))),
    };

    Ok(Some((node_id, command)))
}

/// Runs console commands against the nodes of the daemon.
pub struct Console<'a> {
    cluster: &'a MemoryCluster,
    nodes: &'a [SchemaDistNode],
}

impl<'a> Console<'a> {
    pub fn new(cluster: &'a MemoryCluster, nodes: &'a [SchemaDistNode]) -> Self {
        Console { cluster, nodes }
    }

    /// Runs `command` from the client of `node_id` and returns a one-line report.
    pub fn execute(&self, node_id: NodeId, command: Command) -> Result<String, UserError> {
        let node = self
            .nodes
            .iter()
            .find(|node| node.node_id() == node_id)
            .ok_or_else(|| UserError::InvalidArgument(format!("no such node: {}", node_id)))?;
        let client = node.client();
        let session = Session::new(node.context().server_id());

        let outcome = match command {
            Command::CreateDb { db, id, version } => {
                let query = format!("CREATE DATABASE {}", db);
                client.create_db(&session, &query, &db, id, version)
            }
            Command::AlterDb { db, id, version } => {
                let query = format!("ALTER DATABASE {}", db);
                client.alter_db(&session, &query, &db, id, version)
            }
            Command::DropDb { db } => {
                let query = format!("DROP DATABASE {}", db);
                let outcome = client.drop_db(&session, &query, &db)?;
                for def in self.cluster_tables()? {
                    if def.name().db() == db {
                        self.cluster.drop_table(def.name());
                    }
                }
                Ok(outcome)
            }
            Command::CreateTable { table, id, version } => {
                self.cluster
                    .create_table(cluster_table(&table, id, version)?)
                    .map_err(|err| {
                        UserError::daemon_err_with_source("unable to create table", Box::new(err))
                    })?;
                let query = format!("CREATE TABLE {}", table);
                client.create_table(&session, &query, table.db(), table.name(), id, version)
            }
            Command::AlterTable { table, id, version } => {
                let query = format!("ALTER TABLE {}", table);
                client.alter_table(&session, &query, table.db(), table.name(), id, version)
            }
            Command::TruncateTable { table, id, version } => {
                let query = format!("TRUNCATE TABLE {}", table);
                client.truncate_table(&session, &query, table.db(), table.name(), id, version)
            }
            Command::RenameTable {
                table,
                new_name,
                id,
                version,
            } => {
                let prepared = client.rename_table_prepare(
                    &session,
                    table.db(),
                    table.name(),
                    id,
                    version,
                    &new_name,
                )?;
                if !prepared.is_success() {
                    return Ok(format!("rename of {} not prepared: {}", table, prepared));
                }
                self.cluster.rename_table(&table, &new_name).map_err(|err| {
                    UserError::daemon_err_with_source("unable to rename table", Box::new(err))
                })?;
                let query = format!("RENAME TABLE {} TO {}", table, new_name);
                client.rename_table(&session, &query, table.db(), table.name(), id, version)
            }
            Command::DropTable { table, id, version } => {
                let query = format!("DROP TABLE {}", table);
                let outcome =
                    client.drop_table(&session, &query, table.db(), table.name(), id, version)?;
                self.cluster.drop_table(&table);
                Ok(outcome)
            }
            Command::CreateTablespace { name, id, version } => {
                let query = format!("CREATE TABLESPACE {}", name);
                client.create_tablespace(&session, &query, &name, id, version)
            }
            Command::AlterTablespace { name, id, version } => {
                let query = format!("ALTER TABLESPACE {}", name);
                client.alter_tablespace(&session, &query, &name, id, version)
            }
            Command::DropTablespace { name, id, version } => {
                let query = format!("DROP TABLESPACE {}", name);
                client.drop_tablespace(&session, &query, &name, id, version)
            }
            Command::CreateLogfileGroup { name, id, version } => {
                let query = format!("CREATE LOGFILE GROUP {}", name);
                client.create_logfile_group(&session, &query, &name, id, version)
            }
            Command::AlterLogfileGroup { name, id, version } => {
                let query = format!("ALTER LOGFILE GROUP {}", name);
                client.alter_logfile_group(&session, &query, &name, id, version)
            }
            Command::DropLogfileGroup { name, id, version } => {
                let query = format!("DROP LOGFILE GROUP {}", name);
                client.drop_logfile_group(&session, &query, &name, id, version)
            }
            Command::Acl { statement } => client.acl_notify(&session, &statement),
            Command::AclSnapshot { users } => client.acl_snapshot(&session, &users),
            Command::Stats => {
                let stats = node.stats();
                return Ok(format!(
                    "node {}: coordinated {}, applied {}, apply failures {}, timeouts {}, \
                     epochs {}, restarts {}",
                    node_id,
                    stats.ops_coordinated,
                    stats.ops_applied,
                    stats.apply_failures,
                    stats.timeouts,
                    stats.epochs_injected,
                    stats.restarts
                ));
            }
        };

        report(outcome)
    }

    fn cluster_tables(&self) -> Result<Vec<TableDef>, UserError> {
        self.cluster.list_tables().map_err(|err| {
            UserError::daemon_err_with_source("unable to list tables", Box::new(err))
        })
    }
}

impl From<SchemaDistError> for UserError {
    fn from(err: SchemaDistError) -> Self {
        UserError::daemon_err_with_source("schema distribution failed", Box::new(err))
    }
}

fn report(outcome: Result<SchemaDistOutcome, SchemaDistError>) -> Result<String, UserError> {
    match outcome {
        Ok(outcome) => Ok(outcome.to_string()),
        Err(SchemaDistError::Timeout { op, results }) => Ok(format!(
            "{} timed out, {} participant(s) answered",
            op,
            results.len()
        )),
        Err(err) => Err(err.into()),
    }
}

// Tables created from the console all share one layout.
fn cluster_table(table: &TableName, id: u32, version: u32) -> Result<TableDef, UserError> {
    TableDef::builder()
        .with_name(table.clone())
        .with_id(id)
        .with_version(version)
        .with_column(ColumnDef::new("id", ColumnType::UInt))
        .with_column(ColumnDef::new("value", ColumnType::Text { max_len: 255 }).nullable())
        .with_primary_key(&["id"])
        .build()
        .map_err(|err| UserError::InvalidArgument(err.to_string()))
}
