//! Relational schema model, ordered migration catalog and Postgres runner.
//!
//! Migrations are forward/backward pairs over an in-memory [`SchemaState`];
//! the same actions render the PostGIS-aware DDL that the runner executes
//! against a live database. Forward application is guarded by existence
//! checks so repeated runs across environments are safe.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "siteline-schema";

/// Name of the version bookkeeping table.
pub const VERSION_TABLE: &str = "schema_migrations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Uuid,
    Text,
    TextArray,
    Integer,
    Boolean,
    Date,
    TimestampTz,
    Jsonb,
    GeometryPoint,
    GeometryPolygon,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Text => "text",
            Self::TextArray => "text[]",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::TimestampTz => "timestamptz",
            Self::Jsonb => "jsonb",
            Self::GeometryPoint => "geometry(Point,4326)",
            Self::GeometryPolygon => "geometry(Polygon,4326)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn sql(&self) -> String {
        let mut out = format!("{} {}", self.name, self.column_type.sql());
        if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            out.push_str(" DEFAULT ");
            out.push_str(default);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceAction {
    Cascade,
    SetNull,
    Restrict,
}

impl ReferenceAction {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableConstraint {
    PrimaryKey {
        columns: Vec<String>,
    },
    Unique {
        name: String,
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
        on_delete: ReferenceAction,
    },
    Check {
        name: String,
        expr: String,
    },
}

impl TableConstraint {
    pub fn sql(&self) -> String {
        match self {
            Self::PrimaryKey { columns } => format!("PRIMARY KEY ({})", columns.join(", ")),
            Self::Unique { name, columns } => {
                format!("CONSTRAINT {name} UNIQUE ({})", columns.join(", "))
            }
            Self::ForeignKey {
                columns,
                ref_table,
                ref_columns,
                on_delete,
            } => format!(
                "FOREIGN KEY ({}) REFERENCES {ref_table} ({}) ON DELETE {}",
                columns.join(", "),
                ref_columns.join(", "),
                on_delete.sql()
            ),
            Self::Check { name, expr } => format!("CONSTRAINT {name} CHECK ({expr})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn create_sql(&self) -> String {
        let mut lines: Vec<String> = self.columns.iter().map(|c| format!("  {}", c.sql())).collect();
        lines.extend(self.constraints.iter().map(|c| format!("  {}", c.sql())));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            self.name,
            lines.join(",\n")
        )
    }
}

/// SQL command class a row-level-security policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCommand {
    Select,
    Insert,
    Update,
    Delete,
}

impl PolicyCommand {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Declarative per-row predicate evaluated by Postgres on every statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDef {
    pub name: String,
    pub table: String,
    pub command: PolicyCommand,
    pub using_expr: Option<String>,
    pub check_expr: Option<String>,
}

impl PolicyDef {
    pub fn sql(&self) -> String {
        let mut out = format!(
            "CREATE POLICY {} ON {} FOR {}",
            self.name,
            self.table,
            self.command.sql()
        );
        if let Some(using) = &self.using_expr {
            out.push_str(&format!(" USING ({using})"));
        }
        if let Some(check) = &self.check_expr {
            out.push_str(&format!(" WITH CHECK ({check})"));
        }
        out.push(';');
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("no such table `{0}`")]
    NoSuchTable(String),
    #[error("no such column `{table}.{column}`")]
    NoSuchColumn { table: String, column: String },
}

/// In-memory catalog that migration actions apply against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaState {
    pub tables: BTreeMap<String, TableDef>,
    pub rls_enabled: BTreeSet<String>,
    pub policies: BTreeMap<String, PolicyDef>,
}

impl SchemaState {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableDef, SchemaError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SchemaError::NoSuchTable(name.to_string()))
    }

    fn policy_key(table: &str, name: &str) -> String {
        format!("{table}.{name}")
    }
}

/// One reversible DDL step. Column adds/drops and table creation are
/// existence-guarded; applying them twice leaves the state unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationAction {
    CreateTable(TableDef),
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    AlterColumnType {
        table: String,
        column: String,
        to: ColumnType,
        using: Option<String>,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    EnableRowLevelSecurity {
        table: String,
    },
    DisableRowLevelSecurity {
        table: String,
    },
    CreatePolicy(PolicyDef),
    DropPolicy {
        table: String,
        name: String,
    },
}

impl MigrationAction {
    pub fn apply(&self, state: &mut SchemaState) -> Result<(), SchemaError> {
        match self {
            Self::CreateTable(def) => {
                if state.tables.contains_key(&def.name) {
                    debug!(table = %def.name, "table exists, create skipped");
                    return Ok(());
                }
                state.tables.insert(def.name.clone(), def.clone());
            }
            Self::DropTable { table } => {
                state.tables.remove(table);
                state.rls_enabled.remove(table);
                state
                    .policies
                    .retain(|_, policy| policy.table != *table);
            }
            Self::AddColumn { table, column } => {
                let def = state.table_mut(table)?;
                if def.column(&column.name).is_some() {
                    debug!(table, column = %column.name, "column exists, add skipped");
                    return Ok(());
                }
                def.columns.push(column.clone());
            }
            Self::DropColumn { table, column } => {
                let def = state.table_mut(table)?;
                def.columns.retain(|c| c.name != *column);
            }
            Self::AlterColumnType {
                table,
                column,
                to,
                using: _,
            } => {
                let table_name = table.clone();
                let def = state.table_mut(table)?;
                let col = def
                    .columns
                    .iter_mut()
                    .find(|c| c.name == *column)
                    .ok_or(SchemaError::NoSuchColumn {
                        table: table_name,
                        column: column.clone(),
                    })?;
                col.column_type = *to;
            }
            Self::RenameColumn { table, from, to } => {
                let def = state.table_mut(table)?;
                if def.column(from).is_none() && def.column(to).is_some() {
                    debug!(table, from, to, "column already renamed, skipped");
                    return Ok(());
                }
                let table_name = table.clone();
                let col = def
                    .columns
                    .iter_mut()
                    .find(|c| c.name == *from)
                    .ok_or(SchemaError::NoSuchColumn {
                        table: table_name,
                        column: from.clone(),
                    })?;
                col.name = to.clone();
            }
            Self::EnableRowLevelSecurity { table } => {
                state.rls_enabled.insert(table.clone());
            }
            Self::DisableRowLevelSecurity { table } => {
                state.rls_enabled.remove(table);
            }
            Self::CreatePolicy(policy) => {
                state.policies.insert(
                    SchemaState::policy_key(&policy.table, &policy.name),
                    policy.clone(),
                );
            }
            Self::DropPolicy { table, name } => {
                state.policies.remove(&SchemaState::policy_key(table, name));
            }
        }
        Ok(())
    }

    pub fn sql(&self) -> String {
        match self {
            Self::CreateTable(def) => def.create_sql(),
            Self::DropTable { table } => format!("DROP TABLE IF EXISTS {table};"),
            Self::AddColumn { table, column } => format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {};",
                column.sql()
            ),
            Self::DropColumn { table, column } => {
                format!("ALTER TABLE {table} DROP COLUMN IF EXISTS {column};")
            }
            Self::AlterColumnType {
                table,
                column,
                to,
                using,
            } => {
                let mut out = format!("ALTER TABLE {table} ALTER COLUMN {column} TYPE {}", to.sql());
                if let Some(using) = using {
                    out.push_str(&format!(" USING {using}"));
                }
                out.push(';');
                out
            }
            Self::RenameColumn { table, from, to } => {
                format!("ALTER TABLE {table} RENAME COLUMN {from} TO {to};")
            }
            Self::EnableRowLevelSecurity { table } => {
                format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;")
            }
            Self::DisableRowLevelSecurity { table } => {
                format!("ALTER TABLE {table} DISABLE ROW LEVEL SECURITY;")
            }
            Self::CreatePolicy(policy) => policy.sql(),
            Self::DropPolicy { table, name } => {
                format!("DROP POLICY IF EXISTS {name} ON {table};")
            }
        }
    }
}

/// A timestamp-versioned forward/backward pair. `lossy_down` marks pairs
/// whose rollback cannot restore prior values (documented limitation of the
/// developer-region array conversion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: &'static str,
    pub name: &'static str,
    pub lossy_down: bool,
    pub up: Vec<MigrationAction>,
    pub down: Vec<MigrationAction>,
}

impl Migration {
    pub fn apply_up(&self, state: &mut SchemaState) -> Result<(), SchemaError> {
        for action in &self.up {
            action.apply(state)?;
        }
        Ok(())
    }

    pub fn apply_down(&self, state: &mut SchemaState) -> Result<(), SchemaError> {
        for action in &self.down {
            action.apply(state)?;
        }
        Ok(())
    }

    pub fn up_sql(&self) -> String {
        self.up
            .iter()
            .map(MigrationAction::sql)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn col(name: &str, column_type: ColumnType) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        column_type,
        nullable: true,
        default: None,
    }
}

fn req(name: &str, column_type: ColumnType) -> ColumnDef {
    ColumnDef {
        nullable: false,
        ..col(name, column_type)
    }
}

fn req_default(name: &str, column_type: ColumnType, default: &str) -> ColumnDef {
    ColumnDef {
        default: Some(default.to_string()),
        ..req(name, column_type)
    }
}

fn id_column() -> ColumnDef {
    req_default("id", ColumnType::Uuid, "gen_random_uuid()")
}

fn created_at() -> ColumnDef {
    req_default("created_at", ColumnType::TimestampTz, "now()")
}

fn updated_at() -> ColumnDef {
    req_default("updated_at", ColumnType::TimestampTz, "now()")
}

fn pk() -> TableConstraint {
    TableConstraint::PrimaryKey {
        columns: vec!["id".to_string()],
    }
}

fn fk(columns: &[&str], ref_table: &str, on_delete: ReferenceAction) -> TableConstraint {
    TableConstraint::ForeignKey {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        ref_table: ref_table.to_string(),
        ref_columns: vec!["id".to_string()],
        on_delete,
    }
}

/// Requester identity as seen by the policies; the fronting API layer sets
/// `app.user_id` per connection.
const POLICY_UID: &str = "current_setting('app.user_id', true)::uuid";

/// Ordered migration history. Versions are strictly increasing and each
/// step only assumes the shape left behind by its predecessors.
pub fn catalog() -> Vec<Migration> {
    vec![
        Migration {
            version: "20240916104500",
            name: "create_users",
            lossy_down: false,
            up: vec![MigrationAction::CreateTable(TableDef {
                name: "users".to_string(),
                columns: vec![
                    id_column(),
                    req("email", ColumnType::Text),
                    req_default("created_at", ColumnType::TimestampTz, "now()"),
                ],
                constraints: vec![
                    pk(),
                    TableConstraint::Unique {
                        name: "uq_users_email".to_string(),
                        columns: vec!["email".to_string()],
                    },
                ],
            })],
            down: vec![MigrationAction::DropTable {
                table: "users".to_string(),
            }],
        },
        Migration {
            version: "20241007121500",
            name: "create_sites",
            lossy_down: false,
            up: vec![
                MigrationAction::CreateTable(TableDef {
                    name: "sites".to_string(),
                    columns: vec![
                        id_column(),
                        req("user_id", ColumnType::Uuid),
                        req("name", ColumnType::Text),
                        req("address", ColumnType::Text),
                        col("developer_name", ColumnType::Text),
                        req_default("developer_regions", ColumnType::TextArray, "'{}'"),
                        req_default("lpa_codes", ColumnType::TextArray, "'{}'"),
                        req_default("region_codes", ColumnType::TextArray, "'{}'"),
                        req_default("planning_status", ColumnType::Text, "'none'"),
                        req_default("land_purchase_status", ColumnType::Text, "'not-secured'"),
                        col("context", ColumnType::Text),
                        col("programme", ColumnType::Text),
                        col("terms", ColumnType::Text),
                        created_at(),
                        updated_at(),
                    ],
                    constraints: vec![pk(), fk(&["user_id"], "users", ReferenceAction::Cascade)],
                }),
                MigrationAction::CreateTable(TableDef {
                    name: "site_tags".to_string(),
                    columns: vec![id_column(), req("site_id", ColumnType::Uuid), req("tag", ColumnType::Text)],
                    constraints: vec![pk(), fk(&["site_id"], "sites", ReferenceAction::Cascade)],
                }),
                MigrationAction::CreateTable(TableDef {
                    name: "site_files".to_string(),
                    columns: vec![
                        id_column(),
                        req("site_id", ColumnType::Uuid),
                        req("url", ColumnType::Text),
                        req("title", ColumnType::Text),
                        col("description", ColumnType::Text),
                        col("content_hash", ColumnType::Text),
                        req_default("created_at", ColumnType::TimestampTz, "now()"),
                    ],
                    constraints: vec![pk(), fk(&["site_id"], "sites", ReferenceAction::Cascade)],
                }),
            ],
            down: vec![
                MigrationAction::DropTable {
                    table: "site_files".to_string(),
                },
                MigrationAction::DropTable {
                    table: "site_tags".to_string(),
                },
                MigrationAction::DropTable {
                    table: "sites".to_string(),
                },
            ],
        },
        Migration {
            version: "20241102090000",
            name: "create_live_opportunities",
            lossy_down: false,
            up: vec![MigrationAction::CreateTable(TableDef {
                name: "live_opportunities".to_string(),
                columns: vec![
                    id_column(),
                    req("user_id", ColumnType::Uuid),
                    req("name", ColumnType::Text),
                    req("address", ColumnType::Text),
                    req_default("opportunity_type", ColumnType::Text, "'section-106'"),
                    col("developer_name", ColumnType::Text),
                    // Single free-text region at this point in the history;
                    // converted to an array by 20250312094500.
                    col("developer_region", ColumnType::Text),
                    req_default("planning_status", ColumnType::Text, "'none'"),
                    req_default("land_purchase_status", ColumnType::Text, "'not-secured'"),
                    req("plots", ColumnType::Integer),
                    col("plot_breakdown", ColumnType::Jsonb),
                    req_default("tenures", ColumnType::TextArray, "'{}'"),
                    req_default("lpa_codes", ColumnType::TextArray, "'{}'"),
                    req_default("region_codes", ColumnType::TextArray, "'{}'"),
                    col("context", ColumnType::Text),
                    col("programme", ColumnType::Text),
                    col("terms", ColumnType::Text),
                    req_default("documents", ColumnType::Jsonb, "'[]'"),
                    req_default("status", ColumnType::Text, "'draft'"),
                    created_at(),
                    updated_at(),
                ],
                constraints: vec![
                    pk(),
                    fk(&["user_id"], "users", ReferenceAction::Cascade),
                    TableConstraint::Check {
                        name: "chk_live_opportunities_status".to_string(),
                        expr: "status IN ('draft', 'published', 'withdrawn')".to_string(),
                    },
                    TableConstraint::Check {
                        name: "chk_live_opportunities_plots".to_string(),
                        expr: "plots > 0".to_string(),
                    },
                ],
            })],
            down: vec![MigrationAction::DropTable {
                table: "live_opportunities".to_string(),
            }],
        },
        Migration {
            version: "20241102091000",
            name: "create_live_opportunity_tags",
            lossy_down: false,
            up: vec![MigrationAction::CreateTable(TableDef {
                name: "live_opportunity_tags".to_string(),
                columns: vec![
                    id_column(),
                    req("opportunity_id", ColumnType::Uuid),
                    req("tag", ColumnType::Text),
                ],
                constraints: vec![
                    pk(),
                    fk(&["opportunity_id"], "live_opportunities", ReferenceAction::Cascade),
                ],
            })],
            down: vec![MigrationAction::DropTable {
                table: "live_opportunity_tags".to_string(),
            }],
        },
        Migration {
            version: "20241220102000",
            name: "add_handover_dates",
            lossy_down: false,
            up: vec![
                MigrationAction::AddColumn {
                    table: "live_opportunities".to_string(),
                    column: col("start_on_site", ColumnType::Date),
                },
                MigrationAction::AddColumn {
                    table: "live_opportunities".to_string(),
                    column: col("first_handover", ColumnType::Date),
                },
                MigrationAction::AddColumn {
                    table: "live_opportunities".to_string(),
                    column: col("final_handover", ColumnType::Date),
                },
            ],
            down: vec![
                MigrationAction::DropColumn {
                    table: "live_opportunities".to_string(),
                    column: "final_handover".to_string(),
                },
                MigrationAction::DropColumn {
                    table: "live_opportunities".to_string(),
                    column: "first_handover".to_string(),
                },
                MigrationAction::DropColumn {
                    table: "live_opportunities".to_string(),
                    column: "start_on_site".to_string(),
                },
            ],
        },
        Migration {
            version: "20250105143000",
            name: "add_geometry_columns",
            lossy_down: false,
            up: vec![
                MigrationAction::AddColumn {
                    table: "sites".to_string(),
                    column: col("location", ColumnType::GeometryPoint),
                },
                MigrationAction::AddColumn {
                    table: "sites".to_string(),
                    column: col("boundary", ColumnType::GeometryPolygon),
                },
                MigrationAction::AddColumn {
                    table: "live_opportunities".to_string(),
                    column: col("location", ColumnType::GeometryPoint),
                },
                MigrationAction::AddColumn {
                    table: "live_opportunities".to_string(),
                    column: col("boundary", ColumnType::GeometryPolygon),
                },
            ],
            down: vec![
                MigrationAction::DropColumn {
                    table: "live_opportunities".to_string(),
                    column: "boundary".to_string(),
                },
                MigrationAction::DropColumn {
                    table: "live_opportunities".to_string(),
                    column: "location".to_string(),
                },
                MigrationAction::DropColumn {
                    table: "sites".to_string(),
                    column: "boundary".to_string(),
                },
                MigrationAction::DropColumn {
                    table: "sites".to_string(),
                    column: "location".to_string(),
                },
            ],
        },
        Migration {
            version: "20250118114500",
            name: "create_custom_regions",
            lossy_down: false,
            up: vec![
                MigrationAction::CreateTable(TableDef {
                    name: "custom_regions".to_string(),
                    columns: vec![
                        id_column(),
                        req("name", ColumnType::Text),
                        col("user_id", ColumnType::Uuid),
                        req_default("is_default", ColumnType::Boolean, "false"),
                        req_default("lpa_codes", ColumnType::TextArray, "'{}'"),
                        req_default("created_at", ColumnType::TimestampTz, "now()"),
                    ],
                    constraints: vec![
                        pk(),
                        TableConstraint::Unique {
                            name: "uq_custom_regions_name_owner".to_string(),
                            columns: vec!["name".to_string(), "user_id".to_string()],
                        },
                        fk(&["user_id"], "users", ReferenceAction::Cascade),
                    ],
                }),
                MigrationAction::EnableRowLevelSecurity {
                    table: "custom_regions".to_string(),
                },
                MigrationAction::CreatePolicy(PolicyDef {
                    name: "custom_regions_select".to_string(),
                    table: "custom_regions".to_string(),
                    command: PolicyCommand::Select,
                    using_expr: Some(format!("is_default OR user_id = {POLICY_UID}")),
                    check_expr: None,
                }),
                MigrationAction::CreatePolicy(PolicyDef {
                    name: "custom_regions_insert".to_string(),
                    table: "custom_regions".to_string(),
                    command: PolicyCommand::Insert,
                    using_expr: None,
                    check_expr: Some(format!("user_id = {POLICY_UID} AND NOT is_default")),
                }),
                MigrationAction::CreatePolicy(PolicyDef {
                    name: "custom_regions_update".to_string(),
                    table: "custom_regions".to_string(),
                    command: PolicyCommand::Update,
                    using_expr: Some(format!("user_id = {POLICY_UID} AND NOT is_default")),
                    check_expr: Some(format!("user_id = {POLICY_UID} AND NOT is_default")),
                }),
                MigrationAction::CreatePolicy(PolicyDef {
                    name: "custom_regions_delete".to_string(),
                    table: "custom_regions".to_string(),
                    command: PolicyCommand::Delete,
                    using_expr: Some(format!("user_id = {POLICY_UID} AND NOT is_default")),
                    check_expr: None,
                }),
            ],
            down: vec![
                MigrationAction::DropPolicy {
                    table: "custom_regions".to_string(),
                    name: "custom_regions_delete".to_string(),
                },
                MigrationAction::DropPolicy {
                    table: "custom_regions".to_string(),
                    name: "custom_regions_update".to_string(),
                },
                MigrationAction::DropPolicy {
                    table: "custom_regions".to_string(),
                    name: "custom_regions_insert".to_string(),
                },
                MigrationAction::DropPolicy {
                    table: "custom_regions".to_string(),
                    name: "custom_regions_select".to_string(),
                },
                MigrationAction::DisableRowLevelSecurity {
                    table: "custom_regions".to_string(),
                },
                MigrationAction::DropTable {
                    table: "custom_regions".to_string(),
                },
            ],
        },
        Migration {
            version: "20250201150000",
            name: "create_opportunity_interests",
            lossy_down: false,
            up: vec![MigrationAction::CreateTable(TableDef {
                name: "opportunity_interests".to_string(),
                columns: vec![
                    id_column(),
                    req("opportunity_id", ColumnType::Uuid),
                    req("user_id", ColumnType::Uuid),
                    req_default("created_at", ColumnType::TimestampTz, "now()"),
                ],
                constraints: vec![
                    pk(),
                    TableConstraint::Unique {
                        name: "uq_opportunity_interests_pair".to_string(),
                        columns: vec!["opportunity_id".to_string(), "user_id".to_string()],
                    },
                    fk(&["opportunity_id"], "live_opportunities", ReferenceAction::Cascade),
                    fk(&["user_id"], "users", ReferenceAction::Cascade),
                ],
            })],
            down: vec![MigrationAction::DropTable {
                table: "opportunity_interests".to_string(),
            }],
        },
        Migration {
            version: "20250214101500",
            name: "create_shortlists",
            lossy_down: false,
            up: vec![MigrationAction::CreateTable(TableDef {
                name: "shortlists".to_string(),
                columns: vec![
                    id_column(),
                    req("user_id", ColumnType::Uuid),
                    req("opportunity_id", ColumnType::Uuid),
                    req_default("created_at", ColumnType::TimestampTz, "now()"),
                ],
                constraints: vec![
                    pk(),
                    TableConstraint::Unique {
                        name: "uq_shortlists_pair".to_string(),
                        columns: vec!["user_id".to_string(), "opportunity_id".to_string()],
                    },
                    fk(&["user_id"], "users", ReferenceAction::Cascade),
                    fk(&["opportunity_id"], "live_opportunities", ReferenceAction::Cascade),
                ],
            })],
            down: vec![MigrationAction::DropTable {
                table: "shortlists".to_string(),
            }],
        },
        Migration {
            version: "20250302123000",
            name: "create_assisted_sites",
            lossy_down: false,
            up: vec![MigrationAction::CreateTable(TableDef {
                name: "assisted_sites".to_string(),
                columns: vec![
                    id_column(),
                    req("user_id", ColumnType::Uuid),
                    req_default("status", ColumnType::Text, "'pending'"),
                    req("site_name", ColumnType::Text),
                    req("address", ColumnType::Text),
                    req("contact_name", ColumnType::Text),
                    req("contact_email", ColumnType::Text),
                    req("contact_phone", ColumnType::Text),
                    col("developer_name", ColumnType::Text),
                    req("plots", ColumnType::Integer),
                    req_default("tenures", ColumnType::TextArray, "'{}'"),
                    col("notes", ColumnType::Text),
                    col("location", ColumnType::GeometryPoint),
                    col("boundary", ColumnType::GeometryPolygon),
                    col("payment_session_id", ColumnType::Text),
                    req_default("is_paid", ColumnType::Boolean, "false"),
                    col("published_site_id", ColumnType::Uuid),
                    created_at(),
                    updated_at(),
                ],
                constraints: vec![
                    pk(),
                    fk(&["user_id"], "users", ReferenceAction::Cascade),
                    fk(&["published_site_id"], "live_opportunities", ReferenceAction::SetNull),
                    TableConstraint::Check {
                        name: "chk_assisted_sites_status".to_string(),
                        expr: "status IN ('pending', 'processing', 'published', 'rejected')"
                            .to_string(),
                    },
                    TableConstraint::Check {
                        name: "chk_assisted_sites_plots".to_string(),
                        expr: "plots > 0".to_string(),
                    },
                ],
            })],
            down: vec![MigrationAction::DropTable {
                table: "assisted_sites".to_string(),
            }],
        },
        Migration {
            version: "20250312094500",
            name: "developer_region_to_array",
            // The original scalar held ad-hoc JSON for some rows; joining the
            // array back to one string cannot reconstruct those values.
            lossy_down: true,
            up: vec![
                MigrationAction::AlterColumnType {
                    table: "live_opportunities".to_string(),
                    column: "developer_region".to_string(),
                    to: ColumnType::TextArray,
                    using: Some("string_to_array(nullif(developer_region, ''), ',')".to_string()),
                },
                MigrationAction::RenameColumn {
                    table: "live_opportunities".to_string(),
                    from: "developer_region".to_string(),
                    to: "developer_regions".to_string(),
                },
            ],
            down: vec![
                MigrationAction::RenameColumn {
                    table: "live_opportunities".to_string(),
                    from: "developer_regions".to_string(),
                    to: "developer_region".to_string(),
                },
                MigrationAction::AlterColumnType {
                    table: "live_opportunities".to_string(),
                    column: "developer_region".to_string(),
                    to: ColumnType::Text,
                    using: Some("array_to_string(developer_region, ',')".to_string()),
                },
            ],
        },
        Migration {
            version: "20250406130000",
            name: "add_custom_address",
            lossy_down: false,
            up: vec![
                MigrationAction::AddColumn {
                    table: "sites".to_string(),
                    column: col("custom_address", ColumnType::Text),
                },
                MigrationAction::AddColumn {
                    table: "live_opportunities".to_string(),
                    column: col("custom_address", ColumnType::Text),
                },
            ],
            down: vec![
                MigrationAction::DropColumn {
                    table: "live_opportunities".to_string(),
                    column: "custom_address".to_string(),
                },
                MigrationAction::DropColumn {
                    table: "sites".to_string(),
                    column: "custom_address".to_string(),
                },
            ],
        },
    ]
}

/// Schema shape after every catalog migration has been applied.
pub fn schema_at_head() -> SchemaState {
    let mut state = SchemaState::default();
    for migration in catalog() {
        migration
            .apply_up(&mut state)
            .expect("catalog migrations apply cleanly in order");
    }
    state
}

/// Full forward DDL for the whole catalog, for `siteline sql`.
pub fn full_sql() -> String {
    let mut out = String::new();
    for migration in catalog() {
        out.push_str(&format!("-- {} {}\n", migration.version, migration.name));
        out.push_str(&migration.up_sql());
        out.push_str("\n\n");
    }
    out
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

async fn ensure_version_table(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (\n  version text PRIMARY KEY,\n  name text NOT NULL,\n  applied_at timestamptz NOT NULL DEFAULT now()\n);"
    ))
    .execute(pool)
    .await?;
    Ok(())
}

async fn applied_versions(pool: &PgPool) -> Result<BTreeSet<String>, MigrateError> {
    let rows = sqlx::query(&format!("SELECT version FROM {VERSION_TABLE}"))
        .fetch_all(pool)
        .await?;
    let mut out = BTreeSet::new();
    for row in rows {
        out.insert(row.try_get::<String, _>("version")?);
    }
    Ok(out)
}

/// Versions not yet recorded in the version table, in application order.
pub async fn plan(pool: &PgPool) -> Result<Vec<&'static str>, MigrateError> {
    ensure_version_table(pool).await?;
    let applied = applied_versions(pool).await?;
    Ok(catalog()
        .iter()
        .filter(|m| !applied.contains(m.version))
        .map(|m| m.version)
        .collect())
}

/// Applies every pending migration in order, one transaction per migration.
pub async fn apply_pending(pool: &PgPool) -> Result<usize, MigrateError> {
    ensure_version_table(pool).await?;
    let applied = applied_versions(pool).await?;
    let mut count = 0usize;

    for migration in catalog() {
        if applied.contains(migration.version) {
            continue;
        }
        let mut tx = pool.begin().await?;
        for action in &migration.up {
            sqlx::query(&action.sql()).execute(&mut *tx).await?;
        }
        sqlx::query(&format!(
            "INSERT INTO {VERSION_TABLE} (version, name) VALUES ($1, $2)"
        ))
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(version = migration.version, name = migration.name, "applied migration");
        count += 1;
    }
    Ok(count)
}

/// Connects to `database_url` and applies pending migrations.
pub async fn migrate_database(database_url: &str) -> Result<usize, MigrateError> {
    let pool = PgPool::connect(database_url).await?;
    apply_pending(&pool).await
}
