use anyhow::{bail, Result};
use rusqlite::{params, Connection};

use super::BASE_DB_VERSION;

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
}

/// Declarative column definition, built with const chaining:
///
/// ```ignore
/// ColumnDef::new("name", SqlType::Text).not_null()
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub not_null: bool,
    pub default_expr: Option<&'static str>,
    pub references: Option<(&'static str, &'static str, OnDelete)>,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        ColumnDef {
            name,
            sql_type,
            primary_key: false,
            not_null: false,
            default_expr: None,
            references: None,
        }
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub const fn default_expr(mut self, expr: &'static str) -> Self {
        self.default_expr = Some(expr);
        self
    }

    pub const fn references(
        mut self,
        table: &'static str,
        column: &'static str,
        on_delete: OnDelete,
    ) -> Self {
        self.references = Some((table, column, on_delete));
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str(self.name);
        out.push(' ');
        out.push_str(self.sql_type.as_sql());
        if self.primary_key {
            out.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            out.push_str(" NOT NULL");
        }
        if let Some(expr) = self.default_expr {
            out.push_str(" DEFAULT ");
            out.push_str(expr);
        }
        if let Some((table, column, on_delete)) = self.references {
            out.push_str(&format!(
                " REFERENCES {}({}) ON DELETE {}",
                table,
                column,
                match on_delete {
                    OnDelete::Cascade => "CASCADE",
                    OnDelete::SetNull => "SET NULL",
                    OnDelete::Restrict => "RESTRICT",
                }
            ));
        }
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    /// (index name, comma-separated column list)
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut sql = format!("CREATE TABLE {} (", self.name);
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            column.render(&mut sql);
        }
        for unique in self.unique_constraints {
            sql.push_str(&format!(", UNIQUE ({})", unique.join(", ")));
        }
        sql.push_str(");");
        conn.execute(&sql, params![])?;

        for (index_name, column_list) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_list
                ),
                params![],
            )?;
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Cheap structural check that every declared table and column exists.
    /// Catches a database that was created by something else entirely before
    /// any query fails with a confusing missing-column error.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table.name))?;
            let actual: Vec<String> = stmt
                .query_map(params![], |row| row.get::<_, String>(1))?
                .collect::<Result<_, _>>()?;
            if actual.is_empty() {
                bail!("Table {} is missing", table.name);
            }
            for column in table.columns {
                if !actual.iter().any(|name| name == column.name) {
                    bail!("Table {} is missing column {}", table.name, column.name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TABLE: Table = Table {
        name: "widgets",
        columns: &[
            ColumnDef::new("rowid", SqlType::Integer).primary_key(),
            ColumnDef::new("name", SqlType::Text).not_null(),
            ColumnDef::new("created_at", SqlType::Integer)
                .not_null()
                .default_expr(DEFAULT_TIMESTAMP),
        ],
        indices: &[("idx_widgets_name", "name")],
        unique_constraints: &[&["name"]],
    };

    const TEST_SCHEMA: VersionedSchema = VersionedSchema {
        version: 0,
        tables: &[TEST_TABLE],
        migration: None,
    };

    #[test]
    fn create_and_validate() {
        let conn = Connection::open_in_memory().unwrap();
        TEST_SCHEMA.create(&conn).unwrap();
        TEST_SCHEMA.validate(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION);

        conn.execute("INSERT INTO widgets (name) VALUES ('a')", [])
            .unwrap();
        let created: i64 = conn
            .query_row("SELECT created_at FROM widgets", [], |r| r.get(0))
            .unwrap();
        assert!(created > 0);
    }

    #[test]
    fn validate_rejects_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE widgets (rowid INTEGER PRIMARY KEY)", [])
            .unwrap();
        assert!(TEST_SCHEMA.validate(&conn).is_err());
    }
}
