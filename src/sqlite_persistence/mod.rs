mod versioned_schema;

pub use versioned_schema::{
    ColumnDef, OnDelete, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

/// Offset added to the schema version before storing it in `PRAGMA
/// user_version`, so a database created by an unrelated tool (user_version 0
/// with tables present) is distinguishable from our version 0.
pub const BASE_DB_VERSION: usize = 9000;
