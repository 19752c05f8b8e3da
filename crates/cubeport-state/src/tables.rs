//! redb table definitions for the Cubeport state store.
//!
//! Entity tables use `u64` ids as keys and `&[u8]` values (JSON-serialized
//! domain types). Ids are allocated from the `SEQUENCES` table and never reused.

use redb::TableDefinition;

/// Workspaces keyed by id.
pub const WORKSPACES: TableDefinition<u64, &[u8]> = TableDefinition::new("workspaces");

/// Cube specifications keyed by id.
pub const CUBES: TableDefinition<u64, &[u8]> = TableDefinition::new("cubes");

/// Proxy routes keyed by id.
pub const PROXIES: TableDefinition<u64, &[u8]> = TableDefinition::new("proxies");

/// Last allocated id per entity table, keyed by table name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
