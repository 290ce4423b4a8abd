//! GraphQL query text loading.
//!
//! Queries live as `.gql` files next to the collection scripts so they can be
//! shared between transports and edited without touching code.

use std::path::Path;

use anyhow::{Context, Result};

pub const DEFAULT_QUERY_DIR: &str = "gql_queries";

pub fn load_query(name: &str) -> Result<String> {
    load_query_from(Path::new(DEFAULT_QUERY_DIR), name)
}

/// Reads `<dir>/<name>.gql`. The `.gql` extension in `name` is optional.
pub fn load_query_from(dir: &Path, name: &str) -> Result<String> {
    let stem = name.strip_suffix(".gql").unwrap_or(name);
    let path = dir.join(format!("{stem}.gql"));
    std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read query {}", path.display()))
}
