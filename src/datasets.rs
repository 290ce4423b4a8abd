//! Local JSON dataset helpers.
//!
//! Datasets are arrays of records, one file per collection run or one
//! sequence-numbered partial per checkpoint. These helpers read them back,
//! either to seed a resumed fetch or to merge clear-on-save partials into a
//! single in-memory dataset.

use std::path::Path;

use anyhow::{Context, Result};

use crate::paginate::Record;

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("dataset {} is not a record array", path.display()))
}

/// Concatenates every `.json` dataset in `dir`, in filename order, so
/// zero-padded checkpoint sequences merge in fetch order.
pub fn read_records_dir(
    dir: &Path,
    blacklist: Option<&[&str]>,
    whitelist: Option<&[&str]>,
) -> Result<Vec<Record>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read dataset dir {}", dir.display()))?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    names.sort();

    let mut records = Vec::new();
    for name in names {
        if !name.ends_with(".json") {
            continue;
        }
        if blacklist.is_some_and(|list| list.contains(&name.as_str())) {
            continue;
        }
        if whitelist.is_some_and(|list| !list.contains(&name.as_str())) {
            continue;
        }
        records.extend(read_records(&dir.join(&name))?);
    }
    Ok(records)
}
