//! Loader for the OPDB machine export (`data/opdb.json`).

use std::path::Path;

use anyhow::{Context, Result};
use pinwatch_core::Product;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct OpdbEntry {
    #[serde(default)]
    opdb_id: Option<String>,
    #[serde(default)]
    ipdb_id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    shortname: Option<String>,
    #[serde(default)]
    manufacturer: Option<OpdbManufacturer>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    manufacture_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpdbManufacturer {
    #[serde(default)]
    name: Option<String>,
}

/// Reads an OPDB export and returns the entries usable as catalog products.
/// Entries without an id or a name are dropped; the year comes from the
/// `YYYY-MM-DD` manufacture date prefix.
pub fn load_opdb_catalog(path: impl AsRef<Path>) -> Result<Vec<Product>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let entries: Vec<OpdbEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let total = entries.len();
    let products: Vec<Product> = entries.into_iter().filter_map(entry_to_product).collect();
    debug!(total, usable = products.len(), "loaded machine export");
    Ok(products)
}

fn entry_to_product(entry: OpdbEntry) -> Option<Product> {
    let opdb_id = entry.opdb_id.filter(|id| !id.is_empty())?;
    let name = entry.name.filter(|name| !name.is_empty())?;
    Some(Product {
        opdb_id,
        ipdb_id: entry.ipdb_id.map(|id| id.to_string()),
        name,
        shortname: entry.shortname.filter(|s| !s.is_empty()),
        manufacturer: entry.manufacturer.and_then(|m| m.name),
        kind: entry.kind,
        year: entry.manufacture_date.as_deref().and_then(year_from_date),
    })
}

fn year_from_date(date: &str) -> Option<i32> {
    date.split('-').next()?.parse().ok()
}
