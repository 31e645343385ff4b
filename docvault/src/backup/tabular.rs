//! Spreadsheet-friendly CSV rendering of a collection.

use crate::store::StoredDocument;
use crate::utils::{Result, VaultError};
use serde_json::Value;
use std::collections::BTreeSet;

/// Render documents as CSV: `id` followed by the sorted union of top-level field names.
///
/// Strings are written verbatim, absent fields as empty cells and everything
/// else as compact JSON.
pub fn render_collection(docs: &[StoredDocument]) -> Result<Vec<u8>> {
    let columns: BTreeSet<&str> = docs
        .iter()
        .flat_map(|d| d.fields.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push("id");
    header.extend(columns.iter().copied());
    writer.write_record(&header)?;

    for doc in docs {
        let mut row = Vec::with_capacity(header.len());
        row.push(doc.id.clone());
        for column in &columns {
            row.push(match doc.fields.get(*column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            });
        }
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| VaultError::Archive(format!("csv flush: {e}")))
}

pub fn file_name(backup_id: &str, collection: &str) -> String {
    format!("docvault-{backup_id}-{collection}.csv")
}
