//! KEGG REST download.
//!
//! Fetches the module list and per-module flat-file records from the KEGG
//! REST service for `build-catalog --download`. Record parsing is separate
//! from fetching so the flat-file handling stays testable offline.

use anyhow::{Context, Result};
use std::time::Duration;

const KEGG_REST_BASE: &str = "https://rest.kegg.jp";

/// Fields extracted from one KEGG module flat-file record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleRecord {
    pub definition: Option<String>,
    pub classes: Option<String>,
}

/// Fetches the full module list as `(module id, name)` pairs.
pub fn fetch_module_list() -> Result<Vec<(String, String)>> {
    let url = format!("{}/list/module", KEGG_REST_BASE);
    let body = fetch_text(&url)?;

    let mut modules = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (id, name) = line
            .split_once('\t')
            .with_context(|| format!("Malformed module list line: {}", line))?;
        modules.push((id.to_string(), name.to_string()));
    }
    Ok(modules)
}

/// Fetches the raw flat-file record for one module.
pub fn fetch_module_record(module_id: &str) -> Result<String> {
    fetch_text(&format!("{}/get/{}", KEGG_REST_BASE, module_id))
}

fn fetch_text(url: &str) -> Result<String> {
    let response = ureq::get(url)
        .timeout(Duration::from_secs(120))
        .call()
        .with_context(|| format!("Failed to download {}", url))?;
    response
        .into_string()
        .with_context(|| format!("Failed to read response body from {}", url))
}

/// Extracts the `DEFINITION` and `CLASS` lines from a flat-file record.
/// KEGG pads field names to a twelve-column gutter.
pub fn extract_record_fields(record: &str) -> ModuleRecord {
    let mut fields = ModuleRecord::default();
    for line in record.lines() {
        if let Some(value) = field_value(line, "DEFINITION") {
            fields.definition = Some(value.to_string());
        } else if let Some(value) = field_value(line, "CLASS") {
            fields.classes = Some(value.to_string());
        }
    }
    fields
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    if !line.starts_with(field) {
        return None;
    }
    let value = line.get(12..).unwrap_or("").trim();
    (!value.is_empty()).then_some(value)
}
