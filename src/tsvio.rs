//! Table and text I/O.
//!
//! gzip-transparent line readers and writers (selected by `.gz` extension)
//! plus the small tab-separated tables the profiler consumes: module
//! definition/name/class tables and genome KO lists.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Opens a text file for buffered reading, decompressing `.gz` transparently.
pub fn open_text_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open: {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext == "gz" {
        Ok(Box::new(BufReader::with_capacity(1024 * 1024, MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::with_capacity(1024 * 1024, file)))
    }
}

/// Creates a text file for buffered writing, compressing when the path ends
/// in `.gz`.
pub fn create_text_writer(path: &Path) -> Result<Box<dyn Write>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create: {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext == "gz" {
        Ok(Box::new(GzEncoder::new(BufWriter::new(file), Compression::default())))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Reads a headerless two-column TSV into an ordered map. Later rows win on
/// duplicate keys.
pub fn read_two_column_table(path: &Path) -> Result<BTreeMap<String, String>> {
    let reader = open_text_reader(path)?;
    let mut table = BTreeMap::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read: {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('\t').with_context(|| {
            format!(
                "Expected two tab-separated columns at {}:{}",
                path.display(),
                line_number + 1
            )
        })?;
        table.insert(key.to_string(), value.to_string());
    }

    Ok(table)
}

/// True for a well-formed KO identifier: `K` followed by five digits.
pub fn is_valid_ko(token: &str) -> bool {
    token.len() == 6
        && token.starts_with('K')
        && token[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Reads a KO list into genome → KO-set form.
///
/// The file may hold one KO per line (a single genome, which then needs
/// `name`) or a headerless two-column table `genome <tab> ko`; the shape is
/// detected from the first line. gzip-compressed files are handled
/// transparently.
pub fn read_kos(path: &Path, name: Option<&str>) -> Result<BTreeMap<String, FxHashSet<String>>> {
    let reader = open_text_reader(path)?;
    let mut genome_to_kos: BTreeMap<String, FxHashSet<String>> = BTreeMap::new();
    let mut columns = 0usize;

    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read: {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if columns == 0 {
            columns = fields.len();
            if columns > 2 {
                anyhow::bail!(
                    "KO input must be one KO per line or [genome]<tab>[ko] with no header; \
                     found {} columns in {}",
                    columns,
                    path.display()
                );
            }
        }

        match (columns, fields.as_slice()) {
            (1, [ko]) => {
                let genome = name.with_context(|| {
                    "a single-column KO list needs an explicit genome name".to_string()
                })?;
                genome_to_kos.entry(genome.to_string()).or_default().insert(ko.to_string());
            }
            (2, [genome, ko]) => {
                genome_to_kos.entry(genome.to_string()).or_default().insert(ko.to_string());
            }
            _ => anyhow::bail!(
                "Inconsistent column count at line '{}' in {}",
                line,
                path.display()
            ),
        }
    }

    for kos in genome_to_kos.values() {
        for ko in kos {
            if !is_valid_ko(ko) {
                anyhow::bail!(
                    "Invalid KO identifier '{}' in {}: expected K followed by five digits",
                    ko,
                    path.display()
                );
            }
        }
    }

    Ok(genome_to_kos)
}
