//! The pathway catalog.
//!
//! A catalog maps module ids to compiled pathway entries (metadata, graph,
//! KO index, dispensable KO set). It is built once from definition tables,
//! persisted as a gzip-compressed bincode stream, and read-only thereafter:
//! every evaluation shares it by reference.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::coverage::{evaluate, CoverageResult};
use crate::graph::{compile, KoToEdges, PathwayGraph};
use crate::parse::parse_definition;
use crate::tsvio::create_text_writer;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown module: {0}")]
    UnknownModule(String),
}

/// One compiled module. Immutable after the build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathwayEntry {
    pub id: String,
    pub name: String,
    pub classes: String,
    pub definition: String,
    pub graph: PathwayGraph,
    pub ko_to_edges: KoToEdges,
    pub optional_kos: FxHashSet<String>,
}

impl PathwayEntry {
    /// Evaluates this module against an evaluation KO set.
    pub fn evaluate(&self, kos: &FxHashSet<String>) -> CoverageResult {
        evaluate(kos, &self.graph, &self.ko_to_edges, &self.optional_kos)
    }

    /// KOs indexed by this module.
    pub fn kos(&self) -> impl Iterator<Item = &String> {
        self.ko_to_edges.keys()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Catalog {
    entries: BTreeMap<String, PathwayEntry>,
}

/// Outcome of a catalog build: the catalog plus the modules whose
/// definitions failed to parse, with the reported error.
#[derive(Debug)]
pub struct CatalogBuild {
    pub catalog: Catalog,
    pub failures: Vec<(String, String)>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, module_id: &str) -> Option<&PathwayEntry> {
        self.entries.get(module_id)
    }

    /// Entries in module-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PathwayEntry)> {
        self.entries.iter()
    }

    /// Evaluates one module, failing when the id is not in the catalog.
    pub fn evaluate(
        &self,
        module_id: &str,
        kos: &FxHashSet<String>,
    ) -> Result<CoverageResult, CatalogError> {
        self.entries
            .get(module_id)
            .map(|entry| entry.evaluate(kos))
            .ok_or_else(|| CatalogError::UnknownModule(module_id.to_string()))
    }

    /// Union of all KOs indexed by any module.
    pub fn kos(&self) -> FxHashSet<String> {
        let mut all = FxHashSet::default();
        for entry in self.entries.values() {
            all.extend(entry.ko_to_edges.keys().cloned());
        }
        all
    }

    /// Module ids sorted by their numeric suffix (M00002 before M00010).
    pub fn module_ids_by_number(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort_by(|a, b| module_number(a).cmp(&module_number(b)).then_with(|| a.cmp(b)));
        ids
    }

    /// Builds a catalog from definition, name, and class tables.
    ///
    /// Definitions drive membership. Modules whose definitions do not parse
    /// are recorded and skipped; a name or class row for an unknown module
    /// id is an error. Compiler invariant failures abort the build, naming
    /// the module.
    pub fn build(
        definitions: &BTreeMap<String, String>,
        names: &BTreeMap<String, String>,
        classes: &BTreeMap<String, String>,
    ) -> Result<CatalogBuild> {
        for id in names.keys() {
            if !definitions.contains_key(id) {
                anyhow::bail!("pathway names contain {} which has no definition", id);
            }
        }
        for id in classes.keys() {
            if !definitions.contains_key(id) {
                anyhow::bail!("pathway classes contain {} which has no definition", id);
            }
        }

        let mut entries = BTreeMap::new();
        let mut failures = Vec::new();

        for (id, definition) in definitions {
            let expr = match parse_definition(definition) {
                Ok(expr) => expr,
                Err(err) => {
                    failures.push((id.clone(), err.to_string()));
                    continue;
                }
            };
            let compiled =
                compile(&expr).with_context(|| format!("while compiling module {}", id))?;
            entries.insert(
                id.clone(),
                PathwayEntry {
                    id: id.clone(),
                    name: names.get(id).cloned().unwrap_or_default(),
                    classes: classes.get(id).cloned().unwrap_or_default(),
                    definition: definition.clone(),
                    graph: compiled.graph,
                    ko_to_edges: compiled.ko_to_edges,
                    optional_kos: compiled.optional_kos,
                },
            );
        }

        Ok(CatalogBuild { catalog: Catalog { entries }, failures })
    }

    /// Writes the catalog as a gzip-compressed bincode stream.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create catalog: {}", path.display()))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(&mut encoder, self).context("Failed to serialize catalog")?;
        let mut inner = encoder.finish().context("Failed to finish catalog stream")?;
        inner.flush()?;
        Ok(())
    }

    /// Loads a catalog written by [`Catalog::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open catalog: {}", path.display()))?;
        let decoder = MultiGzDecoder::new(BufReader::new(file));
        bincode::deserialize_from(BufReader::new(decoder))
            .with_context(|| format!("Failed to decode catalog: {}", path.display()))
    }

    /// Writes the module → KO companion table.
    pub fn write_module_ko_table(&self, path: &Path) -> Result<()> {
        let mut writer = create_text_writer(path)?;
        for id in self.module_ids_by_number() {
            let entry = &self.entries[&id];
            let mut kos: Vec<&String> = entry.ko_to_edges.keys().collect();
            kos.sort();
            for ko in kos {
                writeln!(writer, "{}\t{}", id, ko)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

fn module_number(id: &str) -> u64 {
    id.trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap_or(u64::MAX)
}

/// The companion version file sits next to the catalog: `.gz` and one inner
/// extension are stripped, then `.version` is appended.
pub fn version_file_path(catalog_path: &Path) -> PathBuf {
    let mut path = catalog_path.to_path_buf();
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        path.set_extension("");
    }
    path.set_extension("version");
    path
}

/// Writes the single-line version tag next to the catalog.
pub fn write_version_file(catalog_path: &Path, version_tag: &str) -> Result<PathBuf> {
    let path = version_file_path(catalog_path);
    let mut writer = BufWriter::new(
        File::create(&path)
            .with_context(|| format!("Failed to create version file: {}", path.display()))?,
    );
    writeln!(writer, "{}", version_tag)?;
    writer.flush()?;
    Ok(path)
}
