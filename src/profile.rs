//! Batch coverage profiling.
//!
//! Evaluates every genome against every catalog module (one rayon work unit
//! per genome; the catalog is shared read-only) and assembles two tables: a
//! dense genome × module coverage matrix and a 0/1 step-coverage matrix
//! whose columns follow each module's most complete path. Results do not
//! depend on worker count or scheduling order.

use anyhow::Result;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::catalog::Catalog;
use crate::coverage::CoverageResult;
use crate::tsvio::create_text_writer;

/// Dense profiling output over all genomes and modules.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTables {
    /// Row order of both tables.
    pub genomes: Vec<String>,
    /// Column order of the coverage table: all module ids, numerically sorted.
    pub modules: Vec<String>,
    /// genome × module coverage values in `[0, 1]`.
    pub coverage: Vec<Vec<f64>>,
    /// Two-level step columns: module id plus 1-based step index.
    pub step_columns: Vec<(String, usize)>,
    /// genome × step 0/1 values, zero-padded where a genome has no path.
    pub step_coverage: Vec<Vec<u8>>,
}

/// Profiles every genome against the catalog.
///
/// Cancellation is observed at genome boundaries: once `cancel` is set,
/// remaining genomes are dropped whole and finished genomes are returned.
pub fn profile(
    genome_to_kos: &BTreeMap<String, FxHashSet<String>>,
    catalog: &Catalog,
    cancel: &AtomicBool,
) -> ProfileTables {
    let per_genome: Vec<(String, BTreeMap<String, CoverageResult>)> = genome_to_kos
        .par_iter()
        .filter_map(|(genome, kos)| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let mut results = BTreeMap::new();
            for (id, entry) in catalog.iter() {
                // Modules sharing no KO with the genome score zero and are
                // not evaluated.
                if kos.iter().any(|ko| entry.ko_to_edges.contains_key(ko)) {
                    results.insert(id.clone(), entry.evaluate(kos));
                }
            }
            Some((genome.clone(), results))
        })
        .collect();

    let modules = catalog.module_ids_by_number();
    let genomes: Vec<String> = per_genome.iter().map(|(g, _)| g.clone()).collect();

    let coverage: Vec<Vec<f64>> = per_genome
        .iter()
        .map(|(_, results)| {
            modules
                .iter()
                .map(|id| results.get(id).map(|r| r.coverage).unwrap_or(0.0))
                .collect()
        })
        .collect();

    let mut step_columns = Vec::new();
    for id in &modules {
        let width = per_genome
            .iter()
            .map(|(_, results)| results.get(id).map(|r| r.step_coverage.len()).unwrap_or(0))
            .max()
            .unwrap_or(0);
        for step in 1..=width {
            step_columns.push((id.clone(), step));
        }
    }

    let step_coverage: Vec<Vec<u8>> = per_genome
        .iter()
        .map(|(_, results)| {
            step_columns
                .iter()
                .map(|(id, step)| {
                    results
                        .get(id)
                        .and_then(|r| r.step_coverage.get(step - 1))
                        .copied()
                        .unwrap_or(0)
                })
                .collect()
        })
        .collect();

    ProfileTables { genomes, modules, coverage, step_columns, step_coverage }
}

/// Writes the genome × module coverage table (gzip by extension).
pub fn write_coverage_table(
    tables: &ProfileTables,
    index_name: &str,
    path: &Path,
) -> Result<()> {
    let mut writer = create_text_writer(path)?;

    write!(writer, "{}", index_name)?;
    for id in &tables.modules {
        write!(writer, "\t{}", id)?;
    }
    writeln!(writer)?;

    for (genome, row) in tables.genomes.iter().zip(&tables.coverage) {
        write!(writer, "{}", genome)?;
        for value in row {
            write!(writer, "\t{:?}", value)?;
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes the step-coverage table with its two-level column header: module
/// ids on the first line, 1-based step indices on the second.
pub fn write_step_coverage_table(
    tables: &ProfileTables,
    index_name: &str,
    path: &Path,
) -> Result<()> {
    let mut writer = create_text_writer(path)?;

    write!(writer, "{}", index_name)?;
    for (id, _) in &tables.step_columns {
        write!(writer, "\t{}", id)?;
    }
    writeln!(writer)?;

    write!(writer, "step")?;
    for (_, step) in &tables.step_columns {
        write!(writer, "\t{}", step)?;
    }
    writeln!(writer)?;

    for (genome, row) in tables.genomes.iter().zip(&tables.step_coverage) {
        write!(writer, "{}", genome)?;
        for value in row {
            write!(writer, "\t{}", value)?;
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}
