//! Pathway enrichment.
//!
//! Hypergeometric over-representation of a query KO set against each
//! module's most-complete-path KO set, with false-discovery-rate control
//! across modules. The inclusive upper tail `P(X >= k)` is summed exactly
//! from an ln-factorial table; backgrounds are small enough (tens of
//! thousands of KOs) that the table is negligible.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::tsvio::create_text_writer;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("query contains {0} KO(s) missing from the background")]
    BackgroundMismatch(usize),
}

/// FDR correction method across modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FdrMethod {
    /// Benjamini-Hochberg.
    #[default]
    BenjaminiHochberg,
    /// Benjamini-Yekutieli; more conservative, valid under dependence.
    BenjaminiYekutieli,
}

/// One row of the enrichment table.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRecord {
    pub module: String,
    pub method: &'static str,
    /// Background size (M).
    pub background_size: u64,
    /// Most-complete-path KO count (n).
    pub set_size: u64,
    /// Query KO count (N).
    pub query_size: u64,
    /// Intersection count (k).
    pub intersection_size: u64,
    pub intersecting_features: Vec<String>,
    pub extra_features: Vec<String>,
    pub p_value: f64,
    pub fdr: f64,
    /// Present when a significance tolerance was given.
    pub significant: Option<bool>,
}

/// Scores every catalog module for over-representation of `query_kos`.
///
/// When `background` is omitted, the universe is every KO indexed by the
/// catalog plus the query. The query must be contained in the background.
pub fn enrich(
    query_kos: &FxHashSet<String>,
    catalog: &Catalog,
    background: Option<&FxHashSet<String>>,
    fdr_method: FdrMethod,
    tolerance: Option<f64>,
) -> Result<Vec<EnrichmentRecord>, EnrichmentError> {
    let default_background;
    let background = match background {
        Some(b) => b,
        None => {
            let mut all = catalog.kos();
            all.extend(query_kos.iter().cloned());
            default_background = all;
            &default_background
        }
    };

    let missing = query_kos.iter().filter(|ko| !background.contains(*ko)).count();
    if missing > 0 {
        return Err(EnrichmentError::BackgroundMismatch(missing));
    }

    let background_size = background.len() as u64;
    let query_size = query_kos.len() as u64;
    let ln_fact = ln_factorials(background.len());

    let mut records = Vec::with_capacity(catalog.len());
    for (id, entry) in catalog.iter() {
        let result = entry.evaluate(query_kos);
        let pathway_kos: BTreeSet<&str> =
            result.most_complete_path.iter().map(String::as_str).collect();

        let intersecting: Vec<String> = pathway_kos
            .iter()
            .filter(|ko| query_kos.contains(**ko))
            .map(|ko| ko.to_string())
            .collect();
        let mut extra: Vec<String> = query_kos
            .iter()
            .filter(|ko| !pathway_kos.contains(ko.as_str()))
            .cloned()
            .collect();
        extra.sort();

        let set_size = pathway_kos.len() as u64;
        let intersection_size = intersecting.len() as u64;
        let p_value =
            hypergeometric_sf_ge(intersection_size, background_size, set_size, query_size, &ln_fact);

        records.push(EnrichmentRecord {
            module: id.clone(),
            method: "hypergeometric",
            background_size,
            set_size,
            query_size,
            intersection_size,
            intersecting_features: intersecting,
            extra_features: extra,
            p_value,
            fdr: 0.0,
            significant: None,
        });
    }

    let p_values: Vec<f64> = records.iter().map(|r| r.p_value).collect();
    let fdr = false_discovery_control(&p_values, fdr_method);
    for (record, q) in records.iter_mut().zip(fdr) {
        record.fdr = q;
        record.significant = tolerance.map(|tol| q < tol);
    }

    Ok(records)
}

/// Writes the enrichment table as a TSV, feature lists semicolon-joined.
pub fn write_enrichment_table(
    records: &[EnrichmentRecord],
    tolerance: Option<f64>,
    path: &Path,
) -> Result<()> {
    let mut writer = create_text_writer(path)?;

    write!(
        writer,
        "id_pathway\tmethod\tM\tn\tN\tk\tintersecting_features\textra_features\tp_value\tfdr"
    )?;
    if let Some(tol) = tolerance {
        write!(writer, "\tfdr<{}", tol)?;
    }
    writeln!(writer)?;

    for record in records {
        write!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:?}\t{:?}",
            record.module,
            record.method,
            record.background_size,
            record.set_size,
            record.query_size,
            record.intersection_size,
            record.intersecting_features.join(";"),
            record.extra_features.join(";"),
            record.p_value,
            record.fdr,
        )?;
        if let Some(flag) = record.significant {
            write!(writer, "\t{}", flag)?;
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

// ============================================================================
// Hypergeometric tail
// ============================================================================

/// `ln(i!)` for `i` in `0..=n`.
fn ln_factorials(n: usize) -> Vec<f64> {
    let mut table = Vec::with_capacity(n + 1);
    table.push(0.0);
    let mut acc = 0.0;
    for i in 1..=n {
        acc += (i as f64).ln();
        table.push(acc);
    }
    table
}

fn ln_choose(table: &[f64], n: u64, k: u64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    table[n as usize] - table[k as usize] - table[(n - k) as usize]
}

/// Inclusive upper tail `P(X >= k)` of the hypergeometric distribution with
/// population `m`, `n` marked items, and `n_draws` draws.
fn hypergeometric_sf_ge(k: u64, m: u64, n: u64, n_draws: u64, ln_fact: &[f64]) -> f64 {
    if k == 0 {
        return 1.0;
    }
    let upper = n.min(n_draws);
    if k > upper {
        return 0.0;
    }
    let lower = k.max((n_draws + n).saturating_sub(m));

    let ln_denominator = ln_choose(ln_fact, m, n_draws);
    let mut tail = 0.0;
    for x in lower..=upper {
        let ln_term =
            ln_choose(ln_fact, n, x) + ln_choose(ln_fact, m - n, n_draws - x) - ln_denominator;
        tail += ln_term.exp();
    }
    tail.min(1.0)
}

// ============================================================================
// FDR control
// ============================================================================

/// Adjusts p-values with Benjamini-Hochberg or Benjamini-Yekutieli: each
/// sorted p-value is scaled by `m/rank` (times `sum(1/i)` for BY), then a
/// reverse cumulative minimum enforces monotonicity, clipped to 1.
pub fn false_discovery_control(p_values: &[f64], method: FdrMethod) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let scale = match method {
        FdrMethod::BenjaminiHochberg => 1.0,
        FdrMethod::BenjaminiYekutieli => (1..=m).map(|i| 1.0 / i as f64).sum(),
    };

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0; m];
    let mut running_min = f64::INFINITY;
    for rank in (1..=m).rev() {
        let index = order[rank - 1];
        let q = p_values[index] * scale * m as f64 / rank as f64;
        running_min = running_min.min(q).min(1.0);
        adjusted[index] = running_min;
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogBuild};
    use std::collections::BTreeMap;

    const M00001: &str = "(K00844,K12407,K00845,K25026,K00886,K08074,K00918) \
                          (K01810,K06859,K13810,K15916) (K00850,K16370,K21071,K00918) \
                          (K01623,K01624,K11645,K16305,K16306) K01803 \
                          ((K00134,K00150) K00927,K11389) (K01834,K15633,K15634,K15635) \
                          K01689 (K00873,K12406)";

    fn kos(ids: &[&str]) -> FxHashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn build_catalog(rows: &[(&str, &str)]) -> Catalog {
        let definitions: BTreeMap<String, String> =
            rows.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let CatalogBuild { catalog, failures } =
            Catalog::build(&definitions, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        assert!(failures.is_empty());
        catalog
    }

    #[test]
    fn test_hypergeometric_tail_values() {
        let table = ln_factorials(10);
        // Drawing all five marked items out of ten: 1 / C(10,5).
        let p = hypergeometric_sf_ge(5, 10, 5, 5, &table);
        assert!((p - 1.0 / 252.0).abs() < 1e-12);
        // P(X >= 0) is always 1.
        assert_eq!(hypergeometric_sf_ge(0, 10, 5, 5, &table), 1.0);
        // Complement of drawing no marked item: 1 - C(3,3)/C(6,3) = 19/20.
        let table = ln_factorials(6);
        let p = hypergeometric_sf_ge(1, 6, 3, 3, &table);
        assert!((p - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_fdr_benjamini_hochberg() {
        let adjusted =
            false_discovery_control(&[0.005, 0.009, 0.05, 0.5], FdrMethod::BenjaminiHochberg);
        let expected = [0.018, 0.018, 0.05 * 4.0 / 3.0, 0.5];
        for (a, e) in adjusted.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12, "{a} != {e}");
        }
    }

    #[test]
    fn test_fdr_benjamini_yekutieli_scales_up() {
        let ps = [0.01, 0.02, 0.03, 0.04];
        let bh = false_discovery_control(&ps, FdrMethod::BenjaminiHochberg);
        let by = false_discovery_control(&ps, FdrMethod::BenjaminiYekutieli);
        let c: f64 = 1.0 + 0.5 + 1.0 / 3.0 + 0.25;
        for (b, y) in bh.iter().zip(&by) {
            assert!((y - (b * c).min(1.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fdr_monotone_in_sorted_pvalues() {
        let ps = [0.2, 0.001, 0.9, 0.04, 0.04, 0.6];
        let adjusted = false_discovery_control(&ps, FdrMethod::BenjaminiHochberg);
        let mut pairs: Vec<(f64, f64)> = ps.iter().copied().zip(adjusted).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for window in pairs.windows(2) {
            assert!(window[0].1 <= window[1].1 + 1e-15);
        }
    }

    #[test]
    fn test_background_mismatch() {
        let catalog = build_catalog(&[("M00001", "K00001 K00002")]);
        let err = enrich(
            &kos(&["K00001", "K99999"]),
            &catalog,
            Some(&kos(&["K00001", "K00002"])),
            FdrMethod::BenjaminiHochberg,
            None,
        )
        .unwrap_err();
        assert_eq!(err, EnrichmentError::BackgroundMismatch(1));
    }

    #[test]
    fn test_enrichment_ranks_matching_module_first() {
        let catalog = build_catalog(&[
            ("M00001", M00001),
            ("M00777", "K90001 K90002 K90003"),
        ]);
        // The query is M00001's most complete path from the glycolysis
        // scenario; M00777 shares nothing with it.
        let query = kos(&[
            "K00844", "K01810", "K00850", "K01623", "K01803", "K00134", "K00927", "K01834",
            "K01689", "K00873",
        ]);
        let records =
            enrich(&query, &catalog, None, FdrMethod::BenjaminiHochberg, Some(0.05)).unwrap();
        assert_eq!(records.len(), 2);

        let glycolysis = &records[0];
        assert_eq!(glycolysis.module, "M00001");
        assert_eq!(glycolysis.set_size, 10);
        assert_eq!(glycolysis.intersection_size, 10);
        assert!(glycolysis.p_value > 0.0 && glycolysis.p_value < 1e-6);
        assert_eq!(glycolysis.significant, Some(true));

        let unrelated = &records[1];
        assert_eq!(unrelated.module, "M00777");
        assert_eq!(unrelated.set_size, 0);
        assert_eq!(unrelated.intersection_size, 0);
        assert_eq!(unrelated.p_value, 1.0);
        assert!(glycolysis.p_value < unrelated.p_value);

        for record in &records {
            assert!((0.0..=1.0).contains(&record.p_value));
            assert!((0.0..=1.0).contains(&record.fdr));
        }
    }

    #[test]
    fn test_enrichment_table_output() {
        let catalog = build_catalog(&[("M00001", "K00001 K00002")]);
        let query = kos(&["K00001", "K00002"]);
        let records =
            enrich(&query, &catalog, None, FdrMethod::BenjaminiHochberg, Some(0.05)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enrichment.tsv");
        write_enrichment_table(&records, Some(0.05), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "id_pathway\tmethod\tM\tn\tN\tk\tintersecting_features\textra_features\tp_value\tfdr\tfdr<0.05"
        );
        assert!(lines[1].starts_with("M00001\thypergeometric\t2\t2\t2\t2\tK00001;K00002\t\t"));
    }
}
