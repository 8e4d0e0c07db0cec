//! Pathway coverage evaluation.
//!
//! Given a set of observed KOs, evaluation re-weights a compiled pathway
//! graph (observed steps cost nothing), enumerates every start-to-end path
//! in topological order, and scores each path by the fraction of its weight
//! left uncovered. The path minimizing that fraction is the most complete
//! realization of the module; coverage is one minus its uncovered fraction.
//!
//! The shared graph is never mutated: the weight override lives in a
//! per-call table, so concurrent evaluations over one catalog are safe.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;

use crate::graph::{KoToEdges, PathwayGraph, END_NODE};

/// Outcome of evaluating one module against one KO set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageResult {
    /// Fraction of the most complete path that is covered, in `[0, 1]`.
    pub coverage: f64,
    /// KO labels along the most complete path, in path order.
    pub most_complete_path: Vec<String>,
    /// How many paths tied for the best score.
    pub number_of_best_paths: usize,
    /// Observed KOs on the path, excluding dispensable ones.
    pub required_kos_in_path: BTreeSet<String>,
    /// Path KOs absent from the evaluation set, excluding dispensable ones.
    pub required_kos_missing_in_path: BTreeSet<String>,
    /// One flag per path step: 1 if the step costs nothing after re-weighting.
    pub step_coverage: Vec<u8>,
}

/// A partial path accumulated during topological enumeration.
#[derive(Debug, Clone, Default)]
struct PartialPath {
    edges: Vec<usize>,
    base: f64,
    current: f64,
}

/// Evaluates a module against an evaluation KO set.
///
/// Total for every input: a KO set sharing nothing with the module (the
/// empty set included) yields zero coverage and an empty path.
pub fn evaluate(
    evaluation_kos: &FxHashSet<String>,
    graph: &PathwayGraph,
    ko_to_edges: &KoToEdges,
    optional_kos: &FxHashSet<String>,
) -> CoverageResult {
    if !evaluation_kos.iter().any(|ko| ko_to_edges.contains_key(ko)) {
        return CoverageResult::default();
    }

    let covered = covered_edges(evaluation_kos, graph, ko_to_edges);

    let Some(order) = graph.topological_order() else {
        return CoverageResult::default();
    };

    // Breadcrumb enumeration: each node accumulates every path reaching it
    // as (edge ids, base sum, current sum). Edge ids keep parallel edges
    // unambiguous; predecessor iteration follows edge insertion order.
    let mut node_paths: Vec<Vec<PartialPath>> = vec![Vec::new(); graph.node_count()];
    for &node in &order {
        if graph.in_edges(node).is_empty() {
            node_paths[node].push(PartialPath::default());
            continue;
        }
        let mut reaching = Vec::new();
        for &e in graph.in_edges(node) {
            let edge = graph.edge(e);
            let step_current = if covered[e] { 0.0 } else { edge.base_weight };
            for prefix in &node_paths[edge.source] {
                let mut edges = Vec::with_capacity(prefix.edges.len() + 1);
                edges.extend_from_slice(&prefix.edges);
                edges.push(e);
                reaching.push(PartialPath {
                    edges,
                    base: prefix.base + edge.base_weight,
                    current: prefix.current + step_current,
                });
            }
        }
        node_paths[node] = reaching;
    }

    let sink_paths = std::mem::take(&mut node_paths[END_NODE]);
    if sink_paths.is_empty() {
        return CoverageResult::default();
    }

    // An all-dispensable path has no weight to cover; score it as fully
    // uncovered so it never reports spurious completeness.
    let ratios: Vec<f64> = sink_paths
        .iter()
        .map(|p| if p.base > 0.0 { p.current / p.base } else { 1.0 })
        .collect();
    let best_ratio = ratios.iter().copied().fold(f64::INFINITY, f64::min);
    let best: Vec<usize> = (0..sink_paths.len())
        .filter(|&i| ratios[i] == best_ratio)
        .collect();

    let labels_of = |path: &PartialPath| -> Vec<&str> {
        path.edges.iter().map(|&e| graph.edge(e).label.as_str()).collect()
    };

    // Deterministic representative: smallest KO-label sequence.
    let mut best_index = best[0];
    for &i in &best[1..] {
        if labels_of(&sink_paths[i]) < labels_of(&sink_paths[best_index]) {
            best_index = i;
        }
    }
    let winner = &sink_paths[best_index];

    let most_complete_path: Vec<String> = winner
        .edges
        .iter()
        .map(|&e| graph.edge(e).label.clone())
        .collect();
    let step_coverage: Vec<u8> = winner
        .edges
        .iter()
        .map(|&e| u8::from(covered[e] || graph.edge(e).base_weight == 0.0))
        .collect();

    let path_kos: FxHashSet<&str> = most_complete_path.iter().map(String::as_str).collect();
    let required_kos_in_path: BTreeSet<String> = path_kos
        .iter()
        .filter(|ko| evaluation_kos.contains(**ko) && !optional_kos.contains(**ko))
        .map(|ko| ko.to_string())
        .collect();
    let required_kos_missing_in_path: BTreeSet<String> = path_kos
        .iter()
        .filter(|ko| !evaluation_kos.contains(**ko) && !optional_kos.contains(**ko))
        .map(|ko| ko.to_string())
        .collect();

    CoverageResult {
        coverage: 1.0 - best_ratio,
        most_complete_path,
        number_of_best_paths: best.len(),
        required_kos_in_path,
        required_kos_missing_in_path,
        step_coverage,
    }
}

/// Marks the edges whose cost drops to zero for this evaluation: per
/// recorded `(source, target)` pair of an observed KO, the first parallel
/// edge carrying that label in insertion order.
fn covered_edges(
    evaluation_kos: &FxHashSet<String>,
    graph: &PathwayGraph,
    ko_to_edges: &KoToEdges,
) -> Vec<bool> {
    let mut covered = vec![false; graph.edge_count()];
    for ko in evaluation_kos {
        let Some(pairs) = ko_to_edges.get(ko) else {
            continue;
        };
        for &(source, target) in pairs {
            let first_match = graph.out_edges(source).iter().copied().find(|&e| {
                let edge = graph.edge(e);
                edge.target == target && edge.label == *ko
            });
            if let Some(e) = first_match {
                covered[e] = true;
            }
        }
    }
    covered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::compile;
    use crate::parse::parse_definition;

    const M00001: &str = "(K00844,K12407,K00845,K25026,K00886,K08074,K00918) \
                          (K01810,K06859,K13810,K15916) (K00850,K16370,K21071,K00918) \
                          (K01623,K01624,K11645,K16305,K16306) K01803 \
                          ((K00134,K00150) K00927,K11389) (K01834,K15633,K15634,K15635) \
                          K01689 (K00873,K12406)";

    fn kos(ids: &[&str]) -> FxHashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn run(definition: &str, evaluation: &[&str]) -> CoverageResult {
        let module = compile(&parse_definition(definition).unwrap()).unwrap();
        evaluate(&kos(evaluation), &module.graph, &module.ko_to_edges, &module.optional_kos)
    }

    #[test]
    fn test_full_sequence_coverage() {
        let result = run("K00001 K00002", &["K00001", "K00002"]);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.most_complete_path, vec!["K00001", "K00002"]);
        assert_eq!(result.step_coverage, vec![1, 1]);
        assert_eq!(result.number_of_best_paths, 1);
    }

    #[test]
    fn test_alternative_tie_breaks_lexicographically() {
        // Both parallel edges are best when both KOs are present; the
        // smaller label wins. With only one observed, that path wins on
        // score alone.
        let result = run("K00002,K00001", &["K00001", "K00002"]);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.most_complete_path, vec!["K00001"]);
        assert_eq!(result.number_of_best_paths, 2);

        let result = run("K00001,K00002", &["K00001"]);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.most_complete_path, vec!["K00001"]);
        assert_eq!(result.step_coverage, vec![1]);
        assert_eq!(result.number_of_best_paths, 1);
    }

    #[test]
    fn test_partial_coverage_alternative_step() {
        let result = run("(K00001,K00002) K00003", &["K00002", "K00003"]);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.most_complete_path, vec!["K00002", "K00003"]);
        assert_eq!(result.step_coverage, vec![1, 1]);

        let result = run("(K00001,K00002) K00003", &["K00003"]);
        assert_eq!(result.coverage, 0.5);
        assert_eq!(result.most_complete_path.len(), 2);
        assert_eq!(result.most_complete_path[1], "K00003");
        assert_eq!(result.step_coverage, vec![0, 1]);
        // Both uncovered first steps tie; the smaller label is reported.
        assert_eq!(result.most_complete_path[0], "K00001");
        assert_eq!(result.number_of_best_paths, 2);
    }

    #[test]
    fn test_empty_and_disjoint_evaluation_sets() {
        let result = run("K00001 K00002", &[]);
        assert_eq!(result.coverage, 0.0);
        assert!(result.most_complete_path.is_empty());
        assert!(result.step_coverage.is_empty());
        assert_eq!(result.number_of_best_paths, 0);

        let result = run("K00001 K00002", &["K09999"]);
        assert_eq!(result, CoverageResult::default());
    }

    #[test]
    fn test_step_length_matches_path_length() {
        for evaluation in [&["K00001"][..], &["K00003"][..], &["K00001", "K00003"][..]] {
            let result = run("(K00001,K00002) K00003", evaluation);
            assert_eq!(result.step_coverage.len(), result.most_complete_path.len());
        }
    }

    #[test]
    fn test_only_first_parallel_edge_is_zeroed() {
        // Duplicate labels produce two parallel edges; only the first drops
        // to zero, so exactly one best path exists.
        let result = run("K00001,K00001", &["K00001"]);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.most_complete_path, vec!["K00001"]);
        assert_eq!(result.number_of_best_paths, 1);
    }

    #[test]
    fn test_optional_ko_never_reported_missing() {
        let result = run("K00001 -K00002", &["K00001"]);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.most_complete_path, vec!["K00001", "K00002"]);
        // The dispensable step costs nothing, so it reads as covered.
        assert_eq!(result.step_coverage, vec![1, 1]);
        assert!(result.required_kos_missing_in_path.is_empty());
        assert_eq!(
            result.required_kos_in_path,
            ["K00001".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_all_optional_module_scores_zero() {
        let result = run("-K00001", &["K00001"]);
        assert_eq!(result.coverage, 0.0);
        assert_eq!(result.most_complete_path, vec!["K00001"]);
        assert_eq!(result.step_coverage, vec![1]);
    }

    #[test]
    fn test_coverage_bounds_and_monotonicity() {
        let sets: Vec<Vec<&str>> = vec![
            vec![],
            vec!["K00844"],
            vec!["K00844", "K01810"],
            vec!["K00844", "K01810", "K00850", "K01623"],
            vec!["K00844", "K01810", "K00850", "K01623", "K01803", "K00134", "K00927"],
            vec![
                "K00844", "K01810", "K00850", "K01623", "K01803", "K00134", "K00927",
                "K01834", "K01689", "K00873",
            ],
        ];
        let mut previous = 0.0;
        for set in &sets {
            let result = run(M00001, set);
            assert!((0.0..=1.0).contains(&result.coverage));
            assert!(result.coverage >= previous, "coverage must not drop as KOs accumulate");
            previous = result.coverage;
        }
        // The final set covers a full path.
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_glycolysis_most_complete_path() {
        let evaluation = [
            "K00844", "K12407", "K00845", "K00886", "K08074", "K00918", "K01810", "K06859",
            "K13810", "K15916", "K00850", "K16370", "K01623", "K00134", "K00927", "K01689",
        ];
        assert_eq!(evaluation.len(), 16);

        let result = run(M00001, &evaluation);
        assert!((result.coverage - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(
            result.most_complete_path,
            vec![
                "K00844", "K01810", "K00850", "K01623", "K01803", "K00134", "K00927",
                "K01834", "K01689", "K00873",
            ]
        );
        assert_eq!(result.step_coverage, vec![1, 1, 1, 1, 0, 1, 1, 0, 1, 0]);
        assert_eq!(result.number_of_best_paths, 576);
        assert_eq!(
            result.required_kos_missing_in_path,
            ["K01803", "K01834", "K00873"]
                .into_iter()
                .map(String::from)
                .collect()
        );
        assert_eq!(
            result.required_kos_in_path,
            ["K00844", "K01810", "K00850", "K01623", "K00134", "K00927", "K01689"]
                .into_iter()
                .map(String::from)
                .collect()
        );
    }
}
