//! keggprof - KEGG module completeness profiling from KO annotations
//!
//! Compiles KEGG module definitions into weighted DAG multigraphs, then
//! scores how completely a set of observed KEGG Orthology identifiers (KOs)
//! realizes each module: the most complete source-to-sink path through the
//! graph determines the module's coverage.
//!
//! # Modules
//! - `parse`: definition tokenizer, expression parser, and serializer
//! - `graph`: DAG multigraph, expression compiler, invariant checks
//! - `coverage`: per-module evaluation against a KO set
//! - `catalog`: compiled module catalog with gzip+bincode persistence
//! - `profile`: batch genome × module coverage and step-coverage tables
//! - `enrichment`: hypergeometric over-representation with FDR control
//! - `tsvio`: gzip-transparent table and KO-list I/O
//! - `download`: KEGG REST fetching for catalog builds

pub mod catalog;
pub mod coverage;
pub mod download;
pub mod enrichment;
pub mod graph;
pub mod parse;
pub mod profile;
pub mod tsvio;
