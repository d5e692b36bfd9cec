//! Folding per-unit emapper output into the two result tables
//!
//! A results tree looks like `<root>/<unit id>/<unit id>.emapper.annotations`.
//! Each annotation file starts with a fixed preamble, then a tab-delimited
//! table whose header begins with `#query`; trailing `##` lines carry run
//! statistics. Two tables come out of a tree:
//!
//! - the wide KEGG table: one row per unit, one column per KEGG ortholog code
//!   seen anywhere in the tree, counts zero-filled
//! - the long by-protein table: one row per protein per unit with the ten
//!   annotation categories
//!
//! Both are always recomputed from disk, so collecting twice never duplicates
//! rows. [`fold_tables`] is the pure part and does no I/O.
//!
//! Results of this crate's own runs are collected with
//! [`CollectMode::Completed`]: an output file counts only once the job wrote
//! its `done` marker, so a job that failed after writing part of its table
//! contributes nothing.

use crate::error::{AggregateError, BatchError, Result};
use crate::runner::{DONE_MARKER, OUTPUT_SUFFIX};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lines written by emapper before the table header
pub const PREAMBLE_LINES: usize = 4;
pub const COMMENT_PREFIX: &str = "##";
pub const QUERY_COLUMN: &str = "#query";

pub const CATEGORY_COLUMNS: [&str; 10] = [
    "eggNOG_OGs",
    "COG_category",
    "Description",
    "GOs",
    "EC",
    "KEGG_ko",
    "KEGG_Pathway",
    "KEGG_Module",
    "KEGG_Reaction",
    "PFAMs",
];

/// Multi-valued column exploded into the wide table
pub const KEGG_COLUMN: &str = "KEGG_ko";
pub const KEGG_PREFIX: &str = "ko:";

pub const FILE_ID_HEADER: &str = "File ID";
pub const PROTEIN_ID_HEADER: &str = "Protein ID";
pub const WIDE_ID_HEADER: &str = "id";

/// emapper's placeholder for "no annotation"
const EMPTY_VALUE: &str = "-";

/// Which annotation files are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectMode {
    /// Any `<unit id>.emapper.annotations`, whoever wrote it
    #[default]
    AnyOutput,
    /// Only outputs next to a `done` marker
    Completed,
}

/// One row of an annotation file. Columns not listed here are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProteinAnnotation {
    #[serde(rename = "#query")]
    pub protein_id: String,
    #[serde(rename = "eggNOG_OGs")]
    pub eggnog_ogs: String,
    #[serde(rename = "COG_category")]
    pub cog_category: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "GOs")]
    pub gos: String,
    #[serde(rename = "EC")]
    pub ec: String,
    #[serde(rename = "KEGG_ko")]
    pub kegg_ko: String,
    #[serde(rename = "KEGG_Pathway")]
    pub kegg_pathway: String,
    #[serde(rename = "KEGG_Module")]
    pub kegg_module: String,
    #[serde(rename = "KEGG_Reaction")]
    pub kegg_reaction: String,
    #[serde(rename = "PFAMs")]
    pub pfams: String,
}

impl ProteinAnnotation {
    /// Category values in [`CATEGORY_COLUMNS`] order
    pub fn categories(&self) -> [&str; 10] {
        [
            self.eggnog_ogs.as_str(),
            self.cog_category.as_str(),
            self.description.as_str(),
            self.gos.as_str(),
            self.ec.as_str(),
            self.kegg_ko.as_str(),
            self.kegg_pathway.as_str(),
            self.kegg_module.as_str(),
            self.kegg_reaction.as_str(),
            self.pfams.as_str(),
        ]
    }

    /// KEGG ortholog codes of this protein with the `ko:` prefix removed
    pub fn kegg_codes(&self) -> impl Iterator<Item = &str> {
        self.kegg_ko
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty() && *code != EMPTY_VALUE)
            .map(|code| code.strip_prefix(KEGG_PREFIX).unwrap_or(code))
    }
}

/// Parsed annotation file of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTable {
    pub unit_id: String,
    pub rows: Vec<ProteinAnnotation>,
}

/// Row of the long table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub file_id: String,
    pub annotation: ProteinAnnotation,
}

/// Row of the wide table. `counts` holds every code of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeggCountRow {
    pub id: String,
    pub counts: BTreeMap<String, u64>,
}

impl KeggCountRow {
    pub fn count(&self, code: &str) -> u64 {
        self.counts.get(code).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideCountTable {
    /// Column order after `id`
    pub codes: Vec<String>,
    pub rows: Vec<KeggCountRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LongProteinTable {
    pub rows: Vec<AnnotationRecord>,
}

/// Parse the text of one annotation file.
pub fn parse_annotation_table(
    unit_id: &str,
    text: &str,
    path: &Path,
) -> std::result::Result<UnitTable, AggregateError> {
    let body: String = text
        .lines()
        .skip(PREAMBLE_LINES)
        .filter(|line| !line.starts_with(COMMENT_PREFIX) && !line.trim().is_empty())
        .flat_map(|line| [line, "\n"])
        .collect();

    if !body.starts_with(QUERY_COLUMN) {
        return Err(AggregateError::Malformed {
            path: path.to_path_buf(),
            reason: format!("no '{}' header after the preamble", QUERY_COLUMN),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .from_reader(body.as_bytes());

    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ProteinAnnotation>, _>>()
        .map_err(|e| AggregateError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(UnitTable {
        unit_id: unit_id.to_string(),
        rows,
    })
}

/// Read and parse one `<unit id>.emapper.annotations` file.
pub fn parse_annotation_file(path: &Path) -> std::result::Result<UnitTable, AggregateError> {
    let unit_id = unit_id_from_output(path).ok_or_else(|| AggregateError::Malformed {
        path: path.to_path_buf(),
        reason: format!("file name does not end in '{}'", OUTPUT_SUFFIX),
    })?;
    let text = std::fs::read_to_string(path).map_err(|source| AggregateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_annotation_table(&unit_id, &text, path)
}

fn unit_id_from_output(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(OUTPUT_SUFFIX)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Explode, count, pivot and zero-fill.
///
/// Wide rows and long rows follow the order of `tables`.
pub fn fold_tables(tables: &[UnitTable]) -> (WideCountTable, LongProteinTable) {
    let mut per_unit: Vec<(&str, BTreeMap<&str, u64>)> = Vec::with_capacity(tables.len());
    let mut all_codes: BTreeSet<&str> = BTreeSet::new();
    let mut long = LongProteinTable::default();

    for table in tables {
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for row in &table.rows {
            for code in row.kegg_codes() {
                *counts.entry(code).or_insert(0) += 1;
                all_codes.insert(code);
            }
            long.rows.push(AnnotationRecord {
                file_id: table.unit_id.clone(),
                annotation: row.clone(),
            });
        }
        per_unit.push((table.unit_id.as_str(), counts));
    }

    let rows = per_unit
        .into_iter()
        .map(|(id, counts)| KeggCountRow {
            id: id.to_string(),
            counts: all_codes
                .iter()
                .map(|code| (code.to_string(), counts.get(code).copied().unwrap_or(0)))
                .collect(),
        })
        .collect();

    let wide = WideCountTable {
        codes: all_codes.into_iter().map(str::to_string).collect(),
        rows,
    };
    (wide, long)
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BatchError::io(parent, e))?;
    }
    let file = std::fs::File::create(path).map_err(|e| BatchError::io(path, e))?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(file))
}

impl WideCountTable {
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut writer = tsv_writer(path)?;
        writer.write_record(std::iter::once(WIDE_ID_HEADER).chain(self.codes.iter().map(String::as_str)))?;
        for row in &self.rows {
            let mut record = Vec::with_capacity(self.codes.len() + 1);
            record.push(row.id.clone());
            record.extend(self.codes.iter().map(|code| row.count(code).to_string()));
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|e| BatchError::io(path, e))?;
        Ok(())
    }
}

impl LongProteinTable {
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut writer = tsv_writer(path)?;
        writer.write_record(
            [FILE_ID_HEADER, PROTEIN_ID_HEADER]
                .into_iter()
                .chain(CATEGORY_COLUMNS),
        )?;
        for record in &self.rows {
            writer.write_record(
                [record.file_id.as_str(), record.annotation.protein_id.as_str()]
                    .into_iter()
                    .chain(record.annotation.categories()),
            )?;
        }
        writer.flush().map_err(|e| BatchError::io(path, e))?;
        Ok(())
    }
}

/// Annotation files found under one results root
#[derive(Debug, Default)]
pub struct ResultScan {
    /// One output file per unit directory
    pub files: Vec<PathBuf>,
    /// Unit directories without any output
    pub missing: Vec<PathBuf>,
    /// Unit directories with an output but no marker, in [`CollectMode::Completed`]
    pub unfinished: Vec<PathBuf>,
    pub errors: Vec<AggregateError>,
}

/// Find `<root>/*/*.emapper.annotations`, one per unit directory.
///
/// A directory with no output is skipped; one with several is an error for
/// that unit. Plain files directly under `root` (batch markers, logs) are
/// ignored.
pub fn scan_results(root: &Path, mode: CollectMode) -> Result<ResultScan> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root).map_err(|e| BatchError::io(root, e))? {
        let path = entry.map_err(|e| BatchError::io(root, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut scan = ResultScan::default();
    for dir in dirs {
        let mut outputs = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) => {
                scan.errors.push(AggregateError::Io { path: dir, source });
                continue;
            },
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && unit_id_from_output(&path).is_some() {
                outputs.push(path);
            }
        }

        match outputs.len() {
            0 => {
                debug!(dir = %dir.display(), "No annotation output, skipping");
                scan.missing.push(dir);
            },
            1 if mode == CollectMode::Completed && !dir.join(DONE_MARKER).is_file() => {
                debug!(dir = %dir.display(), "Output without completion marker, skipping");
                scan.unfinished.push(dir);
            },
            1 => scan.files.append(&mut outputs),
            count => scan.errors.push(AggregateError::AmbiguousOutput { dir, count }),
        }
    }
    Ok(scan)
}

/// Both tables plus what could not be collected
#[derive(Debug, Default)]
pub struct Aggregation {
    pub wide: WideCountTable,
    pub long: LongProteinTable,
    /// Units that made it into the tables
    pub units: usize,
    /// Unit directories without output
    pub missing: usize,
    /// Outputs left out because their job never completed
    pub unfinished: usize,
    pub errors: Vec<AggregateError>,
}

impl Aggregation {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn write(&self, kegg_ids_out: &Path, by_protein_out: &Path) -> Result<()> {
        self.wide.write_tsv(kegg_ids_out)?;
        self.long.write_tsv(by_protein_out)?;
        info!(
            units = self.units,
            proteins = self.long.rows.len(),
            kegg_codes = self.wide.codes.len(),
            kegg_ids_out = %kegg_ids_out.display(),
            by_protein_out = %by_protein_out.display(),
            "Wrote annotation tables"
        );
        Ok(())
    }
}

/// Aggregate one results tree.
pub fn aggregate(root: &Path, mode: CollectMode) -> Result<Aggregation> {
    eggnog_common::error::require_dir(root)?;
    aggregate_dirs(&[root.to_path_buf()], mode)
}

/// Aggregate several results trees into one pair of tables.
///
/// Roots that do not exist are skipped. A unit id seen in more than one root
/// is taken from the first.
pub fn aggregate_dirs(roots: &[PathBuf], mode: CollectMode) -> Result<Aggregation> {
    let mut tables = Vec::new();
    let mut seen = HashSet::new();
    let mut aggregation = Aggregation::default();

    for root in roots {
        if !root.is_dir() {
            debug!(root = %root.display(), "Results root absent, skipping");
            continue;
        }
        let scan = scan_results(root, mode)?;
        aggregation.missing += scan.missing.len();
        aggregation.unfinished += scan.unfinished.len();
        aggregation.errors.extend(scan.errors);

        for file in scan.files {
            match parse_annotation_file(&file) {
                Ok(table) => {
                    if seen.insert(table.unit_id.clone()) {
                        tables.push(table);
                    } else {
                        warn!(unit = %table.unit_id, file = %file.display(), "Duplicate unit, ignoring");
                    }
                },
                Err(e) => aggregation.errors.push(e),
            }
        }
    }

    for e in &aggregation.errors {
        warn!(error = %e, "Unit not collected");
    }

    let (wide, long) = fold_tables(&tables);
    aggregation.units = tables.len();
    aggregation.wide = wide;
    aggregation.long = long;
    Ok(aggregation)
}

/// `<work dir>-<name>` next to a batch's working directory
pub fn batch_output_path(work_dir: &Path, name: &str) -> PathBuf {
    let dir_name = work_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    work_dir.with_file_name(format!("{}-{}", dir_name, name))
}
