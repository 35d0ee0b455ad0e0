//! Snapshot export: tables and per-view artifacts in a timestamped folder.
//!
//! The total step count is fixed from the selection and the snapshot before
//! any work starts. Each unit (one table, one overview view, one spectrum,
//! one radar) advances progress exactly once, whether it wrote a file or was
//! skipped, so a successful run ends at `total / total`. Cancellation is
//! checked before every unit; files already written stay on disk.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::job::{JobContext, JobError, JobHandle};
use crate::config::defaults::{
    EXPORT_FOLDER_PREFIX, EXPORT_TIMESTAMP_FORMAT, FEATURES_CSV, SLOPES_CSV, SPECTRUM_SUBDIR,
};
use crate::config::variable_group;
use crate::types::{FeatureMatrix, PowerSpectrum, Snapshot, VariableName, WindowFeatures};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise view: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no computed features to save")]
    NothingToSave,

    #[error("renderer failed: {0}")]
    Render(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Selectable export artifacts, in the order they are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    /// Entity x variable slope table
    FeatureTable,
    /// Entity, variable, slope, intercept table
    SlopeTable,
    Clustering,
    KMeans,
    Heatmap,
    /// One view per entity x variable
    Spectrum,
    /// One view per entity
    Radar,
}

impl Artifact {
    pub const ALL: [Artifact; 7] = [
        Artifact::FeatureTable,
        Artifact::SlopeTable,
        Artifact::Clustering,
        Artifact::KMeans,
        Artifact::Heatmap,
        Artifact::Spectrum,
        Artifact::Radar,
    ];

    pub fn file_stem(&self) -> &'static str {
        match self {
            Artifact::FeatureTable => "features",
            Artifact::SlopeTable => "slopes_and_intercepts",
            Artifact::Clustering => "clustering",
            Artifact::KMeans => "kmeans",
            Artifact::Heatmap => "heatmap",
            Artifact::Spectrum => "spectrum",
            Artifact::Radar => "radar",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSelection(BTreeSet<Artifact>);

impl ExportSelection {
    pub fn all() -> Self {
        Self(Artifact::ALL.into_iter().collect())
    }

    pub fn only(artifacts: impl IntoIterator<Item = Artifact>) -> Self {
        Self(artifacts.into_iter().collect())
    }

    pub fn contains(&self, artifact: Artifact) -> bool {
        self.0.contains(&artifact)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Artifact> + '_ {
        self.0.iter().copied()
    }
}

/// One discrete unit of export work.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportUnit {
    FeatureTable,
    SlopeTable,
    Overview(Artifact),
    Spectrum { entity: String, variable: VariableName },
    Radar { entity: String },
}

/// Deterministic work list for `selection` over `snapshot`.
pub fn plan(snapshot: &Snapshot, selection: &ExportSelection) -> Vec<ExportUnit> {
    let mut units = Vec::new();
    for artifact in selection.iter() {
        match artifact {
            Artifact::FeatureTable => units.push(ExportUnit::FeatureTable),
            Artifact::SlopeTable => units.push(ExportUnit::SlopeTable),
            Artifact::Clustering | Artifact::KMeans | Artifact::Heatmap => {
                units.push(ExportUnit::Overview(artifact))
            }
            Artifact::Spectrum => {
                for entity in &snapshot.entity_ids {
                    for variable in &snapshot.variables {
                        units.push(ExportUnit::Spectrum {
                            entity: entity.clone(),
                            variable: variable.clone(),
                        });
                    }
                }
            }
            Artifact::Radar => {
                for entity in &snapshot.entity_ids {
                    units.push(ExportUnit::Radar {
                        entity: entity.clone(),
                    });
                }
            }
        }
    }
    units
}

/// Progress steps an export of `selection` over `snapshot` will report.
pub fn total_steps(snapshot: &Snapshot, selection: &ExportSelection) -> usize {
    plan(snapshot, selection).len()
}

// ============================================================================
// Views
// ============================================================================

/// Data behind one rendered view.
#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ViewRequest<'a> {
    Clustering {
        features: &'a FeatureMatrix,
    },
    KMeans {
        features: &'a FeatureMatrix,
    },
    Heatmap {
        features: &'a FeatureMatrix,
    },
    Spectrum {
        entity: &'a str,
        variable: &'a str,
        spectrum: &'a PowerSpectrum,
    },
    Radar {
        entity: &'a str,
        /// group -> (variable -> slope)
        groups: BTreeMap<&'static str, BTreeMap<&'a str, f64>>,
    },
}

/// Turns a view request into a file. `stem` is the target path without an
/// extension; the renderer picks the format and returns the written path.
pub trait ViewRenderer: Send + Sync {
    fn render(&self, request: &ViewRequest<'_>, stem: &Path) -> Result<PathBuf, ExportError>;
}

/// Writes the data behind each view as pretty JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataDumpRenderer;

impl ViewRenderer for DataDumpRenderer {
    fn render(&self, request: &ViewRequest<'_>, stem: &Path) -> Result<PathBuf, ExportError> {
        let path = stem.with_extension("json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let file = File::create(&path).map_err(io_err(&path))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, request)?;
        out.flush().map_err(io_err(&path))?;
        Ok(path)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// What an export run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub folder: PathBuf,
    pub artifacts: Vec<PathBuf>,
    /// Units that had nothing to write
    pub skipped: usize,
    pub steps: usize,
}

pub struct ExportPipeline;

impl ExportPipeline {
    /// Run an export of `snapshot` on a background worker.
    pub fn launch(
        snapshot: Arc<Snapshot>,
        selection: ExportSelection,
        output_dir: PathBuf,
        renderer: Arc<dyn ViewRenderer>,
    ) -> JobHandle<ExportReport> {
        let ctx = JobContext::new(total_steps(&snapshot, &selection));
        JobHandle::spawn_with("export", ctx, move |ctx| {
            Self::run(&snapshot, &selection, &output_dir, renderer.as_ref(), ctx)
        })
    }

    /// Synchronous export loop.
    pub fn run(
        snapshot: &Snapshot,
        selection: &ExportSelection,
        output_dir: &Path,
        renderer: &dyn ViewRenderer,
        ctx: &JobContext,
    ) -> Result<ExportReport, JobError> {
        let units = plan(snapshot, selection);
        let folder = create_export_folder(output_dir, Local::now())?;
        info!(
            "💾 Exporting {} units at index {} to {}",
            units.len(),
            snapshot.index,
            folder.display()
        );

        let mut report = ExportReport {
            folder,
            artifacts: Vec::new(),
            skipped: 0,
            steps: units.len(),
        };
        for unit in &units {
            ctx.checkpoint()?;
            match write_unit(unit, snapshot, &report.folder, renderer)? {
                Some(path) => {
                    debug!("[Export] wrote {}", path.display());
                    report.artifacts.push(path);
                }
                None => report.skipped += 1,
            }
            ctx.advance();
        }

        info!(
            "✓ Export complete: {} artifacts, {} skipped",
            report.artifacts.len(),
            report.skipped
        );
        Ok(report)
    }
}

fn write_unit(
    unit: &ExportUnit,
    snapshot: &Snapshot,
    folder: &Path,
    renderer: &dyn ViewRenderer,
) -> Result<Option<PathBuf>, ExportError> {
    let full = snapshot.full();
    match unit {
        ExportUnit::FeatureTable => {
            let path = folder.join(FEATURES_CSV);
            match save_features_csv(&path, full, &snapshot.variables) {
                Ok(()) => Ok(Some(path)),
                Err(ExportError::NothingToSave) => Ok(None),
                Err(e) => Err(e),
            }
        }
        ExportUnit::SlopeTable => {
            let path = folder.join(SLOPES_CSV);
            write_slope_table(&path, full)?;
            Ok(Some(path))
        }
        ExportUnit::Overview(artifact) => {
            let request = match artifact {
                Artifact::Clustering | Artifact::KMeans if full.features.len() < 2 => {
                    return Ok(None)
                }
                Artifact::Clustering => ViewRequest::Clustering {
                    features: &full.features,
                },
                Artifact::KMeans => ViewRequest::KMeans {
                    features: &full.features,
                },
                _ if full.is_empty() => return Ok(None),
                _ => ViewRequest::Heatmap {
                    features: &full.features,
                },
            };
            renderer
                .render(&request, &folder.join(artifact.file_stem()))
                .map(Some)
        }
        ExportUnit::Spectrum { entity, variable } => {
            let Some(spectrum) = full.spectrum(entity, variable) else {
                return Ok(None);
            };
            let request = ViewRequest::Spectrum {
                entity,
                variable,
                spectrum,
            };
            let stem = folder.join(entity).join(SPECTRUM_SUBDIR).join(variable);
            renderer.render(&request, &stem).map(Some)
        }
        ExportUnit::Radar { entity } => {
            let Some(row) = full.features.get(entity) else {
                return Ok(None);
            };
            let mut groups: BTreeMap<&'static str, BTreeMap<&str, f64>> = BTreeMap::new();
            for (variable, slope) in row {
                groups
                    .entry(variable_group(variable))
                    .or_default()
                    .insert(variable.as_str(), *slope);
            }
            let request = ViewRequest::Radar { entity, groups };
            let stem = folder.join(entity).join(Artifact::Radar.file_stem());
            renderer.render(&request, &stem).map(Some)
        }
    }
}

/// Create `<root>/analysis_<timestamp>`, suffixing `_1`, `_2`, ... when a
/// folder for the same second already exists.
pub fn create_export_folder(root: &Path, now: DateTime<Local>) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(root).map_err(io_err(root))?;
    let base = format!("{EXPORT_FOLDER_PREFIX}{}", now.format(EXPORT_TIMESTAMP_FORMAT));
    let mut candidate = root.join(&base);
    let mut suffix = 1;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                candidate = root.join(format!("{base}_{suffix}"));
                suffix += 1;
            }
            Err(source) => {
                return Err(ExportError::Io {
                    path: candidate,
                    source,
                })
            }
        }
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Write the entity x variable slope table. Empty features are an error so
/// callers can tell the user there is nothing to save.
pub fn save_features_csv(
    path: &Path,
    features: &WindowFeatures,
    variables: &[VariableName],
) -> Result<(), ExportError> {
    if features.is_empty() {
        return Err(ExportError::NothingToSave);
    }
    let file = File::create(path).map_err(io_err(path))?;
    let mut out = BufWriter::new(file);

    let mut header = vec!["ID".to_string()];
    header.extend(variables.iter().map(|v| csv_field(v)));
    writeln!(out, "{}", header.join(",")).map_err(io_err(path))?;

    for (entity, row) in &features.features {
        let mut fields = vec![csv_field(entity)];
        fields.extend(
            variables
                .iter()
                .map(|v| row.get(v).copied().unwrap_or(0.0).to_string()),
        );
        writeln!(out, "{}", fields.join(",")).map_err(io_err(path))?;
    }
    out.flush().map_err(io_err(path))
}

fn write_slope_table(path: &Path, features: &WindowFeatures) -> Result<(), ExportError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "ID,Variable,Slope,Intercept").map_err(io_err(path))?;
    for (entity, spectra) in &features.spectra {
        for (variable, spectrum) in spectra {
            writeln!(
                out,
                "{},{},{},{}",
                csv_field(entity),
                csv_field(variable),
                spectrum.slope,
                spectrum.intercept
            )
            .map_err(io_err(path))?;
        }
    }
    out.flush().map_err(io_err(path))
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
