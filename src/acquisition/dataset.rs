//! Replay dataset loading.
//!
//! Two layouts are supported:
//!
//! **Wide table:** one row per timestamp, one column per
//! `<entityId>_<variableName>`, plus an optional `timestamp` column (row
//! index otherwise). A missing or unparseable cell means the variable is
//! absent for that entity at that instant.
//!
//! **Per-entity files:** one CSV per entity, the entity id inferred from an
//! `ID_<n>` token in the file name. Columns are matched fuzzily: the first
//! column whose lowercased name contains the variable name wins. Files are
//! joined side by side on the row index, which doubles as the timestamp.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::defaults::LIVE_ID_PREFIX;
use crate::types::{DataPacket, EntityId, VariableName};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} has no header row", .0.display())]
    MissingHeader(PathBuf),

    #[error("{} has no <entity>_<variable> columns for the known variables", .0.display())]
    NoEntityColumns(PathBuf),

    #[error("line {line}: timestamp '{value}' is not a number")]
    BadTimestamp { line: usize, value: String },

    #[error("line {line}: timestamp {got} precedes previous row ({previous})")]
    OutOfOrder { line: usize, previous: f64, got: f64 },

    #[error("no usable per-entity files")]
    NoEntityFiles,

    #[error("dataset has no rows")]
    Empty,
}

/// Pre-loaded recording replayed deterministically by `ReplayMode`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayDataset {
    entity_ids: Vec<EntityId>,
    packets: Vec<DataPacket>,
}

impl ReplayDataset {
    /// Build from packets already in timestamp order. Entity ids are the
    /// union of all packets' entities.
    pub fn from_packets(packets: Vec<DataPacket>) -> Result<Self, DatasetError> {
        if packets.is_empty() {
            return Err(DatasetError::Empty);
        }
        for (i, w) in packets.windows(2).enumerate() {
            if w[1].timestamp < w[0].timestamp {
                return Err(DatasetError::OutOfOrder {
                    line: i + 2,
                    previous: w[0].timestamp,
                    got: w[1].timestamp,
                });
            }
        }
        let ids: BTreeSet<EntityId> = packets
            .iter()
            .flat_map(|p| p.entity_ids().cloned())
            .collect();
        Ok(Self {
            entity_ids: ids.into_iter().collect(),
            packets,
        })
    }

    pub fn entity_ids(&self) -> &[EntityId] {
        &self.entity_ids
    }

    pub fn packets(&self) -> &[DataPacket] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DataPacket> {
        self.packets.get(index)
    }

    // ------------------------------------------------------------------------
    // Wide table
    // ------------------------------------------------------------------------

    /// Load a wide `<entityId>_<variableName>` table.
    pub fn load_wide(path: &Path, variables: &[VariableName]) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut lines = BufReader::new(file).lines();

        let header = match lines.next() {
            Some(Ok(h)) => h,
            Some(Err(source)) => {
                return Err(DatasetError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            None => return Err(DatasetError::MissingHeader(path.to_path_buf())),
        };
        let layout = WideLayout::from_header(&header, variables);
        if layout.columns.is_empty() {
            return Err(DatasetError::NoEntityColumns(path.to_path_buf()));
        }
        info!(
            file = %path.display(),
            entities = layout.entity_count(),
            columns = layout.columns.len(),
            timestamp_column = layout.timestamp.is_some(),
            "📂 Loading wide replay table"
        );

        let mut packets = Vec::new();
        let mut row = 0usize;
        let mut previous: Option<f64> = None;
        for (i, line) in lines.enumerate() {
            let line_num = i + 2;
            let line = line.map_err(|source| DatasetError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let fields = csv_split(&line);

            let timestamp = match layout.timestamp {
                Some(idx) => {
                    let raw = fields.get(idx).map(|s| s.trim()).unwrap_or("");
                    match raw.parse::<f64>() {
                        Ok(t) if t.is_finite() => t,
                        _ => {
                            return Err(DatasetError::BadTimestamp {
                                line: line_num,
                                value: raw.to_string(),
                            })
                        }
                    }
                }
                None => row as f64,
            };
            if let Some(prev) = previous {
                if timestamp < prev {
                    return Err(DatasetError::OutOfOrder {
                        line: line_num,
                        previous: prev,
                        got: timestamp,
                    });
                }
            }
            previous = Some(timestamp);

            let mut packet = DataPacket::new(timestamp);
            for (idx, (entity, variable)) in &layout.columns {
                if let Some(value) = fields.get(*idx).and_then(|s| parse_cell(s)) {
                    packet.insert(entity, variable, value);
                }
            }
            packets.push(packet);
            row += 1;
        }

        let mut dataset = Self::from_packets(packets)?;
        // Entities with a column but no data still belong to the recording.
        let declared: BTreeSet<EntityId> =
            layout.columns.values().map(|(e, _)| e.clone()).collect();
        dataset.entity_ids = declared.into_iter().collect();
        info!(
            rows = dataset.len(),
            entities = dataset.entity_ids.len(),
            "✓ Replay table loaded"
        );
        Ok(dataset)
    }

    // ------------------------------------------------------------------------
    // Per-entity files
    // ------------------------------------------------------------------------

    /// Load and join one CSV per entity. Files without an inferable id, with
    /// a duplicate id, or that fail to read are skipped with a warning.
    pub fn load_per_entity<P: AsRef<Path>>(
        paths: &[P],
        variables: &[VariableName],
    ) -> Result<Self, DatasetError> {
        let mut tables: BTreeMap<EntityId, Vec<BTreeMap<VariableName, f64>>> = BTreeMap::new();

        for path in paths {
            let path = path.as_ref();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(id) = infer_entity_id(&file_name) else {
                warn!(file = %path.display(), "Could not infer entity id from file name, skipping");
                continue;
            };
            if tables.contains_key(&id) {
                warn!(file = %path.display(), id = %id, "Duplicate entity id, skipping");
                continue;
            }
            match read_entity_table(path, variables) {
                Ok(rows) => {
                    debug!(file = %path.display(), id = %id, rows = rows.len(), "Entity table read");
                    tables.insert(id, rows);
                }
                Err(e) => warn!(file = %path.display(), error = %e, "Failed to read entity file, skipping"),
            }
        }

        if tables.is_empty() {
            return Err(DatasetError::NoEntityFiles);
        }

        let row_count = tables.values().map(Vec::len).max().unwrap_or(0);
        let packets: Vec<DataPacket> = (0..row_count)
            .map(|row| {
                let mut packet = DataPacket::new(row as f64);
                for (id, rows) in &tables {
                    if let Some(values) = rows.get(row) {
                        for (var, value) in values {
                            packet.insert(id, var, *value);
                        }
                    }
                }
                packet
            })
            .collect();

        let mut dataset = Self::from_packets(packets)?;
        dataset.entity_ids = tables.keys().cloned().collect();
        info!(
            files = dataset.entity_ids.len(),
            rows = dataset.len(),
            "✓ Per-entity tables joined"
        );
        Ok(dataset)
    }
}

// ============================================================================
// Column Layout
// ============================================================================

/// Column index -> (entity, variable) for a wide table.
#[derive(Debug, Default)]
struct WideLayout {
    timestamp: Option<usize>,
    columns: BTreeMap<usize, (EntityId, VariableName)>,
}

impl WideLayout {
    fn from_header(header: &str, variables: &[VariableName]) -> Self {
        // Longest suffix first so `left_eye` wins over a shorter `eye`.
        let mut by_length: Vec<&VariableName> = variables.iter().collect();
        by_length.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut layout = Self::default();
        for (idx, raw) in csv_split(header).iter().enumerate() {
            let name = raw.trim();
            if name.eq_ignore_ascii_case("timestamp") {
                layout.timestamp = Some(idx);
                continue;
            }
            let matched = by_length.iter().find_map(|var| {
                name.strip_suffix(var.as_str())
                    .and_then(|rest| rest.strip_suffix('_'))
                    .filter(|entity| !entity.is_empty())
                    .map(|entity| (entity.to_string(), (*var).clone()))
            });
            match matched {
                Some(pair) => {
                    layout.columns.insert(idx, pair);
                }
                None => debug!(column = %name, "Ignoring column"),
            }
        }
        layout
    }

    fn entity_count(&self) -> usize {
        self.columns
            .values()
            .map(|(e, _)| e.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

static ENTITY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ID_(\d+)").expect("entity id pattern is valid"));

fn infer_entity_id(file_name: &str) -> Option<EntityId> {
    ENTITY_ID
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| format!("{LIVE_ID_PREFIX}{}", m.as_str()))
}

/// Rows of one per-entity file, already reduced to the known variables.
fn read_entity_table(
    path: &Path,
    variables: &[VariableName],
) -> Result<Vec<BTreeMap<VariableName, f64>>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = BufReader::new(file).lines();
    let header = match lines.next() {
        Some(Ok(h)) => h,
        Some(Err(source)) => {
            return Err(DatasetError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
        None => return Err(DatasetError::MissingHeader(path.to_path_buf())),
    };

    let columns: Vec<String> = csv_split(&header)
        .into_iter()
        .map(|c| c.trim().to_lowercase())
        .collect();
    let mapping: Vec<(usize, &VariableName)> = variables
        .iter()
        .filter_map(|var| {
            columns
                .iter()
                .position(|col| col.contains(var.as_str()))
                .map(|idx| (idx, var))
        })
        .collect();

    let mut rows = Vec::new();
    for line in lines {
        let line = line.map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = csv_split(&line);
        let row = mapping
            .iter()
            .filter_map(|(idx, var)| {
                fields
                    .get(*idx)
                    .and_then(|s| parse_cell(s))
                    .map(|v| ((*var).clone(), v))
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn parse_cell(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Split a CSV line respecting quoted fields (handles commas inside quotes).
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars() -> Vec<VariableName> {
        crate::config::default_variables()
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).expect("create");
        f.write_all(contents.as_bytes()).expect("write");
        path
    }

    #[test]
    fn test_csv_split_quotes() {
        assert_eq!(csv_split(r#"a,"b,c",d"#), vec!["a", "b,c", "d"]);
        assert_eq!(csv_split(r#""say ""hi""",x"#), vec![r#"say "hi""#, "x"]);
        assert_eq!(csv_split("1,,3"), vec!["1", "", "3"]);
    }

    #[test]
    fn test_wide_layout_prefers_longest_variable_suffix() {
        let layout = WideLayout::from_header(
            "timestamp,ID_1_left_eye,ID_1_head,ID_12_right_hand,notes",
            &vars(),
        );
        assert_eq!(layout.timestamp, Some(0));
        assert_eq!(layout.columns[&1], ("ID_1".to_string(), "left_eye".to_string()));
        assert_eq!(layout.columns[&2], ("ID_1".to_string(), "head".to_string()));
        assert_eq!(layout.columns[&3], ("ID_12".to_string(), "right_hand".to_string()));
        assert!(!layout.columns.contains_key(&4));
        assert_eq!(layout.entity_count(), 2);
    }

    #[test]
    fn test_load_wide_with_missing_cells() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "session.csv",
            "timestamp,ID_1_happy,ID_2_happy,ID_2_yaw\n\
             0.0,0.5,,0.1\n\
             0.5,0.6,NaN,\n\
             1.0,,,\n",
        );

        let ds = ReplayDataset::load_wide(&path, &vars()).expect("load");
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.entity_ids(), &["ID_1".to_string(), "ID_2".to_string()]);
        assert_eq!(ds.get(0).and_then(|p| p.value("ID_2", "yaw")), Some(0.1));
        assert_eq!(ds.get(0).and_then(|p| p.value("ID_2", "happy")), None);
        assert!(!ds.get(1).expect("row").entities.contains_key("ID_2"));
        assert!(ds.get(2).expect("row").is_empty());
        assert_eq!(ds.get(1).map(|p| p.timestamp), Some(0.5));
    }

    #[test]
    fn test_load_wide_uses_row_index_without_timestamp_column() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "s.csv", "ID_3_sad\n0.1\n0.2\n");
        let ds = ReplayDataset::load_wide(&path, &vars()).expect("load");
        let ts: Vec<f64> = ds.packets().iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![0.0, 1.0]);
    }

    #[test]
    fn test_load_wide_rejects_bad_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let no_cols = write(dir.path(), "a.csv", "foo,bar\n1,2\n");
        assert!(matches!(
            ReplayDataset::load_wide(&no_cols, &vars()),
            Err(DatasetError::NoEntityColumns(_))
        ));

        let backwards = write(dir.path(), "b.csv", "timestamp,ID_1_happy\n2,0.1\n1,0.2\n");
        assert!(matches!(
            ReplayDataset::load_wide(&backwards, &vars()),
            Err(DatasetError::OutOfOrder { line: 3, .. })
        ));

        let bad_ts = write(dir.path(), "c.csv", "timestamp,ID_1_happy\nnoon,0.1\n");
        assert!(matches!(
            ReplayDataset::load_wide(&bad_ts, &vars()),
            Err(DatasetError::BadTimestamp { line: 2, .. })
        ));

        let header_only = write(dir.path(), "d.csv", "ID_1_happy\n");
        assert!(matches!(
            ReplayDataset::load_wide(&header_only, &vars()),
            Err(DatasetError::Empty)
        ));
    }

    #[test]
    fn test_infer_entity_id_from_file_name() {
        assert_eq!(infer_entity_id("person_id_2.csv").as_deref(), Some("ID_2"));
        assert_eq!(infer_entity_id("ID_14_capture.csv").as_deref(), Some("ID_14"));
        assert_eq!(infer_entity_id("unnamed.csv"), None);
    }

    #[test]
    fn test_load_per_entity_joins_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = write(dir.path(), "person_id_2.csv", "Happy Score,Head Movement\n0.1,1.0\n0.2,1.1\n0.3,1.2\n");
        let b = write(dir.path(), "ID_1_capture.csv", "happy\n0.9\n");
        let dup = write(dir.path(), "copy_ID_1.csv", "happy\n0.0\n");
        let anon = write(dir.path(), "unnamed.csv", "happy\n0.0\n");

        let ds = ReplayDataset::load_per_entity(&[a, b, dup, anon], &vars()).expect("load");
        assert_eq!(ds.entity_ids(), &["ID_1".to_string(), "ID_2".to_string()]);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get(0).and_then(|p| p.value("ID_1", "happy")), Some(0.9));
        assert_eq!(ds.get(0).and_then(|p| p.value("ID_2", "head")), Some(1.0));
        assert_eq!(ds.get(2).and_then(|p| p.value("ID_2", "happy")), Some(0.3));
        assert!(!ds.get(2).expect("row").entities.contains_key("ID_1"));
    }

    #[test]
    fn test_load_per_entity_without_usable_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let anon = write(dir.path(), "unnamed.csv", "happy\n0.0\n");
        assert!(matches!(
            ReplayDataset::load_per_entity(&[anon], &vars()),
            Err(DatasetError::NoEntityFiles)
        ));
    }
}
