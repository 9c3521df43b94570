use fxhash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::NtupleError;

pub const TRIGGERBIT_COLUMN: &str = "triggerbit";
pub const RUN_COLUMN: &str = "RunNumber";
pub const PAIR_TYPE_COLUMN: &str = "pairType";
pub const WEIGHT_COLUMN: &str = "weight";

const COMMENT_MARKER: char = '#';

/// One row of an ntuple. The trigger, run and channel fields are parsed as integers, every
/// column is also available by name as a float.
#[derive(Debug, Clone)]
pub struct Event {
    columns: Arc<FxHashMap<String, usize>>,
    values: Vec<f64>,
    pub triggerbit: u64,
    pub run: u32,
    pub pair_type: i64,
    pub weight: f64,
}

impl Event {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.columns.get(name).map(|idx| self.values[*idx])
    }

    /// Build an event from named values, with unit weight
    pub fn from_pairs(pair_type: i64, triggerbit: u64, run: u32, pairs: &[(&str, f64)]) -> Self {
        let mut columns = FxHashMap::default();
        let mut values = Vec::with_capacity(pairs.len());
        for (idx, (name, value)) in pairs.iter().enumerate() {
            columns.insert(name.to_string(), idx);
            values.push(*value);
        }
        Self {
            columns: Arc::new(columns),
            values,
            triggerbit,
            run,
            pair_type,
            weight: 1.0,
        }
    }
}

/// A streaming reader over a text ntuple.
///
/// The first non-comment line is the header naming the columns. Values are separated by commas
/// and/or whitespace. Lines starting with `#` and blank lines are skipped.
#[derive(Debug)]
pub struct NtupleFile {
    reader: BufReader<File>,
    path: PathBuf,
    columns: Arc<FxHashMap<String, usize>>,
    n_columns: usize,
    trigger_idx: usize,
    run_idx: usize,
    pair_idx: usize,
    weight_idx: Option<usize>,
    line_number: usize,
    bytes_read: u64,
    size_bytes: u64,
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_skipped(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER)
}

/// Integers may be written in float notation as long as they are integral
fn parse_integer(token: &str) -> Option<i64> {
    if let Ok(v) = token.parse::<i64>() {
        return Some(v);
    }
    let v = token.parse::<f64>().ok()?;
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

impl NtupleFile {
    pub fn new(path: &Path) -> Result<Self, NtupleError> {
        if !path.exists() {
            return Err(NtupleError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut line_number = 0;
        let mut bytes_read = 0;
        let mut header = String::new();
        loop {
            header.clear();
            let n = reader.read_line(&mut header)?;
            if n == 0 {
                return Err(NtupleError::EmptyFile);
            }
            line_number += 1;
            bytes_read += n as u64;
            if !is_skipped(&header) {
                break;
            }
        }

        let mut columns = FxHashMap::default();
        let names = split_fields(&header);
        for (idx, name) in names.iter().enumerate() {
            columns.insert(name.to_string(), idx);
        }
        let require = |name: &str| -> Result<usize, NtupleError> {
            columns
                .get(name)
                .copied()
                .ok_or_else(|| NtupleError::MissingColumn(name.to_string()))
        };
        let trigger_idx = require(TRIGGERBIT_COLUMN)?;
        let run_idx = require(RUN_COLUMN)?;
        let pair_idx = require(PAIR_TYPE_COLUMN)?;
        let weight_idx = columns.get(WEIGHT_COLUMN).copied();

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            n_columns: names.len(),
            columns: Arc::new(columns),
            trigger_idx,
            run_idx,
            pair_idx,
            weight_idx,
            line_number,
            bytes_read,
            size_bytes,
        })
    }

    /// Read the next event
    ///
    /// Returns a `Result<Option<Event>>`. The Option is None if the file has no more events.
    pub fn get_next_event(&mut self) -> Result<Option<Event>, NtupleError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            self.bytes_read += n as u64;
            if !is_skipped(&line) {
                break;
            }
        }

        let fields = split_fields(&line);
        if fields.len() != self.n_columns {
            return Err(NtupleError::BadLine {
                line: self.line_number,
                found: fields.len(),
                expected: self.n_columns,
            });
        }

        let bad_value = |idx: usize| -> NtupleError {
            let column = self
                .columns
                .iter()
                .find(|(_, i)| **i == idx)
                .map(|(name, _)| name.clone())
                .unwrap_or_default();
            NtupleError::BadValue {
                line: self.line_number,
                column,
                value: fields[idx].to_string(),
            }
        };

        let mut values = Vec::with_capacity(fields.len());
        for (idx, token) in fields.iter().enumerate() {
            values.push(token.parse::<f64>().map_err(|_| bad_value(idx))?);
        }

        let triggerbit = match fields[self.trigger_idx].parse::<u64>() {
            Ok(v) => v,
            Err(_) => parse_integer(fields[self.trigger_idx])
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| bad_value(self.trigger_idx))?,
        };
        let run = parse_integer(fields[self.run_idx])
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| bad_value(self.run_idx))?;
        let pair_type =
            parse_integer(fields[self.pair_idx]).ok_or_else(|| bad_value(self.pair_idx))?;
        let weight = match self.weight_idx {
            Some(idx) => values[idx],
            None => 1.0,
        };

        Ok(Some(Event {
            columns: self.columns.clone(),
            values,
            triggerbit,
            run,
            pair_type,
            weight,
        }))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn get_size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn get_bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for NtupleFile {
    type Item = Result<Event, NtupleError>;
    fn next(&mut self) -> Option<Self::Item> {
        self.get_next_event().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ntuple(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_events() {
        let file = write_ntuple(
            "# produced by the skimmer\n\
             pairType triggerbit RunNumber metnomu_et weight\n\
             0 1099511627777 315000 150.5 0.5\n\
             \n\
             2,4,320000,80.0,1.0\n",
        );
        let mut ntuple = NtupleFile::new(file.path()).unwrap();
        let first = ntuple.get_next_event().unwrap().unwrap();
        assert_eq!(first.pair_type, 0);
        assert_eq!(first.triggerbit, (1u64 << 40) | 1);
        assert_eq!(first.run, 315000);
        assert_eq!(first.get("metnomu_et"), Some(150.5));
        assert_eq!(first.weight, 0.5);
        assert_eq!(first.get("dau1_pt"), None);

        let second = ntuple.get_next_event().unwrap().unwrap();
        assert_eq!(second.pair_type, 2);
        assert_eq!(second.triggerbit, 4);
        assert!(ntuple.get_next_event().unwrap().is_none());
        assert_eq!(ntuple.get_bytes_read(), ntuple.get_size_bytes());
    }

    #[test]
    fn test_missing_column() {
        let file = write_ntuple("pairType RunNumber metnomu_et\n0 1 1.0\n");
        assert!(matches!(
            NtupleFile::new(file.path()),
            Err(NtupleError::MissingColumn(c)) if c == TRIGGERBIT_COLUMN
        ));
    }

    #[test]
    fn test_malformed_lines_report_line_number() {
        let file = write_ntuple("pairType triggerbit RunNumber\n0 1 1\n0 1\n");
        let results: Vec<Result<Event, NtupleError>> = NtupleFile::new(file.path()).unwrap().collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(NtupleError::BadLine { line: 3, found: 2, expected: 3 })
        ));

        let file = write_ntuple("pairType triggerbit RunNumber\n0 abc 1\n");
        let mut ntuple = NtupleFile::new(file.path()).unwrap();
        match ntuple.get_next_event() {
            Err(NtupleError::BadValue { line, column, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(column, TRIGGERBIT_COLUMN);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_empty_file() {
        let file = write_ntuple("# nothing\n\n");
        assert!(matches!(NtupleFile::new(file.path()), Err(NtupleError::EmptyFile)));
    }
}
