use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::{
    datatypes::{Bounds, CostTriple, EvaluationRecord},
    error::CalibrationError,
};

pub const COST_COLUMNS: [&str; 3] = ["kinematic_cost", "static_cost", "weighted_cost"];

/// Append-only CSV table of every simulation run so far. Also used as a
/// cache, so an interrupted calibration can be restarted without running
/// the same simulations again.
#[derive(Debug)]
pub struct EvaluationLog {
    path: PathBuf,
    parameter_names: Vec<String>,
    append_lock: Mutex<()>,
}

impl EvaluationLog {
    pub fn new(path: &Path, parameter_names: &[String]) -> EvaluationLog {
        EvaluationLog {
            path: path.to_path_buf(),
            parameter_names: parameter_names.to_vec(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> String {
        let mut columns: Vec<&str> = self.parameter_names.iter().map(|n| n.as_str()).collect();
        columns.extend(COST_COLUMNS);
        columns.join(",")
    }

    /// Reads every record of the log
    ///
    /// # Returns
    /// The records in file order; an empty vector if the file does not
    /// exist or only holds the header.
    pub fn read(&self) -> Result<Vec<EvaluationRecord>, CalibrationError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(CalibrationError::Log(format!(
                    "Unable to read {}: {err}",
                    self.path.display()
                )))
            }
        };

        let n_params = self.parameter_names.len();
        let mut lines = contents.lines().filter(|l| !l.trim().is_empty());

        match lines.next() {
            None => return Ok(Vec::new()),
            Some(header) => {
                let columns: Vec<&str> = header.split(',').map(|c| c.trim()).collect();
                if columns.len() != n_params + COST_COLUMNS.len() {
                    return Err(CalibrationError::Log(format!(
                        "{} has {} columns, expected {}",
                        self.path.display(),
                        columns.len(),
                        n_params + COST_COLUMNS.len()
                    )));
                }
            }
        }

        let mut records = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let values: Result<Vec<f64>, _> =
                line.split(',').map(|v| v.trim().parse::<f64>()).collect();
            match values {
                Ok(values) if values.len() == n_params + COST_COLUMNS.len() => {
                    records.push(EvaluationRecord {
                        raw: values[..n_params].to_vec(),
                        costs: CostTriple {
                            kinematic_cost: values[n_params],
                            static_cost: values[n_params + 1],
                            weighted_cost: values[n_params + 2],
                        },
                    });
                }
                _ => warn!(
                    "skipping malformed line {} of {}",
                    line_no + 2,
                    self.path.display()
                ),
            }
        }

        Ok(records)
    }

    /// Looks for a previous evaluation of a candidate
    ///
    /// # Arguments
    /// * `normalized` - The candidate, in normalized units
    /// * `bounds` - Bounds used to normalize the logged parameters
    /// * `tolerance` - Absolute tolerance on each normalized coordinate
    ///
    /// # Returns
    /// The first record matching the candidate on every coordinate
    pub fn find(
        &self,
        normalized: &[f64],
        bounds: &Bounds,
        tolerance: f64,
    ) -> Result<Option<EvaluationRecord>, CalibrationError> {
        let found = self.read()?.into_iter().find(|record| {
            let logged = bounds.normalize(&record.raw);
            logged.len() == normalized.len()
                && std::iter::zip(&logged, normalized).all(|(a, b)| (a - b).abs() <= tolerance)
        });
        Ok(found)
    }

    /// Appends one record, writing the header first if the log is new.
    ///
    /// Appends are serialized, and each one is a single write of complete
    /// lines to a file opened in append mode.
    pub fn append(&self, record: &EvaluationRecord) -> Result<(), CalibrationError> {
        let _guard = match self.append_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut log_file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(err) => {
                return Err(CalibrationError::Log(format!(
                    "Failed to open {}: {err}",
                    self.path.display()
                )))
            }
        };

        let is_new = match log_file.metadata() {
            Ok(m) => m.len() == 0,
            Err(err) => {
                return Err(CalibrationError::Log(format!(
                    "Failed to stat {}: {err}",
                    self.path.display()
                )))
            }
        };

        let mut values: Vec<String> = record.raw.iter().map(|v| v.to_string()).collect();
        values.push(record.costs.kinematic_cost.to_string());
        values.push(record.costs.static_cost.to_string());
        values.push(record.costs.weighted_cost.to_string());

        let mut text = String::new();
        if is_new {
            text.push_str(&self.header());
            text.push('\n');
        }
        text.push_str(&values.join(","));
        text.push('\n');

        if let Err(err) = log_file.write_all(text.as_bytes()) {
            return Err(CalibrationError::Log(format!(
                "Failed to append to {}: {err}",
                self.path.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_log(name: &str) -> EvaluationLog {
        let path = std::env::temp_dir().join(format!(
            "plastifit-log-{name}-{}.csv",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        EvaluationLog::new(&path, &["q".to_owned(), "h0".to_owned()])
    }

    fn record(raw: Vec<f64>, chi: f64) -> EvaluationRecord {
        EvaluationRecord {
            raw,
            costs: CostTriple {
                kinematic_cost: chi * 2.0,
                static_cost: chi / 2.0,
                weighted_cost: chi,
            },
        }
    }

    #[test]
    fn test_missing_or_empty_log_is_empty_cache() {
        let log = scratch_log("empty");
        assert!(log.read().unwrap().is_empty());

        std::fs::write(log.path(), "").unwrap();
        assert!(log.read().unwrap().is_empty());

        std::fs::write(log.path(), "q,h0,kinematic_cost,static_cost,weighted_cost\n").unwrap();
        assert!(log.read().unwrap().is_empty());
    }

    #[test]
    fn test_append_then_read() {
        let log = scratch_log("append");
        log.append(&record(vec![2.0, 150.0], 0.3)).unwrap();
        log.append(&record(vec![2.5, 151.0], 0.1)).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(contents.starts_with("q,h0,kinematic_cost,static_cost,weighted_cost\n"));
        assert_eq!(contents.lines().count(), 3);

        let records = log.read().unwrap();
        assert_eq!(records, vec![record(vec![2.0, 150.0], 0.3), record(vec![2.5, 151.0], 0.1)]);
    }

    #[test]
    fn test_find_uses_normalized_tolerance() {
        let log = scratch_log("find");
        let bounds = Bounds::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        log.append(&record(vec![0.3, 0.7], 0.42)).unwrap();

        let hit = log.find(&[0.3 + 1e-10, 0.7 - 1e-10], &bounds, 1e-9).unwrap();
        assert_eq!(hit.map(|r| r.costs.weighted_cost), Some(0.42));

        let miss = log.find(&[0.3 + 1e-6, 0.7 + 1e-6], &bounds, 1e-9).unwrap();
        assert!(miss.is_none());

        // A single differing coordinate is enough to miss
        let partial = log.find(&[0.3, 0.7 + 1e-6], &bounds, 1e-9).unwrap();
        assert!(partial.is_none());
    }

    #[test]
    fn test_wrong_header_is_an_error() {
        let log = scratch_log("header");
        std::fs::write(log.path(), "a,b\n1,2\n").unwrap();
        assert!(matches!(log.read(), Err(CalibrationError::Log(_))));
    }

    #[test]
    fn test_truncated_line_is_skipped() {
        let log = scratch_log("truncated");
        log.append(&record(vec![1.0, 2.0], 0.5)).unwrap();
        let mut contents = std::fs::read_to_string(log.path()).unwrap();
        contents.push_str("1.5,2.5,0.1\n");
        std::fs::write(log.path(), contents).unwrap();

        assert_eq!(log.read().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_appends_keep_lines_whole() {
        let log = scratch_log("concurrent");
        std::thread::scope(|scope| {
            for t in 0..8 {
                let log = &log;
                scope.spawn(move || {
                    for k in 0..10 {
                        log.append(&record(vec![t as f64, k as f64], 0.1)).unwrap();
                    }
                });
            }
        });

        let records = log.read().unwrap();
        assert_eq!(records.len(), 80);
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().filter(|l| l.starts_with("q,")).count(), 1);
    }
}
