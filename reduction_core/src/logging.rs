use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::context::SharedStats;

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEntry {
    pub example_number: u64,
    pub average_loss: f64,
    pub since_last: f64,
    pub label: Option<f32>,
    pub prediction: f32,
    pub features: usize,
    pub timestamp_ms: u128,
}

/// Progress journal written at doubling example counts (1, 2, 4, 8, ...).
#[derive(Debug)]
pub struct ProgressLogger {
    path: Option<PathBuf>,
    next_dump: u64,
    weighted_at_last_dump: f64,
    entries: Vec<ProgressEntry>,
}

impl ProgressLogger {
    /// Keep entries in memory only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            next_dump: 1,
            weighted_at_last_dump: 0.0,
            entries: Vec::new(),
        }
    }

    /// Also append every entry to the JSON-lines file at `path`.
    pub fn to_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path: Some(path),
            ..Self::in_memory()
        })
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    /// Record the example just counted in `stats` if it falls on the schedule.
    pub fn observe(
        &mut self,
        stats: &mut SharedStats,
        label: Option<f32>,
        prediction: f32,
        features: usize,
    ) -> io::Result<()> {
        if stats.example_number < self.next_dump {
            return Ok(());
        }
        let weighted_since = stats.weighted_labeled_examples - self.weighted_at_last_dump;
        let entry = ProgressEntry {
            example_number: stats.example_number,
            average_loss: stats.average_loss(),
            since_last: if weighted_since > 0.0 {
                stats.sum_loss_since_last_dump / weighted_since
            } else {
                0.0
            },
            label,
            prediction,
            features,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        };

        stats.sum_loss_since_last_dump = 0.0;
        self.weighted_at_last_dump = stats.weighted_labeled_examples;
        self.next_dump = stats.example_number * 2;

        if let Some(path) = &self.path {
            append_json_line(path, &entry)?;
        }
        self.entries.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::LossFunction;

    #[test]
    fn dumps_at_doubling_counts() {
        let mut logger = ProgressLogger::in_memory();
        let mut stats = SharedStats::new(LossFunction::Squared);
        for _ in 0..20 {
            stats.record_example(3);
            stats.record_loss(false, 0.5, 1.0, 1.0);
            logger.observe(&mut stats, Some(1.0), 0.5, 3).unwrap();
        }
        let counts: Vec<u64> = logger.entries().iter().map(|e| e.example_number).collect();
        assert_eq!(counts, vec![1, 2, 4, 8, 16]);
        assert!(logger.entries().iter().all(|e| (e.since_last - 0.5).abs() < 1e-9));
    }

    #[test]
    fn journal_file_gets_one_line_per_dump() {
        let path = std::env::temp_dir()
            .join(format!("progress-{}", uuid::Uuid::new_v4()))
            .join("progress.jsonl");
        let mut logger = ProgressLogger::to_file(&path).unwrap();
        let mut stats = SharedStats::new(LossFunction::Squared);
        for _ in 0..4 {
            stats.record_example(1);
            logger.observe(&mut stats, None, 0.0, 1).unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        let first: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first["example_number"], 1);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
