use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::buffer::OutputRun;
use crate::error::SinkError;
use crate::outcome::Outcome;

/// Everything written for one terminal logger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub kind: &'static str,
    pub sequence_id: u64,
    pub name: String,
    pub full_name: String,
    pub parent_name: Option<String>,
    pub reference: Option<String>,
    pub outcome: Outcome,
    pub description: String,
    pub elapsed_seconds: f64,
    pub owner: String,
    pub command: String,
    pub return_code: i32,
    pub output: Vec<OutputRun>,
    pub finished_at: String,
}

pub(crate) fn timestamp_now() -> Result<String, SinkError> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

/// Receives one record per terminal logger.
pub trait ResultSink: Send + Sync {
    fn write(&self, record: &ResultRecord) -> Result<(), SinkError>;
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn write(&self, _record: &ResultRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps records in memory, in write order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find(&self, full_name: &str) -> Option<ResultRecord> {
        self.records()
            .into_iter()
            .find(|record| record.full_name == full_name)
    }
}

impl ResultSink for MemorySink {
    fn write(&self, record: &ResultRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Writes each record as pretty JSON into a directory.
///
/// File names derive from the logger kind and full name; a name already
/// taken (in this run or on disk) gets `_1`, `_2`, ... appended.
#[derive(Debug)]
pub struct JsonDirSink {
    dir: PathBuf,
    taken: Mutex<HashSet<String>>,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SinkError::PrepareDirectory {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            taken: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reserve_path(&self, record: &ResultRecord) -> PathBuf {
        let stem = format!("{}-{}", record.kind, sanitize(&record.full_name));
        let mut taken = self.taken.lock().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = stem.clone();
        let mut suffix = 0usize;
        while taken.contains(&candidate) || self.dir.join(format!("{candidate}.json")).exists() {
            suffix += 1;
            candidate = format!("{stem}_{suffix}");
        }
        let path = self.dir.join(format!("{candidate}.json"));
        taken.insert(candidate);
        path
    }
}

impl ResultSink for JsonDirSink {
    fn write(&self, record: &ResultRecord) -> Result<(), SinkError> {
        let body =
            serde_json::to_vec_pretty(record).map_err(|source| SinkError::Serialize {
                name: record.full_name.clone(),
                source,
            })?;
        let path = self.reserve_path(record);
        fs::write(&path, body).map_err(|source| SinkError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), outcome = record.outcome.as_str(), "wrote result");
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(full_name: &str) -> ResultRecord {
        ResultRecord {
            kind: "testcase",
            sequence_id: 3,
            name: "case".to_string(),
            full_name: full_name.to_string(),
            parent_name: Some("suite".to_string()),
            reference: None,
            outcome: Outcome::Passed,
            description: String::new(),
            elapsed_seconds: 0.25,
            owner: String::new(),
            command: String::new(),
            return_code: 0,
            output: vec![OutputRun {
                priority: 40,
                text: "hello".to_string(),
            }],
            finished_at: timestamp_now().unwrap(),
        }
    }

    #[test]
    fn json_sink_avoids_file_name_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonDirSink::new(dir.path().join("results")).unwrap();
        sink.write(&record("suite/case")).unwrap();
        sink.write(&record("suite/case")).unwrap();
        sink.write(&record("suite:case")).unwrap();

        let mut names: Vec<_> = fs::read_dir(sink.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "testcase-suite_case.json",
                "testcase-suite_case_1.json",
                "testcase-suite_case_2.json",
            ]
        );

        let body = fs::read_to_string(sink.dir().join("testcase-suite_case.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["outcome"], "passed");
        assert_eq!(value["output"][0]["text"], "hello");
    }

    #[test]
    fn json_sink_skips_names_left_by_earlier_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("testcase-case.json"), "{}").unwrap();
        let sink = JsonDirSink::new(dir.path()).unwrap();
        sink.write(&record("case")).unwrap();
        assert!(dir.path().join("testcase-case_1.json").exists());
    }

    #[test]
    fn memory_sink_keeps_write_order() {
        let sink = MemorySink::new();
        sink.write(&record("a")).unwrap();
        sink.write(&record("b")).unwrap();
        let names: Vec<_> = sink.records().into_iter().map(|r| r.full_name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(sink.find("b").is_some());
    }
}
