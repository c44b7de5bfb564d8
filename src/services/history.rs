use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

pub const HISTORY_FILE_NAME: &str = ".sfmsync-history.jsonl";

/// One executed pipeline step, stored as a JSON line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub timestamp: String,
    pub stage: String,
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
}

impl StageRecord {
    pub fn now(stage: &str, command: Vec<String>, exit_code: Option<i32>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stage: stage.to_string(),
            command,
            exit_code,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub fn append_record(path: &Path, record: &StageRecord) -> io::Result<()> {
    let mut out = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(out, "{}", line)
}

/// Records in file order. Malformed lines are skipped; a missing file
/// means no history yet.
pub fn read_records(path: &Path) -> io::Result<Vec<StageRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<StageRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(records)
}
