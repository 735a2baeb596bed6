/*!
Requested target distances per firing line.

The payload is JSON in one of two shapes:

- a flat object, `{"line_1": 10, "line_2": "25"}`
- a Firestore list response, where each document name ends in the line id
  and the distance sits in `fields.distance` as an integer, string or double

Only distances greater than zero are kept.
*/

use crate::config::SourceConfig;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Line id to requested distance in meters
pub type DistanceMap = BTreeMap<String, u32>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected payload: {0}")]
    Format(String),

    #[error("Command '{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("Command '{program}' failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Something that can report the current requested distances
pub trait DistanceSource: Send {
    fn fetch(&mut self) -> Result<DistanceMap, SourceError>;
}

impl<S: DistanceSource + ?Sized> DistanceSource for Box<S> {
    fn fetch(&mut self) -> Result<DistanceMap, SourceError> {
        (**self).fetch()
    }
}

/// Remote type for a line id: `line_<n>`, `line<n>` or bare `<n>` with n in 1..=6
pub fn line_number(line_id: &str) -> Option<u8> {
    let digits = line_id
        .strip_prefix("line_")
        .or_else(|| line_id.strip_prefix("line"))
        .unwrap_or(line_id);

    digits
        .parse::<u8>()
        .ok()
        .filter(|n| range_core::protocol::is_valid_remote_type(*n))
}

/// One display line per entry, e.g. `Line 2 (line_2): 25 m`. Ids that do not
/// name a valid line are shown with `?` and never dispatched.
pub fn describe_lines(distances: &DistanceMap) -> Vec<String> {
    distances
        .iter()
        .map(|(line_id, distance)| {
            let line = line_number(line_id).map_or_else(|| "?".to_string(), |n| n.to_string());
            format!("Line {} ({}): {} m", line, line_id, distance)
        })
        .collect()
}

#[derive(Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

/// Parse a flat or Firestore-style distance payload
pub fn parse_distance_payload(text: &str) -> Result<DistanceMap, SourceError> {
    let value: Value = serde_json::from_str(text)?;

    let Value::Object(map) = &value else {
        return Err(SourceError::Format("expected a JSON object".to_string()));
    };

    if map.contains_key("documents") {
        let list: DocumentList = serde_json::from_value(value)?;
        return Ok(parse_documents(list));
    }

    let mut distances = DistanceMap::new();
    for (line_id, raw) in map {
        match plain_distance(raw) {
            Some(distance) if distance > 0 => {
                distances.insert(line_id.clone(), distance);
            }
            _ => debug!("Ignoring entry {} = {}", line_id, raw),
        }
    }
    Ok(distances)
}

fn parse_documents(list: DocumentList) -> DistanceMap {
    let mut distances = DistanceMap::new();
    for doc in list.documents {
        let line_id = doc.name.rsplit('/').next().unwrap_or_default().to_string();
        let distance = doc.fields.get("distance").and_then(typed_distance);
        match distance {
            Some(distance) if distance > 0 && !line_id.is_empty() => {
                distances.insert(line_id, distance);
            }
            _ => debug!("Ignoring document {}", doc.name),
        }
    }
    distances
}

/// Firestore typed value: `integerValue`, `stringValue` or `doubleValue`
fn typed_distance(field: &Value) -> Option<u32> {
    ["integerValue", "stringValue", "doubleValue"]
        .iter()
        .find_map(|key| field.get(key))
        .and_then(plain_distance)
}

fn plain_distance(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Re-reads a JSON file on every poll
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DistanceSource for FileSource {
    fn fetch(&mut self) -> Result<DistanceMap, SourceError> {
        let text = std::fs::read_to_string(&self.path)?;
        parse_distance_payload(&text)
    }
}

/// Runs an external program and parses its stdout
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    runtime: tokio::runtime::Runtime,
}

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Result<Self, SourceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            program: program.into(),
            args,
            timeout,
            runtime,
        })
    }

    async fn run(&self) -> Result<String, SourceError> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SourceError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(SourceError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DistanceSource for CommandSource {
    fn fetch(&mut self) -> Result<DistanceMap, SourceError> {
        let text = self.runtime.block_on(self.run())?;
        parse_distance_payload(&text)
    }
}

/// Build the configured source
pub fn from_config(config: &SourceConfig) -> Result<Box<dyn DistanceSource>, SourceError> {
    match config {
        SourceConfig::File { path } => Ok(Box::new(FileSource::new(path))),
        SourceConfig::Command {
            program,
            args,
            timeout_ms,
        } => {
            if program.trim().is_empty() {
                warn!("Distance source command is empty");
                return Err(SourceError::Format("empty source program".to_string()));
            }
            Ok(Box::new(CommandSource::new(
                program.clone(),
                args.clone(),
                Duration::from_millis(*timeout_ms),
            )?))
        }
    }
}
