/*!
Scenario file format and hex helpers.

One scenario per line:

```text
name:remote_type: 7E 00 01 0D ...
```
*/

use crate::protocol::is_valid_remote_type;
use crate::registry::ScenarioRegistry;
use crate::scenario::{Scenario, ScenarioError};
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Default scenario file name
pub const DEFAULT_SCENARIO_FILE: &str = "scenarios.txt";

/// Errors from reading or writing scenario data
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid hex byte '{0}'")]
    InvalidHex(String),

    #[error("Line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// Parse user-supplied hex such as `7E 00 01`, `7e,00,01` or `0x7E 0x00`.
/// Every token must be exactly two hex digits.
pub fn parse_hex_bytes(input: &str) -> Result<Vec<u8>, StorageError> {
    let normalized = input.replace(',', " ");

    normalized
        .split_whitespace()
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            if digits.len() != 2 {
                return Err(StorageError::InvalidHex(token.to_string()));
            }
            let mut byte = [0u8; 1];
            hex::decode_to_slice(digits, &mut byte)
                .map_err(|_| StorageError::InvalidHex(token.to_string()))?;
            Ok(byte[0])
        })
        .collect()
}

/// Space-separated upper-case hex, e.g. `7E 00 01`
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Format one scenario as a file line (without the newline)
pub fn format_scenario_line(scenario: &Scenario) -> Result<String, StorageError> {
    let data = scenario.wire_bytes()?;
    Ok(format!("{}:{}: {}", scenario.name, scenario.remote_type, format_hex(&data)))
}

/// Parse one file line. Undecodable hex tokens are skipped with a warning.
///
/// The line is split from the right: the hex field never contains `:`, while
/// scenario names may.
pub fn parse_scenario_line(line: &str, line_no: usize) -> Result<Scenario, StorageError> {
    let invalid = |reason: String| StorageError::InvalidLine { line: line_no, reason };

    let mut parts = line.rsplitn(3, ':');
    let (Some(hex_data), Some(remote), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("expected name:remote_type:hex".to_string()));
    };

    if name.is_empty() {
        return Err(invalid("empty scenario name".to_string()));
    }

    let remote_type = remote
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|r| is_valid_remote_type(*r))
        .ok_or_else(|| invalid(format!("invalid remote type '{}' for {}", remote.trim(), name)))?;

    let mut data = Vec::new();
    for token in hex_data.split_whitespace() {
        match hex::decode(token) {
            Ok(bytes) if bytes.len() == 1 => data.push(bytes[0]),
            _ => warn!("Skipping invalid byte '{}' in scenario {}", token, name),
        }
    }

    Ok(Scenario::from_raw(name, remote_type, data))
}

/// Load scenarios from a file into the registry, replacing same-named
/// entries. A missing file is not an error. Returns the number loaded.
pub fn load_scenarios<P: AsRef<Path>>(path: P, registry: &mut ScenarioRegistry) -> Result<usize, StorageError> {
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Scenario file {} not found, using built-in scenarios only", path.display());
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut loaded = 0;
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_scenario_line(line, i + 1) {
            Ok(scenario) => {
                registry.insert(scenario);
                loaded += 1;
            }
            Err(e) => warn!("Skipping scenario line in {}: {}", path.display(), e),
        }
    }

    info!("Loaded {} scenarios from {}", loaded, path.display());
    Ok(loaded)
}

/// Write every transmittable scenario to a file in registry order.
/// Returns the number written.
pub fn save_scenarios<P: AsRef<Path>>(path: P, registry: &ScenarioRegistry) -> Result<usize, StorageError> {
    let path = path.as_ref();
    let mut content = String::new();
    let mut written = 0;

    for scenario in registry.iter() {
        match format_scenario_line(scenario) {
            Ok(line) => {
                content.push_str(&line);
                content.push('\n');
                written += 1;
            }
            Err(e) => warn!("Not saving scenario {}: {}", scenario.name, e),
        }
    }

    std::fs::write(path, content)?;
    info!("Saved {} scenarios to {}", written, path.display());
    Ok(written)
}
