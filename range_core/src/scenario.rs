/*!
Scenario and command value types.

A [`Scenario`] owns an ordered list of [`Command`]s (execution order on the
device) and optionally the exact wire packet it was imported from. When raw
bytes are present they are what gets transmitted.
*/

use crate::catalog::{self, CatalogEntry};
use crate::packet::{self, PacketError};
use crate::protocol::is_valid_remote_type;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or editing scenarios
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command {0} requires a parameter")]
    MissingParam(&'static str),

    #[error("Command {0} does not take a parameter")]
    UnexpectedParam(&'static str),

    #[error("Position {position} is out of range for {len} commands")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("Invalid remote type: {0} (expected 1-6)")]
    InvalidRemoteType(u8),

    #[error("Scenario '{0}' has neither raw bytes nor commands")]
    NothingToSend(String),

    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Parameter word attached to a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParam {
    pub name: String,
    pub value: u16,
}

/// A single device operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub code: u16,
    /// Present iff the catalog marks the code as parameterised
    pub param: Option<CommandParam>,
}

impl Command {
    fn from_entry(entry: &CatalogEntry, value: u16) -> Self {
        Self {
            name: entry.key.to_string(),
            code: entry.code,
            param: entry.param_label.map(|label| CommandParam {
                name: label.to_string(),
                value,
            }),
        }
    }

    /// Build a command from a catalog code; `value` is ignored for commands
    /// without a parameter
    pub fn from_code(code: u16, value: u16) -> Option<Self> {
        catalog::entry_for_code(code).map(|entry| Self::from_entry(entry, value))
    }

    /// Build a command from its catalog key, checking the parameter against
    /// the catalog
    pub fn from_name(name: &str, value: Option<u16>) -> Result<Self, ScenarioError> {
        let entry = catalog::entry_for_name(name)
            .ok_or_else(|| ScenarioError::UnknownCommand(name.to_string()))?;

        match (entry.has_param(), value) {
            (true, Some(v)) => Ok(Self::from_entry(entry, v)),
            (true, None) => Err(ScenarioError::MissingParam(entry.key)),
            (false, Some(_)) => Err(ScenarioError::UnexpectedParam(entry.key)),
            (false, None) => Ok(Self::from_entry(entry, 0)),
        }
    }

    pub fn has_param(&self) -> bool {
        self.param.is_some()
    }

    pub fn param_value(&self) -> Option<u16> {
        self.param.as_ref().map(|p| p.value)
    }

    /// Number of bytes this command occupies in the command stream
    pub fn wire_len(&self) -> usize {
        if self.has_param() { 4 } else { 2 }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.param {
            Some(param) => write!(f, "{} (0x{:04X}, {}: {})", self.name, self.code, param.name, param.value),
            None => write!(f, "{} (0x{:04X})", self.name, self.code),
        }
    }
}

/// A named command sequence for one remote type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub remote_type: u8,
    pub commands: Vec<Command>,
    /// Exact wire packet; empty when the scenario only exists as commands
    #[serde(with = "hex_bytes")]
    pub raw_bytes: Vec<u8>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, remote_type: u8) -> Self {
        Self {
            name: name.into(),
            remote_type,
            commands: Vec::new(),
            raw_bytes: Vec::new(),
        }
    }

    pub fn with_commands(mut self, commands: Vec<Command>) -> Self {
        self.commands = commands;
        self
    }

    /// Build a scenario that keeps `raw` as its wire form, attaching any
    /// commands the decoder recognises
    pub fn from_raw(name: impl Into<String>, remote_type: u8, raw: Vec<u8>) -> Self {
        let commands = packet::decode(&raw)
            .map(|decoded| decoded.commands)
            .unwrap_or_default();

        Self {
            name: name.into(),
            remote_type,
            commands,
            raw_bytes: raw,
        }
    }

    pub fn has_raw_bytes(&self) -> bool {
        !self.raw_bytes.is_empty()
    }

    /// Check if this scenario can produce a packet
    pub fn is_transmittable(&self) -> bool {
        self.has_raw_bytes() || !self.commands.is_empty()
    }

    /// Deep copy under a different name; raw bytes are copied verbatim
    pub fn clone_as(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Bytes to put on the wire: raw bytes when present, otherwise the
    /// encoded command list
    pub fn wire_bytes(&self) -> Result<Vec<u8>, ScenarioError> {
        if self.has_raw_bytes() {
            return Ok(self.raw_bytes.clone());
        }
        if self.commands.is_empty() {
            return Err(ScenarioError::NothingToSend(self.name.clone()));
        }
        Ok(packet::encode(self)?)
    }

    pub fn set_remote_type(&mut self, remote_type: u8) -> Result<(), ScenarioError> {
        if !is_valid_remote_type(remote_type) {
            return Err(ScenarioError::InvalidRemoteType(remote_type));
        }
        self.remote_type = remote_type;
        Ok(())
    }

    pub fn push_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Insert before `position` (0-based); `position == len` appends
    pub fn insert_command(&mut self, position: usize, command: Command) -> Result<(), ScenarioError> {
        let len = self.commands.len();
        if position > len {
            return Err(ScenarioError::PositionOutOfRange { position, len });
        }
        self.commands.insert(position, command);
        Ok(())
    }

    pub fn remove_command(&mut self, position: usize) -> Result<Command, ScenarioError> {
        let len = self.commands.len();
        if position >= len {
            return Err(ScenarioError::PositionOutOfRange { position, len });
        }
        Ok(self.commands.remove(position))
    }

    /// Move the command at `from` so that it ends up at index `to`
    pub fn move_command(&mut self, from: usize, to: usize) -> Result<(), ScenarioError> {
        let len = self.commands.len();
        for position in [from, to] {
            if position >= len {
                return Err(ScenarioError::PositionOutOfRange { position, len });
            }
        }
        let command = self.commands.remove(from);
        self.commands.insert(to, command);
        Ok(())
    }

    /// Re-derive the wire form from the command list (editor save)
    pub fn rebuild_raw_bytes(&mut self) -> Result<(), ScenarioError> {
        if !is_valid_remote_type(self.remote_type) {
            return Err(ScenarioError::InvalidRemoteType(self.remote_type));
        }
        self.raw_bytes = packet::encode(self)?;
        Ok(())
    }
}

/// Serialize raw packet bytes as a hex string
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}
