/*!
Scenario registry.

The registry is the single owner of all scenarios. Foreground editing and the
background dispatcher share it through [`SharedRegistry`]; every multi-step
read-modify-write must happen under one lock.
*/

use crate::packet;
use crate::protocol::{is_valid_remote_type, FORMAT_VERSION, MIN_IMPORT_LEN, PACKET_START};
use crate::scenario::{Scenario, ScenarioError};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Name prefix of generated auto-scenarios
pub const AUTO_PREFIX: &str = "AUTO_P";

/// Registry shared between the dispatcher and foreground operations
pub type SharedRegistry = Arc<Mutex<ScenarioRegistry>>;

/// Errors raised by registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Scenario '{0}' not found")]
    NotFound(String),

    #[error("Scenario '{0}' already exists")]
    AlreadyExists(String),

    #[error("Scenario name must not be empty")]
    EmptyName,

    #[error("Scenario name {0:?} contains a line break")]
    InvalidName(String),

    #[error("Packet rejected: {0}")]
    InvalidPacket(String),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// Synthesized name used by automatic dispatch, e.g. `AUTO_P5_30M`
pub fn auto_scenario_name(remote_type: u8, distance: u32) -> String {
    format!("{AUTO_PREFIX}{remote_type}_{distance}M")
}

fn distance_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\s*[мmM](?:[^\p{L}]|$)").expect("distance pattern is valid"))
}

/// Extract the distance in meters a scenario name encodes, e.g. `30` from
/// `test5 30m park` or `Сценарий 30м`
pub fn distance_from_name(name: &str) -> Option<u32> {
    distance_pattern()
        .captures_iter(name)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .find(|distance| *distance > 0)
}

/// Names are stored one per line in the scenario file, so line breaks are
/// rejected. Colons are fine.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name.contains(['\n', '\r']) {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Lock a shared registry, recovering the data from a poisoned lock
pub fn lock(registry: &SharedRegistry) -> MutexGuard<'_, ScenarioRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Name-ordered scenario store
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, Scenario>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the scenarios captured from working devices
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for scenario in crate::builtin::builtin_scenarios() {
            registry.insert(scenario);
        }
        registry
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenarios.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    /// Scenarios in name order
    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    /// Insert or replace a scenario under its own name
    pub fn insert(&mut self, scenario: Scenario) -> Option<Scenario> {
        self.scenarios.insert(scenario.name.clone(), scenario)
    }

    /// Insert only if the name is free
    pub fn insert_new(&mut self, scenario: Scenario) -> Result<(), RegistryError> {
        validate_name(&scenario.name)?;
        if self.contains(&scenario.name) {
            return Err(RegistryError::AlreadyExists(scenario.name));
        }
        self.insert(scenario);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Scenario, RegistryError> {
        self.scenarios
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Move a scenario to a new key. Raw bytes are kept as they are, so the
    /// name embedded in an imported packet does not change.
    pub fn rename(&mut self, old: &str, new: &str, overwrite: bool) -> Result<(), RegistryError> {
        validate_name(new)?;
        if !self.contains(old) {
            return Err(RegistryError::NotFound(old.to_string()));
        }
        if old == new {
            return Ok(());
        }
        if self.contains(new) && !overwrite {
            return Err(RegistryError::AlreadyExists(new.to_string()));
        }

        let mut scenario = self.remove(old)?;
        scenario.name = new.to_string();
        self.insert(scenario);
        Ok(())
    }

    /// Apply an edit to a copy of the scenario and store it with freshly
    /// encoded raw bytes. Nothing changes if the edit or the encoding fails.
    pub fn edit<F>(&mut self, name: &str, edit: F) -> Result<&Scenario, RegistryError>
    where
        F: FnOnce(&mut Scenario) -> Result<(), ScenarioError>,
    {
        let mut draft = self
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        edit(&mut draft)?;
        draft.name = name.to_string();
        draft.rebuild_raw_bytes()?;

        let slot = self.scenarios.entry(name.to_string()).or_default();
        *slot = draft;
        Ok(slot)
    }

    /// Bytes to transmit for a scenario
    pub fn wire_bytes(&self, name: &str) -> Result<Vec<u8>, RegistryError> {
        let scenario = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(scenario.wire_bytes()?)
    }

    /// Byte-identical copy of `source` under `new_name`
    pub fn clone_scenario(&mut self, source: &str, new_name: &str, overwrite: bool) -> Result<(), RegistryError> {
        validate_name(new_name)?;
        if self.contains(new_name) && !overwrite {
            return Err(RegistryError::AlreadyExists(new_name.to_string()));
        }
        let copy = self
            .get(source)
            .ok_or_else(|| RegistryError::NotFound(source.to_string()))?
            .clone_as(new_name);
        self.insert(copy);
        Ok(())
    }

    /// Create `count` copies of `template` named `<prefix>_1 .. <prefix>_N`,
    /// replacing existing entries with those names
    pub fn generate_copies(&mut self, template: &str, prefix: &str, count: usize) -> Result<Vec<String>, RegistryError> {
        if prefix.contains(['\n', '\r']) {
            return Err(RegistryError::InvalidName(prefix.to_string()));
        }
        let source = self
            .get(template)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(template.to_string()))?;

        let names: Vec<String> = (1..=count).map(|i| format!("{prefix}_{i}")).collect();
        for name in &names {
            self.insert(source.clone_as(name.as_str()));
            debug!("Created scenario {} (copy of {})", name, template);
        }
        Ok(names)
    }

    /// Import a captured packet under `name`.
    ///
    /// The bytes are kept verbatim; decoded commands are attached when the
    /// packet parses.
    pub fn import_packet(&mut self, name: &str, data: Vec<u8>, overwrite: bool) -> Result<&Scenario, RegistryError> {
        validate_name(name)?;
        if self.contains(name) && !overwrite {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        if data.len() < MIN_IMPORT_LEN {
            return Err(RegistryError::InvalidPacket(format!(
                "{} bytes is too short for a scenario",
                data.len()
            )));
        }
        if data[0] != PACKET_START || data[1] != FORMAT_VERSION || !is_valid_remote_type(data[2]) {
            return Err(RegistryError::InvalidPacket("bad scenario header".to_string()));
        }

        let remote_type = data[2];
        let commands = match packet::decode(&data) {
            Ok(decoded) => decoded.commands,
            Err(e) => {
                info!("Scenario '{}' imported as raw bytes only: {}", name, e);
                Vec::new()
            }
        };

        let scenario = Scenario {
            name: name.to_string(),
            remote_type,
            commands,
            raw_bytes: data,
        };
        let slot = self.scenarios.entry(name.to_string()).or_default();
        *slot = scenario;
        Ok(slot)
    }

    /// Derive `AUTO_P<remote>_<distance>M` copies for every scenario whose
    /// name encodes a distance. Existing auto-names are never overwritten.
    /// Returns the names created.
    pub fn prepare_auto_scenarios(&mut self) -> Vec<String> {
        let candidates: Vec<(String, String)> = self
            .iter()
            .filter(|s| !s.name.starts_with(AUTO_PREFIX) && is_valid_remote_type(s.remote_type))
            .filter_map(|s| {
                distance_from_name(&s.name)
                    .map(|distance| (s.name.clone(), auto_scenario_name(s.remote_type, distance)))
            })
            .collect();

        let mut created = Vec::new();
        for (source, auto_name) in candidates {
            if self.contains(&auto_name) {
                continue;
            }
            if let Some(copy) = self.get(&source).map(|s| s.clone_as(auto_name.as_str())) {
                self.insert(copy);
                info!("Created auto-scenario {} from {}", auto_name, source);
                created.push(auto_name);
            }
        }
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::codes;
    use crate::scenario::Command;

    fn scenario(name: &str, remote: u8) -> Scenario {
        Scenario::new(name, remote).with_commands(vec![
            Command::from_code(codes::SET_RANGE, 300).unwrap(),
            Command::from_code(codes::MOVE_TO_RANGE, 0).unwrap(),
        ])
    }

    #[test]
    fn test_distance_from_name() {
        assert_eq!(distance_from_name("range_3m_pulse1"), Some(3));
        assert_eq!(distance_from_name("test5 30m park"), Some(30));
        assert_eq!(distance_from_name("Сценарий 50м пульт 2"), Some(50));
        assert_eq!(distance_from_name("AUTO_P5_30M"), Some(30));
        assert_eq!(distance_from_name("test1"), None);
        assert_eq!(distance_from_name("0m then 7 m"), Some(7));
        assert_eq!(distance_from_name("drill 2 max"), None);
        assert_eq!(distance_from_name("5 moves"), None);
        assert_eq!(distance_from_name("lane 40m, 2 max"), Some(40));
    }

    #[test]
    fn test_auto_scenarios_are_idempotent() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(scenario("range_3m_pulse1", 1));
        registry.insert(scenario("test5 30m park", 5));
        registry.insert(scenario("test1", 1));

        let created = registry.prepare_auto_scenarios();
        assert_eq!(created, vec!["AUTO_P1_3M".to_string(), "AUTO_P5_30M".to_string()]);
        assert_eq!(registry.len(), 5);

        let auto = registry.get("AUTO_P5_30M").unwrap();
        assert_eq!(auto.remote_type, 5);
        assert_eq!(auto.commands, registry.get("test5 30m park").unwrap().commands);

        let snapshot: Vec<Scenario> = registry.iter().cloned().collect();
        assert!(registry.prepare_auto_scenarios().is_empty());
        assert_eq!(registry.iter().cloned().collect::<Vec<_>>(), snapshot);
    }

    #[test]
    fn test_existing_auto_name_is_not_overwritten() {
        let mut registry = ScenarioRegistry::new();
        let mut custom = Scenario::new("AUTO_P1_3M", 1);
        custom.raw_bytes = vec![0x7E, 0x00, 0x01];
        registry.insert(custom.clone());
        registry.insert(scenario("range_3m_pulse1", 1));

        assert!(registry.prepare_auto_scenarios().is_empty());
        assert_eq!(registry.get("AUTO_P1_3M"), Some(&custom));
    }

    #[test]
    fn test_auto_copy_is_independent() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(scenario("target 10m", 2));
        registry.prepare_auto_scenarios();

        registry
            .edit("target 10m", |s| s.remove_command(0).map(|_| ()))
            .unwrap();
        assert_eq!(registry.get("AUTO_P2_10M").unwrap().commands.len(), 2);
        assert_eq!(registry.get("target 10m").unwrap().commands.len(), 1);
    }

    #[test]
    fn test_rename_and_remove() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(scenario("a", 1));
        registry.insert(scenario("b", 1));

        assert_eq!(registry.rename("a", "b", false), Err(RegistryError::AlreadyExists("b".to_string())));
        registry.rename("a", "c", false).unwrap();
        assert!(!registry.contains("a"));
        assert_eq!(registry.get("c").unwrap().name, "c");

        assert_eq!(registry.rename("missing", "x", false), Err(RegistryError::NotFound("missing".to_string())));
        assert!(registry.remove("b").is_ok());
        assert!(registry.remove("b").is_err());
    }

    #[test]
    fn test_edit_rebuilds_raw_bytes_and_rolls_back_on_error() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(scenario("drill", 1));

        let edited = registry
            .edit("drill", |s| {
                s.push_command(Command::from_code(codes::PARKING, 0).unwrap());
                Ok(())
            })
            .unwrap();
        assert_eq!(edited.commands.len(), 3);
        assert_eq!(edited.raw_bytes, packet::encode(edited).unwrap());

        let before = registry.get("drill").cloned();
        let result = registry.edit("drill", |s| s.set_remote_type(9));
        assert!(matches!(result, Err(RegistryError::Scenario(ScenarioError::InvalidRemoteType(9)))));
        assert_eq!(registry.get("drill").cloned(), before);
    }

    #[test]
    fn test_clone_and_generate_copies() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(scenario("template", 3));

        registry.clone_scenario("template", "copy", false).unwrap();
        assert_eq!(registry.get("copy").unwrap().commands, registry.get("template").unwrap().commands);
        assert!(registry.clone_scenario("template", "copy", false).is_err());
        assert!(registry.clone_scenario("nope", "x", false).is_err());

        let names = registry.generate_copies("template", "range", 3).unwrap();
        assert_eq!(names, vec!["range_1", "range_2", "range_3"]);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_import_packet() {
        let mut registry = ScenarioRegistry::new();
        let data = packet::encode(&scenario("captured", 4)).unwrap();

        let imported = registry.import_packet("mine", data.clone(), false).unwrap();
        assert_eq!(imported.remote_type, 4);
        assert_eq!(imported.raw_bytes, data);
        assert_eq!(imported.commands.len(), 2);

        assert!(matches!(registry.import_packet("mine", data.clone(), false), Err(RegistryError::AlreadyExists(_))));
        assert!(matches!(registry.import_packet("short", data[..10].to_vec(), false), Err(RegistryError::InvalidPacket(_))));

        let mut bad_remote = data.clone();
        bad_remote[2] = 7;
        assert!(matches!(registry.import_packet("bad", bad_remote, false), Err(RegistryError::InvalidPacket(_))));
    }

    #[test]
    fn test_wire_bytes() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(scenario("encoded", 2));
        registry.insert(Scenario::new("empty", 2));

        assert_eq!(registry.wire_bytes("encoded").unwrap(), packet::encode(registry.get("encoded").unwrap()).unwrap());
        assert!(matches!(registry.wire_bytes("empty"), Err(RegistryError::Scenario(ScenarioError::NothingToSend(_)))));
        assert!(matches!(registry.wire_bytes("missing"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_names_with_line_breaks_rejected() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(scenario("a", 1));

        assert!(matches!(registry.clone_scenario("a", "b\nc", false), Err(RegistryError::InvalidName(_))));
        assert!(matches!(registry.rename("a", "x\r", false), Err(RegistryError::InvalidName(_))));
        assert!(matches!(registry.insert_new(Scenario::new("", 1)), Err(RegistryError::EmptyName)));
        registry.clone_scenario("a", "lane:2", false).unwrap();
        assert!(registry.contains("lane:2"));
    }

    #[test]
    fn test_builtin_seed() {
        let registry = ScenarioRegistry::with_builtin();
        assert_eq!(registry.len(), 5);
        assert!(registry.iter().all(|s| s.has_raw_bytes()));
        assert_eq!(registry.get("range_3m_pulse5").unwrap().remote_type, 5);
    }
}
