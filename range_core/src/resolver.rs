/*!
Scenario lookup by (distance, remote type).

Fallback chain, first match wins:

1. The synthesized auto-name `AUTO_P<remote>_<distance>M`
2. Names starting with one of the naming templates, in template order
3. Any name containing the distance as a decimal substring

Every step also requires the stored remote type to match. Steps 2 and 3 scan
the registry in name order, so ties are broken lexicographically.
*/

use crate::registry::{auto_scenario_name, ScenarioRegistry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Scenario lookup failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No scenario for distance {distance} m and remote type {remote_type}")]
    NotFound { distance: u32, remote_type: u8 },
}

/// Name templates tried in step 2; `{distance}` and `{remote}` are replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingTemplates {
    pub templates: Vec<String>,
}

impl Default for NamingTemplates {
    fn default() -> Self {
        Self {
            templates: vec![
                "Сценарий {distance}м пульт {remote}".to_string(),
                "Сценарий {distance}м".to_string(),
            ],
        }
    }
}

impl NamingTemplates {
    /// Render every template for one lookup
    pub fn render(&self, distance: u32, remote_type: u8) -> Vec<String> {
        self.templates
            .iter()
            .map(|t| {
                t.replace("{distance}", &distance.to_string())
                    .replace("{remote}", &remote_type.to_string())
            })
            .collect()
    }
}

/// Which step of the chain produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    AutoName,
    Template,
    Substring,
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioResolver {
    naming: NamingTemplates,
}

impl ScenarioResolver {
    pub fn new(naming: NamingTemplates) -> Self {
        Self { naming }
    }

    /// Find the scenario name for a distance and remote type
    pub fn resolve(&self, registry: &ScenarioRegistry, distance: u32, remote_type: u8) -> Result<String, ResolveError> {
        self.resolve_with_kind(registry, distance, remote_type)
            .map(|(name, _)| name)
    }

    pub fn resolve_with_kind(
        &self,
        registry: &ScenarioRegistry,
        distance: u32,
        remote_type: u8,
    ) -> Result<(String, MatchKind), ResolveError> {
        // Zero is not a distance, and "0" would match as a substring of others.
        if distance == 0 {
            return Err(ResolveError::NotFound { distance, remote_type });
        }

        let auto_name = auto_scenario_name(remote_type, distance);
        if registry
            .get(&auto_name)
            .is_some_and(|s| s.remote_type == remote_type)
        {
            debug!("Resolved {} m / remote {} by auto-name", distance, remote_type);
            return Ok((auto_name, MatchKind::AutoName));
        }

        for prefix in self.naming.render(distance, remote_type) {
            if let Some(scenario) = registry
                .iter()
                .find(|s| s.name.starts_with(&prefix) && s.remote_type == remote_type)
            {
                debug!("Resolved {} m / remote {} by template '{}'", distance, remote_type, prefix);
                return Ok((scenario.name.clone(), MatchKind::Template));
            }
        }

        let needle = distance.to_string();
        registry
            .iter()
            .find(|s| s.name.contains(&needle) && s.remote_type == remote_type)
            .map(|s| (s.name.clone(), MatchKind::Substring))
            .ok_or(ResolveError::NotFound { distance, remote_type })
    }
}

/// Resolve with the default naming templates
pub fn resolve(registry: &ScenarioRegistry, distance: u32, remote_type: u8) -> Result<String, ResolveError> {
    ScenarioResolver::default().resolve(registry, distance, remote_type)
}
