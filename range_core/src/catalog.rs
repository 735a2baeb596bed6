/*!
Device command catalog.

Codes are opaque 16-bit identifiers defined by the target firmware. Four of
them carry one extra 16-bit parameter on the wire.
*/

/// Raw command codes as used by the firmware
pub mod codes {
    pub const EDGE_POSITION: u16 = 0x1102;
    pub const ENEMY_POSITION: u16 = 0x1112;
    pub const LIGHT_ON: u16 = 0x090A;
    pub const LIGHT_OFF: u16 = 0x0A0A;
    pub const OOP_SIMULATION_ON: u16 = 0x0100;
    pub const OOP_SIMULATION_OFF: u16 = 0x0200;
    pub const HIT_LIGHT_ON: u16 = 0x0300;
    pub const HIT_LIGHT_OFF: u16 = 0x0400;
    pub const PARKING: u16 = 0x0401;
    pub const MOVE_TO_RANGE: u16 = 0x030A;
    pub const MOVE_TO_SHOOTER: u16 = 0x1213;
    pub const MANUAL_FEED_OFF: u16 = 0x1619;
    pub const ENCODER: u16 = 0xBE00;
    pub const PAUSE: u16 = 0x0500;
    pub const SET_RANGE: u16 = 0x1300;
    pub const SAFE_ZONE: u16 = 0x1400;
    pub const SET_SPEED: u16 = 0x1500;
}

/// One named device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Lookup key, e.g. `set-range`
    pub key: &'static str,
    pub code: u16,
    pub description: &'static str,
    /// Label of the trailing parameter, if the command takes one
    pub param_label: Option<&'static str>,
}

impl CatalogEntry {
    /// Check if this command is followed by a parameter word
    pub fn has_param(&self) -> bool {
        self.param_label.is_some()
    }
}

const fn entry(key: &'static str, code: u16, description: &'static str) -> CatalogEntry {
    CatalogEntry { key, code, description, param_label: None }
}

const fn param_entry(
    key: &'static str,
    code: u16,
    description: &'static str,
    param_label: &'static str,
) -> CatalogEntry {
    CatalogEntry { key, code, description, param_label: Some(param_label) }
}

/// The closed set of commands understood by the target
pub const CATALOG: &[CatalogEntry] = &[
    entry("edge-position", codes::EDGE_POSITION, "Rotate target edge-on"),
    entry("enemy-position", codes::ENEMY_POSITION, "Rotate target to enemy face"),
    entry("light-on", codes::LIGHT_ON, "Target illumination on"),
    entry("light-off", codes::LIGHT_OFF, "Target illumination off"),
    entry("oop-simulation-on", codes::OOP_SIMULATION_ON, "Return fire simulation on"),
    entry("oop-simulation-off", codes::OOP_SIMULATION_OFF, "Return fire simulation off"),
    entry("hit-light-on", codes::HIT_LIGHT_ON, "Hit indication light on"),
    entry("hit-light-off", codes::HIT_LIGHT_OFF, "Hit indication light off"),
    entry("parking", codes::PARKING, "Park carriage"),
    entry("move-to-range", codes::MOVE_TO_RANGE, "Start moving toward the firing line"),
    entry("move-to-shooter", codes::MOVE_TO_SHOOTER, "Start moving toward the shooter"),
    entry("manual-feed-off", codes::MANUAL_FEED_OFF, "Manual feed off"),
    entry("encoder", codes::ENCODER, "Encoder"),
    param_entry("pause", codes::PAUSE, "Pause", "duration (s)"),
    param_entry("set-range", codes::SET_RANGE, "Set range", "range (cm)"),
    param_entry("safe-zone", codes::SAFE_ZONE, "Safe zone", "safe distance (cm)"),
    param_entry("set-speed", codes::SET_SPEED, "Set speed", "speed"),
];

/// Find the catalog entry for a code
pub fn entry_for_code(code: u16) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|e| e.code == code)
}

/// Find the catalog entry for a key (case-insensitive)
pub fn entry_for_name(name: &str) -> Option<&'static CatalogEntry> {
    let name = name.trim();
    CATALOG.iter().find(|e| e.key.eq_ignore_ascii_case(name))
}

pub fn code_for_name(name: &str) -> Option<u16> {
    entry_for_name(name).map(|e| e.code)
}

pub fn name_for_code(code: u16) -> Option<&'static str> {
    entry_for_code(code).map(|e| e.key)
}

pub fn param_label_for_code(code: u16) -> Option<&'static str> {
    entry_for_code(code).and_then(|e| e.param_label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_both_directions() {
        assert_eq!(code_for_name("set-range"), Some(0x1300));
        assert_eq!(code_for_name("Edge-Position"), Some(0x1102));
        assert_eq!(name_for_code(0x030A), Some("move-to-range"));
        assert_eq!(code_for_name("launch"), None);
        assert_eq!(name_for_code(0xFFFF), None);
    }

    #[test]
    fn test_param_commands() {
        let with_param: Vec<u16> = CATALOG.iter().filter(|e| e.has_param()).map(|e| e.code).collect();
        assert_eq!(with_param, vec![codes::PAUSE, codes::SET_RANGE, codes::SAFE_ZONE, codes::SET_SPEED]);
        assert_eq!(param_label_for_code(codes::SET_RANGE), Some("range (cm)"));
        assert_eq!(param_label_for_code(codes::LIGHT_ON), None);
    }

    #[test]
    fn test_codes_and_keys_are_unique() {
        let codes: HashSet<u16> = CATALOG.iter().map(|e| e.code).collect();
        let keys: HashSet<&str> = CATALOG.iter().map(|e| e.key).collect();
        assert_eq!(codes.len(), CATALOG.len());
        assert_eq!(keys.len(), CATALOG.len());
    }
}
