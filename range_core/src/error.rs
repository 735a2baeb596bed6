/*!
Common error types for the range target core library.
*/

use thiserror::Error;

/// Common result type used throughout the core library
pub type Result<T> = std::result::Result<T, CoreError>;

/// Umbrella error for callers that mix several core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Packet decoding/encoding errors
    #[error("Packet error: {0}")]
    Packet(#[from] crate::packet::PacketError),

    /// Scenario editing errors
    #[error("Scenario error: {0}")]
    Scenario(#[from] crate::scenario::ScenarioError),

    /// Registry lookups and imports
    #[error("Registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    /// No scenario matched a distance/remote lookup
    #[error("Unresolved scenario: {0}")]
    Resolve(#[from] crate::resolver::ResolveError),

    /// Scenario file and hex parsing errors
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

impl CoreError {
    /// Check if this error comes from a malformed packet
    pub fn is_malformed_packet(&self) -> bool {
        matches!(self, Self::Packet(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode, PacketError};

    fn decode_name(data: &[u8]) -> Result<String> {
        Ok(decode(data)?.name)
    }

    #[test]
    fn test_question_mark_conversion() {
        let err = decode_name(&[0x7E]).unwrap_err();
        assert!(err.is_malformed_packet());
        assert!(matches!(err, CoreError::Packet(PacketError::MalformedHeader { len: 1 })));
        assert_eq!(err.to_string(), "Packet error: Malformed packet header (1 bytes)");
    }
}
