/*!
# Range Target Core

Scenario model, wire codec and scenario lookup for the moving range target
controller. Everything in this crate is I/O free apart from the scenario file
helpers in [`storage`].

## Core Types

- [`Command`] - A single catalog operation with its optional parameter
- [`Scenario`] - Named, ordered command list plus optional raw wire bytes
- [`ScenarioRegistry`] - Name-keyed scenario store shared with the dispatcher
- [`ScenarioResolver`] - Distance/remote-type to scenario name lookup

## Modules

- [`catalog`] - Fixed table of device command codes
- [`scenario`] - Scenario and command value types, editing operations
- [`packet`] - Encoding and decoding of the device packet format
- [`registry`] - Scenario storage, auto-scenarios, clone and import helpers
- [`resolver`] - Fallback chain used by automatic dispatch
- [`builtin`] - Scenarios captured from working devices
- [`storage`] - Scenario file format and hex helpers
- [`error`] - Common error types
*/

pub mod builtin;
pub mod catalog;
pub mod error;
pub mod packet;
pub mod registry;
pub mod resolver;
pub mod scenario;
pub mod storage;

// Re-export commonly used types
pub use catalog::CatalogEntry;
pub use error::{CoreError, Result};
pub use packet::PacketError;
pub use registry::{RegistryError, ScenarioRegistry, SharedRegistry};
pub use resolver::{NamingTemplates, ResolveError, ScenarioResolver};
pub use scenario::{Command, CommandParam, Scenario, ScenarioError};
pub use storage::StorageError;

/// Version information for the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// First byte of every scenario packet
    pub const PACKET_START: u8 = 0x7E;

    /// Format version marker following the start byte
    pub const FORMAT_VERSION: u8 = 0x00;

    /// Constant block written after the scenario name
    pub const NAME_TRAILER: [u8; 6] = [0xFD, 0xFD, 0xFD, 0xFD, 0x00, 0x00];

    /// Shortest byte sequence accepted by the decoder
    pub const MIN_PACKET_LEN: usize = 16;

    /// Shortest byte sequence accepted by hex import
    pub const MIN_IMPORT_LEN: usize = 15;

    /// Wake-up sequence written before a scenario packet
    pub const INIT_SEQUENCE: [u8; 2] = [0x7E, 0xAA];

    /// Lowest valid remote (pulse) type
    pub const MIN_REMOTE_TYPE: u8 = 1;

    /// Highest valid remote (pulse) type
    pub const MAX_REMOTE_TYPE: u8 = 6;

    /// Whether a remote type belongs to the fixed catalog of six
    pub fn is_valid_remote_type(remote_type: u8) -> bool {
        (MIN_REMOTE_TYPE..=MAX_REMOTE_TYPE).contains(&remote_type)
    }
}
