/*!
Scenario packet encoding and decoding.

Packet layout:

```text
7E 00 <remote> <name_len+1> <name...> 00 FD FD FD FD 00 00 <remote header> <commands> <xor>
```

Command codes and parameters are little-endian. The checksum covers the
command stream only.

Decoding is best-effort. The format was reverse-engineered from device
captures, so the decoder resynchronises byte by byte over anything it does not
recognise instead of rejecting the packet. The command scan starts right after
the name trailer and therefore walks over the remote header as well; captured
packets depend on that offset.
*/

use crate::catalog;
use crate::protocol::{FORMAT_VERSION, MIN_PACKET_LEN, NAME_TRAILER, PACKET_START};
use crate::scenario::{Command, Scenario};
use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Errors that can occur while decoding or encoding a packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Malformed packet header ({len} bytes)")]
    MalformedHeader { len: usize },

    #[error("Invalid name length {name_len} for a {len}-byte packet")]
    InvalidNameLength { name_len: usize, len: usize },

    #[error("No command data after offset {offset} in a {len}-byte packet")]
    NoCommands { offset: usize, len: usize },

    #[error("Scenario name is {0} bytes long, at most 254 fit in a packet")]
    NameTooLong(usize),
}

const REMOTE_1_HEADER: [u8; 7] = [0x00, 0xA6, 0x40, 0xA9, 0x00, 0x00, 0x00];
const REMOTE_2_HEADER: [u8; 9] = [0x20, 0x00, 0x80, 0x59, 0xD4, 0xB4, 0x00, 0x00, 0x00];
const REMOTE_3_HEADER: [u8; 9] = [0x00, 0x00, 0x00, 0x5D, 0xC6, 0x83, 0x00, 0x00, 0x00];
const REMOTE_4_HEADER: [u8; 9] = [0x00, 0x00, 0x00, 0x6B, 0x47, 0x59, 0x00, 0x00, 0x00];
const REMOTE_5_HEADER: [u8; 9] = [0x55, 0x17, 0x0A, 0x97, 0x47, 0x9A, 0x00, 0x00, 0x00];
// Remote 6 was never captured; it shares the placeholder with unknown types.
const PLACEHOLDER_HEADER: [u8; 9] = [0x00; 9];

/// Per-remote-type header block inserted before the command stream
pub fn variable_header(remote_type: u8) -> &'static [u8] {
    match remote_type {
        1 => &REMOTE_1_HEADER,
        2 => &REMOTE_2_HEADER,
        3 => &REMOTE_3_HEADER,
        4 => &REMOTE_4_HEADER,
        5 => &REMOTE_5_HEADER,
        _ => &PLACEHOLDER_HEADER,
    }
}

/// XOR fold of the command stream
pub fn checksum(stream: &[u8]) -> u8 {
    stream.iter().fold(0, |acc, b| acc ^ b)
}

/// Serialize commands as little-endian code/parameter words
pub fn encode_command_stream(commands: &[Command]) -> BytesMut {
    let len = commands.iter().map(Command::wire_len).sum();
    let mut stream = BytesMut::with_capacity(len);

    for command in commands {
        stream.put_u16_le(command.code);
        if let Some(param) = &command.param {
            stream.put_u16_le(param.value);
        }
    }

    stream
}

/// Encode a scenario into the device packet format.
///
/// Out-of-range remote types get the placeholder header. The only failure is
/// a name too long for the one-byte length field.
pub fn encode(scenario: &Scenario) -> Result<Vec<u8>, PacketError> {
    let name = scenario.name.as_bytes();
    let name_field_len = u8::try_from(name.len() + 1)
        .map_err(|_| PacketError::NameTooLong(name.len()))?;

    let header = variable_header(scenario.remote_type);
    let stream = encode_command_stream(&scenario.commands);

    let mut packet = BytesMut::with_capacity(
        4 + name.len() + 1 + NAME_TRAILER.len() + header.len() + stream.len() + 1,
    );
    packet.put_u8(PACKET_START);
    packet.put_u8(FORMAT_VERSION);
    packet.put_u8(scenario.remote_type);
    packet.put_u8(name_field_len);
    packet.put_slice(name);
    packet.put_u8(0x00);
    packet.put_slice(&NAME_TRAILER);
    packet.put_slice(header);
    packet.put_slice(&stream);
    packet.put_u8(checksum(&stream));

    Ok(packet.to_vec())
}

/// Decode a packet into a scenario.
///
/// The returned scenario has empty `raw_bytes`; callers that need the wire
/// form keep the input themselves.
pub fn decode(data: &[u8]) -> Result<Scenario, PacketError> {
    let len = data.len();
    if len < MIN_PACKET_LEN || data[0] != PACKET_START || data[1] != FORMAT_VERSION {
        return Err(PacketError::MalformedHeader { len });
    }

    let remote_type = data[2];
    let name_len = data[3] as usize;
    // The length byte counts the terminator, so zero cannot be valid.
    if name_len == 0 || 4 + name_len > len {
        return Err(PacketError::InvalidNameLength { name_len, len });
    }

    let name = String::from_utf8_lossy(&data[4..4 + name_len - 1]).into_owned();

    let offset = 4 + name_len + NAME_TRAILER.len();
    if offset >= len {
        return Err(PacketError::NoCommands { offset, len });
    }

    Ok(Scenario::new(name, remote_type).with_commands(scan_commands(data, offset)))
}

/// Walk the command region, resynchronising one byte at a time over
/// unrecognised words. The final (checksum) byte never starts a word.
fn scan_commands(data: &[u8], offset: usize) -> Vec<Command> {
    let len = data.len();
    let mut commands = Vec::new();
    let mut i = offset;

    while i + 1 < len {
        let word = [data[i], data[i + 1]];
        let entry = catalog::entry_for_code(u16::from_le_bytes(word))
            .or_else(|| catalog::entry_for_code(u16::from_be_bytes(word)));

        let Some(entry) = entry else {
            i += 1;
            continue;
        };

        if entry.has_param() && i + 3 < len {
            let value = u16::from_le_bytes([data[i + 2], data[i + 3]]);
            commands.extend(Command::from_code(entry.code, value));
            i += 4;
        } else {
            commands.extend(Command::from_code(entry.code, 0));
            i += 2;
        }
    }

    commands
}
