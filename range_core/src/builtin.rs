/*!
Scenarios captured from working remotes.

These packets are transmitted verbatim. Some of them carry name length bytes
that do not match the embedded name; the device accepts them as they are, so
they must not be re-encoded.
*/

use crate::scenario::Scenario;

const TEST1: &[u8] = &[
    0x7e, 0x00, 0x01, 0x13, 0x74, 0x65, 0x73, 0x74, 0x31, 0x00, 0xfd, 0xfd, 0xfd, 0xfd, 0x00, 0x00,
    0xff, 0xff, 0x00, 0x00, 0xd8, 0x72, 0x85, 0x00, 0x00, 0x00, 0x01, 0x13, 0xe8, 0x03, 0x15, 0x32,
    0x00, 0x14, 0x2c, 0x01, 0x11, 0x02, 0x03, 0x0a, 0x05, 0x00, 0x04, 0x01, 0x09, 0xca,
];

const TEST1_NO_PARKING: &[u8] = &[
    0x7e, 0x00, 0x01, 0x1b, 0x74, 0x65, 0x73, 0x74, 0x31, 0x20, 0x62, 0x65, 0x7a, 0x20, 0x70, 0x61,
    0x72, 0x6b, 0x00, 0xfd, 0xfd, 0xfd, 0xfd, 0x00, 0x00, 0x00, 0x01, 0x13, 0xe8, 0x03, 0x15, 0x32,
    0x00, 0x14, 0x2c, 0x01, 0x11, 0x02, 0x03, 0x0a, 0x05, 0x00, 0x04, 0x01, 0x15, 0x32, 0x00, 0x14,
    0xc8, 0x00, 0x1c, 0x12, 0x02, 0x55,
];

const TEST5_30M_PARK: &[u8] = &[
    0x7e, 0x00, 0x05, 0x0d, 0x74, 0x65, 0x73, 0x74, 0x35, 0x20, 0x33, 0x30, 0x6d, 0x20, 0x70, 0x61,
    0x72, 0x6b, 0x00, 0xfd, 0xfd, 0xfd, 0xfd, 0x00, 0x00, 0x00, 0x01, 0x13, 0xb8, 0x0b, 0x15, 0x32,
    0x00, 0x14, 0x2c, 0x01, 0x11, 0x02, 0x03, 0x65,
];

const RANGE_3M_PULSE1: &[u8] = &[
    0x7e, 0x00, 0x01, 0x0d, 0x72, 0x61, 0x6e, 0x67, 0x65, 0x20, 0x33, 0x6d, 0x00, 0xfd,
    0xfd, 0xfd, 0xfd, 0x00, 0x00, 0x00, 0xa6, 0x40, 0xa9, 0x00, 0x00, 0x00, 0x01, 0x13, 0x2c, 0x01,
    0x15, 0x32, 0x00, 0x14, 0x2c, 0x01, 0x11, 0x02, 0x03, 0xc1,
];

const RANGE_3M_PULSE5: &[u8] = &[
    0x7e, 0x00, 0x05, 0x0d, 0x72, 0x61, 0x6e, 0x67, 0x65, 0x20, 0x33, 0x6d, 0x00, 0xfd,
    0xfd, 0xfd, 0xfd, 0x55, 0x17, 0x0a, 0x97, 0x47, 0x9a, 0x00, 0x00, 0x00, 0x01, 0x13, 0x2c, 0x01,
    0x15, 0x32, 0x00, 0x14, 0x2c, 0x01, 0x11, 0x02, 0x03, 0x56,
];

/// Registry keys and packets of the captured scenarios
pub const BUILTIN_PACKETS: &[(&str, &[u8])] = &[
    ("test1", TEST1),
    ("test1_bez_park", TEST1_NO_PARKING),
    ("test5_30m_park", TEST5_30M_PARK),
    ("range_3m_pulse1", RANGE_3M_PULSE1),
    ("range_3m_pulse5", RANGE_3M_PULSE5),
];

/// Build scenarios from the captured packets; the remote type comes from the
/// packet header
pub fn builtin_scenarios() -> Vec<Scenario> {
    BUILTIN_PACKETS
        .iter()
        .map(|(name, data)| Scenario::from_raw(*name, data[2], data.to_vec()))
        .collect()
}
