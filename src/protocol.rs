//! Command framing for GB/MX series printers.
//!
//! Wire layout: `0x51 0x78 command type len_lo len_hi payload... crc8 0xFF`.

use crate::{CatPrinterError, Result};

/// Frame magic bytes.
pub const MAGIC: [u8; 2] = [0x51, 0x78];

/// Frame terminator.
pub const TERMINATOR: u8 = 0xff;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 0xff;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = 8;

/// Largest possible frame on the wire.
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + MAX_PAYLOAD;

/// BLE service advertised by the printers.
pub const PRINT_SERVICE: uuid::Uuid = uuid::Uuid::from_u128(0x0000_ae30_0000_1000_8000_00805f9b34fb);

/// TX characteristic, host to printer.
pub const TX_CHARACTERISTIC: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_ae01_0000_1000_8000_00805f9b34fb);

/// RX characteristic, printer notifications.
pub const RX_CHARACTERISTIC: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_ae02_0000_1000_8000_00805f9b34fb);

/// Notification sent by the printer when its input buffer is full.
pub const DATA_FLOW_PAUSE: [u8; 9] = [0x51, 0x78, 0xae, 0x01, 0x01, 0x00, 0x10, 0x70, 0xff];

/// Notification sent by the printer when it accepts data again.
pub const DATA_FLOW_RESUME: [u8; 9] = [0x51, 0x78, 0xae, 0x01, 0x01, 0x00, 0x00, 0x00, 0xff];

/// Lattice payload marking the start of a draw sequence.
pub const LATTICE_START: [u8; 11] = [0xaa, 0x55, 0x17, 0x38, 0x44, 0x5f, 0x5f, 0x5f, 0x44, 0x38, 0x2c];

/// Lattice payload marking the end of a draw sequence.
pub const LATTICE_END: [u8; 11] = [0xaa, 0x55, 0x17, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x17];

/// Command bytes understood by the printers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Retract = 0xa0,
    Feed = 0xa1,
    Bitmap = 0xa2,
    GetDeviceState = 0xa3,
    SetDpi = 0xa4,
    Lattice = 0xa6,
    GetDeviceInfo = 0xa8,
    UpdateDevice = 0xa9,
    DataFlow = 0xae,
    SetEnergy = 0xaf,
    SetSpeed = 0xbd,
    ApplyEnergy = 0xbe,
    CompressedBitmap = 0xbf,
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0xa0 => Command::Retract,
            0xa1 => Command::Feed,
            0xa2 => Command::Bitmap,
            0xa3 => Command::GetDeviceState,
            0xa4 => Command::SetDpi,
            0xa6 => Command::Lattice,
            0xa8 => Command::GetDeviceInfo,
            0xa9 => Command::UpdateDevice,
            0xae => Command::DataFlow,
            0xaf => Command::SetEnergy,
            0xbd => Command::SetSpeed,
            0xbe => Command::ApplyEnergy,
            0xbf => Command::CompressedBitmap,
            _ => return None,
        })
    }
}

/// Direction marker carried in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CommandType {
    #[default]
    Transfer = 0,
    Response = 1,
}

/// CRC8 lookup table used for checksum calculation.
#[rustfmt::skip]
const CRC8_TABLE: [u8; 256] = [
    0x00, 0x07, 0x0e, 0x09, 0x1c, 0x1b, 0x12, 0x15, 0x38, 0x3f, 0x36, 0x31, 0x24, 0x23, 0x2a, 0x2d,
    0x70, 0x77, 0x7e, 0x79, 0x6c, 0x6b, 0x62, 0x65, 0x48, 0x4f, 0x46, 0x41, 0x54, 0x53, 0x5a, 0x5d,
    0xe0, 0xe7, 0xee, 0xe9, 0xfc, 0xfb, 0xf2, 0xf5, 0xd8, 0xdf, 0xd6, 0xd1, 0xc4, 0xc3, 0xca, 0xcd,
    0x90, 0x97, 0x9e, 0x99, 0x8c, 0x8b, 0x82, 0x85, 0xa8, 0xaf, 0xa6, 0xa1, 0xb4, 0xb3, 0xba, 0xbd,
    0xc7, 0xc0, 0xc9, 0xce, 0xdb, 0xdc, 0xd5, 0xd2, 0xff, 0xf8, 0xf1, 0xf6, 0xe3, 0xe4, 0xed, 0xea,
    0xb7, 0xb0, 0xb9, 0xbe, 0xab, 0xac, 0xa5, 0xa2, 0x8f, 0x88, 0x81, 0x86, 0x93, 0x94, 0x9d, 0x9a,
    0x27, 0x20, 0x29, 0x2e, 0x3b, 0x3c, 0x35, 0x32, 0x1f, 0x18, 0x11, 0x16, 0x03, 0x04, 0x0d, 0x0a,
    0x57, 0x50, 0x59, 0x5e, 0x4b, 0x4c, 0x45, 0x42, 0x6f, 0x68, 0x61, 0x66, 0x73, 0x74, 0x7d, 0x7a,
    0x89, 0x8e, 0x87, 0x80, 0x95, 0x92, 0x9b, 0x9c, 0xb1, 0xb6, 0xbf, 0xb8, 0xad, 0xaa, 0xa3, 0xa4,
    0xf9, 0xfe, 0xf7, 0xf0, 0xe5, 0xe2, 0xeb, 0xec, 0xc1, 0xc6, 0xcf, 0xc8, 0xdd, 0xda, 0xd3, 0xd4,
    0x69, 0x6e, 0x67, 0x60, 0x75, 0x72, 0x7b, 0x7c, 0x51, 0x56, 0x5f, 0x58, 0x4d, 0x4a, 0x43, 0x44,
    0x19, 0x1e, 0x17, 0x10, 0x05, 0x02, 0x0b, 0x0c, 0x21, 0x26, 0x2f, 0x28, 0x3d, 0x3a, 0x33, 0x34,
    0x4e, 0x49, 0x40, 0x47, 0x52, 0x55, 0x5c, 0x5b, 0x76, 0x71, 0x78, 0x7f, 0x6a, 0x6d, 0x64, 0x63,
    0x3e, 0x39, 0x30, 0x37, 0x22, 0x25, 0x2c, 0x2b, 0x06, 0x01, 0x08, 0x0f, 0x1a, 0x1d, 0x14, 0x13,
    0xae, 0xa9, 0xa0, 0xa7, 0xb2, 0xb5, 0xbc, 0xbb, 0x96, 0x91, 0x98, 0x9f, 0x8a, 0x8d, 0x84, 0x83,
    0xde, 0xd9, 0xd0, 0xd7, 0xc2, 0xc5, 0xcc, 0xcb, 0xe6, 0xe1, 0xe8, 0xef, 0xfa, 0xfd, 0xf4, 0xf3,
];

/// Computes CRC-8 over a byte slice with the printer's lookup table.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &b| CRC8_TABLE[(crc ^ b) as usize])
}

/// Builds one command frame.
///
/// - `command`: command byte
/// - `kind`: transfer or response marker
/// - `payload`: at most 255 bytes
///
/// Returns the frame, `8 + payload.len()` bytes long.
pub fn frame(command: Command, kind: CommandType, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(CatPrinterError::PayloadTooLarge(payload.len()));
    }
    let len = payload.len() as u16;
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.extend_from_slice(&MAGIC);
    out.push(command as u8);
    out.push(kind as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out.push(crc8(payload));
    out.push(TERMINATOR);
    Ok(out)
}

/// Reverse the bit order of a byte.
///
/// PBM rows are MSB-first; the print head wants the leftmost pixel in bit 0.
pub const fn reverse_bits(b: u8) -> u8 {
    b.reverse_bits()
}

/// A frame received from the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub command: u8,
    pub kind: u8,
    pub payload: Vec<u8>,
    pub crc: Option<u8>,
}

impl Notification {
    /// Whether the trailing checksum is present and matches the payload.
    pub fn checksum_ok(&self) -> bool {
        self.crc == Some(crc8(&self.payload))
    }
}

/// Parses a notification frame from the printer.
///
/// - `data`: raw notification bytes
///
/// Returns the decoded frame, or a short reason when it is malformed.
pub fn parse_notification(data: &[u8]) -> std::result::Result<Notification, &'static str> {
    if data.len() < 6 {
        return Err("packet too short");
    }
    if data[..2] != MAGIC {
        return Err("bad preamble");
    }
    let payload_len = u16::from_le_bytes([data[4], data[5]]) as usize;
    if data.len() < 6 + payload_len {
        return Err("not enough bytes for claimed payload length");
    }
    Ok(Notification {
        command: data[2],
        kind: data[3],
        payload: data[6..6 + payload_len].to_vec(),
        crc: data.get(6 + payload_len).copied(),
    })
}

/// Device state byte reported by the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DeviceState(pub u8);

impl DeviceState {
    pub const OUT_OF_PAPER: DeviceState = DeviceState(1 << 0);
    pub const COVER_OPEN: DeviceState = DeviceState(1 << 1);
    pub const OVERHEAT: DeviceState = DeviceState(1 << 2);
    pub const LOW_POWER: DeviceState = DeviceState(1 << 3);
    pub const PAUSE: DeviceState = DeviceState(1 << 4);
    pub const BUSY: DeviceState = DeviceState(0x80);

    const FAULTS: [(DeviceState, &'static str); 4] = [
        (DeviceState::OUT_OF_PAPER, "out of paper"),
        (DeviceState::COVER_OPEN, "cover open"),
        (DeviceState::OVERHEAT, "overheat"),
        (DeviceState::LOW_POWER, "low power"),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: DeviceState) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the fault bits that are set.
    pub fn faults(self) -> Vec<&'static str> {
        Self::FAULTS
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }

    pub fn has_faults(self) -> bool {
        Self::FAULTS.iter().any(|(bit, _)| self.contains(*bit))
    }
}

impl std::ops::BitOr for DeviceState {
    type Output = DeviceState;

    fn bitor(self, rhs: DeviceState) -> DeviceState {
        DeviceState(self.0 | rhs.0)
    }
}

/// Run-length encode a packed line (PBM bit order) for `CompressedBitmap`.
///
/// Each output byte is `colour << 7 | count` with runs of at most 127 pixels.
pub fn run_length_encode(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pixels = line
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |bit| (byte >> bit) & 1));
    let Some(mut last) = pixels.next() else {
        return out;
    };
    let mut count: u8 = 1;
    for px in pixels {
        if px == last && count < 0x7f {
            count += 1;
        } else {
            out.push((last << 7) | count);
            last = px;
            count = 1;
        }
    }
    out.push((last << 7) | count);
    out
}
