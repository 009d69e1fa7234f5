//! Cartridge header, the first 0xC0 bytes of every ROM.
//!
//! Only used to describe the loaded game in the logs: a ROM with a broken
//! header still runs.

use std::fmt;

const HEADER_SIZE: usize = 0xC0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    TooShort(usize),
    WrongFixedValue(u8),
    Checksum { expected: u8, computed: u8 },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "ROM is {len} bytes, shorter than its header"),
            Self::WrongFixedValue(value) => {
                write!(f, "fixed header byte is 0x{value:02X} instead of 0x96")
            }
            Self::Checksum { expected, computed } => write!(
                f,
                "header complement check is 0x{expected:02X}, computed 0x{computed:02X}"
            ),
        }
    }
}

impl std::error::Error for HeaderError {}

/// Contains the information of the cartridge header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeHeader {
    rom_entry_point: u32,
    game_title: String,
    game_code: String,
    maker_code: String,
    software_version: u8,
    complement_check: u8,
}

impl CartridgeHeader {
    pub fn new(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < HEADER_SIZE {
            return Err(HeaderError::TooShort(data.len()));
        }
        execute_checks(data)?;

        Ok(Self {
            rom_entry_point: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            game_title: into_ascii_str(&data[0xA0..0xAC]),
            game_code: into_ascii_str(&data[0xAC..0xB0]),
            maker_code: into_ascii_str(&data[0xB0..0xB2]),
            software_version: data[0xBC],
            complement_check: data[0xBD],
        })
    }

    /// 32bit ARM branch opcode
    #[must_use]
    pub const fn rom_entry_point(&self) -> u32 {
        self.rom_entry_point
    }

    #[must_use]
    pub fn game_title(&self) -> &str {
        self.game_title.as_str()
    }

    #[must_use]
    pub fn game_code(&self) -> &str {
        self.game_code.as_str()
    }

    #[must_use]
    pub fn maker_code(&self) -> &str {
        self.maker_code.as_str()
    }

    /// Usually 0x00
    #[must_use]
    pub const fn software_version(&self) -> u8 {
        self.software_version
    }

    #[must_use]
    pub const fn complement_check(&self) -> u8 {
        self.complement_check
    }
}

fn execute_checks(data: &[u8]) -> Result<(), HeaderError> {
    if data[0xB2] != 0x96 {
        return Err(HeaderError::WrongFixedValue(data[0xB2]));
    }

    let expected = data[0xBD];
    let computed = complement(&data[0xA0..0xBD]);
    if computed != expected {
        return Err(HeaderError::Checksum { expected, computed });
    }

    Ok(())
}

fn complement(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &item| acc.wrapping_sub(item))
        .wrapping_sub(0x19)
}

/// Header strings are zero padded, non ASCII bytes are replaced.
fn into_ascii_str(data: &[u8]) -> String {
    data.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { char::from(b) } else { '?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header(title: &[u8]) -> Vec<u8> {
        let mut data = vec![0; HEADER_SIZE];
        data[0..4].copy_from_slice(&[0x2E, 0x00, 0x00, 0xEA]);
        data[0xA0..0xA0 + title.len()].copy_from_slice(title);
        data[0xAC..0xB0].copy_from_slice(b"AXVE");
        data[0xB0..0xB2].copy_from_slice(b"01");
        data[0xB2] = 0x96;
        data[0xBD] = complement(&data[0xA0..0xBD]);
        data
    }

    #[test]
    fn parse_valid_header() {
        let header = CartridgeHeader::new(&header(b"POKEMON RUBY")).unwrap();

        assert_eq!(header.game_title(), "POKEMON RUBY");
        assert_eq!(header.game_code(), "AXVE");
        assert_eq!(header.maker_code(), "01");
        assert_eq!(header.rom_entry_point(), 0xEA00_002E);
    }

    #[test]
    fn short_title_is_trimmed() {
        let header = CartridgeHeader::new(&header(b"TEST")).unwrap();
        assert_eq!(header.game_title(), "TEST");
    }

    #[test]
    fn bad_checksum() {
        let mut data = header(b"TEST");
        data[0xBD] = data[0xBD].wrapping_add(1);

        assert!(matches!(CartridgeHeader::new(&data), Err(HeaderError::Checksum { .. })));
    }

    #[test]
    fn bad_fixed_value_and_short_rom() {
        let mut data = header(b"TEST");
        data[0xB2] = 0;

        assert_eq!(CartridgeHeader::new(&data), Err(HeaderError::WrongFixedValue(0)));
        assert_eq!(CartridgeHeader::new(&data[..0x10]), Err(HeaderError::TooShort(0x10)));
    }
}
