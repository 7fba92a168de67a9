use std::ops::Range;

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref EEPROM_PATTERN: Regex = Regex::new(r"EEPROM_V\w\w\w").unwrap();
    static ref SRAM_PATTERN: Regex = Regex::new(r"SRAM_V\w\w\w").unwrap();
    static ref FLASH_64KB_PATTERN: Regex = Regex::new(r"FLASH_V\w\w\w|FLASH512_V\w\w\w").unwrap();
    static ref FLASH_128KB_PATTERN: Regex = Regex::new(r"FLASH1M_V\w\w\w").unwrap();
}

const HEADER_SIZE: usize = 0xC0;
const SRAM_SIZE: usize = 0x1_0000;

const GAME_TITLE_BYTE_RANGE: Range<usize> = 0x0A0..0x0AC;
const GAME_CODE_BYTE_RANGE: Range<usize> = 0x0AC..0x0B0;
const MAKER_CODE_BYTE_RANGE: Range<usize> = 0x0B0..0x0B2;
const UNIT_CODE_OFFSET: usize = 0x0B3;
const VERSION_OFFSET: usize = 0x0BC;
const CHECKSUM_OFFSET: usize = 0x0BD;

#[derive(Clone, Debug)]
pub struct CartridgeHeader {
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
    pub unit_code: u8,
    pub version: u8,
    pub checksum: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupHint {
    Sram,
    Eeprom,
    Flash64K,
    Flash128K,
    None,
}

// Backup storage is a plain SRAM image regardless of the hint; EEPROM and
// Flash command protocols are not emulated, only detected for the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Backup {
    pub hint: BackupHint,
    pub sram: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Cartridge {
    rom: Vec<u8>,
    header: CartridgeHeader,
    backup: Backup,
}

fn header_string(data: &[u8], range: Range<usize>) -> String {
    data[range]
        .iter()
        .copied()
        .take_while(|byte| *byte != 0)
        .map(char::from)
        .collect()
}

fn detect_backup_hint(data: &[u8]) -> BackupHint {
    if EEPROM_PATTERN.is_match(data) {
        BackupHint::Eeprom
    } else if FLASH_128KB_PATTERN.is_match(data) {
        BackupHint::Flash128K
    } else if FLASH_64KB_PATTERN.is_match(data) {
        BackupHint::Flash64K
    } else if SRAM_PATTERN.is_match(data) {
        BackupHint::Sram
    } else {
        BackupHint::None
    }
}

impl Cartridge {
    pub fn new(data: &[u8]) -> Result<Self> {
        Self::with_backup(data, None)
    }

    pub fn with_backup(data: &[u8], existing_backup: Option<Backup>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(anyhow!(
                "ROM image is {} bytes, smaller than the {} byte cartridge header",
                data.len(),
                HEADER_SIZE
            ));
        }

        let header = CartridgeHeader {
            title: header_string(data, GAME_TITLE_BYTE_RANGE),
            game_code: header_string(data, GAME_CODE_BYTE_RANGE),
            maker_code: header_string(data, MAKER_CODE_BYTE_RANGE),
            unit_code: data[UNIT_CODE_OFFSET],
            version: data[VERSION_OFFSET],
            checksum: data[CHECKSUM_OFFSET],
        };

        log::info!(
            "cartridge: \"{}\" ({}) maker {} v{}",
            header.title,
            header.game_code,
            header.maker_code,
            header.version
        );

        let hint = detect_backup_hint(data);
        log::info!("backup hint: {:?}", hint);

        let backup = match existing_backup {
            Some(existing) if existing.sram.len() == SRAM_SIZE => Backup {
                hint,
                sram: existing.sram,
            },
            Some(_) => return Err(anyhow!("existing backup image has the wrong size")),
            None => Backup {
                hint,
                sram: vec![0; SRAM_SIZE],
            },
        };

        Ok(Self {
            rom: data.to_vec(),
            header,
            backup,
        })
    }

    pub fn header(&self) -> &CartridgeHeader {
        &self.header
    }

    pub fn backup(&self) -> &Backup {
        &self.backup
    }

    pub fn rom_len(&self) -> usize {
        self.rom.len()
    }

    pub fn read_rom_byte(&self, offset: u32) -> u8 {
        self.rom.get(offset as usize).copied().unwrap_or(0)
    }

    pub fn read_rom_halfword(&self, offset: u32) -> u16 {
        let offset = offset as usize;
        match self.rom.get(offset..offset + 2) {
            Some(bytes) => u16::from_le_bytes([bytes[0], bytes[1]]),
            None => 0,
        }
    }

    pub fn read_rom_word(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        match self.rom.get(offset..offset + 4) {
            Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            None => 0,
        }
    }

    pub fn read_sram_byte(&self, offset: u32) -> u8 {
        self.backup.sram[offset as usize % SRAM_SIZE]
    }

    pub fn write_sram_byte(&mut self, value: u8, offset: u32) {
        self.backup.sram[offset as usize % SRAM_SIZE] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn rom_with_header() -> Vec<u8> {
        let mut data = vec![0u8; 0x200];
        data[GAME_TITLE_BYTE_RANGE][..4].copy_from_slice(b"TEST");
        data[GAME_CODE_BYTE_RANGE].copy_from_slice(b"ATST");
        data[MAKER_CODE_BYTE_RANGE].copy_from_slice(b"01");
        data[VERSION_OFFSET] = 3;
        data[CHECKSUM_OFFSET] = 0x5A;
        data
    }

    #[test]
    fn parses_header_fields() {
        let cartridge = Cartridge::new(&rom_with_header()).unwrap();
        let header = cartridge.header();
        assert_eq!(header.title, "TEST");
        assert_eq!(header.game_code, "ATST");
        assert_eq!(header.maker_code, "01");
        assert_eq!(header.version, 3);
        assert_eq!(header.checksum, 0x5A);
    }

    #[test]
    fn rejects_undersized_rom() {
        assert!(Cartridge::new(&[0u8; 0xBF]).is_err());
    }

    #[test]
    fn rom_reads_past_the_end_are_zero() {
        let cartridge = Cartridge::new(&rom_with_header()).unwrap();
        assert_eq!(cartridge.read_rom_byte(0x1FF), 0);
        assert_eq!(cartridge.read_rom_word(0x0100_0000), 0);
    }

    #[test]
    fn detects_backup_build_strings() {
        let mut data = rom_with_header();
        data.extend_from_slice(b"FLASH1M_V102");
        let cartridge = Cartridge::new(&data).unwrap();
        assert_eq!(cartridge.backup().hint, BackupHint::Flash128K);

        let mut data = rom_with_header();
        data.extend_from_slice(b"SRAM_V113");
        let cartridge = Cartridge::new(&data).unwrap();
        assert_eq!(cartridge.backup().hint, BackupHint::Sram);
    }

    #[test]
    fn sram_round_trips() {
        let mut cartridge = Cartridge::new(&rom_with_header()).unwrap();
        cartridge.write_sram_byte(0xAB, 0x1234);
        assert_eq!(cartridge.read_sram_byte(0x1234), 0xAB);
    }
}
