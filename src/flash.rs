//! Flash-resident script storage (spec.md §3 "Flash-resident script", §4.7,
//! §6 "Flash layout"). Per spec.md §1 the flash filesystem wrapper itself —
//! erase/program timing, wear-leveling across the two 16 KB sectors, XIP
//! quiescing — is an external collaborator; only the **contract** spec.md
//! §4.7 names is this crate's job: `read_script`/`write_script`/`clear`/
//! `mode`, plus the record layout and boot-selection rule that decide what
//! those calls mean. [`Storage`] is that contract boundary, grounded the
//! same way [`crate::hardware`] turns DAC/ADC/LED access into traits.

use crate::config::{FLASH_NAME_LEN, FLASH_SCRIPT_MAX_LEN, FLASH_SECTOR_LEN};
use crate::error::FlashError;
use heapless::{String, Vec};

const MAGIC_USER: u32 = 0x0A;
const MAGIC_CLEAR: u32 = 0x0C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    User,
    Cleared,
    Default,
}

/// One raw 16 KB sector, as the flash driver would hand it back. Writing
/// requires quiescing the non-writing core per spec.md §6 "Timing
/// contracts" — that handshake is the real driver's job, not this crate's;
/// [`Storage::write_sector`] is documented as already happening on a
/// quiesced core.
pub trait Storage {
    fn read_sector(&self, out: &mut [u8; FLASH_SECTOR_LEN]);
    fn write_sector(&mut self, data: &[u8; FLASH_SECTOR_LEN]) -> Result<(), FlashError>;
    fn erase_sector(&mut self) -> Result<(), FlashError>;
}

/// Decodes/encodes the `[magic:u32][name:32][script:<=16380]` record
/// (spec.md §6) on top of a raw [`Storage`] sector.
pub struct ScriptStore<S: Storage> {
    storage: S,
}

impl<S: Storage> ScriptStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    fn read_raw(&self) -> ([u8; FLASH_SECTOR_LEN], u32) {
        let mut buf = [0u8; FLASH_SECTOR_LEN];
        self.storage.read_sector(&mut buf);
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        (buf, magic)
    }

    /// `mode()`: spec.md §4.7 — `User` if the sector holds a valid
    /// user-written script, `Cleared` if explicitly erased, `Default`
    /// (factory script) for anything else, including a blank/erased chip.
    pub fn mode(&self) -> Mode {
        let (_, magic) = self.read_raw();
        match magic {
            MAGIC_USER => Mode::User,
            MAGIC_CLEAR => Mode::Cleared,
            _ => Mode::Default,
        }
    }

    /// `read_script()`: the bytes to compile at boot, or `None` when no
    /// user script is present (spec.md "boot-time load" falls through to
    /// the built-in default script in that case).
    pub fn read_script(&self, out: &mut Vec<u8, FLASH_SCRIPT_MAX_LEN>) -> Option<String<FLASH_NAME_LEN>> {
        let (buf, magic) = self.read_raw();
        if magic != MAGIC_USER {
            return None;
        }
        let name_bytes = &buf[4..4 + FLASH_NAME_LEN];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(FLASH_NAME_LEN);
        let mut name = String::new();
        let _ = name.push_str(core::str::from_utf8(&name_bytes[..name_len]).unwrap_or(""));

        let script_start = 4 + FLASH_NAME_LEN;
        let script_bytes = &buf[script_start..];
        let script_len = script_bytes.iter().position(|&b| b == 0).unwrap_or(script_bytes.len());
        out.clear();
        let _ = out.extend_from_slice(&script_bytes[..script_len]);
        Some(name)
    }

    /// `write_script(name, bytes)`: persist a user script, replacing
    /// whatever was there. Fails closed (spec.md §7: "in-RAM script still
    /// active" on failure) rather than leaving a half-written record.
    pub fn write_script(&mut self, name: &str, script: &[u8]) -> Result<(), FlashError> {
        if script.len() > FLASH_SCRIPT_MAX_LEN {
            return Err(FlashError::ScriptTooLarge);
        }
        let mut buf = [0u8; FLASH_SECTOR_LEN];
        buf[0..4].copy_from_slice(&MAGIC_USER.to_le_bytes());
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(FLASH_NAME_LEN);
        buf[4..4 + n].copy_from_slice(&name_bytes[..n]);

        let script_start = 4 + FLASH_NAME_LEN;
        buf[script_start..script_start + script.len()].copy_from_slice(script);

        self.storage.erase_sector()?;
        self.storage.write_sector(&buf)
    }

    /// `clear()`: erase the user script and mark the sector `Cleared` so
    /// boot falls back to the built-in default rather than re-reading
    /// whatever garbage an erased-but-unmarked sector would otherwise show.
    pub fn clear(&mut self) -> Result<(), FlashError> {
        let mut buf = [0u8; FLASH_SECTOR_LEN];
        buf[0..4].copy_from_slice(&MAGIC_CLEAR.to_le_bytes());
        self.storage.erase_sector()?;
        self.storage.write_sector(&buf)
    }
}

#[cfg(test)]
pub struct MockFlash {
    sector: [u8; FLASH_SECTOR_LEN],
}

#[cfg(test)]
impl MockFlash {
    pub fn blank() -> Self {
        Self {
            sector: [0xFF; FLASH_SECTOR_LEN],
        }
    }
}

#[cfg(test)]
impl Storage for MockFlash {
    fn read_sector(&self, out: &mut [u8; FLASH_SECTOR_LEN]) {
        out.copy_from_slice(&self.sector);
    }

    fn write_sector(&mut self, data: &[u8; FLASH_SECTOR_LEN]) -> Result<(), FlashError> {
        self.sector.copy_from_slice(data);
        Ok(())
    }

    fn erase_sector(&mut self) -> Result<(), FlashError> {
        self.sector = [0u8; FLASH_SECTOR_LEN];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_chip_reports_default_mode() {
        let store = ScriptStore::new(MockFlash::blank());
        assert_eq!(store.mode(), Mode::Default);
        let mut out = Vec::new();
        assert!(store.read_script(&mut out).is_none());
    }

    #[test]
    fn write_then_read_round_trips_name_and_body() {
        let mut store = ScriptStore::new(MockFlash::blank());
        store.write_script("patch", b"output[1].volts = 3.0").unwrap();
        assert_eq!(store.mode(), Mode::User);
        let mut out = Vec::new();
        let name = store.read_script(&mut out).unwrap();
        assert_eq!(name.as_str(), "patch");
        assert_eq!(out.as_slice(), b"output[1].volts = 3.0");
    }

    #[test]
    fn clear_drops_to_cleared_mode_with_no_script() {
        let mut store = ScriptStore::new(MockFlash::blank());
        store.write_script("patch", b"x").unwrap();
        store.clear().unwrap();
        assert_eq!(store.mode(), Mode::Cleared);
        let mut out = Vec::new();
        assert!(store.read_script(&mut out).is_none());
    }

    #[test]
    fn oversized_script_is_rejected_before_touching_storage() {
        let mut store = ScriptStore::new(MockFlash::blank());
        let huge = [0u8; FLASH_SCRIPT_MAX_LEN + 1];
        assert_eq!(store.write_script("big", &huge), Err(FlashError::ScriptTooLarge));
        assert_eq!(store.mode(), Mode::Default);
    }
}
