//! Backup chip detection.
//!
//! Games built with the official SDK link a library that embeds an ASCII
//! marker naming the save chip it drives. The ROM is scanned once for the
//! markers and the first one found decides the device.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    None,
    Eeprom,
    Sram,
    /// 64 KB FLASH, marker `FLASH_V`.
    Flash,
    /// 64 KB FLASH, marker `FLASH512_V`.
    Flash512,
    /// 128 KB FLASH, marker `FLASH1M_V`.
    Flash1M,
}

const MARKERS: [(&[u8], BackupKind); 5] = [
    (b"EEPROM_V", BackupKind::Eeprom),
    (b"SRAM_V", BackupKind::Sram),
    (b"FLASH_V", BackupKind::Flash),
    (b"FLASH512_V", BackupKind::Flash512),
    (b"FLASH1M_V", BackupKind::Flash1M),
];

/// Knuth-Morris-Pratt matcher for one marker, fed a byte at a time.
struct Matcher {
    pattern: &'static [u8],
    /// Length of the longest proper border of each pattern prefix.
    failure: Vec<usize>,
    matched: usize,
}

impl Matcher {
    fn new(pattern: &'static [u8]) -> Self {
        let mut failure = vec![0; pattern.len()];
        let mut border = 0;
        for i in 1..pattern.len() {
            while border > 0 && pattern[i] != pattern[border] {
                border = failure[border - 1];
            }
            if pattern[i] == pattern[border] {
                border += 1;
            }
            failure[i] = border;
        }

        Self {
            pattern,
            failure,
            matched: 0,
        }
    }

    /// Returns true when `byte` completes the pattern.
    fn feed(&mut self, byte: u8) -> bool {
        while self.matched > 0 && self.pattern[self.matched] != byte {
            self.matched = self.failure[self.matched - 1];
        }
        if self.pattern[self.matched] == byte {
            self.matched += 1;
        }
        if self.matched == self.pattern.len() {
            self.matched = self.failure[self.matched - 1];
            return true;
        }
        false
    }
}

/// Streams bytes through all marker matchers at once.
pub struct BackupIdScanner {
    matchers: Vec<(Matcher, BackupKind)>,
}

impl Default for BackupIdScanner {
    fn default() -> Self {
        Self {
            matchers: MARKERS
                .iter()
                .map(|&(pattern, kind)| (Matcher::new(pattern), kind))
                .collect(),
        }
    }
}

impl BackupIdScanner {
    /// Feeds one byte, returning the chip whose marker ends here.
    pub fn feed(&mut self, byte: u8) -> Option<BackupKind> {
        let mut found = None;
        for (matcher, kind) in &mut self.matchers {
            if matcher.feed(byte) && found.is_none() {
                found = Some(*kind);
            }
        }
        found
    }
}

/// Detects the backup chip of `rom`, the earliest marker winning.
#[must_use]
pub fn detect(rom: &[u8]) -> BackupKind {
    let mut scanner = BackupIdScanner::default();
    let kind = rom
        .iter()
        .find_map(|&byte| scanner.feed(byte))
        .unwrap_or(BackupKind::None);

    tracing::info!("backup chip: {kind:?}");
    kind
}
