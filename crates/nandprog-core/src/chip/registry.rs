//! Identifier-to-profile registry

use alloc::vec::Vec;

use super::types::ChipProfile;
use crate::error::{Error, Result};

/// Built-in part table: (vendor, name, READ ID prefix, page size, pages per block, blocks)
///
/// Parts that share their first two ID bytes are told apart by the later
/// ID bytes. Table order decides the rare exact tie.
const BUILTIN: &[(&str, &str, &[u8], u32, u32, u32)] = &[
    ("Samsung", "K9F4G08U0A", &[0xEC, 0xD3, 0x51, 0x95], 2048, 128, 4096),
    ("Samsung", "K9F1G08U0A", &[0xEC, 0xF1, 0x80, 0x15], 2048, 128, 2048),
    ("Samsung", "K9F1G08R0A", &[0xEC, 0xF1, 0x00, 0x15], 2048, 64, 2048),
    ("Samsung", "K9GAG08U0M", &[0xEC, 0xD5], 4096, 256, 8192),
    ("Samsung", "K9T1G08U0M", &[0xEC, 0xF1, 0x00, 0x95], 2048, 128, 1024),
    ("Samsung", "K9F2G08U0M", &[0xEC, 0xDA], 2048, 128, 2048),
    ("Hynix", "HY27US08281A", &[0xAD, 0xF1, 0x80, 0x1D], 2048, 128, 1024),
    ("Hynix", "H27UBG8T2A", &[0xAD, 0xD3], 4096, 256, 8192),
    ("Hynix", "HY27UF082G2B", &[0xAD, 0xF1, 0x00, 0x1D], 2048, 128, 2048),
    ("Hynix", "H27U4G8F2D", &[0xAD, 0xD5, 0x14, 0xB6, 0x44], 4096, 256, 4096),
    ("Hynix", "H27U4G8F2DTR", &[0xAD, 0xD5, 0x14, 0xB6, 0x74], 4096, 256, 4096),
    ("Toshiba", "TC58NVG2S3E", &[0x98, 0xDA], 2048, 128, 2048),
    ("Toshiba", "TC58NVG3S0F", &[0x98, 0xF1], 4096, 256, 4096),
    ("Micron", "MT29F4G08ABA", &[0x2C, 0xDC], 4096, 256, 4096),
    ("Micron", "MT29F8G08ABACA", &[0x2C, 0x68], 4096, 256, 8192),
    ("Intel", "JS29F32G08AAMC1", &[0x89, 0xD3], 4096, 256, 8192),
    ("Intel", "JS29F64G08ACMF3", &[0x89, 0xD7], 4096, 256, 16384),
    ("SanDisk", "SDTNQGAMA-008G", &[0x45, 0xD7], 4096, 256, 8192),
];

/// Lookup table from READ ID bytes to chip profiles
#[derive(Debug, Clone, Default)]
pub struct ChipRegistry {
    profiles: Vec<ChipProfile>,
}

impl ChipRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in part table
    pub fn builtin() -> Self {
        let profiles = BUILTIN
            .iter()
            .map(|&(vendor, name, id, page, ppb, blocks)| {
                ChipProfile::new(vendor, name, id, page, ppb, blocks)
            })
            .collect();
        Self { profiles }
    }

    /// Registry from an explicit list, in priority order
    pub fn from_profiles(profiles: Vec<ChipProfile>) -> Self {
        Self { profiles }
    }

    /// Append profiles after the existing ones
    pub fn extend(&mut self, profiles: impl IntoIterator<Item = ChipProfile>) {
        self.profiles.extend(profiles);
    }

    /// Number of known profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Iterate over profiles in table order
    pub fn iter(&self) -> impl Iterator<Item = &ChipProfile> {
        self.profiles.iter()
    }

    /// Resolve a READ ID response
    ///
    /// The profile with the longest identifier that prefixes `ident` wins.
    /// Among equally long matches the earlier table entry wins. A floating
    /// bus (all 0x00 or all 0xFF) never matches.
    pub fn detect(&self, ident: &[u8]) -> Result<&ChipProfile> {
        if ident.is_empty() || ident.iter().all(|&b| b == 0xFF) || ident.iter().all(|&b| b == 0) {
            return Err(Error::ChipNotDetected);
        }

        let mut best: Option<&ChipProfile> = None;
        for profile in &self.profiles {
            if profile.id.is_empty() || !ident.starts_with(&profile.id) {
                continue;
            }
            if best.map_or(true, |b| profile.id.len() > b.id.len()) {
                best = Some(profile);
            }
        }
        best.ok_or(Error::ChipNotDetected)
    }

    /// Find a profile by name, with or without the vendor prefix
    pub fn select(&self, name: &str) -> Result<&ChipProfile> {
        self.profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name) || p.full_name().eq_ignore_ascii_case(name))
            .ok_or(Error::ChipNotDetected)
    }

    /// Find a profile by its 1-based listing index
    pub fn select_index(&self, index: u16) -> Result<&ChipProfile> {
        (index as usize)
            .checked_sub(1)
            .and_then(|i| self.profiles.get(i))
            .ok_or(Error::ChipNotDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_builtin_table_is_valid() {
        let reg = ChipRegistry::builtin();
        assert_eq!(reg.len(), 18);
        assert!(reg.iter().all(|p| p.is_valid()));
    }

    #[test]
    fn test_detect_every_builtin_profile() {
        let reg = ChipRegistry::builtin();
        for profile in reg.iter() {
            let mut ident = profile.id.clone();
            ident.resize(5, 0x00);
            assert_eq!(reg.detect(&ident).unwrap().name, profile.name);
        }
    }

    #[test]
    fn test_detect_prefers_longest_match() {
        let reg = ChipRegistry::builtin();
        let k9f = reg.detect(&[0xEC, 0xF1, 0x80, 0x15, 0x40]).unwrap();
        assert_eq!(k9f.name, "K9F1G08U0A");
        let k9t = reg.detect(&[0xEC, 0xF1, 0x00, 0x95, 0x40]).unwrap();
        assert_eq!(k9t.name, "K9T1G08U0M");
    }

    #[test]
    fn test_detect_tie_uses_table_order() {
        let reg = ChipRegistry::from_profiles(vec![
            ChipProfile::new("A", "first", &[0x01, 0x02], 2048, 64, 16),
            ChipProfile::new("B", "second", &[0x01, 0x02], 2048, 64, 32),
            ChipProfile::new("C", "short", &[0x01], 2048, 64, 8),
        ]);
        assert_eq!(reg.detect(&[0x01, 0x02, 0x03]).unwrap().name, "first");
        assert_eq!(reg.detect(&[0x01, 0x07]).unwrap().name, "short");
    }

    #[test]
    fn test_detect_not_found() {
        let reg = ChipRegistry::builtin();
        assert_eq!(reg.detect(&[0x12, 0x34, 0x56]), Err(Error::ChipNotDetected));
        assert_eq!(reg.detect(&[0xFF; 5]), Err(Error::ChipNotDetected));
        assert_eq!(reg.detect(&[0x00; 5]), Err(Error::ChipNotDetected));
        assert_eq!(reg.detect(&[]), Err(Error::ChipNotDetected));
    }

    #[test]
    fn test_select() {
        let reg = ChipRegistry::builtin();
        assert_eq!(reg.select("Samsung K9F1G08U0A").unwrap().block_count, 2048);
        assert_eq!(reg.select("tc58nvg2s3e").unwrap().vendor, "Toshiba");
        assert!(reg.select("nonexistent").is_err());
        assert_eq!(reg.select_index(1).unwrap().name, "K9F4G08U0A");
        assert_eq!(reg.select_index(18).unwrap().name, "SDTNQGAMA-008G");
        assert!(reg.select_index(0).is_err());
        assert!(reg.select_index(19).is_err());
    }
}
