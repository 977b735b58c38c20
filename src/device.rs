//! MCU device database.
//!
//! Families are keyed by `device_type`, variants inside a family by
//! `chip_id`. Both lists are scanned in file order and the first exact match
//! wins.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_FLASH_SECTOR_SIZE: u32 = 1024;
const DEFAULT_FLASH_SIZE: u32 = 0xffff;

/// MCU Family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    #[serde(deserialize_with = "parse_number")]
    pub device_type: u8,
    #[serde(deserialize_with = "parse_number")]
    pub flash_sector_size: u32,
    #[serde(default)]
    pub description: String,
    pub variants: Vec<Variant>,
}

/// One chip id within a family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    #[serde(deserialize_with = "parse_number")]
    pub chip_id: u8,
    #[serde(deserialize_with = "parse_number")]
    pub flash_size: u32,
    #[serde(default, deserialize_with = "parse_number")]
    pub eeprom_size: u32,
}

/// Chip attributes resolved for a `(device_type, chip_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chip {
    pub name: String,
    pub chip_id: u8,
    pub device_type: u8,
    pub flash_size: u32,
    pub eeprom_size: u32,
    pub flash_sector_size: u32,
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[0x{:02x}{:02x}]",
            self.name, self.device_type, self.chip_id,
        )
    }
}

impl Chip {
    /// Attributes used when the database has no entry.
    pub fn unknown(chip_id: u8, device_type: u8) -> Self {
        Chip {
            name: "unknown".to_string(),
            chip_id,
            device_type,
            flash_size: DEFAULT_FLASH_SIZE,
            eeprom_size: 0,
            flash_sector_size: DEFAULT_FLASH_SECTOR_SIZE,
        }
    }

    /// RDPR read protection is only meaningful on the CH32 families.
    pub fn supports_code_flash_protect(&self) -> bool {
        [0x14, 0x15, 0x17, 0x18, 0x19, 0x20].contains(&self.device_type)
    }

    /// Sectors needed to cover `size` bytes.
    pub fn sectors_for(&self, size: usize) -> u32 {
        size.div_ceil(self.flash_sector_size as usize) as u32
    }
}

/// Read-only device database, built once by the caller and shared by
/// reference.
#[derive(Debug, Clone)]
pub struct ChipDB {
    families: Vec<Family>,
}

impl ChipDB {
    pub fn load() -> Result<Self> {
        Ok(ChipDB {
            families: vec![
                serde_yaml::from_str(include_str!("../devices/0x10-CH56x.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/0x11-CH55x.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/0x14-CH32F103.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/0x15-CH32V103.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/0x19-CH32V20x.yaml"))?,
                serde_yaml::from_str(include_str!("../devices/0x17-CH32V30x.yaml"))?,
            ],
        })
    }

    pub fn from_families(families: Vec<Family>) -> Self {
        ChipDB { families }
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn find_family(&self, device_type: u8) -> Option<&Family> {
        self.families.iter().find(|f| f.device_type == device_type)
    }

    /// Resolve chip attributes, falling back to [`Chip::unknown`].
    ///
    /// A known family with an unknown chip id still contributes its sector
    /// size.
    pub fn lookup(&self, device_type: u8, chip_id: u8) -> Chip {
        let mut chip = Chip::unknown(chip_id, device_type);

        let Some(family) = self.find_family(device_type) else {
            log::warn!("Device type of 0x{:02x} not found", device_type);
            return chip;
        };
        log::debug!("Find chip family: {}", family.name);
        chip.flash_sector_size = family.flash_sector_size;

        match family.variants.iter().find(|v| v.chip_id == chip_id) {
            Some(variant) => {
                chip.name = variant.name.clone();
                chip.flash_size = variant.flash_size;
                chip.eeprom_size = variant.eeprom_size;
            }
            None => log::warn!(
                "Cannot find chip with id 0x{:02x} device_type 0x{:02x}",
                chip_id,
                device_type
            ),
        }
        chip
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(u64),
    Str(String),
}

/// Accepts plain integers, `0x` hex and `K`/`KB`/`KiB` suffixed sizes.
fn parse_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: TryFrom<u64>,
{
    use serde::de::Error;

    let value = match RawNumber::deserialize(deserializer)? {
        RawNumber::Int(n) => n,
        RawNumber::Str(s) => parse_size(&s)
            .ok_or_else(|| D::Error::custom(format!("error while parsing {:?}", s)))?,
    };
    T::try_from(value).map_err(|_| D::Error::custom(format!("{} out of range", value)))
}

fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    let kib = ["KiB", "KB", "K"]
        .iter()
        .find_map(|suffix| s.strip_suffix(suffix));
    match kib {
        Some(n) => n.trim().parse::<u64>().ok().map(|n| n * 1024),
        None => s.parse().ok(),
    }
}
