use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::dma::DmaTable;
use crate::exclusion::ExclusionPolicy;
use crate::header::HeaderProbe;
use crate::{Result, ZworldError};

pub const SCENE_ENTRY_SIZE: u32 = 0x14;
pub const OBJECT_ENTRY_SIZE: u32 = 0x08;
pub const ACTOR_ENTRY_SIZE: u32 = 0x20;
pub const DMA_ENTRY_SIZE: u32 = 0x10;

// Overlay slots that are empty in the retail game. 0x0003 and 0x0006 are
// unused upstream too, but the mod reuses them, so they stay.
const NTSC_10_EXCLUDED_OVERLAYS: [u16; 40] = [
    0x0001, 0x0005, 0x0017, 0x001A, 0x001F, 0x0022, 0x0031, 0x0036, 0x0053, 0x0073, 0x0074,
    0x0075, 0x0076, 0x0078, 0x0079, 0x007A, 0x007B, 0x007E, 0x007F, 0x0083, 0x00A0, 0x00B2,
    0x00CE, 0x00D8, 0x00EA, 0x00EB, 0x00F2, 0x00F3, 0x00FB, 0x0109, 0x010D, 0x010E, 0x0128,
    0x0129, 0x0134, 0x0154, 0x015D, 0x0161, 0x0180, 0x01AA,
];

/// Absolute byte range `[start, end)` of a fixed-stride table inside the ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRange {
    pub start: u32,
    pub end: u32,
}

impl TableRange {
    pub fn new(start: u32, end: u32) -> Self {
        TableRange { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of whole entries of `stride` bytes.
    pub fn capacity(&self, stride: u32) -> u32 {
        self.len() / stride
    }

    /// Absolute offsets of every entry.
    pub fn entries(&self, stride: u32) -> impl Iterator<Item = usize> {
        let start = self.start as usize;
        (0..self.capacity(stride) as usize).map(move |i| start + i * stride as usize)
    }
}

/// Inclusive range of table indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub first: u32,
    pub last: u32,
}

impl IndexRange {
    pub fn new(first: u32, last: u32) -> Self {
        IndexRange { first, last }
    }

    /// Zero for an inverted range.
    pub fn count(&self) -> u32 {
        self.last
            .checked_sub(self.first)
            .map_or(0, |span| span.saturating_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeVariant {
    /// Accepts scene and room tags, scans 0xA0 bytes.
    Scene,
    /// Accepts only the room tag, scans 0x80 bytes.
    Room,
}

impl ProbeVariant {
    pub fn probe(self) -> HeaderProbe {
        match self {
            ProbeVariant::Scene => HeaderProbe::scene(),
            ProbeVariant::Room => HeaderProbe::room(),
        }
    }
}

fn default_probe() -> ProbeVariant {
    ProbeVariant::Scene
}

fn default_max_header_depth() -> usize {
    16
}

/// Everything that ties the patcher to one ROM revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomProfile {
    pub name: String,
    pub scene_table: TableRange,
    pub object_table: TableRange,
    pub actor_table: TableRange,
    pub dmadata: TableRange,
    /// Number of slots in the actor overlay table.
    pub actor_table_length: u16,
    pub excluded_overlays: Vec<u16>,
    /// Scene-table entries zeroed before patching to make room for custom scenes.
    #[serde(default)]
    pub freed_scene_entries: Option<IndexRange>,
    /// dmadata entries zeroed before patching to make room for custom files.
    #[serde(default)]
    pub freed_dma_entries: Option<IndexRange>,
    #[serde(default = "default_probe")]
    pub probe: ProbeVariant,
    #[serde(default = "default_max_header_depth")]
    pub max_header_depth: usize,
}

impl Default for RomProfile {
    /// NTSC 1.0, the revision Zelda's Birthday was built on.
    fn default() -> Self {
        RomProfile {
            name: "ntsc-1.0".to_string(),
            scene_table: TableRange::new(0x00BA_0BB0, 0x00BA_1448),
            object_table: TableRange::new(0x00B9_E6C8, 0x00B9_F358),
            actor_table: TableRange::new(0x00B8_D440, 0x00B9_0F20),
            dmadata: TableRange::new(0x0001_2F70, 0x0001_9030),
            actor_table_length: 471,
            excluded_overlays: NTSC_10_EXCLUDED_OVERLAYS.to_vec(),
            freed_scene_entries: Some(IndexRange::new(0x0004, 0x0006)),
            freed_dma_entries: Some(IndexRange::new(0x0475, 0x04C6)),
            probe: default_probe(),
            max_header_depth: default_max_header_depth(),
        }
    }
}

impl RomProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let profile: RomProfile = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        let tables = [
            ("scene_table", self.scene_table, SCENE_ENTRY_SIZE),
            ("object_table", self.object_table, OBJECT_ENTRY_SIZE),
            ("actor_table", self.actor_table, ACTOR_ENTRY_SIZE),
            ("dmadata", self.dmadata, DMA_ENTRY_SIZE),
        ];
        for (name, range, stride) in tables {
            if range.start > range.end {
                return Err(ZworldError::Config(format!(
                    "{name}: start 0x{:08X} is past end 0x{:08X}",
                    range.start, range.end
                )));
            }
            if range.len() % stride != 0 {
                return Err(ZworldError::Config(format!(
                    "{name}: length 0x{:X} is not a multiple of the 0x{stride:X}-byte entry size",
                    range.len()
                )));
            }
        }

        let freed = [
            ("freed_scene_entries", self.freed_scene_entries, self.scene_table, SCENE_ENTRY_SIZE),
            ("freed_dma_entries", self.freed_dma_entries, self.dmadata, DMA_ENTRY_SIZE),
        ];
        for (name, indices, table, stride) in freed {
            if let Some(indices) = indices {
                if indices.first > indices.last || indices.last >= table.capacity(stride) {
                    return Err(ZworldError::Config(format!(
                        "{name}: {}..={} does not fit a table of {} entries",
                        indices.first,
                        indices.last,
                        table.capacity(stride)
                    )));
                }
            }
        }

        if self.max_header_depth == 0 {
            return Err(ZworldError::Config(
                "max_header_depth must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn exclusion_policy(&self) -> ExclusionPolicy {
        ExclusionPolicy::new(self.actor_table_length, self.excluded_overlays.iter().copied())
    }

    pub fn dma_table(&self) -> DmaTable {
        DmaTable::new(self.dmadata)
    }

    pub fn header_probe(&self) -> HeaderProbe {
        self.probe.probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        let profile = RomProfile::default();
        profile.validate().unwrap();
        assert_eq!(profile.scene_table.capacity(SCENE_ENTRY_SIZE), 110);
        assert_eq!(profile.actor_table.capacity(ACTOR_ENTRY_SIZE), 471);
        assert_eq!(profile.object_table.capacity(OBJECT_ENTRY_SIZE), 402);
        assert_eq!(profile.dmadata.capacity(DMA_ENTRY_SIZE), 1548);

        let policy = profile.exclusion_policy();
        assert!(policy.is_excluded(0x0001));
        assert!(!policy.is_excluded(0x0003));
        assert!(!policy.is_excluded(0x0006));
    }

    #[test]
    fn index_range_count_is_inclusive_and_never_underflows() {
        assert_eq!(IndexRange::new(0x475, 0x4C6).count(), 0x52);
        assert_eq!(IndexRange::new(4, 4).count(), 1);
        assert_eq!(IndexRange::new(5, 2).count(), 0);
        assert_eq!(IndexRange::new(0, u32::MAX).count(), u32::MAX);
    }

    #[test]
    fn parses_json_with_defaults() {
        let json = r#"{
            "name": "test",
            "scene_table": { "start": 256, "end": 296 },
            "object_table": { "start": 512, "end": 528 },
            "actor_table": { "start": 768, "end": 832 },
            "dmadata": { "start": 1024, "end": 1088 },
            "actor_table_length": 2,
            "excluded_overlays": [1],
            "freed_dma_entries": { "first": 2, "last": 3 }
        }"#;
        let profile = RomProfile::from_json(json).unwrap();
        assert_eq!(profile.probe, ProbeVariant::Scene);
        assert_eq!(profile.max_header_depth, 16);
        assert_eq!(profile.freed_scene_entries, None);
        assert_eq!(profile.freed_dma_entries, Some(IndexRange::new(2, 3)));
    }

    #[test]
    fn rejects_misaligned_tables() {
        let mut profile = RomProfile::default();
        profile.actor_table.end += 4;
        assert!(matches!(profile.validate(), Err(ZworldError::Config(_))));
    }

    #[test]
    fn rejects_freed_range_outside_table() {
        let mut profile = RomProfile::default();
        profile.freed_scene_entries = Some(IndexRange::new(100, 200));
        assert!(profile.validate().is_err());
    }

    #[test]
    fn entries_walks_by_stride() {
        let range = TableRange::new(0x100, 0x128);
        let offsets: Vec<usize> = range.entries(0x14).collect();
        assert_eq!(offsets, vec![0x100, 0x114]);
    }
}
