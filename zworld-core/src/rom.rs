use log::{debug, info, warn};

use crate::address::{Address, AddressSpace};
use crate::buffer::{ByteBuffer, FileSpan};
use crate::checksum::{self, Cic};
use crate::dma::{DmaTable, FileKind};
use crate::header::{HeaderProbe, HeaderWalker, WalkStats};
use crate::patchset::{PatchHooks, TableKind};
use crate::profile::{RomProfile, ACTOR_ENTRY_SIZE, OBJECT_ENTRY_SIZE, SCENE_ENTRY_SIZE};
use crate::{Result, ZworldError};

/// What a whole-ROM pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RomReport {
    pub walk: WalkStats,
    pub scenes: usize,
    pub objects: usize,
    pub actors: usize,
    /// Boot chip the checksum was recomputed for, if it was recognised.
    pub cic: Option<Cic>,
}

/// Table entries with no file behind them are skipped, never reported.
fn is_live_range(start: u32, end: u32, rom_len: usize) -> bool {
    start != 0 && end >= start && (start as usize) < rom_len
}

/// Drives a full patch over a ROM image laid out as `profile` describes.
pub struct RomPatcher<'a> {
    profile: &'a RomProfile,
    hooks: &'a dyn PatchHooks,
}

impl<'a> RomPatcher<'a> {
    pub fn new(profile: &'a RomProfile, hooks: &'a dyn PatchHooks) -> Self {
        RomPatcher { profile, hooks }
    }

    /// Run the whole pass. Scene tables are always walked with the scene
    /// probe; the profile's probe variant only governs lone files.
    pub fn patch(&self, rom: &mut [u8]) -> Result<RomReport> {
        self.profile.validate()?;
        self.check_layout(rom.len())?;

        let policy = self.profile.exclusion_policy();
        let dma = self.profile.dma_table();
        let mut walker = HeaderWalker::new(
            HeaderProbe::scene(),
            &policy,
            self.hooks,
            self.profile.max_header_depth,
        )
        .with_rom(dma);
        let mut report = RomReport::default();

        {
            let mut buf = ByteBuffer::new(rom);
            self.free_reserved(&mut buf, &dma)?;
            report.scenes = self.patch_scenes(&mut buf, &mut walker, &dma)?;
            report.objects =
                self.patch_table_files(&mut buf, &mut walker, &dma, TableKind::Object)?;
            report.actors =
                self.patch_table_files(&mut buf, &mut walker, &dma, TableKind::Actor)?;

            match self.hooks.on_rom_finished(&mut buf) {
                Ok(applied) => walker.stats_mut().patches_applied += applied,
                Err(err) => {
                    warn!("ROM patches failed: {err}");
                    walker.stats_mut().branch_errors += 1;
                }
            }
        }

        report.walk = walker.stats();
        report.cic = checksum::recompute(rom);
        match report.cic {
            Some(cic) => info!("checksum updated for {cic:?}"),
            None => warn!("unrecognised bootcode, checksum left as is"),
        }
        Ok(report)
    }

    fn check_layout(&self, rom_len: usize) -> Result<()> {
        let tables = [
            ("scene table", self.profile.scene_table),
            ("object table", self.profile.object_table),
            ("actor table", self.profile.actor_table),
            ("dmadata", self.profile.dmadata),
        ];
        for (name, range) in tables {
            if range.end as usize > rom_len {
                return Err(ZworldError::Config(format!(
                    "{name} of profile '{}' ends at 0x{:08X}, past the end of a 0x{rom_len:X}-byte ROM",
                    self.profile.name, range.end
                )));
            }
        }
        Ok(())
    }

    fn free_reserved(&self, buf: &mut ByteBuffer, dma: &DmaTable) -> Result<()> {
        if let Some(indices) = self.profile.freed_dma_entries {
            dma.free(buf, indices)?;
            debug!("freed dmadata entries {:#X}..={:#X}", indices.first, indices.last);
        }
        if let Some(indices) = self.profile.freed_scene_entries {
            let stride = SCENE_ENTRY_SIZE as usize;
            buf.fill(
                self.profile.scene_table.start as usize + indices.first as usize * stride,
                indices.count() as usize * stride,
                0,
            )?;
            debug!("freed scene table entries {}..={}", indices.first, indices.last);
        }
        Ok(())
    }

    fn patch_scenes(
        &self,
        buf: &mut ByteBuffer,
        walker: &mut HeaderWalker,
        dma: &DmaTable,
    ) -> Result<usize> {
        let mut scenes = 0;
        for (index, entry) in self.profile.scene_table.entries(SCENE_ENTRY_SIZE).enumerate() {
            let start = buf.read_u32(entry)?;
            let end = buf.read_u32(entry + 4)?;
            if !is_live_range(start, end, buf.len()) {
                continue;
            }
            if end as usize > buf.len() {
                warn!("scene {index} ({start:08X}-{end:08X}) runs past the ROM, skipped");
                walker.stats_mut().branch_errors += 1;
                continue;
            }

            scenes += 1;
            let mut scene = FileSpan::new(start as usize, (end - start) as usize);
            let address = Address::file_start(AddressSpace::Scene);
            if let Err(err) = walker.do_header(buf, &mut scene, address) {
                walker.note_child_failure(&scene, address, &err);
            }

            let new_end = start + scene.size as u32;
            let outcome = dma.reconcile(buf, start, new_end, FileKind::Scene, index)?;
            walker.stats_mut().note_dma(outcome);
            buf.write_u32(entry + 4, new_end)?;
        }
        Ok(scenes)
    }

    fn patch_table_files(
        &self,
        buf: &mut ByteBuffer,
        walker: &mut HeaderWalker,
        dma: &DmaTable,
        table: TableKind,
    ) -> Result<usize> {
        let (range, stride, kind) = match table {
            TableKind::Object => (self.profile.object_table, OBJECT_ENTRY_SIZE, FileKind::Object),
            TableKind::Actor => (self.profile.actor_table, ACTOR_ENTRY_SIZE, FileKind::Actor),
        };

        let mut files = 0;
        for (index, entry) in range.entries(stride).enumerate() {
            let start = buf.read_u32(entry)?;
            let end = buf.read_u32(entry + 4)?;
            if !is_live_range(start, end, buf.len()) {
                continue;
            }
            if end as usize > buf.len() {
                warn!("{kind} {index} ({start:08X}-{end:08X}) runs past the ROM, skipped");
                walker.stats_mut().branch_errors += 1;
                continue;
            }

            files += 1;
            let mut file = FileSpan::new(start as usize, (end - start) as usize);
            match self.hooks.on_table_entry(buf, table, index, entry, &mut file) {
                Ok(applied) => walker.stats_mut().patches_applied += applied,
                Err(err) => {
                    warn!("patch on {kind} {index} failed: {err}");
                    walker.stats_mut().branch_errors += 1;
                }
            }

            let new_end = start + file.size as u32;
            let outcome = dma.reconcile(buf, start, new_end, kind, index)?;
            walker.stats_mut().note_dma(outcome);
            buf.write_u32(entry, start)?;
            buf.write_u32(entry + 4, new_end)?;
        }
        Ok(files)
    }
}
