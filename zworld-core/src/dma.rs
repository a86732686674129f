use log::{info, warn};
use std::fmt;

use crate::buffer::ByteBuffer;
use crate::profile::{IndexRange, TableRange, DMA_ENTRY_SIZE};
use crate::Result;

/// What kind of file a dmadata lookup is for; only used in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Scene,
    Room,
    Object,
    Actor,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Scene => "scene",
            FileKind::Room => "room",
            FileKind::Object => "object",
            FileKind::Actor => "actor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaOutcome {
    /// An entry with the same start and end already exists.
    Consistent,
    /// An entry with the same start existed with a different end and was
    /// rewritten. Expected after a file shrinks.
    Updated { previous_end: u32 },
    /// No entry existed; one was written into the first free slot.
    Added { slot: usize },
    /// No entry existed and every slot is taken.
    TableFull,
}

impl DmaOutcome {
    /// True when an existing entry was found (whether or not it needed fixing).
    pub fn is_reconciled(self) -> bool {
        matches!(self, DmaOutcome::Consistent | DmaOutcome::Updated { .. })
    }
}

/// One 16-byte dmadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaEntry {
    pub virtual_start: u32,
    pub virtual_end: u32,
    pub physical_start: u32,
    /// Zero for files stored uncompressed.
    pub physical_end: u32,
}

impl DmaEntry {
    pub fn is_blank(&self) -> bool {
        self.virtual_start == 0
            && self.virtual_end == 0
            && self.physical_start == 0
            && self.physical_end == 0
    }
}

/// The ROM's file-range directory, located by the profile.
#[derive(Debug, Clone, Copy)]
pub struct DmaTable {
    range: TableRange,
}

impl DmaTable {
    pub fn new(range: TableRange) -> Self {
        DmaTable { range }
    }

    pub fn range(&self) -> TableRange {
        self.range
    }

    pub fn capacity(&self) -> usize {
        self.range.capacity(DMA_ENTRY_SIZE) as usize
    }

    fn slot_offset(&self, slot: usize) -> usize {
        self.range.start as usize + slot * DMA_ENTRY_SIZE as usize
    }

    pub fn entry(&self, buf: &ByteBuffer, slot: usize) -> Result<DmaEntry> {
        let off = self.slot_offset(slot);
        Ok(DmaEntry {
            virtual_start: buf.read_u32(off)?,
            virtual_end: buf.read_u32(off + 4)?,
            physical_start: buf.read_u32(off + 8)?,
            physical_end: buf.read_u32(off + 12)?,
        })
    }

    /// Slot of the first entry whose virtual start is `start`.
    pub fn find(&self, buf: &ByteBuffer, start: u32) -> Result<Option<usize>> {
        for slot in 0..self.capacity() {
            if buf.read_u32(self.slot_offset(slot))? == start {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Write `(start, end, start, 0)` into the first all-zero slot.
    pub fn add(&self, buf: &mut ByteBuffer, start: u32, end: u32) -> Result<Option<usize>> {
        for slot in 0..self.capacity() {
            if !self.entry(buf, slot)?.is_blank() {
                continue;
            }

            let off = self.slot_offset(slot);
            buf.write_u32(off, start)?;
            buf.write_u32(off + 4, end)?;
            buf.write_u32(off + 8, start)?;
            info!("added file {start:08x} {end:08x} to dmadata");
            return Ok(Some(slot));
        }
        Ok(None)
    }

    /// Make dmadata agree that the file at `start` ends at `end`.
    ///
    /// `end` must already reflect any resize applied to the file. The table is
    /// the only thing touched here; the file itself is never moved.
    pub fn reconcile(
        &self,
        buf: &mut ByteBuffer,
        start: u32,
        end: u32,
        kind: FileKind,
        index: usize,
    ) -> Result<DmaOutcome> {
        if let Some(slot) = self.find(buf, start)? {
            let off = self.slot_offset(slot);
            let previous_end = buf.read_u32(off + 4)?;
            if previous_end == end {
                return Ok(DmaOutcome::Consistent);
            }

            buf.write_u32(off + 4, end)?;
            info!(
                "updated file {start:08x} {end:08x} in dmadata ({kind} {index} previously ended at {previous_end:08x})"
            );
            return Ok(DmaOutcome::Updated { previous_end });
        }

        match self.add(buf, start, end)? {
            Some(slot) => Ok(DmaOutcome::Added { slot }),
            None => {
                warn!("dmadata is full; {kind} {index} ({start:08x} {end:08x}) has no entry");
                Ok(DmaOutcome::TableFull)
            }
        }
    }

    /// Boolean form of [`DmaTable::reconcile`]: true if the file already had
    /// an entry, false if one had to be created.
    pub fn file_exists(
        &self,
        buf: &mut ByteBuffer,
        start: u32,
        end: u32,
        kind: FileKind,
        index: usize,
    ) -> Result<bool> {
        Ok(self.reconcile(buf, start, end, kind, index)?.is_reconciled())
    }

    /// Zero the entries `indices.first..=indices.last`.
    pub fn free(&self, buf: &mut ByteBuffer, indices: IndexRange) -> Result<()> {
        let stride = DMA_ENTRY_SIZE as usize;
        buf.fill(
            self.slot_offset(indices.first as usize),
            indices.count() as usize * stride,
            0,
        )
    }
}
