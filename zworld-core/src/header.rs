//! zworld scene/room headers.
//!
//! A header is a run of 8-byte commands ending in an END record. There is no
//! length field anywhere, so whether an address points at a header at all is
//! decided by probing for the terminator (see [`HeaderProbe`]).

use log::{debug, warn};

use crate::address::{Address, AddressSpace};
use crate::buffer::{ByteBuffer, FileSpan};
use crate::dma::{DmaOutcome, DmaTable, FileKind};
use crate::exclusion::ExclusionPolicy;
use crate::patchset::PatchHooks;
use crate::{Result, ZworldError};

pub const CMD_ACTOR_LIST: u8 = 0x01;
pub const CMD_ROOM_LIST: u8 = 0x04;
pub const CMD_OBJECT_LIST: u8 = 0x0B;
pub const CMD_TRANSITION_ACTORS: u8 = 0x0E;
pub const CMD_END: u8 = 0x14;
pub const CMD_ALTERNATE_HEADERS: u8 = 0x18;

pub const COMMAND_SIZE: usize = 8;
pub const ACTOR_ENTRY_SIZE: usize = 16;
pub const ROOM_ENTRY_SIZE: usize = 8;

const END_RECORD: [u8; COMMAND_SIZE] = [CMD_END, 0, 0, 0, 0, 0, 0, 0];

/// One decoded header command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AlternateHeaders { address: Address },
    TransitionActors { count: u8, address: Address },
    Actors { count: u8, address: Address },
    Objects { count: u8, address: Address },
    RoomFiles { count: u8, address: Address },
    End,
    Other(u8),
}

impl Command {
    pub fn parse(record: &[u8; COMMAND_SIZE]) -> Command {
        let count = record[1];
        let address = Address(u32::from_be_bytes([record[4], record[5], record[6], record[7]]));
        match record[0] {
            CMD_ALTERNATE_HEADERS => Command::AlternateHeaders { address },
            CMD_TRANSITION_ACTORS => Command::TransitionActors { count, address },
            CMD_ACTOR_LIST => Command::Actors { count, address },
            CMD_OBJECT_LIST => Command::Objects { count, address },
            CMD_ROOM_LIST => Command::RoomFiles { count, address },
            CMD_END => Command::End,
            other => Command::Other(other),
        }
    }
}

/// Which 16-byte list is being compacted; decides where the actor id sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListRole {
    Actors,
    TransitionActors,
}

impl ListRole {
    pub fn id_offset(self) -> usize {
        match self {
            ListRole::Actors => 0,
            ListRole::TransitionActors => 4,
        }
    }
}

/// Heuristic header detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderProbe {
    accept_scene: bool,
    window: usize,
}

impl HeaderProbe {
    /// Scene and room addresses, 0xA0-byte window.
    pub fn scene() -> Self {
        HeaderProbe {
            accept_scene: true,
            window: 0xA0,
        }
    }

    /// Room addresses only, 0x80-byte window.
    pub fn room() -> Self {
        HeaderProbe {
            accept_scene: false,
            window: 0x80,
        }
    }

    pub fn accepts(&self, address: Address) -> bool {
        match address.space() {
            Some(AddressSpace::Room) => true,
            Some(AddressSpace::Scene) => self.accept_scene,
            None => false,
        }
    }

    /// True if an END record sits on an 8-byte stride within the probe
    /// window starting at `address`.
    pub fn is_header(&self, data: &[u8], file: &FileSpan, address: Address) -> bool {
        if !address.is_word_aligned() || !self.accepts(address) {
            return false;
        }
        if file.size < COMMAND_SIZE {
            return false;
        }

        let start = address.offset();
        let end = (start + self.window).min(file.size - COMMAND_SIZE);

        (start..=end).step_by(COMMAND_SIZE).any(|off| {
            file.locate(off, COMMAND_SIZE)
                .ok()
                .and_then(|abs| data.get(abs..abs + COMMAND_SIZE))
                .is_some_and(|record| record == END_RECORD)
        })
    }
}

/// Remove every excluded entry from a dense list of 16-byte records.
///
/// Survivors keep their order, the freed tail is zeroed, and the new count is
/// returned. The whole list must lie inside `file`; otherwise nothing is
/// touched.
pub fn compact_entries(
    buf: &mut ByteBuffer,
    file: &FileSpan,
    list_offset: usize,
    count: u8,
    role: ListRole,
    policy: &ExclusionPolicy,
) -> Result<u8> {
    let original = count as usize;
    let start = file.locate(list_offset, original * ACTOR_ENTRY_SIZE)?;

    let mut live = original;
    let mut i = 0;
    while i < live {
        let entry = start + i * ACTOR_ENTRY_SIZE;
        let id = buf.read_u16(entry + role.id_offset())?;
        if policy.is_excluded(id) {
            let tail = (live - i - 1) * ACTOR_ENTRY_SIZE;
            buf.move_within(entry + ACTOR_ENTRY_SIZE, tail, entry)?;
            live -= 1;
            // Re-examine the entry that slid into slot `i`.
            continue;
        }
        i += 1;
    }

    buf.fill(
        start + live * ACTOR_ENTRY_SIZE,
        (original - live) * ACTOR_ENTRY_SIZE,
        0,
    )?;
    Ok(live as u8)
}

/// Counters collected while walking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub headers: usize,
    pub rooms: usize,
    pub actors_removed: usize,
    pub transition_actors_removed: usize,
    pub dma_added: usize,
    pub dma_updated: usize,
    pub patches_applied: usize,
    pub branch_errors: usize,
}

impl WalkStats {
    pub fn note_dma(&mut self, outcome: DmaOutcome) {
        match outcome {
            DmaOutcome::Added { .. } => self.dma_added += 1,
            DmaOutcome::Updated { .. } => self.dma_updated += 1,
            DmaOutcome::Consistent | DmaOutcome::TableFull => {}
        }
    }
}

/// Recursive header interpreter and patcher.
///
/// Without a dmadata table (a lone scene/room file) room lists are left
/// alone; with one, each listed room is walked and its dmadata entry
/// reconciled.
pub struct HeaderWalker<'a> {
    probe: HeaderProbe,
    policy: &'a ExclusionPolicy,
    hooks: &'a dyn PatchHooks,
    dma: Option<DmaTable>,
    max_depth: usize,
    // (file base, header offset) of every header currently being walked
    active: Vec<(usize, usize)>,
    stats: WalkStats,
}

impl<'a> HeaderWalker<'a> {
    pub fn new(
        probe: HeaderProbe,
        policy: &'a ExclusionPolicy,
        hooks: &'a dyn PatchHooks,
        max_depth: usize,
    ) -> Self {
        HeaderWalker {
            probe,
            policy,
            hooks,
            dma: None,
            max_depth,
            active: Vec::new(),
            stats: WalkStats::default(),
        }
    }

    /// Walk with ROM context: room lists are expanded and reconciled against `dma`.
    pub fn with_rom(mut self, dma: DmaTable) -> Self {
        self.dma = Some(dma);
        self
    }

    pub fn stats(&self) -> WalkStats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut WalkStats {
        &mut self.stats
    }

    pub fn probe(&self) -> HeaderProbe {
        self.probe
    }

    /// Walk and patch the header at `address` inside `file`.
    ///
    /// Returns `NotAHeader` without touching anything if the probe fails.
    /// `file.size` may shrink if a patch hook resizes the file.
    pub fn do_header(
        &mut self,
        buf: &mut ByteBuffer,
        file: &mut FileSpan,
        address: Address,
    ) -> Result<()> {
        if !self.probe.is_header(buf.as_slice(), file, address) {
            return Err(ZworldError::NotAHeader { address });
        }
        if self.active.len() >= self.max_depth {
            return Err(ZworldError::DepthExceeded {
                depth: self.max_depth,
            });
        }
        let key = (file.base, address.offset());
        if self.active.contains(&key) {
            return Err(ZworldError::HeaderCycle { address });
        }

        self.active.push(key);
        let result = self.walk(buf, file, address);
        self.active.pop();
        result
    }

    fn walk(&mut self, buf: &mut ByteBuffer, file: &mut FileSpan, address: Address) -> Result<()> {
        self.stats.headers += 1;
        debug!(
            "header {address} in file {:08X}+{:X} (depth {})",
            file.base,
            file.size,
            self.active.len()
        );

        match self.hooks.on_header(buf, file, self.dma.is_some()) {
            Ok(applied) => self.stats.patches_applied += applied,
            Err(err) => {
                warn!("patch on file {:08X} failed: {err}", file.base);
                self.stats.branch_errors += 1;
            }
        }

        let mut off = address.offset();
        while off + COMMAND_SIZE <= file.size {
            let abs = file.locate(off, COMMAND_SIZE)?;
            let mut record = [0u8; COMMAND_SIZE];
            record.copy_from_slice(buf.bytes(abs, COMMAND_SIZE)?);

            let result = match Command::parse(&record) {
                Command::End => return Ok(()),
                Command::RoomFiles { count, address } => self.room_files(buf, file, count, address),
                Command::Actors { count, address } => {
                    self.compact_list(buf, file, off, count, address, ListRole::Actors)
                }
                Command::TransitionActors { count, address } => {
                    self.compact_list(buf, file, off, count, address, ListRole::TransitionActors)
                }
                Command::AlternateHeaders { address } => self.alternate_headers(buf, file, address),
                // Object lists are left as they are for now.
                Command::Objects { .. } | Command::Other(_) => Ok(()),
            };

            if let Err(err) = result {
                warn!(
                    "file {:08X}: command {:02X} at +{off:X} skipped: {err}",
                    file.base, record[0]
                );
                self.stats.branch_errors += 1;
            }

            off += COMMAND_SIZE;
        }

        Ok(())
    }

    fn compact_list(
        &mut self,
        buf: &mut ByteBuffer,
        file: &FileSpan,
        record_off: usize,
        count: u8,
        address: Address,
        role: ListRole,
    ) -> Result<()> {
        if address.is_null() || count == 0 {
            return Ok(());
        }

        let live = compact_entries(buf, file, address.offset(), count, role, self.policy)?;
        buf.write_u8(file.locate(record_off + 1, 1)?, live)?;

        let removed = (count - live) as usize;
        if removed > 0 {
            debug!(
                "file {:08X}: dropped {removed} of {count} {role:?} at +{:X}",
                file.base,
                address.offset()
            );
        }
        match role {
            ListRole::Actors => self.stats.actors_removed += removed,
            ListRole::TransitionActors => self.stats.transition_actors_removed += removed,
        }
        Ok(())
    }

    fn alternate_headers(
        &mut self,
        buf: &mut ByteBuffer,
        file: &mut FileSpan,
        address: Address,
    ) -> Result<()> {
        if address.is_null() {
            return Ok(());
        }

        let mut off = address.offset();
        while off + 4 <= file.size {
            let alternate = Address(buf.read_u32(file.locate(off, 4)?)?);
            if !alternate.is_null() {
                // Alternate headers share the file they are listed in.
                if let Err(err) = self.do_header(buf, file, alternate) {
                    self.note_child_failure(file, alternate, &err);
                    break;
                }
            }
            off += 4;
        }
        Ok(())
    }

    fn room_files(
        &mut self,
        buf: &mut ByteBuffer,
        file: &FileSpan,
        count: u8,
        address: Address,
    ) -> Result<()> {
        let Some(dma) = self.dma else {
            return Ok(());
        };
        if address.is_null() || count == 0 {
            return Ok(());
        }

        for index in 0..count as usize {
            let entry = file.locate(address.offset() + index * ROOM_ENTRY_SIZE, ROOM_ENTRY_SIZE)?;
            let start = buf.read_u32(entry)?;
            let end = buf.read_u32(entry + 4)?;
            if start == 0 || end < start || end as usize > buf.len() {
                warn!("room {index} at {start:08X}-{end:08X} is not inside the ROM, skipped");
                self.stats.branch_errors += 1;
                continue;
            }

            self.stats.rooms += 1;
            let mut room = FileSpan::new(start as usize, (end - start) as usize);
            let room_start = Address::file_start(AddressSpace::Room);
            if let Err(err) = self.do_header(buf, &mut room, room_start) {
                self.note_child_failure(&room, room_start, &err);
            }

            let new_end = start + room.size as u32;
            let outcome = dma.reconcile(buf, start, new_end, FileKind::Room, index)?;
            self.stats.note_dma(outcome);
            if new_end != end {
                buf.write_u32(entry + 4, new_end)?;
            }
        }
        Ok(())
    }

    pub(crate) fn note_child_failure(
        &mut self,
        file: &FileSpan,
        address: Address,
        err: &ZworldError,
    ) {
        match err {
            ZworldError::NotAHeader { .. } => {
                debug!("file {:08X}: no header at {address}", file.base);
            }
            _ => {
                warn!("file {:08X}: header {address} abandoned: {err}", file.base);
                self.stats.branch_errors += 1;
            }
        }
    }
}
