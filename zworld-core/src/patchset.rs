use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::{ByteBuffer, FileSpan};
use crate::{Result, ZworldError};

/// Points at which release-specific fixes can run.
///
/// The walker and orchestrator stay format-generic; anything tied to one
/// particular mod build goes through these hooks. Each returns how many
/// patches it applied.
pub trait PatchHooks {
    /// Runs on every header visit, before any command is dispatched. `file`
    /// may be shrunk. `in_rom` is false when patching a lone scene/room file.
    fn on_header(
        &self,
        _buf: &mut ByteBuffer,
        _file: &mut FileSpan,
        _in_rom: bool,
    ) -> Result<usize> {
        Ok(0)
    }

    /// Runs for each valid object/actor-table entry before dmadata is
    /// reconciled. `file` may be replaced and resized.
    fn on_table_entry(
        &self,
        _buf: &mut ByteBuffer,
        _table: TableKind,
        _index: usize,
        _entry_offset: usize,
        _file: &mut FileSpan,
    ) -> Result<usize> {
        Ok(0)
    }

    /// Runs once after every table has been processed, before the checksum.
    fn on_rom_finished(&self, _buf: &mut ByteBuffer) -> Result<usize> {
        Ok(0)
    }
}

/// Hooks that do nothing.
pub struct NoPatches;

impl PatchHooks for NoPatches {}

/// Bytes to inject: inline in the manifest, or a file next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Inline(Vec<u8>),
    File { file: PathBuf },
}

impl Payload {
    pub fn bytes(&self, patch: &str) -> Result<&[u8]> {
        match self {
            Payload::Inline(bytes) => Ok(bytes),
            Payload::File { .. } => Err(ZworldError::UnresolvedPayload {
                name: patch.to_string(),
            }),
        }
    }

    fn resolve(&mut self, base_dir: &Path) -> Result<()> {
        if let Payload::File { file } = self {
            let bytes = fs::read(base_dir.join(&*file))?;
            *self = Payload::Inline(bytes);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Object,
    Actor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// Identifies one exact file: its size, where it sits in the ROM, and bytes
/// it must contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub size: u32,
    #[serde(default)]
    pub rom_offset: Option<u32>,
    #[serde(default)]
    pub signature: Vec<Signature>,
}

impl Trigger {
    pub fn matches(&self, buf: &ByteBuffer, file: &FileSpan, in_rom: bool) -> bool {
        if file.size != self.size as usize {
            return false;
        }
        if let Some(rom_offset) = self.rom_offset {
            if !in_rom || file.base != rom_offset as usize {
                return false;
            }
        }
        self.signature.iter().all(|sig| {
            file.locate(sig.offset as usize, sig.bytes.len())
                .and_then(|abs| buf.bytes(abs, sig.bytes.len()))
                .map(|found| found == sig.bytes.as_slice())
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileAction {
    Write { offset: u32, payload: Payload },
    WriteU16 { offset: u32, value: u16 },
    WriteU32 { offset: u32, value: u32 },
    /// Shrink the file's logical size.
    Resize { size: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePatch {
    pub name: String,
    pub trigger: Trigger,
    pub actions: Vec<FileAction>,
}

impl FilePatch {
    /// All-or-nothing: every target is checked, against the file as earlier
    /// actions leave it, before the first byte is written.
    fn apply(&self, buf: &mut ByteBuffer, file: &mut FileSpan) -> Result<()> {
        let mut span = *file;
        let mut writes = Vec::new();
        for action in &self.actions {
            match action {
                FileAction::Write { offset, payload } => {
                    let bytes = payload.bytes(&self.name)?;
                    let abs = span.locate(*offset as usize, bytes.len())?;
                    stage(buf, &mut writes, abs, bytes)?;
                }
                FileAction::WriteU16 { offset, value } => {
                    let abs = span.locate(*offset as usize, 2)?;
                    stage(buf, &mut writes, abs, &value.to_be_bytes())?;
                }
                FileAction::WriteU32 { offset, value } => {
                    let abs = span.locate(*offset as usize, 4)?;
                    stage(buf, &mut writes, abs, &value.to_be_bytes())?;
                }
                FileAction::Resize { size } => {
                    let size = *size as usize;
                    if size > span.size {
                        return Err(ZworldError::Config(format!(
                            "patch '{}' would grow a 0x{:X}-byte file to 0x{size:X}",
                            self.name, span.size
                        )));
                    }
                    span.size = size;
                }
            }
        }

        commit(buf, writes)?;
        *file = span;
        Ok(())
    }
}

/// A write whose target range has already been checked.
struct PendingWrite {
    offset: usize,
    bytes: Vec<u8>,
}

fn stage(
    buf: &ByteBuffer,
    writes: &mut Vec<PendingWrite>,
    offset: usize,
    bytes: &[u8],
) -> Result<()> {
    buf.bytes(offset, bytes.len())?;
    writes.push(PendingWrite {
        offset,
        bytes: bytes.to_vec(),
    });
    Ok(())
}

fn commit(buf: &mut ByteBuffer, writes: Vec<PendingWrite>) -> Result<()> {
    for write in writes {
        buf.write_bytes(write.offset, &write.bytes)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntryAction {
    /// Copy the payload over the start of the file and take its length as
    /// the new file size.
    ReplaceFile { payload: Payload },
    /// Overwrite bytes of the table record itself.
    WriteEntry { offset: u32, payload: Payload },
    WriteFileU16 { offset: u32, value: u16 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePatch {
    pub name: String,
    pub table: TableKind,
    pub index: u32,
    pub actions: Vec<EntryAction>,
}

impl TablePatch {
    /// All-or-nothing, like [`FilePatch`].
    fn apply(
        &self,
        buf: &mut ByteBuffer,
        entry_offset: usize,
        entry_size: usize,
        file: &mut FileSpan,
    ) -> Result<()> {
        let entry = FileSpan::new(entry_offset, entry_size);
        let mut span = *file;
        let mut writes = Vec::new();
        for action in &self.actions {
            match action {
                EntryAction::ReplaceFile { payload } => {
                    let bytes = payload.bytes(&self.name)?;
                    stage(buf, &mut writes, span.base, bytes)?;
                    span.size = bytes.len();
                }
                EntryAction::WriteEntry { offset, payload } => {
                    let bytes = payload.bytes(&self.name)?;
                    let abs = entry.locate(*offset as usize, bytes.len())?;
                    stage(buf, &mut writes, abs, bytes)?;
                }
                EntryAction::WriteFileU16 { offset, value } => {
                    let abs = span.locate(*offset as usize, 2)?;
                    stage(buf, &mut writes, abs, &value.to_be_bytes())?;
                }
            }
        }

        commit(buf, writes)?;
        *file = span;
        Ok(())
    }
}

/// Raw 32-bit words written at an absolute ROM offset (code fixes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomWrite {
    pub name: String,
    pub offset: u32,
    pub words: Vec<u32>,
}

/// A release patch set, normally loaded from a JSON manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchSet {
    #[serde(default)]
    pub files: Vec<FilePatch>,
    #[serde(default)]
    pub tables: Vec<TablePatch>,
    #[serde(default)]
    pub rom_writes: Vec<RomWrite>,
}

impl PatchSet {
    /// Load a manifest and read every file payload it names, relative to the
    /// manifest's own directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut set = Self::from_json(&text)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        set.resolve_payloads(base_dir)?;
        Ok(set)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn resolve_payloads(&mut self, base_dir: &Path) -> Result<()> {
        for patch in &mut self.files {
            for action in &mut patch.actions {
                if let FileAction::Write { payload, .. } = action {
                    payload.resolve(base_dir)?;
                }
            }
        }
        for patch in &mut self.tables {
            for action in &mut patch.actions {
                match action {
                    EntryAction::ReplaceFile { payload }
                    | EntryAction::WriteEntry { payload, .. } => payload.resolve(base_dir)?,
                    EntryAction::WriteFileU16 { .. } => {}
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.tables.is_empty() && self.rom_writes.is_empty()
    }
}

impl PatchHooks for PatchSet {
    fn on_header(
        &self,
        buf: &mut ByteBuffer,
        file: &mut FileSpan,
        in_rom: bool,
    ) -> Result<usize> {
        let mut applied = 0;
        for patch in &self.files {
            // Checked against the file as previous patches left it.
            if patch.trigger.matches(buf, file, in_rom) {
                info!("applying {} patch", patch.name);
                patch.apply(buf, file)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn on_table_entry(
        &self,
        buf: &mut ByteBuffer,
        table: TableKind,
        index: usize,
        entry_offset: usize,
        file: &mut FileSpan,
    ) -> Result<usize> {
        let entry_size = match table {
            TableKind::Object => crate::profile::OBJECT_ENTRY_SIZE,
            TableKind::Actor => crate::profile::ACTOR_ENTRY_SIZE,
        } as usize;

        let mut applied = 0;
        for patch in self
            .tables
            .iter()
            .filter(|p| p.table == table && p.index as usize == index)
        {
            info!("applying {} patch", patch.name);
            patch.apply(buf, entry_offset, entry_size, file)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn on_rom_finished(&self, buf: &mut ByteBuffer) -> Result<usize> {
        let mut writes = Vec::new();
        for write in &self.rom_writes {
            let bytes: Vec<u8> = write.words.iter().flat_map(|w| w.to_be_bytes()).collect();
            stage(buf, &mut writes, write.offset as usize, &bytes)?;
        }

        for write in &self.rom_writes {
            info!("applying {} patch", write.name);
        }
        commit(buf, writes)?;
        Ok(self.rom_writes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shrink_patch() -> FilePatch {
        FilePatch {
            name: "shrink".to_string(),
            trigger: Trigger {
                size: 0x40,
                rom_offset: Some(0x100),
                signature: vec![Signature {
                    offset: 0x10,
                    bytes: vec![0xAA, 0xBB],
                }],
            },
            actions: vec![
                FileAction::Write {
                    offset: 0x20,
                    payload: Payload::Inline(vec![1, 2, 3]),
                },
                FileAction::WriteU32 {
                    offset: 0x04,
                    value: 0x0200_0020,
                },
                FileAction::Resize { size: 0x30 },
            ],
        }
    }

    fn rom_with_signature() -> Vec<u8> {
        let mut data = vec![0u8; 0x200];
        data[0x110] = 0xAA;
        data[0x111] = 0xBB;
        data
    }

    #[test]
    fn trigger_needs_size_offset_and_signature() {
        let patch = shrink_patch();
        let mut data = rom_with_signature();
        let buf = ByteBuffer::new(&mut data);

        assert!(patch.trigger.matches(&buf, &FileSpan::new(0x100, 0x40), true));
        assert!(!patch.trigger.matches(&buf, &FileSpan::new(0x100, 0x40), false));
        assert!(!patch.trigger.matches(&buf, &FileSpan::new(0x100, 0x44), true));
        assert!(!patch.trigger.matches(&buf, &FileSpan::new(0x0F0, 0x40), true));
    }

    #[test]
    fn file_patch_runs_once_and_shrinks() {
        let set = PatchSet {
            files: vec![shrink_patch()],
            ..PatchSet::default()
        };
        let mut data = rom_with_signature();
        let mut buf = ByteBuffer::new(&mut data);
        let mut file = FileSpan::new(0x100, 0x40);

        assert_eq!(set.on_header(&mut buf, &mut file, true).unwrap(), 1);
        assert_eq!(file.size, 0x30);
        // The size no longer matches, so a second visit is a no-op.
        assert_eq!(set.on_header(&mut buf, &mut file, true).unwrap(), 0);

        assert_eq!(&data[0x120..0x123], &[1, 2, 3]);
        assert_eq!(&data[0x104..0x108], &[0x02, 0x00, 0x00, 0x20]);
    }

    #[test]
    fn failing_action_leaves_file_untouched() {
        let set = PatchSet {
            files: vec![FilePatch {
                name: "half".to_string(),
                trigger: Trigger {
                    size: 0x40,
                    rom_offset: None,
                    signature: Vec::new(),
                },
                actions: vec![
                    FileAction::Write {
                        offset: 0x00,
                        payload: Payload::Inline(vec![0xEE; 4]),
                    },
                    FileAction::WriteU32 {
                        offset: 0x3E,
                        value: 0x0200_2FDC,
                    },
                ],
            }],
            ..PatchSet::default()
        };
        let mut data = vec![0u8; 0x200];
        let mut buf = ByteBuffer::new(&mut data);
        let mut file = FileSpan::new(0x100, 0x40);

        assert!(matches!(
            set.on_header(&mut buf, &mut file, false),
            Err(ZworldError::OutOfBounds { .. })
        ));
        assert_eq!(file.size, 0x40);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn writes_are_checked_against_the_resized_file() {
        let patch = FilePatch {
            name: "shrink then write".to_string(),
            trigger: Trigger {
                size: 0x40,
                rom_offset: None,
                signature: Vec::new(),
            },
            actions: vec![
                FileAction::WriteU16 {
                    offset: 0x00,
                    value: 0x1234,
                },
                FileAction::Resize { size: 0x20 },
                FileAction::WriteU16 {
                    offset: 0x30,
                    value: 0x5678,
                },
            ],
        };
        let mut data = vec![0u8; 0x40];
        let mut buf = ByteBuffer::new(&mut data);
        let mut file = FileSpan::new(0, 0x40);

        assert!(patch.apply(&mut buf, &mut file).is_err());
        assert_eq!(file.size, 0x40);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn failing_table_action_leaves_file_and_entry_untouched() {
        let patch = TablePatch {
            name: "bad entry write".to_string(),
            table: TableKind::Actor,
            index: 0,
            actions: vec![
                EntryAction::ReplaceFile {
                    payload: Payload::Inline(vec![0x77; 0x10]),
                },
                EntryAction::WriteEntry {
                    offset: 0x1E,
                    payload: Payload::Inline(vec![1, 2, 3, 4]),
                },
            ],
        };
        let mut data = vec![0u8; 0x200];
        let mut buf = ByteBuffer::new(&mut data);
        let mut file = FileSpan::new(0x100, 0x40);

        assert!(patch.apply(&mut buf, 0x20, 0x20, &mut file).is_err());
        assert_eq!(file.size, 0x40);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn resize_cannot_grow() {
        let patch = FilePatch {
            name: "grow".to_string(),
            trigger: Trigger {
                size: 0x10,
                rom_offset: None,
                signature: Vec::new(),
            },
            actions: vec![FileAction::Resize { size: 0x20 }],
        };
        let mut data = vec![0u8; 0x40];
        let mut buf = ByteBuffer::new(&mut data);
        let mut file = FileSpan::new(0, 0x10);
        assert!(patch.apply(&mut buf, &mut file).is_err());
        assert_eq!(file.size, 0x10);
    }

    #[test]
    fn table_patch_replaces_file_and_entry_fields() {
        let set = PatchSet {
            tables: vec![TablePatch {
                name: "ladder actor".to_string(),
                table: TableKind::Actor,
                index: 2,
                actions: vec![
                    EntryAction::WriteEntry {
                        offset: 8,
                        payload: Payload::Inline(vec![0x80, 0xB9, 0x59, 0xD0]),
                    },
                    EntryAction::ReplaceFile {
                        payload: Payload::Inline(vec![0xEE; 0x10]),
                    },
                    EntryAction::WriteFileU16 {
                        offset: 0x0E,
                        value: 0x013F,
                    },
                ],
            }],
            ..PatchSet::default()
        };
        let mut data = vec![0u8; 0x200];
        let mut buf = ByteBuffer::new(&mut data);
        let mut file = FileSpan::new(0x100, 0x40);

        assert_eq!(
            set.on_table_entry(&mut buf, TableKind::Actor, 1, 0x20, &mut file).unwrap(),
            0
        );
        assert_eq!(
            set.on_table_entry(&mut buf, TableKind::Object, 2, 0x20, &mut file).unwrap(),
            0
        );
        assert_eq!(
            set.on_table_entry(&mut buf, TableKind::Actor, 2, 0x40, &mut file).unwrap(),
            1
        );
        assert_eq!(file.size, 0x10);
        assert_eq!(&data[0x48..0x4C], &[0x80, 0xB9, 0x59, 0xD0]);
        assert_eq!(&data[0x100..0x10E], &[0xEE; 0x0E]);
        assert_eq!(&data[0x10E..0x110], &[0x01, 0x3F]);
        assert_eq!(data[0x110], 0);
    }

    #[test]
    fn rom_writes_are_word_sequences() {
        let set = PatchSet {
            rom_writes: vec![RomWrite {
                name: "asm".to_string(),
                offset: 0x10,
                words: vec![0x3C0E_8016, 0xA600_0210],
            }],
            ..PatchSet::default()
        };
        let mut data = vec![0u8; 0x20];
        let mut buf = ByteBuffer::new(&mut data);
        assert_eq!(set.on_rom_finished(&mut buf).unwrap(), 1);
        assert_eq!(
            &data[0x10..0x18],
            &[0x3C, 0x0E, 0x80, 0x16, 0xA6, 0x00, 0x02, 0x10]
        );
    }

    #[test]
    fn parses_manifest_and_flags_unresolved_files() {
        let json = r#"{
            "files": [{
                "name": "collision",
                "trigger": { "size": 64 },
                "actions": [
                    { "op": "write", "offset": 0, "payload": { "file": "collision.bin" } },
                    { "op": "write", "offset": 8, "payload": [1, 2] },
                    { "op": "resize", "size": 32 }
                ]
            }]
        }"#;
        let set = PatchSet::from_json(json).unwrap();
        assert!(set.tables.is_empty());
        assert!(set.rom_writes.is_empty());

        let mut data = vec![0u8; 0x40];
        let mut buf = ByteBuffer::new(&mut data);
        let mut file = FileSpan::new(0, 0x40);
        assert!(matches!(
            set.on_header(&mut buf, &mut file, false),
            Err(ZworldError::UnresolvedPayload { .. })
        ));
    }

    #[test]
    fn bundled_manifest_parses() {
        let set = PatchSet::from_json(include_str!("../../patches/zeldas-birthday.json")).unwrap();
        assert_eq!(set.files.len(), 1);
        assert_eq!(set.files[0].trigger.size, 0x47E0);
        assert_eq!(set.files[0].trigger.rom_offset, Some(0x0398_6000));
        assert_eq!(set.rom_writes[0].offset, 0x00EA_B540 + 0xD98);
        assert_eq!(set.rom_writes[0].words, vec![0x3C0E_8016, 0xA600_0210]);
        assert_eq!(set.rom_writes[1].words, vec![0x2402_0003]);
    }

    #[test]
    fn resolves_payload_files_next_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("payload.bin"), [9u8, 8, 7]).unwrap();
        let manifest = dir.path().join("patches.json");
        fs::write(
            &manifest,
            r#"{ "tables": [{
                "name": "obj",
                "table": "object",
                "index": 0,
                "actions": [{ "op": "replace_file", "payload": { "file": "payload.bin" } }]
            }] }"#,
        )
        .unwrap();

        let set = PatchSet::load(&manifest).unwrap();
        match &set.tables[0].actions[0] {
            EntryAction::ReplaceFile { payload } => {
                assert_eq!(payload, &Payload::Inline(vec![9, 8, 7]));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }
}
