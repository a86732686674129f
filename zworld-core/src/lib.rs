use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod address;
pub mod buffer;
pub mod checksum;
pub mod dma;
pub mod exclusion;
pub mod header;
pub mod patchset;
pub mod profile;
pub mod rom;

pub use address::{Address, AddressSpace};
pub use buffer::{ByteBuffer, FileSpan};
pub use checksum::Cic;
pub use dma::{DmaOutcome, DmaTable, FileKind};
pub use exclusion::ExclusionPolicy;
pub use header::{HeaderProbe, HeaderWalker, WalkStats};
pub use patchset::{NoPatches, PatchHooks, PatchSet};
pub use profile::RomProfile;
pub use rom::{RomPatcher, RomReport};

#[derive(Debug, Error)]
pub enum ZworldError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to open or read input file '{}': {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output file '{}': {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no header at {address}")]
    NotAHeader { address: Address },
    #[error("{len} bytes at 0x{offset:X} do not fit in 0x{size:X} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },
    #[error("headers nested deeper than {depth}")]
    DepthExceeded { depth: usize },
    #[error("header {address} is already being walked")]
    HeaderCycle { address: Address },
    #[error("payload for patch '{name}' was not loaded")]
    UnresolvedPayload { name: String },
}

pub type Result<T> = std::result::Result<T, ZworldError>;

#[derive(Debug, Clone)]
pub struct PatchSettings {
    pub input_path: PathBuf,
    /// Defaults to overwriting the input.
    pub output_path: Option<PathBuf>,
    /// JSON ROM profile; the built-in NTSC 1.0 profile when absent.
    pub profile_path: Option<PathBuf>,
    /// JSON patch manifest; no release patches when absent.
    pub patches_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A lone scene or room file with a header at offset 0.
    SceneOrRoom,
    Rom,
    /// Neither; written back unchanged.
    Unrecognised,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReport {
    pub kind: InputKind,
    pub walk: WalkStats,
    pub scenes: usize,
    pub objects: usize,
    pub actors: usize,
    pub cic: Option<Cic>,
    pub output_size: usize,
}

impl PatchReport {
    fn new(kind: InputKind, output_size: usize) -> Self {
        PatchReport {
            kind,
            walk: WalkStats::default(),
            scenes: 0,
            objects: 0,
            actors: 0,
            cic: None,
            output_size,
        }
    }
}

pub fn load(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path).map_err(|source| ZworldError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    if data.is_empty() {
        return Err(ZworldError::Load {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "file is empty"),
        });
    }
    Ok(data)
}

pub fn save(path: &Path, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(ZworldError::Save {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "nothing to write"),
        });
    }
    fs::write(path, data).map_err(|source| ZworldError::Save {
        path: path.to_path_buf(),
        source,
    })
}

pub fn classify(data: &[u8], profile: &RomProfile) -> InputKind {
    let whole = FileSpan::new(0, data.len());
    if profile
        .header_probe()
        .is_header(data, &whole, Address::file_start(AddressSpace::Room))
    {
        InputKind::SceneOrRoom
    } else if data.len() > profile.scene_table.end as usize {
        InputKind::Rom
    } else {
        InputKind::Unrecognised
    }
}

/// Patch a loaded image in place. A scene/room file may come back shorter.
pub fn patch_image(
    data: &mut Vec<u8>,
    profile: &RomProfile,
    hooks: &dyn PatchHooks,
) -> Result<PatchReport> {
    match classify(data, profile) {
        InputKind::SceneOrRoom => {
            let policy = profile.exclusion_policy();
            let mut walker =
                HeaderWalker::new(profile.header_probe(), &policy, hooks, profile.max_header_depth);
            let mut file = FileSpan::new(0, data.len());
            walker.do_header(
                &mut ByteBuffer::new(data),
                &mut file,
                Address::file_start(AddressSpace::Room),
            )?;
            data.truncate(file.size);

            let mut report = PatchReport::new(InputKind::SceneOrRoom, data.len());
            report.walk = walker.stats();
            Ok(report)
        }
        InputKind::Rom => {
            let rom = RomPatcher::new(profile, hooks).patch(data)?;
            Ok(PatchReport {
                kind: InputKind::Rom,
                walk: rom.walk,
                scenes: rom.scenes,
                objects: rom.objects,
                actors: rom.actors,
                cic: rom.cic,
                output_size: data.len(),
            })
        }
        InputKind::Unrecognised => {
            warn!(
                "input is neither a scene/room file nor a ROM matching profile '{}'; left unchanged",
                profile.name
            );
            Ok(PatchReport::new(InputKind::Unrecognised, data.len()))
        }
    }
}

fn log_summary(report: &PatchReport) {
    let walk = &report.walk;
    info!(
        "{:?}: {} headers, {} rooms, removed {} actors and {} transition actors",
        report.kind, walk.headers, walk.rooms, walk.actors_removed, walk.transition_actors_removed
    );
    if report.kind == InputKind::Rom {
        info!(
            "{} scenes, {} objects, {} actors checked; dmadata: {} added, {} updated; {} patches applied",
            report.scenes,
            report.objects,
            report.actors,
            walk.dma_added,
            walk.dma_updated,
            walk.patches_applied
        );
    }
    if walk.branch_errors > 0 {
        warn!("{} branches were skipped, see warnings above", walk.branch_errors);
    }
}

pub fn run(settings: &PatchSettings) -> Result<PatchReport> {
    let profile = match &settings.profile_path {
        Some(path) => RomProfile::load(path)?,
        None => RomProfile::default(),
    };
    let patches = match &settings.patches_path {
        Some(path) => PatchSet::load(path)?,
        None => PatchSet::default(),
    };

    let mut data = load(&settings.input_path)?;
    info!(
        "loaded {} (0x{:X} bytes), profile '{}'",
        settings.input_path.display(),
        data.len(),
        profile.name
    );

    let report = patch_image(&mut data, &profile, &patches)?;
    log_summary(&report);

    let output = settings.output_path.as_deref().unwrap_or(&settings.input_path);
    save(output, &data)?;
    info!("wrote {} (0x{:X} bytes)", output.display(), data.len());
    Ok(report)
}
