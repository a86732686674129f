use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;

use zworld_core::{run, PatchSettings};

#[derive(Debug, Parser)]
#[command(
    name = "zworld-fixer",
    version,
    about = "Strip unsupported actors from zworld scene/room files and ROMs"
)]
struct Args {
    /// Scene/room file or full ROM image.
    input: PathBuf,

    /// Where to write the result. Overwrites INPUT when omitted.
    output: Option<PathBuf>,

    /// ROM profile (JSON) with table offsets and the exclusion list.
    #[arg(long, value_name = "JSON")]
    profile: Option<PathBuf>,

    /// Patch manifest (JSON) applied while walking.
    #[arg(long, value_name = "JSON")]
    patches: Option<PathBuf>,

    /// More logging; repeat for trace output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn level(args: &Args) -> LevelFilter {
    if args.quiet {
        return LevelFilter::Warn;
    }
    match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn setup_logger(level: LevelFilter) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {:<5} {}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = setup_logger(level(&args)) {
        eprintln!("Error: failed to set up logging: {err}");
        std::process::exit(1);
    }
    info!("zworld-fixer {}", env!("CARGO_PKG_VERSION"));

    let settings = PatchSettings {
        input_path: args.input,
        output_path: args.output,
        profile_path: args.profile,
        patches_path: args.patches,
    };

    if let Err(err) = run(&settings) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
