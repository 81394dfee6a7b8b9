//! Command line tool to exchange the labels of a segmentation volume from an old schema to a new one.

use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, info};

use std::path::PathBuf;
use std::process;

use brainseg::error::Result;
use brainseg::{remap_file_with, LutDirectory, LutParseMode, RemapOptions, RemapSummary};

#[derive(Parser, Debug)]
#[command(author, version, about = "Exchange the labels of a segmentation volume from an old schema to a new schema.")]
struct Args {
    /// Path to the input label volume (.nii, .nii.gz, .mgh or .mgz).
    #[arg(short, long)]
    input: PathBuf,

    /// Path to save the remapped volume to. May be the input path.
    #[arg(short, long)]
    output: PathBuf,

    /// Lookup table of the old label schema, as a path or a schema name.
    #[arg(long)]
    old_txt: String,

    /// Lookup table of the new label schema, as a path or a schema name.
    #[arg(long)]
    new_txt: String,

    /// Perform the remap in-place to save memory.
    #[arg(long)]
    inplace: bool,

    /// Fail on malformed lookup table lines instead of skipping them.
    #[arg(long)]
    strict_lut: bool,

    /// Directory holding the lookup tables of the named schemas.
    #[arg(long, env = "BRAINSEG_LUT_DIR", default_value = ".")]
    lut_dir: PathBuf,
}

fn run(args: &Args) -> Result<RemapSummary> {
    let luts = LutDirectory::new(&args.lut_dir);
    let old_lut = luts.resolve_or_path(&args.old_txt)?;
    let new_lut = luts.resolve_or_path(&args.new_txt)?;

    let options = RemapOptions {
        in_place: args.inplace,
        lut_parse_mode: if args.strict_lut { LutParseMode::Strict } else { LutParseMode::Tolerant },
    };
    remap_file_with(&args.input, old_lut, new_lut, &args.output, &options)
}

fn main() {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("--- Processing: {} ---", args.input.display());

    match run(&args) {
        Ok(_) => println!("Success! Saved to: {}", args.output.display()),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}
