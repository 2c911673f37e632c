//! Extract motion vectors from a video file as text.

use av_decoder::AvDecoder;
use clap::*;
use log::*;
use mpegflow::prelude::v1::{Result, *};
use std::ffi::OsString;
use std::process::exit;

const USAGE: &str = "Usage: mpegflow [--raw | [[--grid8x8] [--occupancy]]] videoPath
  --help and -h will output this help message.
  --raw will prevent motion vectors from being arranged in matrices.
  --grid8x8 will force fine 8x8 grid.
  --occupancy will append occupancy matrix after motion vector matrices.
  --quiet will suppress debug output.
";

fn command() -> Command<'static> {
    Command::new("mpegflow")
        .version(crate_version!())
        .author(crate_authors!())
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new("help").long("help").short('h').multiple_occurrences(true))
        .arg(Arg::new("raw").long("raw").multiple_occurrences(true))
        .arg(Arg::new("grid8x8").long("grid8x8").multiple_occurrences(true))
        .arg(Arg::new("occupancy").long("occupancy").multiple_occurrences(true))
        .arg(Arg::new("quiet").long("quiet").short('q').multiple_occurrences(true))
        .arg(Arg::new("video").takes_value(true).multiple_values(true))
}

/// Parse command line arguments into the video path and extraction settings.
///
/// Flags may repeat, and the last of several paths wins. Returns `None` if usage should be
/// printed instead.
fn parse_options<I, T>(args: I) -> Option<(String, ExtractOptions)>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args).ok()?;

    if matches.is_present("help") {
        return None;
    }

    let video = matches.values_of("video")?.last()?.to_string();

    let options = ExtractOptions {
        mode: if matches.is_present("raw") {
            OutputMode::Raw
        } else {
            OutputMode::Arranged
        },
        grid_step: if matches.is_present("grid8x8") {
            GridStep::Fine
        } else {
            GridStep::Coarse
        },
        occupancy: matches.is_present("occupancy"),
        gap_fill: GapFill::Disabled,
        quiet: matches.is_present("quiet"),
    };

    Some((video, options))
}

fn run(video: &str, options: &ExtractOptions) -> Result<()> {
    info!("Opening {}", video);

    let mut decoder = AvDecoder::open(video)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    extract(&mut decoder, options, &mut out)
}

fn main() {
    let (video, options) = match parse_options(std::env::args_os()) {
        Some(parsed) => parsed,
        None => {
            eprint!("{}", USAGE);
            exit(1);
        }
    };

    let filter = if options.quiet { "error" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    av_decoder::set_quiet(options.quiet);

    if let Err(e) = run(&video, &options) {
        eprintln!("Error occurred: {}", e);
        exit(1);
    }
}
