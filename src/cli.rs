use crate::{grid, io, keogram, render, tec, tools};
/// Functions to handle the command line interface (CLI)
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Filepath of a TEC table (.csv, .h5, .hdf5, .nc, .nc4) or a glob pattern of many files
    #[clap(short, long)]
    filepath: Option<String>,

    /// Output directory. Defaults to the directory of each input file
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Only show a summary of the (processed) data
    #[clap(short, long)]
    info: bool,

    /// Receiver latitude range to keep, e.g. "59,71"
    #[clap(long, allow_hyphen_values = true)]
    lats: Option<String>,

    /// Receiver longitude range to keep, e.g. "19,32"
    #[clap(long, allow_hyphen_values = true)]
    lons: Option<String>,

    /// Detrending method: "savgol" (Savitzky-Golay baseline per pair) or "rolling" (rolling mean per grid cell)
    #[clap(long, default_value = "savgol")]
    detrend: String,

    /// Savitzky-Golay window length in samples
    #[clap(short, long, default_value_t = tec::DEFAULT_WINDOW_LENGTH)]
    window: usize,

    /// Savitzky-Golay polynomial order
    #[clap(long, default_value_t = tec::DEFAULT_POLYORDER)]
    polyorder: usize,

    /// Smooth every arc separately instead of every receiver-satellite pair as a whole
    #[clap(long)]
    smooth_per_arc: bool,

    /// Rolling mean window in samples
    #[clap(long, default_value_t = tec::DEFAULT_ROLLING_WINDOW)]
    rolling_window: usize,

    /// Largest time gap within one arc (e.g. "5 min")
    #[clap(long, default_value = "5 min")]
    gap: String,

    /// Time to remove from both ends of every arc before aggregation (e.g. "15 min")
    #[clap(long, default_value = "15 min")]
    trim: String,

    /// Minimum elevation angle in degrees for animations
    #[clap(long, default_value_t = tec::DEFAULT_MIN_ELEVATION, allow_negative_numbers = true)]
    elevation: f64,

    /// Hours of the day to animate as "start,end" (end exclusive)
    #[clap(long, default_value = "6,18")]
    daytime: String,

    /// Smooth receiver-satellite pairs on all cores
    #[clap(long)]
    parallel: bool,

    /// Export the detrended data to a CSV. Defaults to the output directory and input stem +
    /// "_processed.csv"
    #[clap(long)]
    export_processed: Option<Option<PathBuf>>,

    /// Make a keogram at the given longitude
    #[clap(short, long, allow_negative_numbers = true)]
    keogram: Option<Option<f64>>,

    /// Latitude range of the keogram
    #[clap(long, default_value = "57,66", allow_hyphen_values = true)]
    keogram_lats: String,

    /// Latitude resolution of the keogram in degrees
    #[clap(long, default_value_t = keogram::DEFAULT_LAT_RESOLUTION)]
    lat_res: f64,

    /// Time resolution of the keogram (e.g. "5 min")
    #[clap(long, default_value = "5 min")]
    time_res: String,

    /// Render the keogram to a png next to its CSV
    #[clap(short, long)]
    render: bool,

    /// Also render the keogram with missing cells replaced by their time column mean
    #[clap(long)]
    impute: bool,

    /// Export the keogram to a netCDF file next to its CSV
    #[clap(long)]
    export_nc: bool,

    /// Animations to make, separated by commas ("pp", "histo", "grid", "heatmap") or "all" for
    /// the three GIF animations. "heatmap" is an MP4 encoded by ffmpeg
    #[clap(short, long)]
    animate: Option<String>,

    /// Latitude range of the animations
    #[clap(long, default_value = "59,71", allow_hyphen_values = true)]
    anim_lats: String,

    /// Longitude range of the animations
    #[clap(long, default_value = "19,32", allow_hyphen_values = true)]
    anim_lons: String,

    /// Cell size of the "histo" and "grid" animations in degrees
    #[clap(long, default_value_t = render::DEFAULT_RESOLUTION)]
    res: f64,

    /// Interpolation method of the "grid" animation: "linear" or "nearest"
    #[clap(long, default_value = "linear")]
    method: String,

    /// Length of one animation frame (e.g. "5 min")
    #[clap(long, default_value = "5 min")]
    bucket: String,

    /// Make one animation frame per distinct timestamp instead of per bucket
    #[clap(long)]
    blip: bool,

    /// Program used to encode MP4 animations
    #[clap(long, default_value = render::DEFAULT_ENCODER)]
    ffmpeg: PathBuf,

    /// Plot the arcs, smoothing and residuals of a receiver-satellite pair (e.g. "GPSkevo12").
    /// May be repeated or separated by commas
    #[clap(long, value_delimiter = ',')]
    plot_pair: Vec<String>,

    /// Render every keogram CSV in a directory into "og/" and "imp/" subdirectories of the output
    #[clap(long)]
    plot_keograms: Option<PathBuf>,

    /// Suppress progress messages
    #[clap(short, long)]
    pub quiet: bool,
}

enum ParsedArgs {
    Params(Box<tec::RunParams>),
    Error(String),
}

fn parse_optional_range(text: &Option<String>, name: &str) -> Result<Option<(f64, f64)>, String> {
    match text {
        Some(t) => tools::parse_range(t).map(Some).map_err(|e| format!("Error parsing {name}: {e}")),
        None => Ok(None),
    }
}

impl Args {
    fn to_params(&self) -> ParsedArgs {
        let filepaths = match &self.filepath {
            Some(fp) => match glob::glob(fp) {
                Ok(paths) => match paths.collect::<Result<Vec<PathBuf>, glob::GlobError>>() {
                    Ok(p) if p.is_empty() => return ParsedArgs::Error(format!("No files found matching '{fp}'")),
                    Ok(p) => p,
                    Err(e) => return ParsedArgs::Error(format!("Error reading filepath: {e}")),
                },
                Err(e) => return ParsedArgs::Error(format!("Error parsing filepath pattern: {e}")),
            },
            None if self.plot_keograms.is_some() => Vec::new(),
            None => {
                return ParsedArgs::Error(
                    "No filepath given.\nUse the help text (\"-h\" or \"--help\") for assistance.".to_string(),
                )
            }
        };

        let ingest = match (parse_optional_range(&self.lats, "--lats"), parse_optional_range(&self.lons, "--lons")) {
            (Ok(lats), Ok(lons)) => io::IngestParams { lats, lons },
            (Err(e), _) | (_, Err(e)) => return ParsedArgs::Error(e),
        };

        let durations = [("--gap", &self.gap), ("--trim", &self.trim), ("--time-res", &self.time_res), ("--bucket", &self.bucket)]
            .iter()
            .map(|(name, text)| tools::parse_seconds(text).map_err(|e| format!("Error parsing {name}: {e}")))
            .collect::<Result<Vec<f64>, String>>();
        let (gap_seconds, trim_seconds, time_resolution, bucket_seconds) = match durations {
            Ok(d) => (d[0], d[1], d[2], d[3]),
            Err(e) => return ParsedArgs::Error(e),
        };

        let detrend = match self.detrend.trim().to_lowercase().as_str() {
            "savgol" => {
                if self.window == 0 || self.polyorder >= self.window {
                    return ParsedArgs::Error(format!(
                        "The polynomial order ({}) must be lower than the window length ({})",
                        self.polyorder, self.window
                    ));
                }
                tec::Detrend::SavitzkyGolay {
                    window_length: self.window,
                    polyorder: self.polyorder,
                    scope: match self.smooth_per_arc {
                        true => tec::SmoothingScope::Arc,
                        false => tec::SmoothingScope::Pair,
                    },
                }
            }
            "rolling" => tec::Detrend::RollingMean { window: self.rolling_window.max(1) },
            other => return ParsedArgs::Error(format!("Unknown detrending method: '{other}'. Choose 'savgol' or 'rolling'")),
        };

        let daytime = match tools::parse_range(&self.daytime) {
            Ok((start, end)) if start >= 0. && end <= 24. => (start as u32, end as u32),
            Ok(_) => return ParsedArgs::Error(format!("Daytime hours must be within 0 and 24, got '{}'", self.daytime)),
            Err(e) => return ParsedArgs::Error(format!("Error parsing --daytime: {e}")),
        };

        let keogram = match self.keogram {
            Some(longitude) => {
                let lats = match tools::parse_range(&self.keogram_lats) {
                    Ok(l) => l,
                    Err(e) => return ParsedArgs::Error(format!("Error parsing --keogram-lats: {e}")),
                };
                Some(keogram::KeogramParams {
                    longitude: longitude.unwrap_or(keogram::DEFAULT_LONGITUDE),
                    lats,
                    lat_resolution: self.lat_res,
                    time_resolution,
                })
            }
            None => None,
        };

        let animations = match &self.animate {
            Some(text) => match render::AnimationKind::parse_list(text) {
                Ok(kinds) => kinds,
                Err(e) => return ParsedArgs::Error(e),
            },
            None => Vec::new(),
        };
        let (anim_lats, anim_lons) = match (tools::parse_range(&self.anim_lats), tools::parse_range(&self.anim_lons)) {
            (Ok(lats), Ok(lons)) => (lats, lons),
            (Err(e), _) | (_, Err(e)) => return ParsedArgs::Error(format!("Error parsing the animation extent: {e}")),
        };
        let method = match self.method.parse::<grid::Method>() {
            Ok(m) => m,
            Err(e) => return ParsedArgs::Error(e),
        };
        if !(self.res > 0.) {
            return ParsedArgs::Error(format!("The resolution must be positive, got {}", self.res));
        }

        ParsedArgs::Params(Box::new(tec::RunParams {
            filepaths,
            output_dir: self.output.clone(),
            only_info: self.info,
            ingest,
            processing: tec::ProcessingParams {
                detrend,
                gap_seconds,
                trim_seconds,
                daytime,
                min_elevation: self.elevation,
                parallel: self.parallel,
            },
            export_processed: self.export_processed.clone(),
            keogram,
            render_keogram: self.render,
            impute: self.impute,
            export_nc: self.export_nc,
            animations,
            animation: render::AnimationParams {
                lats: anim_lats,
                lons: anim_lons,
                resolution: self.res,
                method,
                bucket_seconds: match self.blip {
                    true => None,
                    false => Some(bucket_seconds.round() as i64),
                },
                encoder: self.ffmpeg.clone(),
                ..Default::default()
            },
            keogram_dir: self.plot_keograms.clone(),
            plot_pairs: self.plot_pair.iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        }))
    }
}

/// Run the main CLI functionality based on the given arguments
///
/// # Arguments
/// - `arguments`: The Args object containing the parsed arguments.
///
/// # Returns
/// The appropriate exit code.
pub fn main(arguments: Args) -> i32 {
    match arguments.to_params() {
        ParsedArgs::Params(params) => match tec::run(*params) {
            Ok(_) => 0,
            Err(e) => error(&format!("{e}"), 1),
        },
        ParsedArgs::Error(message) => error(&message, 1),
    }
}

/// Print an error to /dev/stderr and return an exit code
///
/// # Arguments
/// - `message`: The message to print to /dev/stderr
/// - `code`: The exit code
///
/// # Returns
/// The same exit code that was provided
fn error(message: &str, code: i32) -> i32 {
    eprintln!("{}", message);
    code
}
