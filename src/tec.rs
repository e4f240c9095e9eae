use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{NaiveDateTime, Timelike};
use rayon::prelude::*;

use crate::error::{TecError, TecResult};
use crate::{filters, io, keogram, render, tools};

pub const DEFAULT_WINDOW_LENGTH: usize = 60;
pub const DEFAULT_POLYORDER: usize = 1;
pub const DEFAULT_ARC_GAP_SECONDS: f64 = 300.;
pub const DEFAULT_TRIM_SECONDS: f64 = 900.;
pub const DEFAULT_MIN_ELEVATION: f64 = 20.;
pub const DEFAULT_DAYTIME: (u32, u32) = (6, 18);
pub const DEFAULT_ROLLING_WINDOW: usize = 18;

/// One measurement epoch of one (network, receiver, satellite) triple
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub datetime: NaiveDateTime,
    pub gps_site: String,
    pub sat_id: String,
    pub gnss_type: String,
    /// Receiver latitude
    pub gdlatr: f64,
    /// Receiver longitude
    pub gdlonr: f64,
    /// Line-of-sight TEC
    pub los_tec: f64,
    pub tec: f64,
    pub azm: f64,
    /// Elevation angle in degrees
    pub elm: f64,
    /// Pierce point latitude
    pub gdlat: f64,
    /// Pierce point longitude
    pub glon: f64,
}

/// Slant-to-vertical mapping factor of an elevation angle in degrees.
///
/// A factor of zero is not guarded against and gives infinite vertical TEC.
pub fn slant_factor(elevation_deg: f64) -> f64 {
    1. + 16. * (0.53 - elevation_deg / 180.).powi(3)
}

/// Identifier of a receiver-satellite pair: network type, receiver and satellite concatenated
pub fn pair_id(gnss_type: &str, gps_site: &str, sat_id: &str) -> String {
    format!("{gnss_type}{gps_site}{sat_id}")
}

/// An observation with its vertical TEC and pair identifier
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedObservation {
    pub obs: Observation,
    pub slant_f: f64,
    pub vtec: f64,
    pub pair_id: String,
}

impl From<Observation> for DerivedObservation {
    fn from(obs: Observation) -> Self {
        let slant_f = slant_factor(obs.elm);
        DerivedObservation {
            vtec: obs.los_tec / slant_f,
            pair_id: pair_id(&obs.gnss_type, &obs.gps_site, &obs.sat_id),
            slant_f,
            obs,
        }
    }
}

/// A detrended observation
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub obs: Observation,
    pub slant_f: f64,
    pub vtec: f64,
    pub pair_id: String,
    /// Arc number, unique within the pair
    pub curve_id: u32,
    /// Smoothed baseline
    pub filtered: f64,
    /// Baseline removed TEC
    pub blrmvd: f64,
}

/// A continuous observation pass of one pair
#[derive(Debug, Clone)]
pub struct Arc {
    pub pair_id: String,
    pub curve_id: u32,
    pub time_start: NaiveDateTime,
    pub time_end: NaiveDateTime,
    pub record_indices: Vec<usize>,
}

/// Assign arc numbers to a time-ordered series.
///
/// A new arc starts whenever consecutive timestamps differ by more than `gap_seconds`.
pub fn segment_times(times: &[NaiveDateTime], gap_seconds: f64) -> Vec<u32> {
    let mut curve_id = 0_u32;
    let mut ids = Vec::with_capacity(times.len());

    for (i, time) in times.iter().enumerate() {
        if i > 0 && tools::seconds_between(&times[i - 1], time) > gap_seconds {
            curve_id += 1;
        }
        ids.push(curve_id);
    }
    ids
}

/// Split every pair's observations into arcs.
///
/// Pairs are returned in identifier order and arcs in time order.
pub fn find_arcs(observations: &[DerivedObservation], gap_seconds: f64) -> Vec<Arc> {
    let mut by_pair: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, obs) in observations.iter().enumerate() {
        by_pair.entry(obs.pair_id.as_str()).or_default().push(i);
    }

    let mut arcs: Vec<Arc> = Vec::new();

    for (pair, mut idxs) in by_pair {
        idxs.sort_by_key(|&i| observations[i].obs.datetime);

        let times = idxs.iter().map(|&i| observations[i].obs.datetime).collect::<Vec<NaiveDateTime>>();
        let curve_ids = segment_times(&times, gap_seconds);

        for (k, &i) in idxs.iter().enumerate() {
            let time = times[k];
            let same_arc = matches!(arcs.last(), Some(a) if a.pair_id == pair && a.curve_id == curve_ids[k]);

            match (same_arc, arcs.last_mut()) {
                (true, Some(arc)) => {
                    arc.time_end = time;
                    arc.record_indices.push(i);
                }
                _ => arcs.push(Arc {
                    pair_id: pair.to_string(),
                    curve_id: curve_ids[k],
                    time_start: time,
                    time_end: time,
                    record_indices: vec![i],
                }),
            }
        }
    }

    arcs
}

/// The extent of the data that the smoothing window may cover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingScope {
    /// Smooth all arcs of a pair as one series
    Pair,
    /// Smooth every arc separately
    Arc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detrend {
    SavitzkyGolay {
        window_length: usize,
        polyorder: usize,
        scope: SmoothingScope,
    },
    /// Centered rolling mean of the TEC per pierce point grid cell
    RollingMean { window: usize },
}

impl Default for Detrend {
    fn default() -> Self {
        Detrend::SavitzkyGolay {
            window_length: DEFAULT_WINDOW_LENGTH,
            polyorder: DEFAULT_POLYORDER,
            scope: SmoothingScope::Pair,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingParams {
    pub detrend: Detrend,
    pub gap_seconds: f64,
    pub trim_seconds: f64,
    /// Hours to keep, as [start, end)
    pub daytime: (u32, u32),
    pub min_elevation: f64,
    /// Smooth the groups on the rayon thread pool instead of the calling thread.
    /// Results are identical either way.
    pub parallel: bool,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        ProcessingParams {
            detrend: Detrend::default(),
            gap_seconds: DEFAULT_ARC_GAP_SECONDS,
            trim_seconds: DEFAULT_TRIM_SECONDS,
            daytime: DEFAULT_DAYTIME,
            min_elevation: DEFAULT_MIN_ELEVATION,
            parallel: false,
        }
    }
}

/// Smooth one time-ordered group and remove the baseline from its vertical TEC.
///
/// # Arguments
/// - `group`: Name of the group, used in errors
/// - `observations`: The group's observations in time order
/// - `curve_ids`: The arc number of every observation
/// - `window_length`, `polyorder`: Savitzky-Golay parameters
///
/// # Returns
/// The detrended samples, or `TecError::WindowTooLong` if the group is shorter than the window.
pub fn detrend_group(
    group: &str,
    observations: &[&DerivedObservation],
    curve_ids: &[u32],
    window_length: usize,
    polyorder: usize,
) -> TecResult<Vec<Sample>> {
    if observations.len() < window_length {
        return Err(TecError::WindowTooLong {
            group: group.to_string(),
            len: observations.len(),
            window: window_length,
        });
    }
    let tec = observations.iter().map(|o| o.obs.tec).collect::<Vec<f64>>();
    let baseline = filters::savgol_filter(&tec, window_length, polyorder)?;

    Ok(observations
        .iter()
        .zip(curve_ids.iter())
        .zip(baseline.into_iter())
        .map(|((o, &curve_id), filtered)| Sample {
            obs: o.obs.clone(),
            slant_f: o.slant_f,
            vtec: o.vtec,
            pair_id: o.pair_id.clone(),
            curve_id,
            filtered,
            blrmvd: o.vtec - filtered,
        })
        .collect())
}

/// Detrend all arcs with a Savitzky-Golay baseline.
///
/// Groups are returned in arc order. With `parallel`, they are smoothed on the rayon
/// thread pool.
pub fn detrend_arcs(
    observations: &[DerivedObservation],
    arcs: &[Arc],
    window_length: usize,
    polyorder: usize,
    scope: SmoothingScope,
    parallel: bool,
) -> TecResult<Vec<Sample>> {
    let mut groups: Vec<(String, Vec<usize>, Vec<u32>)> = Vec::new();

    for arc in arcs {
        let same_group = match (scope, groups.last()) {
            (SmoothingScope::Pair, Some((name, _, _))) => name == &arc.pair_id,
            _ => false,
        };
        if !same_group {
            let name = match scope {
                SmoothingScope::Pair => arc.pair_id.clone(),
                SmoothingScope::Arc => format!("{} arc {}", arc.pair_id, arc.curve_id),
            };
            groups.push((name, Vec::new(), Vec::new()));
        }
        if let Some((_, idxs, curve_ids)) = groups.last_mut() {
            idxs.extend(arc.record_indices.iter());
            curve_ids.extend(std::iter::repeat(arc.curve_id).take(arc.record_indices.len()));
        }
    }

    let smooth = |(name, idxs, curve_ids): &(String, Vec<usize>, Vec<u32>)| {
        let group = idxs.iter().map(|&i| &observations[i]).collect::<Vec<&DerivedObservation>>();
        detrend_group(name, &group, curve_ids, window_length, polyorder)
    };
    let detrended = match parallel {
        true => groups.par_iter().map(smooth).collect::<TecResult<Vec<Vec<Sample>>>>()?,
        false => groups.iter().map(smooth).collect::<TecResult<Vec<Vec<Sample>>>>()?,
    };

    Ok(detrended.into_iter().flatten().collect())
}

/// Detrend the TEC of every pierce point grid cell with a centered rolling mean.
///
/// Samples are returned ordered by latitude, longitude and time.
pub fn detrend_rolling(observations: Vec<DerivedObservation>, window: usize) -> Vec<Sample> {
    let mut observations = observations;
    observations.sort_by(|a, b| {
        a.obs
            .gdlat
            .total_cmp(&b.obs.gdlat)
            .then(a.obs.glon.total_cmp(&b.obs.glon))
            .then(a.obs.datetime.cmp(&b.obs.datetime))
    });

    let mut samples = Vec::with_capacity(observations.len());
    let mut start = 0;
    while start < observations.len() {
        let cell = (observations[start].obs.gdlat, observations[start].obs.glon);
        let end = start
            + observations[start..]
                .iter()
                .take_while(|o| (o.obs.gdlat, o.obs.glon) == cell)
                .count();

        let tec = observations[start..end].iter().map(|o| o.obs.tec).collect::<Vec<f64>>();
        let rolling = filters::rolling_mean(&tec, window);

        samples.extend(observations[start..end].iter().zip(rolling.into_iter()).map(|(o, filtered)| Sample {
            obs: o.obs.clone(),
            slant_f: o.slant_f,
            vtec: o.vtec,
            pair_id: o.pair_id.clone(),
            curve_id: 0,
            filtered,
            blrmvd: o.obs.tec - filtered,
        }));
        start = end.max(start + 1);
    }
    samples
}

/// The inclusive time window kept of an arc: `trim_seconds` after its start to `trim_seconds`
/// before its end. `None` for an empty arc.
pub fn trim_window(times: &[NaiveDateTime], trim_seconds: f64) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first = times.iter().min()?;
    let last = times.iter().max()?;

    Some((tools::add_seconds(first, trim_seconds), tools::add_seconds(last, -trim_seconds)))
}

/// Remove the edges of every (pair, arc).
///
/// Arcs spanning less than twice `trim_seconds` are removed entirely.
pub fn trim_arcs(samples: Vec<Sample>, trim_seconds: f64) -> Vec<Sample> {
    let mut by_arc: BTreeMap<(String, u32), Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        by_arc.entry((sample.pair_id.clone(), sample.curve_id)).or_default().push(sample);
    }

    let mut trimmed = Vec::new();
    for (_, mut arc) in by_arc {
        arc.sort_by_key(|s| s.obs.datetime);
        let times = arc.iter().map(|s| s.obs.datetime).collect::<Vec<NaiveDateTime>>();

        if let Some((start, end)) = trim_window(&times, trim_seconds) {
            trimmed.extend(arc.into_iter().filter(|s| s.obs.datetime >= start && s.obs.datetime <= end));
        }
    }
    trimmed
}

/// Keep samples observed within the daytime hours and above the minimum elevation
pub fn filter_visible(samples: Vec<Sample>, daytime: (u32, u32), min_elevation: f64) -> Vec<Sample> {
    samples
        .into_iter()
        .filter(|s| {
            let hour = s.obs.datetime.hour();
            hour >= daytime.0 && hour < daytime.1 && s.obs.elm > min_elevation
        })
        .collect()
}

/// Detrended samples of one input file and the log of how they were made
pub struct TecData {
    pub source: PathBuf,
    pub samples: Vec<Sample>,
    /// Columns that were missing from the input and filled with zeros
    pub backfilled: Vec<String>,
    pub log: Vec<String>,
}

impl TecData {
    /// Read a file and detrend it, or read an already processed CSV as is.
    pub fn load(filepath: &Path, ingest: &io::IngestParams, processing: &ProcessingParams) -> TecResult<Self> {
        let start_time = SystemTime::now();

        if io::InputKind::from_path(filepath)? == io::InputKind::Csv && io::is_processed_csv(filepath)? {
            let samples = io::read_processed_csv(filepath)?;
            let mut data = TecData { source: filepath.to_path_buf(), samples, backfilled: Vec::new(), log: Vec::new() };
            data.log_event("read", &format!("Read {} processed samples from {:?}", data.samples.len(), filepath), start_time);
            return Ok(data);
        }

        let table = io::read_observations(filepath, ingest)?;
        let mut data = TecData {
            source: filepath.to_path_buf(),
            samples: Vec::new(),
            backfilled: table.backfilled.clone(),
            log: Vec::new(),
        };
        data.log_event(
            "read",
            &format!(
                "Read {} observations from {:?} (zero-filled columns: {:?})",
                table.observations.len(),
                filepath,
                table.backfilled
            ),
            start_time,
        );
        data.detrend(table.observations, processing)?;

        Ok(data)
    }

    /// Derive vertical TEC, segment the arcs and detrend
    pub fn detrend(&mut self, observations: Vec<Observation>, processing: &ProcessingParams) -> TecResult<()> {
        let start_time = SystemTime::now();
        let derived = observations.into_iter().map(DerivedObservation::from).collect::<Vec<DerivedObservation>>();
        self.log_event("derive", &format!("Derived vertical TEC of {} observations", derived.len()), start_time);

        match processing.detrend {
            Detrend::SavitzkyGolay { window_length, polyorder, scope } => {
                let start_time = SystemTime::now();
                let arcs = find_arcs(&derived, processing.gap_seconds);
                self.log_event(
                    "arcs",
                    &format!("Found {} arcs with a maximum gap of {} s", arcs.len(), processing.gap_seconds),
                    start_time,
                );

                let start_time = SystemTime::now();
                self.samples = detrend_arcs(&derived, &arcs, window_length, polyorder, scope, processing.parallel)?;
                self.log_event(
                    "savgol",
                    &format!("Removed a Savitzky-Golay baseline (window: {window_length}, order: {polyorder}, scope: {scope:?})"),
                    start_time,
                );
            }
            Detrend::RollingMean { window } => {
                let start_time = SystemTime::now();
                self.samples = detrend_rolling(derived, window);
                self.log_event("rolling_mean", &format!("Removed a centered rolling mean of {window} samples"), start_time);
            }
        }
        Ok(())
    }

    /// Samples with the arc edges removed. Rolling mean detrending has no arcs to trim.
    pub fn trimmed(&self, processing: &ProcessingParams) -> Vec<Sample> {
        match processing.detrend {
            Detrend::SavitzkyGolay { .. } => trim_arcs(self.samples.clone(), processing.trim_seconds),
            Detrend::RollingMean { .. } => self.samples.clone(),
        }
    }

    pub fn log_event(&mut self, step_name: &str, event: &str, start_time: SystemTime) {
        let duration = SystemTime::now().duration_since(start_time).map(|d| d.as_secs_f32()).unwrap_or(0.);
        log::info!("{}: {}", step_name, event);
        self.log.push(format!("{} (duration: {:.2}s):\t{}", step_name, duration, event));
    }

    pub fn n_pairs(&self) -> usize {
        let mut pairs = self.samples.iter().map(|s| s.pair_id.as_str()).collect::<Vec<&str>>();
        pairs.sort_unstable();
        pairs.dedup();
        pairs.len()
    }

    pub fn n_arcs(&self) -> usize {
        let mut arcs = self.samples.iter().map(|s| (s.pair_id.as_str(), s.curve_id)).collect::<Vec<(&str, u32)>>();
        arcs.sort_unstable();
        arcs.dedup();
        arcs.len()
    }

    pub fn file_stem(&self) -> String {
        self.source.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "tec".to_string())
    }
}

impl std::fmt::Display for TecData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let extent = |values: Vec<f64>| {
            values
                .iter()
                .filter(|v| v.is_finite())
                .fold((f64::NAN, f64::NAN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
        };
        let start = self.samples.iter().map(|s| s.obs.datetime).min();
        let stop = self.samples.iter().map(|s| s.obs.datetime).max();
        let lats = extent(self.samples.iter().map(|s| s.obs.gdlat).collect());
        let lons = extent(self.samples.iter().map(|s| s.obs.glon).collect());
        let residuals = extent(self.samples.iter().map(|s| s.blrmvd).collect());

        write!(
            f,
            "
TEC data
--------
Filepath:\t\t{:?}
Samples:\t\t{}
Pairs:\t\t\t{}
Arcs:\t\t\t{}
Start time:\t\t{}
Stop time:\t\t{}
Latitude range:\t\t{:.2}-{:.2}
Longitude range:\t{:.2}-{:.2}
Residual range:\t\t{:.2}-{:.2}
Zero-filled columns:\t{:?}
",
            self.source,
            self.samples.len(),
            self.n_pairs(),
            self.n_arcs(),
            start.map(|t| tools::format_datetime(&t)).unwrap_or_default(),
            stop.map(|t| tools::format_datetime(&t)).unwrap_or_default(),
            lats.0,
            lats.1,
            lons.0,
            lons.1,
            residuals.0,
            residuals.1,
            self.backfilled,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunParams {
    pub filepaths: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub only_info: bool,
    pub ingest: io::IngestParams,
    pub processing: ProcessingParams,
    pub export_processed: Option<Option<PathBuf>>,
    pub keogram: Option<keogram::KeogramParams>,
    pub render_keogram: bool,
    pub impute: bool,
    pub export_nc: bool,
    pub animations: Vec<render::AnimationKind>,
    pub animation: render::AnimationParams,
    pub keogram_dir: Option<PathBuf>,
    /// Pair identifiers to draw diagnostic plots of
    pub plot_pairs: Vec<String>,
}

/// Run the processing on every input file and then plot any keogram directory.
///
/// A failure in one input file aborts the run. Failures in keogram directory plotting are
/// logged per file and skipped.
pub fn run(params: RunParams) -> TecResult<()> {
    let n_files = params.filepaths.len();

    for (i, filepath) in params.filepaths.iter().enumerate() {
        log::info!("Processing file {}/{}: {:?}", i + 1, n_files, filepath);
        process_file(filepath, &params)?;
    }

    if let Some(keogram_dir) = &params.keogram_dir {
        let output_dir = params.output_dir.clone().unwrap_or_else(|| keogram_dir.clone());
        let summary = render::plot_keogram_dir(keogram_dir, &output_dir)?;
        log::info!(
            "Plotted {} keograms from {:?} ({} skipped)",
            summary.processed.len(),
            keogram_dir,
            summary.skipped.len()
        );
    }

    Ok(())
}

fn output_dir_for(filepath: &Path, params: &RunParams) -> TecResult<PathBuf> {
    let output_dir = match &params.output_dir {
        Some(dir) => dir.clone(),
        None => match filepath.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    };
    std::fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

/// Run every requested stage on one input file
pub fn process_file(filepath: &Path, params: &RunParams) -> TecResult<()> {
    let mut data = TecData::load(filepath, &params.ingest, &params.processing)?;

    if params.only_info {
        println!("{}", data);
        return Ok(());
    }

    let output_dir = output_dir_for(filepath, params)?;
    let stem = data.file_stem();

    if let Some(processed_path) = &params.export_processed {
        let path = match processed_path {
            Some(p) if p.is_dir() => p.join(format!("{stem}_processed.csv")),
            Some(p) => p.clone(),
            None => output_dir.join(format!("{stem}_processed.csv")),
        };
        io::write_processed_csv(&data.samples, &path)?;
        log::info!("Processed data saved in {:?}", path);
    }

    for pair_id in &params.plot_pairs {
        let filepaths = render::plot_pair(&data.samples, pair_id, &output_dir, &stem)?;
        log::info!("Plots of pair {} saved in {:?}", pair_id, filepaths);
    }

    if params.keogram.is_none() && params.animations.is_empty() {
        return Ok(());
    }

    let start_time = SystemTime::now();
    let trimmed = data.trimmed(&params.processing);
    data.log_event(
        "trim",
        &format!(
            "Kept {} of {} samples after removing {} s from the ends of every arc",
            trimmed.len(),
            data.samples.len(),
            params.processing.trim_seconds
        ),
        start_time,
    );

    if let Some(keogram_params) = &params.keogram {
        let start_time = SystemTime::now();
        let keogram = keogram::Keogram::compute(&trimmed, keogram_params)?;
        data.log_event(
            "keogram",
            &format!(
                "Binned {} x {} keogram cells at longitude {}",
                keogram.grid.width(),
                keogram.grid.height(),
                keogram_params.longitude
            ),
            start_time,
        );

        let csv_path = output_dir.join(keogram.file_name());
        io::write_keogram_csv(&keogram, &csv_path)?;
        log::info!("Data saved at {:?}", csv_path);

        if params.render_keogram {
            let png_path = csv_path.with_extension("png");
            render::render_keogram(&keogram, &png_path, false)?;
            log::info!("Keogram rendered at {:?}", png_path);
            if params.impute {
                let imp_path = csv_path.with_file_name(format!("{}_imp.png", keogram.file_stem()));
                render::render_keogram(&keogram, &imp_path, true)?;
                log::info!("Imputed keogram rendered at {:?}", imp_path);
            }
        }
        if params.export_nc {
            let nc_path = csv_path.with_extension("nc");
            io::export_netcdf(&keogram, &data, &nc_path)?;
            log::info!("Keogram exported to {:?}", nc_path);
        }
    }

    if !params.animations.is_empty() {
        // Gridded rolling-mean input carries no elevations to filter on
        let visible = match params.processing.detrend {
            Detrend::SavitzkyGolay { .. } => {
                let start_time = SystemTime::now();
                let visible = filter_visible(trimmed, params.processing.daytime, params.processing.min_elevation);
                data.log_event(
                    "filter",
                    &format!(
                        "Kept {} samples between {}:00 and {}:00 with elevation above {} degrees",
                        visible.len(),
                        params.processing.daytime.0,
                        params.processing.daytime.1,
                        params.processing.min_elevation
                    ),
                    start_time,
                );
                visible
            }
            Detrend::RollingMean { .. } => trimmed,
        };

        for kind in &params.animations {
            let path = output_dir.join(kind.file_name(&stem, params.animation.bucket_seconds.is_some()));
            let n_frames = render::animate(&visible, *kind, &params.animation, &path)?;
            log::info!("Animation of {} frames saved in {:?}", n_frames, path);
        }
    }

    Ok(())
}
