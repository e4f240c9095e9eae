/// Time-latitude aggregation of residuals in a narrow longitude band
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{TecError, TecResult};
use crate::grid::{self, Grid};
use crate::io::KeogramRow;
use crate::tec::Sample;
use crate::tools;

pub const DEFAULT_LONGITUDE: f64 = 25.;
pub const DEFAULT_LATS: (f64, f64) = (57., 66.);
pub const DEFAULT_LAT_RESOLUTION: f64 = 1.;
pub const DEFAULT_TIME_RESOLUTION: f64 = 300.;

#[derive(Debug, Clone, PartialEq)]
pub struct KeogramParams {
    /// Western edge of the one degree wide band
    pub longitude: f64,
    pub lats: (f64, f64),
    /// Latitude bin size in degrees
    pub lat_resolution: f64,
    /// Time bin size in seconds
    pub time_resolution: f64,
}

impl Default for KeogramParams {
    fn default() -> Self {
        KeogramParams {
            longitude: DEFAULT_LONGITUDE,
            lats: DEFAULT_LATS,
            lat_resolution: DEFAULT_LAT_RESOLUTION,
            time_resolution: DEFAULT_TIME_RESOLUTION,
        }
    }
}

/// Binned mean residuals over (elapsed seconds, latitude).
///
/// The grid's x axis is seconds since `reference` and its y axis is latitude.
#[derive(Debug, Clone)]
pub struct Keogram {
    /// `None` when the keogram was read back from a CSV
    pub longitude: Option<f64>,
    /// Time of the first sample in the band
    pub reference: NaiveDateTime,
    pub date: NaiveDate,
    pub time_resolution: f64,
    pub grid: Grid,
}

impl Keogram {
    /// Aggregate samples into a keogram.
    ///
    /// Samples are first masked to one degree west and two degrees east of the longitude and
    /// to the latitude range. The band between the longitude and one degree east of it is then
    /// binned. Bounds are inclusive.
    pub fn compute(samples: &[Sample], params: &KeogramParams) -> TecResult<Self> {
        if !(params.lat_resolution > 0.) || !(params.time_resolution > 0.) {
            return Err(TecError::InvalidParameter(format!(
                "Keogram resolutions must be positive, got {} degrees and {} s",
                params.lat_resolution, params.time_resolution
            )));
        }
        let lon = params.longitude;
        let (min_lat, max_lat) = params.lats;

        let masked = samples
            .iter()
            .filter(|s| s.obs.glon >= lon - 1. && s.obs.glon <= lon + 2.)
            .filter(|s| s.obs.gdlat >= min_lat && s.obs.gdlat <= max_lat)
            .collect::<Vec<&Sample>>();
        let band = masked
            .iter()
            .filter(|s| s.obs.glon >= lon && s.obs.glon <= lon + 1.)
            .copied()
            .collect::<Vec<&Sample>>();

        let (date, reference) = match (masked.iter().map(|s| s.obs.datetime).min(), band.iter().map(|s| s.obs.datetime).min()) {
            (Some(first), Some(reference)) => (first.date(), reference),
            _ => {
                return Err(TecError::InvalidParameter(format!(
                    "No samples between longitudes {} and {} and latitudes {} and {}",
                    lon,
                    lon + 1.,
                    min_lat,
                    max_lat
                )))
            }
        };

        let times = band.iter().map(|s| tools::seconds_between(&reference, &s.obs.datetime)).collect::<Vec<f64>>();
        let lats = band.iter().map(|s| s.obs.gdlat).collect::<Vec<f64>>();
        let residuals = band.iter().map(|s| s.blrmvd).collect::<Vec<f64>>();

        let max_time = times.iter().fold(0_f64, |a, b| a.max(*b));
        let (lat_lo, lat_hi) = lats.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

        let time_edges = tools::arange(0., max_time + params.time_resolution, params.time_resolution)?;
        let lat_edges = tools::arange(lat_lo, lat_hi + params.lat_resolution, params.lat_resolution)?;

        let grid = grid::binned_mean(&times, &lats, &residuals, &time_edges, &lat_edges)?;

        Ok(Keogram {
            longitude: Some(lon),
            reference,
            date,
            time_resolution: params.time_resolution,
            grid,
        })
    }

    /// Rebuild a keogram from its CSV rows.
    ///
    /// Every (time, latitude) combination must appear exactly once.
    pub fn from_rows(rows: &[KeogramRow]) -> TecResult<Self> {
        let first = rows.first().ok_or_else(|| TecError::Schema("The keogram has no rows".into()))?;

        let mut times = rows.iter().map(|r| r.time_seconds).collect::<Vec<f64>>();
        let mut lats = rows.iter().map(|r| r.gdlat).collect::<Vec<f64>>();
        for axis in [&mut times, &mut lats] {
            if axis.iter().any(|v| !v.is_finite()) {
                return Err(TecError::Schema("Keogram coordinates must be finite".into()));
            }
            axis.sort_by(f64::total_cmp);
            axis.dedup();
        }
        if times.len() * lats.len() != rows.len() {
            return Err(TecError::Schema(format!(
                "{} rows do not form a grid of {} times and {} latitudes",
                rows.len(),
                times.len(),
                lats.len()
            )));
        }

        let mut values = ndarray::Array2::<f64>::from_elem((lats.len(), times.len()), f64::NAN);
        let mut seen = ndarray::Array2::<bool>::from_elem((lats.len(), times.len()), false);
        for row in rows {
            let col = times.partition_point(|t| *t < row.time_seconds);
            let line = lats.partition_point(|l| *l < row.gdlat);
            if seen[[line, col]] {
                return Err(TecError::Schema(format!(
                    "Duplicate keogram cell at {} s and latitude {}",
                    row.time_seconds, row.gdlat
                )));
            }
            seen[[line, col]] = true;
            values[[line, col]] = row.blrmvd.unwrap_or(f64::NAN);
        }

        let time_resolution = match times.len() {
            0 | 1 => DEFAULT_TIME_RESOLUTION,
            _ => times[1] - times[0],
        };
        let first_datetime = tools::parse_datetime(&first.datetime)?;
        let reference = tools::add_seconds(&first_datetime, time_resolution / 2. - first.time_seconds);
        let date = rows
            .iter()
            .map(|r| tools::parse_datetime(&r.datetime))
            .collect::<TecResult<Vec<NaiveDateTime>>>()?
            .into_iter()
            .min()
            .map(|d| d.date())
            .unwrap_or_else(|| reference.date());

        Ok(Keogram {
            longitude: None,
            reference,
            date,
            time_resolution,
            grid: Grid::from_nodes(times, lats, values)?,
        })
    }

    /// The CSV rows in time-major order
    pub fn rows(&self) -> Vec<KeogramRow> {
        let mut rows = Vec::with_capacity(self.grid.width() * self.grid.height());

        for (col, time_seconds) in self.grid.x.iter().enumerate() {
            let datetime = tools::add_seconds(&self.reference, time_seconds - self.time_resolution / 2.);
            for (row, gdlat) in self.grid.y.iter().enumerate() {
                let value = self.grid.values[[row, col]];
                rows.push(KeogramRow {
                    time_seconds: *time_seconds,
                    gdlat: *gdlat,
                    blrmvd: if value.is_nan() { None } else { Some(value) },
                    datetime: tools::format_datetime(&datetime),
                });
            }
        }
        rows
    }

    pub fn file_stem(&self) -> String {
        match self.longitude {
            Some(lon) => format!("keogram{}long{}", self.date.format("%Y%m%d"), lon),
            None => format!("keogram{}", self.date.format("%Y%m%d")),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.file_stem())
    }

    /// Figure title. Keogram CSVs do not record the longitude, so only the date is known.
    pub fn title(&self) -> String {
        let date = self.date.format("%Y-%m-%d");
        match self.longitude {
            Some(lon) => format!("Baseline removed VTEC at longitude {lon}, {date}"),
            None => date.to_string(),
        }
    }
}
