/// Functions to handle input and output of TEC tables, keograms and exports
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{TecError, TecResult};
use crate::keogram::Keogram;
use crate::tec::{Observation, Sample, TecData};
use crate::tools;

/// Separate time components, combined into one timestamp when all are present
pub const TIME_COLUMNS: [&str; 6] = ["year", "month", "day", "hour", "min", "sec"];

/// Columns that every observation carries. Missing ones are filled with zeros.
pub const REQUIRED_COLUMNS: [&str; 11] = [
    "gps_site", "sat_id", "gdlatr", "gdlonr", "los_tec", "tec", "azm", "elm", "gdlat", "glon", "gnss_type",
];

const TAG_COLUMNS: [&str; 3] = ["gps_site", "sat_id", "gnss_type"];

/// Columns that mark a CSV as already detrended
const PROCESSED_COLUMNS: [&str; 4] = ["pair_id", "curve_id", "filtered", "blrmvd"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Csv,
    /// Madrigal HDF5 compound table, or netCDF with one 1-D variable per column
    BinaryTable,
}

impl InputKind {
    pub fn from_path(filepath: &Path) -> TecResult<Self> {
        let ext = filepath
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => Ok(InputKind::Csv),
            "h5" | "hdf5" | "nc" | "nc4" => Ok(InputKind::BinaryTable),
            _ => Err(TecError::UnsupportedInput(filepath.to_path_buf())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

fn format_tag(value: f64) -> String {
    if value.fract() == 0. && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    /// The values as numbers. Empty fields are `NaN`.
    pub fn to_numeric(&self, name: &str) -> TecResult<Vec<f64>> {
        match self {
            Column::Numeric(v) => Ok(v.clone()),
            Column::Text(v) => v
                .iter()
                .map(|s| match s.trim() {
                    "" => Ok(f64::NAN),
                    t => t
                        .parse::<f64>()
                        .map_err(|_| TecError::Schema(format!("Could not parse '{t}' in column '{name}' as a number"))),
                })
                .collect(),
        }
    }

    /// The values as strings. Integral numbers are written without a fraction.
    pub fn to_text(&self) -> Vec<String> {
        match self {
            Column::Numeric(v) => v.iter().map(|x| format_tag(*x)).collect(),
            Column::Text(v) => v.clone(),
        }
    }
}

/// Named columns of equal length, as read from a file
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub columns: BTreeMap<String, Column>,
    pub n_rows: usize,
}

impl RawTable {
    pub fn insert(&mut self, name: &str, column: Column) -> TecResult<()> {
        if !self.columns.is_empty() && column.len() != self.n_rows {
            return Err(TecError::Schema(format!(
                "Column '{}' has {} values but the table has {} rows",
                name,
                column.len(),
                self.n_rows
            )));
        }
        self.n_rows = column.len();
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }
}

/// Read every column of a CSV as text
pub fn read_csv_table(filepath: &Path) -> TecResult<RawTable> {
    let mut reader = csv::Reader::from_path(filepath)?;
    let headers = reader.headers()?.iter().map(|h| h.trim().to_string()).collect::<Vec<String>>();

    let mut values: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (i, field) in record.iter().enumerate().take(headers.len()) {
            values[i].push(field.to_string());
        }
    }

    let mut table = RawTable::default();
    for (name, column) in headers.iter().zip(values.into_iter()) {
        table.insert(name, Column::Text(column))?;
    }
    Ok(table)
}

/// Location of the observation table in Madrigal HDF5 files
pub const MADRIGAL_TABLE: &str = "Data/Table Layout";

/// In-memory length of fixed-length string members. Longer values are truncated.
const FIXED_STRING_LEN: usize = 64;

/// Read named members of a compound dataset into the table.
///
/// Each member is read on its own through a single-field compound type, which HDF5 converts
/// from the file layout by member name. Numbers of any width become `f64`.
macro_rules! read_compound_members {
    ($dataset:expr, $compound:expr, $table:expr; $($member:ident),* $(,)?) => {
        $(
            if let Some(field) = $compound.fields.iter().find(|f| f.name == stringify!($member)) {
                #[derive(H5Type)]
                #[repr(C)]
                struct Number {
                    $member: f64,
                }
                #[derive(H5Type)]
                #[repr(C)]
                struct Ascii {
                    $member: FixedAscii<FIXED_STRING_LEN>,
                }
                #[derive(H5Type)]
                #[repr(C)]
                struct Unicode {
                    $member: FixedUnicode<FIXED_STRING_LEN>,
                }
                #[derive(H5Type)]
                #[repr(C)]
                struct VarAscii {
                    $member: VarLenAscii,
                }
                #[derive(H5Type)]
                #[repr(C)]
                struct VarUnicode {
                    $member: VarLenUnicode,
                }

                let column = match &field.ty {
                    TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) | TypeDescriptor::Float(_) => {
                        Column::Numeric($dataset.read_raw::<Number>()?.into_iter().map(|r| r.$member).collect())
                    }
                    TypeDescriptor::FixedAscii(_) => Column::Text(
                        $dataset.read_raw::<Ascii>()?.iter().map(|r| clean_text(r.$member.as_str())).collect(),
                    ),
                    TypeDescriptor::FixedUnicode(_) => Column::Text(
                        $dataset.read_raw::<Unicode>()?.iter().map(|r| clean_text(r.$member.as_str())).collect(),
                    ),
                    TypeDescriptor::VarLenAscii => Column::Text(
                        $dataset.read_raw::<VarAscii>()?.iter().map(|r| clean_text(r.$member.as_str())).collect(),
                    ),
                    TypeDescriptor::VarLenUnicode => Column::Text(
                        $dataset.read_raw::<VarUnicode>()?.iter().map(|r| clean_text(r.$member.as_str())).collect(),
                    ),
                    other => {
                        return Err(TecError::Schema(format!(
                            "Member '{}' of '{}' has an unsupported type: {:?}",
                            stringify!($member),
                            MADRIGAL_TABLE,
                            other
                        )))
                    }
                };
                $table.insert(stringify!($member), column)?;
            }
        )*
    };
}

fn clean_text(text: &str) -> String {
    text.trim_end_matches('\0').trim().to_string()
}

/// Read the known members of the Madrigal compound table.
///
/// Returns `None` if the file is not HDF5 or has no such table.
pub fn read_madrigal_table(filepath: &Path) -> TecResult<Option<RawTable>> {
    use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};
    use hdf5::H5Type;

    let file = match hdf5::File::open(filepath) {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };
    let dataset = match file.dataset(MADRIGAL_TABLE) {
        Ok(d) => d,
        Err(_) => return Ok(None),
    };

    let compound = match dataset.dtype()?.to_descriptor()? {
        TypeDescriptor::Compound(compound) => compound,
        other => {
            return Err(TecError::Schema(format!(
                "'{}' in {:?} is not a compound table but {:?}",
                MADRIGAL_TABLE, filepath, other
            )))
        }
    };

    let mut table = RawTable::default();
    read_compound_members!(
        dataset, compound, table;
        year, month, day, hour, min, sec, datetime,
        gps_site, sat_id, gdlatr, gdlonr, los_tec, tec, azm, elm, gdlat, glon, gnss_type,
    );
    log::debug!("Read {} rows of '{}' from {:?}", table.n_rows, MADRIGAL_TABLE, filepath);

    Ok(Some(table))
}

/// Read the known columns of a netCDF table, where every column is a 1-D variable named
/// after it. Text variables are read as strings.
pub fn read_netcdf_table(filepath: &Path) -> TecResult<RawTable> {
    let file = netcdf::open(filepath)?;

    let mut table = RawTable::default();
    let names = TIME_COLUMNS.iter().chain(["datetime"].iter()).chain(REQUIRED_COLUMNS.iter());

    for name in names {
        let variable = match file.variable(name) {
            Some(v) => v,
            None => continue,
        };
        let column = match variable.values::<f64>(None, None) {
            Ok(values) => Column::Numeric(values.iter().copied().collect()),
            Err(_) => Column::Text(
                (0..variable.len())
                    .map(|i| variable.string_value(Some(&[i])))
                    .collect::<Result<Vec<String>, netcdf::error::Error>>()?,
            ),
        };
        table.insert(name, column)?;
    }

    Ok(table)
}

/// Read the known columns of a binary table.
///
/// Madrigal HDF5 files keep one compound table at `Data/Table Layout`. Other files are read
/// as netCDF with one variable per column.
pub fn read_binary_table(filepath: &Path) -> TecResult<RawTable> {
    match read_madrigal_table(filepath)? {
        Some(table) => Ok(table),
        None => read_netcdf_table(filepath),
    }
}

fn combine_time_columns(table: &RawTable) -> TecResult<Vec<NaiveDateTime>> {
    let mut components = Vec::with_capacity(TIME_COLUMNS.len());
    for name in TIME_COLUMNS {
        match table.columns.get(name) {
            Some(column) => components.push(column.to_numeric(name)?),
            None => return Err(TecError::Schema(format!("Missing time column '{name}'"))),
        }
    }

    (0..table.n_rows)
        .map(|i| {
            let [year, month, day, hour, minute, second] =
                [0, 1, 2, 3, 4, 5].map(|c| components[c][i]);
            NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, 0))
                .map(|d| tools::add_seconds(&d, second))
                .ok_or_else(|| {
                    TecError::Time(format!(
                        "Invalid date on row {i}: {year}-{month}-{day} {hour}:{minute}:{second}"
                    ))
                })
        })
        .collect()
}

fn read_datetimes(table: &RawTable) -> TecResult<Vec<NaiveDateTime>> {
    if TIME_COLUMNS.iter().all(|c| table.contains(c)) {
        return combine_time_columns(table);
    }
    match table.columns.get("datetime") {
        Some(column) => column.to_text().iter().map(|t| tools::parse_datetime(t)).collect(),
        None => Err(TecError::Schema(format!(
            "Missing time columns: expected either all of {:?} or 'datetime', found {:?}",
            TIME_COLUMNS,
            table.columns.keys().collect::<Vec<&String>>()
        ))),
    }
}

/// Receiver bounding box applied during ingestion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestParams {
    pub lats: Option<(f64, f64)>,
    pub lons: Option<(f64, f64)>,
}

/// Normalized observations and the required columns that were zero-filled
#[derive(Debug, Clone)]
pub struct IngestedTable {
    pub observations: Vec<Observation>,
    pub backfilled: Vec<String>,
}

/// Convert a raw table into observations.
///
/// Missing required columns are replaced by zeros (`"0"` for tags) with one warning each.
/// Missing time columns are an error.
pub fn normalize(table: &RawTable, params: &IngestParams) -> TecResult<IngestedTable> {
    let datetimes = read_datetimes(table)?;
    let n = table.n_rows;

    let mut backfilled = Vec::new();
    let mut numeric: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut text: BTreeMap<&str, Vec<String>> = BTreeMap::new();

    for name in REQUIRED_COLUMNS {
        let is_tag = TAG_COLUMNS.contains(&name);
        match table.columns.get(name) {
            Some(column) if is_tag => {
                text.insert(name, column.to_text());
            }
            Some(column) => {
                numeric.insert(name, column.to_numeric(name)?);
            }
            None => {
                log::warn!("Column '{}' is missing. Filling it with zeros", name);
                backfilled.push(name.to_string());
                if is_tag {
                    text.insert(name, vec!["0".to_string(); n]);
                } else {
                    numeric.insert(name, vec![0.; n]);
                }
            }
        }
    }

    let num = |name: &str, i: usize| numeric.get(name).map(|v| v[i]).unwrap_or(0.);
    let tag = |name: &str, i: usize| text.get(name).map(|v| v[i].clone()).unwrap_or_else(|| "0".to_string());

    let within = |value: f64, range: Option<(f64, f64)>| match range {
        Some((lo, hi)) => value >= lo && value <= hi,
        None => true,
    };

    let observations = (0..n)
        .filter(|&i| within(num("gdlatr", i), params.lats) && within(num("gdlonr", i), params.lons))
        .map(|i| Observation {
            datetime: datetimes[i],
            gps_site: tag("gps_site", i),
            sat_id: tag("sat_id", i),
            gnss_type: tag("gnss_type", i),
            gdlatr: num("gdlatr", i),
            gdlonr: num("gdlonr", i),
            los_tec: num("los_tec", i),
            tec: num("tec", i),
            azm: num("azm", i),
            elm: num("elm", i),
            gdlat: num("gdlat", i),
            glon: num("glon", i),
        })
        .collect::<Vec<Observation>>();

    Ok(IngestedTable { observations, backfilled })
}

/// Read a CSV or binary table into normalized observations
pub fn read_observations(filepath: &Path, params: &IngestParams) -> TecResult<IngestedTable> {
    let table = match InputKind::from_path(filepath)? {
        InputKind::Csv => read_csv_table(filepath)?,
        InputKind::BinaryTable => read_binary_table(filepath)?,
    };
    normalize(&table, params)
}

/// One row of the processed (detrended) CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRow {
    pub datetime: String,
    pub gps_site: String,
    pub sat_id: String,
    pub gdlatr: f64,
    pub gdlonr: f64,
    pub los_tec: f64,
    pub tec: f64,
    pub azm: f64,
    pub elm: f64,
    pub gdlat: f64,
    pub glon: f64,
    pub gnss_type: String,
    pub slant_f: f64,
    pub vtec: f64,
    pub pair_id: String,
    pub curve_id: u32,
    pub filtered: f64,
    pub blrmvd: f64,
}

impl From<&Sample> for ProcessedRow {
    fn from(s: &Sample) -> Self {
        ProcessedRow {
            datetime: tools::format_datetime(&s.obs.datetime),
            gps_site: s.obs.gps_site.clone(),
            sat_id: s.obs.sat_id.clone(),
            gdlatr: s.obs.gdlatr,
            gdlonr: s.obs.gdlonr,
            los_tec: s.obs.los_tec,
            tec: s.obs.tec,
            azm: s.obs.azm,
            elm: s.obs.elm,
            gdlat: s.obs.gdlat,
            glon: s.obs.glon,
            gnss_type: s.obs.gnss_type.clone(),
            slant_f: s.slant_f,
            vtec: s.vtec,
            pair_id: s.pair_id.clone(),
            curve_id: s.curve_id,
            filtered: s.filtered,
            blrmvd: s.blrmvd,
        }
    }
}

impl TryFrom<ProcessedRow> for Sample {
    type Error = TecError;

    fn try_from(row: ProcessedRow) -> TecResult<Self> {
        Ok(Sample {
            obs: Observation {
                datetime: tools::parse_datetime(&row.datetime)?,
                gps_site: row.gps_site,
                sat_id: row.sat_id,
                gnss_type: row.gnss_type,
                gdlatr: row.gdlatr,
                gdlonr: row.gdlonr,
                los_tec: row.los_tec,
                tec: row.tec,
                azm: row.azm,
                elm: row.elm,
                gdlat: row.gdlat,
                glon: row.glon,
            },
            slant_f: row.slant_f,
            vtec: row.vtec,
            pair_id: row.pair_id,
            curve_id: row.curve_id,
            filtered: row.filtered,
            blrmvd: row.blrmvd,
        })
    }
}

pub fn write_processed_csv(samples: &[Sample], filepath: &Path) -> TecResult<()> {
    let mut writer = csv::Writer::from_path(filepath)?;
    for sample in samples {
        writer.serialize(ProcessedRow::from(sample))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_processed_csv(filepath: &Path) -> TecResult<Vec<Sample>> {
    let mut reader = csv::Reader::from_path(filepath)?;
    reader
        .deserialize::<ProcessedRow>()
        .map(|row| Sample::try_from(row?))
        .collect()
}

/// Check whether a CSV carries the detrending columns
pub fn is_processed_csv(filepath: &Path) -> TecResult<bool> {
    let mut reader = csv::Reader::from_path(filepath)?;
    let headers = reader.headers()?;

    Ok(PROCESSED_COLUMNS.iter().all(|c| headers.iter().any(|h| h.trim() == *c)))
}

/// One cell of a keogram CSV. Missing cells have an empty residual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeogramRow {
    pub time_seconds: f64,
    pub gdlat: f64,
    pub blrmvd: Option<f64>,
    pub datetime: String,
}

pub fn write_keogram_csv(keogram: &Keogram, filepath: &Path) -> TecResult<()> {
    let mut writer = csv::Writer::from_path(filepath)?;
    for row in keogram.rows() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_keogram_csv(filepath: &Path) -> TecResult<Keogram> {
    let mut reader = csv::Reader::from_path(filepath)?;
    let rows = reader.deserialize::<KeogramRow>().collect::<Result<Vec<KeogramRow>, csv::Error>>()?;

    Keogram::from_rows(&rows)
}

/// Export a keogram and its processing log to a netCDF file
pub fn export_netcdf(keogram: &Keogram, data: &TecData, nc_filepath: &Path) -> TecResult<()> {
    if nc_filepath.is_file() {
        std::fs::remove_file(nc_filepath)?;
    };
    let mut file = netcdf::create(nc_filepath)?;

    file.add_dimension("time", keogram.grid.width())?;
    file.add_dimension("lat", keogram.grid.height())?;

    let last_time = keogram.grid.x.iter().fold(0_f64, |a, b| a.max(*b));
    file.add_attribute("start-datetime", tools::format_datetime(&keogram.reference))?;
    file.add_attribute(
        "stop-datetime",
        tools::format_datetime(&tools::add_seconds(&keogram.reference, last_time + keogram.time_resolution / 2.)),
    )?;
    file.add_attribute("processing-datetime", chrono::Local::now().to_rfc3339())?;
    if let Some(longitude) = keogram.longitude {
        file.add_attribute("longitude", longitude)?;
    }
    file.add_attribute("time-resolution", keogram.time_resolution)?;
    file.add_attribute("time-resolution-unit", "s")?;
    file.add_attribute("processing-log", data.log.join("\n"))?;
    file.add_attribute(
        "original-filename",
        data.source.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default(),
    )?;
    file.add_attribute(
        "program-version",
        format!("{} version {}, © {}", crate::PROGRAM_NAME, crate::PROGRAM_VERSION, crate::PROGRAM_AUTHORS),
    )?;

    let mut values = file.add_variable::<f64>("blrmvd", &["lat", "time"])?;
    values.put_values(
        &keogram.grid.values.as_standard_layout().iter().copied().collect::<Vec<f64>>(),
        Some(&[0, 0]),
        None,
    )?;
    values.add_attribute("coordinates", "time_seconds gdlat")?;
    values.add_attribute("unit", "TECU")?;

    let mut time = file.add_variable::<f64>("time_seconds", &["time"])?;
    time.put_values(&keogram.grid.x.to_vec(), Some(&[0]), None)?;
    time.add_attribute("unit", "s")?;

    let mut lat = file.add_variable::<f64>("gdlat", &["lat"])?;
    lat.put_values(&keogram.grid.y.to_vec(), Some(&[0]), None)?;
    lat.add_attribute("unit", "degrees north")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use chrono::NaiveDate;

    use super::{InputKind, IngestParams};
    use crate::error::TecError;
    use crate::keogram::{tests::samples, Keogram, KeogramParams};
    use crate::tec::TecData;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_input_kind() {
        assert_eq!(InputKind::from_path(Path::new("a.csv")).unwrap(), InputKind::Csv);
        assert_eq!(InputKind::from_path(Path::new("dir/a.H5")).unwrap(), InputKind::BinaryTable);
        assert_eq!(InputKind::from_path(Path::new("a.nc")).unwrap(), InputKind::BinaryTable);
        assert!(matches!(InputKind::from_path(Path::new("a.txt")), Err(TecError::UnsupportedInput(_))));
        assert!(matches!(InputKind::from_path(Path::new("a")), Err(TecError::UnsupportedInput(_))));
    }

    #[test]
    fn missing_columns_are_zero_filled() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = write(
            tempdir.path(),
            "in.csv",
            "year,month,day,hour,min,sec,gps_site,sat_id,gdlatr,gdlonr,los_tec,tec,elm,gdlat,glon\n\
             2023,1,20,10,0,30,abcd,12,60.5,25.1,20.0,10.0,45.0,61.0,25.5\n\
             2023,1,20,10,1,0,abcd,12,60.5,25.1,21.0,,46.0,61.1,25.6\n",
        );

        let table = super::read_observations(&path, &IngestParams::default()).unwrap();

        assert_eq!(table.backfilled, vec!["azm".to_string(), "gnss_type".to_string()]);
        assert_eq!(table.observations.len(), 2);

        let first = &table.observations[0];
        assert_eq!(first.datetime, NaiveDate::from_ymd_opt(2023, 1, 20).unwrap().and_hms_opt(10, 0, 30).unwrap());
        assert_eq!(first.gnss_type, "0");
        assert_eq!(first.azm, 0.);
        assert_eq!(first.sat_id, "12");
        assert_eq!(first.los_tec, 20.);
        assert!(table.observations[1].tec.is_nan());
    }

    #[test]
    fn datetime_column_and_receiver_box() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = write(
            tempdir.path(),
            "in.csv",
            "datetime,gps_site,sat_id,gdlatr,gdlonr,los_tec,tec,azm,elm,gdlat,glon,gnss_type\n\
             2023-01-20 10:00:00,abcd,12,60.5,25.1,20.0,10.0,100,45.0,61.0,25.5,GPS\n\
             2023-01-20T10:01:00,efgh,12,72.0,25.1,20.0,10.0,100,45.0,61.0,25.5,GPS\n\
             2023-01-20 10:02:00,ijkl,12,60.5,40.0,20.0,10.0,100,45.0,61.0,25.5,GPS\n",
        );

        let all = super::read_observations(&path, &IngestParams::default()).unwrap();
        assert_eq!(all.observations.len(), 3);
        assert!(all.backfilled.is_empty());
        assert_eq!(all.observations[1].datetime.format("%H:%M").to_string(), "10:01");

        let params = IngestParams { lats: Some((59., 71.)), lons: Some((20., 31.)) };
        let boxed = super::read_observations(&path, &params).unwrap();
        assert_eq!(boxed.observations.len(), 1);
        assert_eq!(boxed.observations[0].gps_site, "abcd");
    }

    #[test]
    fn missing_time_fails() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = write(tempdir.path(), "in.csv", "year,month,gps_site\n2023,1,abcd\n");

        assert!(matches!(
            super::read_observations(&path, &IngestParams::default()),
            Err(TecError::Schema(_))
        ));
    }

    #[test]
    fn processed_csv_round_trip() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("processed.csv");
        let samples = samples();

        super::write_processed_csv(&samples, &path).unwrap();

        assert!(super::is_processed_csv(&path).unwrap());
        assert_eq!(super::read_processed_csv(&path).unwrap(), samples);

        let raw = write(tempdir.path(), "raw.csv", "datetime,tec\n2023-01-20 10:00:00,1\n");
        assert!(!super::is_processed_csv(&raw).unwrap());
    }

    #[test]
    fn keogram_csv() {
        let tempdir = tempfile::tempdir().unwrap();
        let keogram = Keogram::compute(&samples(), &KeogramParams::default()).unwrap();
        let path = tempdir.path().join(keogram.file_name());

        super::write_keogram_csv(&keogram, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines = content.lines().collect::<Vec<&str>>();
        assert_eq!(lines[0], "time_seconds,gdlat,blrmvd,datetime");
        assert_eq!(lines.len(), 5);
        // The missing cell is an empty field
        assert!(lines[2].contains(",,"));

        let read = super::read_keogram_csv(&path).unwrap();
        assert_eq!(read.grid.n_filled(), 2);
        assert_eq!(read.reference, keogram.reference);

        let broken = write(tempdir.path(), "broken.csv", "time_seconds,gdlat,blrmvd,datetime\n150,57.5,abc,x\n");
        assert!(super::read_keogram_csv(&broken).is_err());
    }

    #[test]
    fn binary_table() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("table.nc");

        {
            let mut file = netcdf::create(&path).unwrap();
            file.add_dimension("record", 2).unwrap();
            let columns: [(&str, [f64; 2]); 15] = [
                ("year", [2023., 2023.]),
                ("month", [1., 1.]),
                ("day", [20., 20.]),
                ("hour", [10., 10.]),
                ("min", [0., 1.]),
                ("sec", [0., 0.]),
                ("gps_site", [101., 101.]),
                ("sat_id", [12., 13.]),
                ("gdlatr", [60., 60.]),
                ("gdlonr", [25., 25.]),
                ("los_tec", [20., 21.]),
                ("tec", [10., 11.]),
                ("elm", [45., 50.]),
                ("gdlat", [61., 62.]),
                ("glon", [25.5, 26.]),
            ];
            for (name, values) in columns {
                let mut variable = file.add_variable::<f64>(name, &["record"]).unwrap();
                variable.put_values(&values, Some(&[0]), None).unwrap();
            }
        }

        let table = super::read_observations(&path, &IngestParams::default()).unwrap();

        assert_eq!(table.backfilled, vec!["azm".to_string(), "gnss_type".to_string()]);
        assert_eq!(table.observations.len(), 2);
        assert_eq!(table.observations[0].gps_site, "101");
        assert_eq!(table.observations[1].sat_id, "13");
        assert_eq!(table.observations[1].tec, 11.);
        assert_eq!(table.observations[1].datetime.format("%H:%M").to_string(), "10:01");
    }

    #[derive(hdf5::H5Type, Clone)]
    #[repr(C)]
    struct MadrigalRecord {
        recno: i64,
        kinst: i64,
        year: i64,
        month: i64,
        day: i64,
        hour: i64,
        min: i64,
        sec: i64,
        gps_site: hdf5::types::FixedAscii<4>,
        sat_id: i64,
        gdlatr: f64,
        gdlonr: f64,
        los_tec: f64,
        dlos_tec: f64,
        tec: f64,
        azm: f64,
        elm: f64,
        gdlat: f64,
        glon: f64,
        gnss_type: hdf5::types::FixedAscii<3>,
    }

    fn madrigal_record(site: &str, sat_id: i64, minute: i64, gdlatr: f64) -> MadrigalRecord {
        MadrigalRecord {
            recno: minute,
            kinst: 8000,
            year: 2023,
            month: 1,
            day: 20,
            hour: 10,
            min: minute,
            sec: 30,
            gps_site: hdf5::types::FixedAscii::<4>::from_ascii(site.as_bytes()).unwrap(),
            sat_id,
            gdlatr,
            gdlonr: 25.,
            los_tec: 20. + minute as f64,
            dlos_tec: 0.5,
            tec: 10. + minute as f64,
            azm: 180.,
            elm: 45.,
            gdlat: 61.,
            glon: 25.5,
            gnss_type: hdf5::types::FixedAscii::<3>::from_ascii(b"GPS").unwrap(),
        }
    }

    #[test]
    fn madrigal_table() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("los_20230120.001.h5");

        let records = ndarray::Array1::from_vec(vec![
            madrigal_record("kevo", 12, 0, 69.7),
            madrigal_record("kevo", 12, 1, 69.7),
            madrigal_record("ivlo", 5, 2, 61.3),
            // Receiver far south of the box
            madrigal_record("riga", 7, 3, 56.9),
        ]);
        {
            let file = hdf5::File::create(&path).unwrap();
            let group = file.create_group("Data").unwrap();
            group.new_dataset_builder().with_data(&records).create("Table Layout").unwrap();
        }

        let table = super::read_madrigal_table(&path).unwrap().unwrap();
        assert_eq!(table.n_rows, 4);
        assert!(!table.contains("recno"));
        assert!(!table.contains("dlos_tec"));

        let params = IngestParams { lats: Some((60., 72.)), lons: None };
        let ingested = super::read_observations(&path, &params).unwrap();

        assert!(ingested.backfilled.is_empty());
        let obs = &ingested.observations;
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0].gps_site, "kevo");
        assert_eq!(obs[0].sat_id, "12");
        assert_eq!(obs[0].gnss_type, "GPS");
        assert_eq!(obs[2].gps_site, "ivlo");
        assert_eq!(obs[1].los_tec, 21.);
        assert_eq!(obs[1].tec, 11.);
        assert_eq!(
            obs[1].datetime,
            NaiveDate::from_ymd_opt(2023, 1, 20).unwrap().and_hms_opt(10, 1, 30).unwrap()
        );
    }

    #[test]
    fn hdf5_without_madrigal_table_falls_back_to_variables() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("other.h5");
        {
            let file = hdf5::File::create(&path).unwrap();
            file.new_dataset_builder().with_data(&ndarray::arr1(&[1., 2.])).create("tec").unwrap();
        }

        assert!(super::read_madrigal_table(&path).unwrap().is_none());
        assert!(super::read_madrigal_table(&tempdir.path().join("missing.h5")).unwrap().is_none());
    }

    #[test]
    fn test_export_netcdf() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("keogram.nc");
        let keogram = Keogram::compute(&samples(), &KeogramParams::default()).unwrap();
        let data = TecData {
            source: PathBuf::from("in.csv"),
            samples: Vec::new(),
            backfilled: Vec::new(),
            log: vec!["read (duration: 0.00s):\tRead 6 samples".to_string()],
        };

        super::export_netcdf(&keogram, &data, &path).unwrap();
        // Overwriting is allowed
        super::export_netcdf(&keogram, &data, &path).unwrap();

        let file = netcdf::open(&path).unwrap();
        assert_eq!(file.variable("blrmvd").unwrap().len(), 4);
        assert_eq!(file.variable("time_seconds").unwrap().len(), 2);
        assert!(file.attribute("processing-log").is_some());
    }
}
