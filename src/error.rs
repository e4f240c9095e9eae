/// Error types for TEC processing
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("netCDF error: {0}")]
    NetCdf(#[from] netcdf::error::Error),

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Plotting error: {0}")]
    Plot(String),

    #[error("Video encoder error: {0}")]
    Encoder(String),

    #[error("Wrong data file type: {0:?}. Only .csv and binary tables (.h5, .hdf5, .nc, .nc4) are accepted")]
    UnsupportedInput(PathBuf),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Smoothing window ({window}) is longer than group {group} ({len} samples)")]
    WindowTooLong {
        group: String,
        len: usize,
        window: usize,
    },

    #[error("Time parse error: {0}")]
    Time(String),

    #[error("Regression error: {0}")]
    Regression(String),
}

impl<E: std::error::Error + Send + Sync> From<plotters::drawing::DrawingAreaErrorKind<E>> for TecError {
    fn from(err: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        TecError::Plot(err.to_string())
    }
}

/// Result type for TEC operations
pub type TecResult<T> = Result<T, TecError>;
