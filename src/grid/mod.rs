/// Aggregation of scattered samples onto regular grids
use std::str::FromStr;

use ndarray::{Array1, Array2, Axis};
use rstar::{primitives::GeomWithData, RTree};

use crate::error::{TecError, TecResult};

pub mod delaunay;

/// Scattered interpolation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Nearest,
    Linear,
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nearest" => Ok(Method::Nearest),
            "linear" => Ok(Method::Linear),
            other => Err(format!("Unknown interpolation method: '{other}'. Choose 'nearest' or 'linear'")),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Nearest => write!(f, "nearest"),
            Method::Linear => write!(f, "linear"),
        }
    }
}

/// A regular grid of values. Missing cells are `NaN`.
///
/// `values` has the shape (y, x), so rows run along the second coordinate.
#[derive(Debug, Clone)]
pub struct Grid {
    pub x_edges: Array1<f64>,
    pub y_edges: Array1<f64>,
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub values: Array2<f64>,
}

fn centers(edges: &[f64]) -> Array1<f64> {
    Array1::from_iter(edges.windows(2).map(|w| 0.5 * (w[0] + w[1])))
}

/// Cell edges around nodes, extending half a cell beyond the outermost nodes
fn node_edges(nodes: &[f64]) -> Array1<f64> {
    match nodes.len() {
        0 => Array1::zeros(0),
        1 => Array1::from_vec(vec![nodes[0] - 0.5, nodes[0] + 0.5]),
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(nodes[0] - 0.5 * (nodes[1] - nodes[0]));
            edges.extend(nodes.windows(2).map(|w| 0.5 * (w[0] + w[1])));
            edges.push(nodes[n - 1] + 0.5 * (nodes[n - 1] - nodes[n - 2]));
            Array1::from_vec(edges)
        }
    }
}

impl Grid {
    /// Build a grid from node (cell centre) coordinates and values of shape (y, x)
    pub fn from_nodes(x: Vec<f64>, y: Vec<f64>, values: Array2<f64>) -> TecResult<Self> {
        if values.shape() != [y.len(), x.len()] {
            return Err(TecError::InvalidParameter(format!(
                "Value shape {:?} does not match {} x {} nodes",
                values.shape(),
                y.len(),
                x.len()
            )));
        }
        Ok(Grid {
            x_edges: node_edges(&x),
            y_edges: node_edges(&y),
            x: Array1::from_vec(x),
            y: Array1::from_vec(y),
            values,
        })
    }

    pub fn width(&self) -> usize {
        self.values.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.values.shape()[0]
    }

    /// The amount of cells holding a value
    pub fn n_filled(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Find the bin of a value.
///
/// Bins are half-open (`[e_i, e_i+1)`), except the last which also includes its right edge.
fn bin_index(edges: &[f64], value: f64) -> Option<usize> {
    if edges.len() < 2 || !value.is_finite() {
        return None;
    }
    let last = edges.len() - 1;
    if value < edges[0] || value > edges[last] {
        return None;
    }
    if value == edges[last] {
        return Some(last - 1);
    }
    Some(edges.partition_point(|e| *e <= value) - 1)
}

fn check_lengths(xs: &[f64], ys: &[f64], values: &[f64]) -> TecResult<()> {
    if xs.len() != ys.len() || xs.len() != values.len() {
        return Err(TecError::InvalidParameter(format!(
            "Coordinate and value lengths differ: {}, {}, {}",
            xs.len(),
            ys.len(),
            values.len()
        )));
    }
    Ok(())
}

/// Mean of all values per two-dimensional bin.
///
/// Samples outside of the edges are ignored. Bins without samples are `NaN`.
///
/// # Arguments
/// - `xs`, `ys`: Sample coordinates
/// - `values`: Sample values
/// - `x_edges`, `y_edges`: Monotonically increasing bin edges (at least two each)
pub fn binned_mean(xs: &[f64], ys: &[f64], values: &[f64], x_edges: &[f64], y_edges: &[f64]) -> TecResult<Grid> {
    check_lengths(xs, ys, values)?;
    if x_edges.len() < 2 || y_edges.len() < 2 {
        return Err(TecError::InvalidParameter(format!(
            "At least two bin edges are needed per axis, got {} and {}",
            x_edges.len(),
            y_edges.len()
        )));
    }
    let shape = (y_edges.len() - 1, x_edges.len() - 1);

    let mut sums = Array2::<f64>::zeros(shape);
    let mut counts = Array2::<usize>::zeros(shape);

    for i in 0..values.len() {
        if let (Some(col), Some(row)) = (bin_index(x_edges, xs[i]), bin_index(y_edges, ys[i])) {
            sums[[row, col]] += values[i];
            counts[[row, col]] += 1;
        }
    }

    let mut means = sums;
    means.zip_mut_with(&counts, |s, &c| {
        *s = match c {
            0 => f64::NAN,
            _ => *s / c as f64,
        }
    });

    Ok(Grid {
        x: centers(x_edges),
        y: centers(y_edges),
        x_edges: Array1::from_vec(x_edges.to_vec()),
        y_edges: Array1::from_vec(y_edges.to_vec()),
        values: means,
    })
}

/// Estimate values at every node of a regular grid from scattered samples.
///
/// With `Method::Nearest`, every node takes the value of the closest sample. With
/// `Method::Linear`, values are interpolated within a Delaunay triangulation of the samples and
/// nodes outside of their convex hull are `NaN`.
pub fn griddata(
    xs: &[f64],
    ys: &[f64],
    values: &[f64],
    x_nodes: &[f64],
    y_nodes: &[f64],
    method: Method,
) -> TecResult<Grid> {
    check_lengths(xs, ys, values)?;

    let mut grid = Array2::<f64>::from_elem((y_nodes.len(), x_nodes.len()), f64::NAN);

    match method {
        Method::Nearest => {
            let leaves = (0..values.len())
                .filter(|&i| xs[i].is_finite() && ys[i].is_finite())
                .map(|i| GeomWithData::new([xs[i], ys[i]], values[i]))
                .collect::<Vec<GeomWithData<[f64; 2], f64>>>();
            let tree = RTree::bulk_load(leaves);

            for ((row, col), value) in grid.indexed_iter_mut() {
                if let Some(nearest) = tree.nearest_neighbor(&[x_nodes[col], y_nodes[row]]) {
                    *value = nearest.data;
                }
            }
        }
        Method::Linear => {
            let points = xs.iter().zip(ys.iter()).map(|(x, y)| [*x, *y]).collect::<Vec<[f64; 2]>>();
            let triangulation = delaunay::Triangulation::new(&points);

            for ((row, col), value) in grid.indexed_iter_mut() {
                *value = triangulation.interpolate(values, &[x_nodes[col], y_nodes[row]]);
            }
        }
    }

    Grid::from_nodes(x_nodes.to_vec(), y_nodes.to_vec(), grid)
}

/// Replace missing cells by the mean of their column (along the y axis).
///
/// Columns without any value stay missing.
pub fn impute_column_mean(values: &mut Array2<f64>) {
    for mut column in values.axis_iter_mut(Axis(1)) {
        let (sum, count) = column
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0_f64, 0_usize), |(s, c), v| (s + v, c + 1));
        if count == 0 {
            continue;
        }
        let mean = sum / count as f64;
        column.mapv_inplace(|v| if v.is_nan() { mean } else { v });
    }
}
