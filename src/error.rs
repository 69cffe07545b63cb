//! Crate error type.
//!
//! One variant per fatal condition. Backend unavailability is deliberately
//! not here: the matrix and geometry services absorb it into their fallback
//! paths and flag the downgrade in result metadata.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing required columns, unparseable coordinates, empty input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The perimeter could not be constructed from the given features.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The polygon collection declares a CRS other than WGS84.
    #[error("unsupported CRS `{0}`, expected WGS84")]
    NonWgs84(String),

    /// More points than the configured ceiling.
    #[error("matrix too large: {n} points exceeds ceiling of {max}")]
    MatrixTooLarge { n: usize, max: usize },

    /// The single-vehicle solver found no tour over two or more points.
    #[error("no solution found for {n} points")]
    NoSolution { n: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
