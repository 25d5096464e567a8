//! Visibility matrices.
//!
//! A snapshot of which node pairs can currently see each other. Cell values
//! below zero mean "no link"; any value `>= 0` means the link is present and
//! doubles as its delay/weight parameter.

use crate::error::{Result, TopologyError};

/// Sentinel written into cells that carry no link.
pub const NO_LINK: f64 = -1.0;

/// Whether a cell value encodes a present link.
#[inline]
pub fn is_link(value: f64) -> bool {
    value >= 0.0
}

/// A (row, column) coordinate into a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Dense row-major grid of link values.
///
/// Immutable once built; reconciliation passes snapshots around by reference
/// (or behind an `Arc`) instead of mutating shared state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisibilityMatrix {
    rows: usize,
    cols: usize,
    cells: Vec<f64>,
}

impl VisibilityMatrix {
    /// Build a matrix from nested rows.
    ///
    /// Rejects empty input, ragged rows and non-finite values.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || cols == 0 {
            return Err(TopologyError::EmptyMatrix);
        }

        let mut cells = Vec::with_capacity(rows.len() * cols);
        for (r, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(TopologyError::RaggedRow {
                    row: r,
                    expected: cols,
                    found: row.len(),
                });
            }
            for (c, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(TopologyError::InvalidCell {
                        row: r,
                        col: c,
                        value: value.to_string(),
                    });
                }
            }
            cells.extend_from_slice(row);
        }

        Ok(Self {
            rows: rows.len(),
            cols,
            cells,
        })
    }

    /// Parse a delimited numeric grid, one matrix row per line.
    ///
    /// Blank lines are ignored. There is no header row.
    pub fn parse(text: &str, delimiter: char) -> Result<Self> {
        let mut rows = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let r = rows.len();
            let row = line
                .split(delimiter)
                .enumerate()
                .map(|(c, field)| {
                    let field = field.trim();
                    field
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| TopologyError::InvalidCell {
                            row: r,
                            col: c,
                            value: field.to_string(),
                        })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }
        Self::from_rows(rows)
    }

    /// A matrix of the given shape with every cell set to [`NO_LINK`].
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![NO_LINK; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Value at `(row, col)`. Panics if out of bounds.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(row < self.rows && col < self.cols, "cell ({row}, {col}) out of bounds");
        self.cells[row * self.cols + col]
    }

    /// Value at a [`Cell`].
    pub fn at(&self, cell: Cell) -> f64 {
        self.get(cell.row, cell.col)
    }

    /// Whether the cell carries a link.
    pub fn has_link(&self, cell: Cell) -> bool {
        is_link(self.at(cell))
    }

    /// One row as a slice.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }

    /// Columns in `row` that carry a link, with their values.
    pub fn visible_in_row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.row(row)
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, v)| is_link(v))
    }

    /// Keep only the smallest strictly positive value in each column.
    ///
    /// Every other cell becomes [`NO_LINK`], so each column node ends up
    /// attached to at most one row node. Ties keep every minimal cell.
    pub fn nearest_per_column(&self) -> Self {
        let mut next = Self::empty(self.rows, self.cols);
        for col in 0..self.cols {
            let min = (0..self.rows)
                .map(|row| self.get(row, col))
                .filter(|&v| v > 0.0)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))));

            if let Some(min) = min {
                for row in 0..self.rows {
                    if self.get(row, col) == min {
                        next.cells[row * self.cols + col] = min;
                    }
                }
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_square_grid() {
        let m = VisibilityMatrix::parse("-1,5\n5,-1\n", ',').unwrap();
        assert_eq!(m.dims(), (2, 2));
        assert_eq!(m.get(0, 1), 5.0);
        assert!(!m.has_link(Cell::new(0, 0)));
        assert!(m.has_link(Cell::new(1, 0)));
    }

    #[test]
    fn parse_rectangular_grid_with_blank_lines() {
        let m = VisibilityMatrix::parse("\n-1, 3, 0\n\n2,-1,-1\n", ',').unwrap();
        assert_eq!(m.dims(), (2, 3));
        assert!(!m.is_square());
        // Zero is a present link with zero delay
        assert!(m.has_link(Cell::new(0, 2)));
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!(VisibilityMatrix::parse("", ','), Err(TopologyError::EmptyMatrix));
        assert_eq!(VisibilityMatrix::parse("\n \n", ','), Err(TopologyError::EmptyMatrix));
    }

    #[test]
    fn parse_rejects_ragged_rows() {
        let err = VisibilityMatrix::parse("1,2,3\n1,2\n", ',').unwrap_err();
        assert_eq!(
            err,
            TopologyError::RaggedRow {
                row: 1,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn parse_rejects_garbage_and_non_finite() {
        assert!(matches!(
            VisibilityMatrix::parse("1,abc\n", ','),
            Err(TopologyError::InvalidCell { row: 0, col: 1, .. })
        ));
        assert!(matches!(
            VisibilityMatrix::parse("1,NaN\n", ','),
            Err(TopologyError::InvalidCell { .. })
        ));
        assert!(matches!(
            VisibilityMatrix::parse("1,\n", ','),
            Err(TopologyError::InvalidCell { .. })
        ));
    }

    #[test]
    fn visible_in_row_skips_absent_links() {
        let m = VisibilityMatrix::from_rows(vec![vec![-1.0, 4.0, -0.5, 0.0]]).unwrap();
        let visible: Vec<_> = m.visible_in_row(0).collect();
        assert_eq!(visible, vec![(1, 4.0), (3, 0.0)]);
    }

    #[test]
    fn nearest_per_column_keeps_minimum() {
        let m = VisibilityMatrix::from_rows(vec![
            vec![7.0, -1.0, 0.0],
            vec![3.0, -1.0, 2.0],
            vec![9.0, -1.0, 2.0],
        ])
        .unwrap();

        let n = m.nearest_per_column();
        assert_eq!(n.row(0), &[NO_LINK, NO_LINK, NO_LINK]);
        assert_eq!(n.row(1), &[3.0, NO_LINK, 2.0]);
        // Ties are both kept
        assert_eq!(n.row(2), &[NO_LINK, NO_LINK, 2.0]);
    }
}
