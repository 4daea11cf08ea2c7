//! Preallocated accumulation of decoded LIDAR points across a whole file.
//!
//! Each point-cloud record is assigned a destination row range before any
//! point is written. Ranges are contiguous, disjoint and in frame order, so
//! the buffer is allocated once and every record writes only its own slice.

use crate::pointcloud::PointMatrix;
use std::ops::Range;

/// Column layout of one accumulated row.
pub const COLUMNS: [&str; 6] = [
    "system_timestamp",
    "lidar_timestamp",
    "x",
    "y",
    "z",
    "intensity",
];

/// `[system_timestamp, lidar_timestamp, x, y, z, intensity]`
pub type PointRow = [f64; 6];

/// Destination ranges for a sequence of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPlan {
    ranges: Vec<Range<usize>>,
    total: usize,
}

impl RowPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record of `count` rows after the previous ones.
    ///
    /// Returns `None`, leaving the plan unchanged, when the total would
    /// overflow.
    pub fn push(&mut self, count: usize) -> Option<Range<usize>> {
        let end = self.total.checked_add(count)?;
        let range = self.total..end;
        self.ranges.push(range.clone());
        self.total = end;
        Some(range)
    }

    /// Lays records out back to back given each one's point count.
    pub fn from_counts<I: IntoIterator<Item = usize>>(counts: I) -> Option<Self> {
        let mut plan = Self::new();
        for count in counts {
            plan.push(count)?;
        }
        Some(plan)
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Total rows across every record.
    pub fn total(&self) -> usize {
        self.total
    }
}

/// All points of one file, one row per point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointAccumulator {
    rows: Vec<PointRow>,
}

impl PointAccumulator {
    /// Allocates exactly `plan.total()` zeroed rows.
    pub fn with_plan(plan: &RowPlan) -> Self {
        Self {
            rows: vec![[0.0; 6]; plan.total()],
        }
    }

    /// Splits the buffer into one mutable slice per planned range.
    ///
    /// The slices do not overlap, so each can be filled independently.
    pub fn slices_mut(&mut self, plan: &RowPlan) -> Vec<&mut [PointRow]> {
        let mut slices = Vec::with_capacity(plan.ranges().len());
        let mut rest: &mut [PointRow] = &mut self.rows;
        for range in plan.ranges() {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            slices.push(head);
            rest = tail;
        }
        slices
    }

    /// Drops every row from `len` onwards.
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    pub fn rows(&self) -> &[PointRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when no row has a non-zero z, e.g. for z-omitted clouds.
    pub fn z_is_zero(&self) -> bool {
        self.rows.iter().all(|row| row[4] == 0.0)
    }
}

/// Writes one record's points into its slice.
///
/// Returns the number of rows written; `matrix` longer than `dest` is cut to
/// fit and a shorter one leaves the remaining rows untouched.
pub fn fill_rows(
    dest: &mut [PointRow],
    system_timestamp: f64,
    lidar_timestamp: f64,
    matrix: &PointMatrix,
) -> usize {
    let n = dest.len().min(matrix.rows.len());
    for (row, point) in dest[..n].iter_mut().zip(&matrix.rows) {
        *row = [
            system_timestamp,
            lidar_timestamp,
            point[0] as f64,
            point[1] as f64,
            point[2] as f64,
            point[3] as f64,
        ];
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::CanonicalLayout;

    #[test]
    fn test_plan_ranges_are_contiguous() {
        let plan = RowPlan::from_counts([3, 0, 2]).unwrap();
        assert_eq!(plan.ranges(), &[0..3, 3..3, 3..5]);
        assert_eq!(plan.total(), 5);
    }

    #[test]
    fn test_plan_rejects_overflowing_total() {
        assert!(RowPlan::from_counts([usize::MAX, 1]).is_none());

        let mut plan = RowPlan::new();
        assert_eq!(plan.push(4), Some(0..4));
        assert_eq!(plan.push(usize::MAX), None);
        assert_eq!(plan.total(), 4);
        assert_eq!(plan.ranges().len(), 1);
    }

    #[test]
    fn test_slices_follow_plan() {
        let plan = RowPlan::from_counts([2, 1]).unwrap();
        let mut acc = PointAccumulator::with_plan(&plan);
        let matrix = PointMatrix {
            layout: CanonicalLayout::Xyzi,
            rows: vec![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]],
        };
        let single = PointMatrix {
            layout: CanonicalLayout::Xyzi,
            rows: vec![[9.0, 9.0, 9.0, 9.0]],
        };

        {
            let mut slices = acc.slices_mut(&plan);
            assert_eq!(slices.len(), 2);
            assert_eq!(fill_rows(&mut *slices[1], 20.0, 2.0, &single), 1);
            assert_eq!(fill_rows(&mut *slices[0], 10.0, 1.0, &matrix), 2);
        }

        assert_eq!(acc.rows()[0], [10.0, 1.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(acc.rows()[1], [10.0, 1.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(acc.rows()[2], [20.0, 2.0, 9.0, 9.0, 9.0, 9.0]);
        assert!(!acc.z_is_zero());
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        let plan = RowPlan::from_counts([2, 2]).unwrap();
        let mut acc = PointAccumulator::with_plan(&plan);
        acc.truncate(plan.ranges()[1].start);
        assert_eq!(acc.len(), 2);
        assert!(acc.z_is_zero());
    }
}
