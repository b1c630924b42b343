//! Replica/partition placement tables.

use crate::{Error, Result};
use std::fmt;
use std::ops::Index;

/// Process-unique identifier of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One slot of a distributed execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalDeviceIds {
    pub replica: usize,
    pub partition: usize,
}

impl LogicalDeviceIds {
    pub fn new(replica: usize, partition: usize) -> Self {
        Self { replica, partition }
    }
}

impl fmt::Display for LogicalDeviceIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(replica {}, partition {})", self.replica, self.partition)
    }
}

/// Table mapping each (replica, partition) pair to a device.
///
/// Stored row-major by replica: `cells[replica * computation_count + partition]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAssignment {
    replica_count: usize,
    computation_count: usize,
    cells: Vec<DeviceId>,
}

impl DeviceAssignment {
    /// Build a table by evaluating `f(replica, partition)` for every cell.
    pub fn from_fn(
        replica_count: usize,
        computation_count: usize,
        mut f: impl FnMut(usize, usize) -> DeviceId,
    ) -> Self {
        let mut cells = Vec::with_capacity(replica_count * computation_count);
        for replica in 0..replica_count {
            for partition in 0..computation_count {
                cells.push(f(replica, partition));
            }
        }
        Self {
            replica_count,
            computation_count,
            cells,
        }
    }

    /// Build a table from one row per replica.
    ///
    /// Every row must have the same, non-zero number of partitions.
    pub fn from_rows(rows: Vec<Vec<DeviceId>>) -> Result<Self> {
        let computation_count = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || computation_count == 0 {
            return Err(Error::InvalidArgument(
                "device assignment needs at least one replica and one partition".to_string(),
            ));
        }
        if let Some((replica, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != computation_count)
        {
            return Err(Error::InvalidArgument(format!(
                "replica {replica} has {} partitions, expected {computation_count}",
                row.len()
            )));
        }

        Ok(Self {
            replica_count: rows.len(),
            computation_count,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    pub fn computation_count(&self) -> usize {
        self.computation_count
    }

    /// Device of one cell, or `None` when the coordinates are out of range.
    pub fn get(&self, replica: usize, partition: usize) -> Option<DeviceId> {
        if replica >= self.replica_count || partition >= self.computation_count {
            return None;
        }
        self.cells.get(replica * self.computation_count + partition).copied()
    }

    /// Iterate over all cells in (replica, partition) order.
    pub fn iter(&self) -> impl Iterator<Item = (LogicalDeviceIds, DeviceId)> + '_ {
        let computation_count = self.computation_count;
        self.cells.iter().enumerate().map(move |(i, &device)| {
            (
                LogicalDeviceIds::new(i / computation_count, i % computation_count),
                device,
            )
        })
    }

    /// Logical slot a device is assigned to, if any.
    pub fn logical_ids_for_device(&self, device: DeviceId) -> Option<LogicalDeviceIds> {
        self.iter().find(|&(_, d)| d == device).map(|(ids, _)| ids)
    }
}

impl Index<(usize, usize)> for DeviceAssignment {
    type Output = DeviceId;

    fn index(&self, (replica, partition): (usize, usize)) -> &DeviceId {
        assert!(
            replica < self.replica_count && partition < self.computation_count,
            "cell ({replica}, {partition}) out of range for {}x{} assignment",
            self.replica_count,
            self.computation_count
        );
        &self.cells[replica * self.computation_count + partition]
    }
}

impl fmt::Display for DeviceAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "DeviceAssignment({} replicas x {} partitions)",
            self.replica_count, self.computation_count
        )?;
        for (replica, row) in self.cells.chunks(self.computation_count.max(1)).enumerate() {
            let row: Vec<String> = row.iter().map(|d| d.to_string()).collect();
            writeln!(f, "  replica {replica}: [{}]", row.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_layout() {
        let assignment = DeviceAssignment::from_fn(2, 3, |r, p| DeviceId((p * 2 + r) as u32));
        assert_eq!(assignment.replica_count(), 2);
        assert_eq!(assignment.computation_count(), 3);
        assert_eq!(assignment[(1, 2)], DeviceId(5));
        assert_eq!(assignment.get(0, 1), Some(DeviceId(2)));
        assert_eq!(assignment.get(2, 0), None);
        assert_eq!(assignment.get(0, 3), None);
    }

    #[test]
    fn test_iter_order() {
        let assignment = DeviceAssignment::from_fn(2, 2, |r, p| DeviceId((r * 10 + p) as u32));
        let cells: Vec<_> = assignment.iter().collect();
        assert_eq!(
            cells,
            vec![
                (LogicalDeviceIds::new(0, 0), DeviceId(0)),
                (LogicalDeviceIds::new(0, 1), DeviceId(1)),
                (LogicalDeviceIds::new(1, 0), DeviceId(10)),
                (LogicalDeviceIds::new(1, 1), DeviceId(11)),
            ]
        );
        assert_eq!(
            assignment.logical_ids_for_device(DeviceId(10)),
            Some(LogicalDeviceIds::new(1, 0))
        );
        assert_eq!(assignment.logical_ids_for_device(DeviceId(7)), None);
    }

    #[test]
    fn test_from_rows_validation() {
        assert!(DeviceAssignment::from_rows(vec![]).is_err());
        assert!(DeviceAssignment::from_rows(vec![vec![]]).is_err());
        assert!(
            DeviceAssignment::from_rows(vec![vec![DeviceId(0)], vec![DeviceId(1), DeviceId(2)]])
                .is_err()
        );

        let assignment =
            DeviceAssignment::from_rows(vec![vec![DeviceId(3)], vec![DeviceId(1)]]).unwrap();
        assert_eq!(assignment[(1, 0)], DeviceId(1));
    }

    #[test]
    fn test_display() {
        let assignment = DeviceAssignment::from_fn(2, 1, |r, _| DeviceId(r as u32));
        let text = assignment.to_string();
        assert!(text.contains("2 replicas x 1 partitions"));
        assert!(text.contains("replica 1: [1]"));
    }
}
