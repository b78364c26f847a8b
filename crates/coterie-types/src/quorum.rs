//! Static request-set (quorum) table.
//!
//! Every process owns one request set: the processes, itself included, whose
//! votes it must collect before entering the critical section. Safety rests on
//! one property only: any two request sets intersect. The table refuses to be
//! built unless that holds.

use std::collections::{BTreeMap, BTreeSet};

use crate::{ProcessId, QuorumError};

/// Mapping from process id to its request set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSetTable {
    sets: BTreeMap<ProcessId, BTreeSet<ProcessId>>,
}

impl RequestSetTable {
    /// Build a table and validate it.
    pub fn new(sets: BTreeMap<ProcessId, BTreeSet<ProcessId>>) -> Result<Self, QuorumError> {
        let table = Self { sets };
        table.validate()?;
        Ok(table)
    }

    /// Build a table from `(process, members)` pairs of raw ids.
    pub fn from_raw<I, M>(entries: I) -> Result<Self, QuorumError>
    where
        I: IntoIterator<Item = (u32, M)>,
        M: IntoIterator<Item = u32>,
    {
        let sets = entries
            .into_iter()
            .map(|(id, members)| {
                (
                    ProcessId::new(id),
                    members.into_iter().map(ProcessId::new).collect(),
                )
            })
            .collect();
        Self::new(sets)
    }

    /// The optimal coteries known for N=3 and N=7 (the Fano plane).
    pub fn well_known(n: usize) -> Result<Self, QuorumError> {
        match n {
            3 => Self::from_raw([(1, vec![1, 2]), (2, vec![2, 3]), (3, vec![1, 3])]),
            7 => Self::from_raw([
                (1, vec![1, 2, 3]),
                (2, vec![2, 4, 6]),
                (3, vec![3, 5, 6]),
                (4, vec![1, 4, 5]),
                (5, vec![2, 5, 7]),
                (6, vec![1, 6, 7]),
                (7, vec![3, 4, 7]),
            ]),
            other => Err(QuorumError::UnsupportedSize(other)),
        }
    }

    /// Grid coterie for processes `1..=n`.
    ///
    /// Processes are laid out row-major on a `k x k` grid with
    /// `k = ceil(sqrt(n))`; a request set is the owner's row plus its column.
    /// Sets have size `O(sqrt(n))`, larger than optimal but valid for any `n`.
    pub fn grid(n: usize) -> Result<Self, QuorumError> {
        if n == 0 {
            return Err(QuorumError::Empty);
        }
        let k = (1..=n).find(|k| k * k >= n).unwrap_or(n);
        let id = |idx: usize| ProcessId::new(idx as u32 + 1);

        let sets = (0..n)
            .map(|idx| {
                let (row, col) = (idx / k, idx % k);
                let row_members = (0..k).map(|c| row * k + c).filter(|&i| i < n);
                let col_members = (0..k).map(|r| r * k + col).filter(|&i| i < n);
                let members: BTreeSet<ProcessId> = row_members.chain(col_members).map(id).collect();
                (id(idx), members)
            })
            .collect();
        Self::new(sets)
    }

    /// Well-known coterie when one exists, grid coterie otherwise.
    pub fn for_size(n: usize) -> Result<Self, QuorumError> {
        match Self::well_known(n) {
            Err(QuorumError::UnsupportedSize(_)) => Self::grid(n),
            other => other,
        }
    }

    /// Return `true` if [`RequestSetTable::well_known`] covers `n`.
    pub fn has_well_known(n: usize) -> bool {
        matches!(n, 3 | 7)
    }

    /// Check self-membership, known members, and pairwise intersection.
    pub fn validate(&self) -> Result<(), QuorumError> {
        if self.sets.is_empty() {
            return Err(QuorumError::Empty);
        }

        for (&process, members) in &self.sets {
            if !members.contains(&process) {
                return Err(QuorumError::SelfNotMember(process));
            }
            if let Some(&member) = members.iter().find(|m| !self.sets.contains_key(*m)) {
                return Err(QuorumError::UnknownMember { process, member });
            }
        }

        let entries: Vec<_> = self.sets.iter().collect();
        for (i, (a, set_a)) in entries.iter().enumerate() {
            for (b, set_b) in &entries[i + 1..] {
                if set_a.is_disjoint(set_b) {
                    return Err(QuorumError::Disjoint(**a, **b));
                }
            }
        }

        Ok(())
    }

    /// Request set of `process`.
    pub fn request_set(&self, process: ProcessId) -> Result<&BTreeSet<ProcessId>, QuorumError> {
        self.sets
            .get(&process)
            .ok_or(QuorumError::MissingRequestSet(process))
    }

    /// All processes in the table, ascending.
    pub fn processes(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.sets.keys().copied()
    }

    /// Number of processes in the table.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Return `true` if the table is empty (never the case for a validated table).
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Iterate `(process, request set)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, &BTreeSet<ProcessId>)> {
        self.sets.iter().map(|(p, s)| (*p, s))
    }
}
