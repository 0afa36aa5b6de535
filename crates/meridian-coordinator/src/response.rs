//! Collection of replica responses for one read.
//!
//! A [`ResponseSet`] is owned exclusively by its read's coordinator; it
//! needs no synchronization. An absent replica simply never appears in
//! the set: absence does not participate in the merge and is never a
//! repair target.

use std::collections::BTreeMap;

use meridian_types::{ColumnSet, Digest, ReplicaId, Row};

use crate::message::ReadPayload;

/// One replica's recorded answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaResponse {
    /// Full row data for the requested columns.
    Data(Row),

    /// Digest of the repairable row content.
    Digest(Digest),
}

/// Responses received so far for one read.
#[derive(Debug)]
pub struct ResponseSet {
    columns: ColumnSet,
    responses: BTreeMap<ReplicaId, ReplicaResponse>,
}

impl ResponseSet {
    /// Creates an empty set for the read's column projection.
    pub fn new(columns: ColumnSet) -> Self {
        Self {
            columns,
            responses: BTreeMap::new(),
        }
    }

    /// Records a response.
    ///
    /// A data response upgrades an earlier digest from the same replica
    /// (the repair data round re-asks digest responders for full data).
    /// Anything else arriving twice from one replica is dropped.
    pub fn record(&mut self, from: ReplicaId, payload: ReadPayload) {
        match (payload, self.responses.get(&from)) {
            (ReadPayload::Data(row), None | Some(ReplicaResponse::Digest(_))) => {
                self.responses.insert(from, ReplicaResponse::Data(row));
            }
            (ReadPayload::Digest(digest), None) => {
                self.responses.insert(from, ReplicaResponse::Digest(digest));
            }
            _ => {}
        }
    }

    /// Returns the number of replicas that have answered.
    pub fn total(&self) -> usize {
        self.responses.len()
    }

    /// Returns the number of full-data responses.
    pub fn data_count(&self) -> usize {
        self.data_rows().count()
    }

    /// Returns true if the replica has answered at all.
    pub fn contains(&self, replica: ReplicaId) -> bool {
        self.responses.contains_key(&replica)
    }

    /// Iterates over the replicas that have answered.
    pub fn replicas(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.responses.keys().copied()
    }

    /// Returns true if the replica has answered with full data.
    pub fn has_data(&self, replica: ReplicaId) -> bool {
        matches!(self.responses.get(&replica), Some(ReplicaResponse::Data(_)))
    }

    /// Iterates over the full-data responses.
    pub fn data_rows(&self) -> impl Iterator<Item = (ReplicaId, &Row)> {
        self.responses.iter().filter_map(|(id, r)| match r {
            ReplicaResponse::Data(row) => Some((*id, row)),
            ReplicaResponse::Digest(_) => None,
        })
    }

    /// Iterates over the digest-only responses.
    pub fn digests(&self) -> impl Iterator<Item = (ReplicaId, Digest)> + '_ {
        self.responses.iter().filter_map(|(id, r)| match r {
            ReplicaResponse::Digest(digest) => Some((*id, *digest)),
            ReplicaResponse::Data(_) => None,
        })
    }

    /// Returns true if every received response carries the same digest.
    ///
    /// Data responses are hashed with the read's column projection so they
    /// compare against digest responses. An empty or single-response set
    /// is trivially consistent.
    pub fn digests_consistent(&self) -> bool {
        let mut seen: Option<Digest> = None;
        for response in self.responses.values() {
            let digest = match response {
                ReplicaResponse::Data(row) => row.digest(&self.columns),
                ReplicaResponse::Digest(digest) => *digest,
            };
            match seen {
                Some(previous) if previous != digest => return false,
                Some(_) => {}
                None => seen = Some(digest),
            }
        }
        true
    }

    /// Returns the column projection this set was built for.
    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }
}
