use std::collections::BTreeMap;

use formats::LocationRecord;
use foundation::math::{CoordinateMapper, Vec2};
use serde::Serialize;

use crate::cluster::ClusterPolicy;

/// Live state of one marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerState {
    pub id: String,
    pub record: LocationRecord,
    pub render_position: Vec2,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

impl MarkerState {
    pub fn new(record: LocationRecord, mapper: &CoordinateMapper) -> Self {
        Self {
            id: record.id.clone(),
            render_position: mapper.project(record.lat, record.lon),
            record,
            cluster_id: None,
        }
    }
}

/// Changes produced by one reconciliation. Every list is sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    pub created: Vec<MarkerState>,
    pub updated: Vec<MarkerState>,
    pub removed: Vec<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.removed.len()
    }
}

/// Authoritative id -> marker map.
///
/// Ordering contract:
/// - Entries are keyed in a `BTreeMap`, so iteration and diff lists are in
///   ascending id order regardless of how the input was built.
///
/// A reconciliation stages the complete next map and swaps it in at the end;
/// no partially reconciled state is ever stored.
#[derive(Debug, Default, Clone)]
pub struct MarkerRegistry {
    markers: BTreeMap<String, MarkerState>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MarkerState> {
        self.markers.get(id)
    }

    /// Sorted copy of every marker.
    pub fn markers(&self) -> Vec<MarkerState> {
        self.markers.values().cloned().collect()
    }

    /// Diffs `records` against the current state and commits the result.
    pub fn reconcile(
        &mut self,
        records: BTreeMap<String, LocationRecord>,
        mapper: &CoordinateMapper,
    ) -> DiffResult {
        self.reconcile_clustered(records, mapper, None)
    }

    /// Like [`MarkerRegistry::reconcile`], with an optional cluster pass over
    /// the staged state before it is committed.
    ///
    /// A marker whose `cluster_id` changes is reported as updated even when its
    /// record did not change. Without a policy, existing cluster ids are kept.
    pub fn reconcile_clustered(
        &mut self,
        records: BTreeMap<String, LocationRecord>,
        mapper: &CoordinateMapper,
        policy: Option<&ClusterPolicy>,
    ) -> DiffResult {
        let mut staged: BTreeMap<String, MarkerState> = BTreeMap::new();

        for (id, record) in records {
            let marker = match self.markers.get(&id) {
                None => MarkerState::new(record, mapper),
                Some(current) if current.record == record => current.clone(),
                Some(current) => {
                    let render_position = if record.moved_from(&current.record) {
                        mapper.project(record.lat, record.lon)
                    } else {
                        current.render_position
                    };
                    MarkerState {
                        id: id.clone(),
                        record,
                        render_position,
                        cluster_id: current.cluster_id.clone(),
                    }
                }
            };
            staged.insert(id, marker);
        }

        if let Some(policy) = policy {
            let assignments = policy.assign(staged.values());
            for (id, marker) in staged.iter_mut() {
                marker.cluster_id = assignments.get(id).cloned();
            }
        }

        let mut diff = DiffResult::default();
        for (id, marker) in &staged {
            match self.markers.get(id) {
                None => diff.created.push(marker.clone()),
                Some(current) if current != marker => diff.updated.push(marker.clone()),
                Some(_) => {}
            }
        }
        diff.removed = self
            .markers
            .keys()
            .filter(|id| !staged.contains_key(*id))
            .cloned()
            .collect();

        self.markers = staged;
        diff
    }
}
