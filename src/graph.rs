// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use indexmap::{IndexMap, IndexSet};
use log::{log_enabled, trace};

use crate::errors::EskyError;
use crate::summary::KnownFile;
use crate::types::Application;
use crate::version::VersionNumber;

const LOGNAME: &str = "esky::graph";

/// Directed graph of versions, with summary artifacts as the edges. An
/// edge leads from every version matching its `from_versions` to the
/// version it produces; edge weights are [`KnownFile::cost`].
#[derive(Debug)]
pub(crate) struct UpgradeGraph {
    app: Application,
    versions: IndexSet<VersionNumber>,
    files: IndexSet<KnownFile>,
    upgrades: IndexMap<VersionNumber, IndexSet<KnownFile>>,
}

impl UpgradeGraph {
    pub(crate) fn new(known_files: &[KnownFile], app: &Application) -> UpgradeGraph {
        let mut graph = UpgradeGraph {
            app: app.clone(),
            versions: IndexSet::new(),
            files: IndexSet::new(),
            upgrades: IndexMap::new(),
        };

        for file in known_files {
            if file.app_name != app.name() || file.platform != app.platform() {
                continue;
            }
            graph.add_file(file.clone());
        }

        graph
    }

    /// An edge is admitted only when the source matches the file's
    /// `from_versions` and the file strictly upgrades it. Full installs
    /// upgrade the empty version; incomparable pairs and self-edges are
    /// never admitted.
    fn is_upgrade(source: &VersionNumber, file: &KnownFile) -> bool {
        if !source.in_any(&file.from_versions) {
            return false;
        }
        if source.is_empty() {
            return true;
        }
        matches!(source.compare(&file.version), Ok(Ordering::Less))
    }

    pub(crate) fn add_file(&mut self, file: KnownFile) {
        if !self.versions.contains(&file.version) {
            self.new_version(file.version.clone());
        }

        let sources: Vec<VersionNumber> = self
            .versions
            .iter()
            .filter(|version| Self::is_upgrade(version, &file))
            .cloned()
            .collect();
        for source in sources {
            self.upgrades
                .entry(source)
                .or_insert_with(IndexSet::new)
                .insert(file.clone());
        }

        self.files.insert(file);
    }

    /// Register a version node and wire its outgoing edges from the files
    /// already known.
    fn new_version(&mut self, version: VersionNumber) {
        self.versions.insert(version.clone());

        let outgoing: IndexSet<KnownFile> = self
            .files
            .iter()
            .filter(|file| Self::is_upgrade(&version, file))
            .cloned()
            .collect();
        self.upgrades.insert(version, outgoing);
    }

    pub(crate) fn ensure_version(&mut self, version: &VersionNumber) {
        if !self.versions.contains(version) {
            self.new_version(version.clone());
        }
    }

    /// Drop an artifact, e.g. after a failed download or patch. When the
    /// last file producing a version goes away, so does the version node.
    pub(crate) fn remove_file(&mut self, file: &KnownFile) {
        self.files.shift_remove(file);

        let still_produced = self.files.iter().any(|other| other.version == file.version);
        if !still_produced {
            self.versions.shift_remove(&file.version);
        }

        for (_, edges) in self.upgrades.iter_mut() {
            edges.shift_remove(file);
        }
    }

    /// All versions reachable from `source`, including `source` itself,
    /// which is registered if the summary didn't mention it.
    pub(crate) fn get_versions(&mut self, source: &VersionNumber) -> IndexSet<VersionNumber> {
        self.ensure_version(source);

        let mut reached = IndexSet::new();
        reached.insert(source.clone());
        let mut just_reached = vec![source.clone()];

        while let Some(version) = just_reached.pop() {
            if let Some(edges) = self.upgrades.get(&version) {
                for edge in edges {
                    if reached.insert(edge.version.clone()) {
                        just_reached.push(edge.version.clone());
                    }
                }
            }
        }

        reached
    }

    /// Lowest-cost sequence of artifacts from `source` to `target`:
    /// Dijkstra, stopping as soon as the target is finalized. Stale queue
    /// entries are discarded at pop time; edges leading past the target
    /// are pruned, since no edge ever lowers the version again.
    pub(crate) fn get_best_path(
        &self,
        source: &VersionNumber,
        target: &VersionNumber,
    ) -> Result<Vec<KnownFile>, EskyError> {
        let mut status: HashMap<VersionNumber, NodeStatus> = HashMap::new();
        status.insert(
            source.clone(),
            NodeStatus {
                previous: None,
                via: None,
                cost: 0,
                finalized: false,
            },
        );

        let mut heap = BinaryHeap::new();
        let mut sequence = 0u64;
        heap.push(Reverse(QueueEntry {
            cost: 0,
            sequence,
            node: source.clone(),
        }));

        // cost() digests the local copy of an artifact when one exists,
        // so each file's weight is computed once per search, not once
        // per relaxation.
        let mut costs: HashMap<KnownFile, u64> = HashMap::new();

        while let Some(Reverse(entry)) = heap.pop() {
            let node = entry.node;
            match status.get_mut(&node) {
                Some(state) if state.finalized => continue,
                Some(state) => state.finalized = true,
                None => continue,
            }

            if log_enabled!(log::Level::Trace) {
                trace!(
                    target: LOGNAME,
                    "finalized '{}' at cost {}",
                    node,
                    entry.cost
                );
            }

            if &node == target {
                break;
            }

            let edges = match self.upgrades.get(&node) {
                Some(edges) => edges,
                None => continue,
            };
            for edge in edges {
                let next = &edge.version;
                if matches!(next.compare(target), Ok(Ordering::Greater)) {
                    continue;
                }

                let edge_cost = match costs.get(edge).copied() {
                    Some(cost) => cost,
                    None => {
                        let cost = edge.cost(&self.app);
                        costs.insert(edge.clone(), cost);
                        cost
                    }
                };

                let new_cost = entry.cost + edge_cost;
                let improved = match status.get(next) {
                    None => true,
                    Some(state) => !state.finalized && new_cost < state.cost,
                };
                if improved {
                    sequence += 1;
                    heap.push(Reverse(QueueEntry {
                        cost: new_cost,
                        sequence,
                        node: next.clone(),
                    }));
                    status.insert(
                        next.clone(),
                        NodeStatus {
                            previous: Some(node.clone()),
                            via: Some(edge.clone()),
                            cost: new_cost,
                            finalized: false,
                        },
                    );
                }
            }
        }

        if !status.contains_key(target) {
            return Err(EskyError::NoPath {
                from: source.clone(),
                target: target.clone(),
            });
        }

        let mut path = Vec::new();
        let mut current = target;
        while let Some(state) = status.get(current) {
            match (&state.via, &state.previous) {
                (Some(file), Some(previous)) => {
                    path.push(file.clone());
                    current = previous;
                }
                _ => break,
            }
        }
        path.reverse();

        Ok(path)
    }
}

struct NodeStatus {
    previous: Option<VersionNumber>,
    via: Option<KnownFile>,
    cost: u64,
    finalized: bool,
}

struct QueueEntry {
    cost: u64,
    sequence: u64,
    node: VersionNumber,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &QueueEntry) -> bool {
        self.cost == other.cost && self.sequence == other.sequence
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &QueueEntry) -> Ordering {
        (self.cost, self.sequence).cmp(&(other.cost, other.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &QueueEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
