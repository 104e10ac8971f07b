use super::lifecycle::ResourceState;
use super::resource::{Resource, ResourceId};
use ahash::{AHashMap, AHashSet};
use serde::Serialize;

/// A resource whose observed state changed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: Resource,
    /// `None` once the backend no longer reports the resource.
    pub current: Option<Resource>,
}

impl Transition {
    pub fn id(&self) -> ResourceId {
        self.previous.id()
    }

    pub fn previous_state(&self) -> ResourceState {
        self.previous.state()
    }

    pub fn current_state(&self) -> Option<ResourceState> {
        self.current.as_ref().map(Resource::state)
    }
}

/// Counts shown on the fleet dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetSummary {
    pub total: usize,
    pub running: usize,
    pub provisioning: usize,
    pub failed: usize,
    pub in_flight: usize,
    /// Polls are currently failing; counts describe the last good snapshot.
    pub degraded: bool,
}

/// Last observed set of resources (no IO, no locks).
///
/// Owned by the reconciler actor, which is its only writer.
#[derive(Debug, Default)]
pub struct Registry {
    resources: Vec<Resource>,
    index: AHashMap<ResourceId, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot in creation order.
    pub fn list(&self) -> Vec<Resource> {
        self.resources.clone()
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.index.get(&id).and_then(|&pos| self.resources.get(pos))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn any_transitional(&self) -> bool {
        self.resources.iter().any(|r| r.state().is_transitional())
    }

    pub fn summary(&self) -> FleetSummary {
        self.resources
            .iter()
            .fold(FleetSummary::default(), |mut acc, r| {
                acc.total += 1;
                match r.state() {
                    ResourceState::Running => acc.running += 1,
                    ResourceState::Provisioning => acc.provisioning += 1,
                    ResourceState::Failed => acc.failed += 1,
                    _ => {}
                }
                if r.state().is_transitional() {
                    acc.in_flight += 1;
                }
                acc
            })
    }

    /// Swaps in a freshly fetched snapshot and returns every state change keyed by id.
    ///
    /// Resources seen for the first time are not transitions. Resources missing from
    /// the snapshot are reported with `current: None`.
    pub fn replace_all(&mut self, snapshot: Vec<Resource>) -> Vec<Transition> {
        self.replace_all_keeping(snapshot, &AHashSet::new())
    }

    /// Like [`Registry::replace_all`], but ids in `keep` that are missing from the
    /// snapshot stay as they are. Used for resources admitted after the fetch began.
    pub fn replace_all_keeping(
        &mut self,
        snapshot: Vec<Resource>,
        keep: &AHashSet<ResourceId>,
    ) -> Vec<Transition> {
        let mut next = snapshot;
        let next_index = build_index(&next);

        let mut transitions = Vec::new();
        let mut carried = Vec::new();
        for previous in &self.resources {
            match next_index.get(&previous.id()).map(|&pos| &next[pos]) {
                Some(current) if current.state() == previous.state() => {}
                Some(current) => transitions.push(Transition {
                    previous: previous.clone(),
                    current: Some(current.clone()),
                }),
                None if keep.contains(&previous.id()) => carried.push(previous.clone()),
                None => transitions.push(Transition {
                    previous: previous.clone(),
                    current: None,
                }),
            }
        }

        next.extend(carried);
        sort_by_creation(&mut next);
        self.index = build_index(&next);
        self.resources = next;
        transitions
    }

    /// Inserts a resource the backend just accepted, unless a poll already brought it in.
    ///
    /// Returns the state the registry holds for the id afterwards.
    pub fn admit(&mut self, resource: Resource) -> ResourceState {
        if let Some(existing) = self.get(resource.id()) {
            return existing.state();
        }
        let state = resource.state();
        self.resources.push(resource);
        sort_by_creation(&mut self.resources);
        self.index = build_index(&self.resources);
        state
    }
}

fn sort_by_creation(resources: &mut [Resource]) {
    resources.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });
}

fn build_index(resources: &[Resource]) -> AHashMap<ResourceId, usize> {
    resources
        .iter()
        .enumerate()
        .map(|(pos, r)| (r.id(), pos))
        .collect()
}
