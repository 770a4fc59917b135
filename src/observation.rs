//! Per-device observation registry
//!
//! One registry exists per connected device. It tracks Single and Composite
//! observations and the stored NOTIFICATION attributes, and enforces the
//! non-overlap rule: no two registered paths may be equal or in a
//! containment relation. All mutations go through one mutex per device so
//! registration-update events and operator RPCs never interleave partially.
//! No resource-tree I/O happens while the lock is held.

use crate::attributes::NotificationAttributes;
use crate::error::{Lwm2mError, Result};
use crate::path::ResourcePath;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// A registered subscription on one device
#[derive(Debug, Clone)]
pub struct Observation {
    kind: ObservationKind,
    paths: Vec<ResourcePath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Single,
    Composite,
}

impl Observation {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            ObservationKind::Single => "SingleObservation",
            ObservationKind::Composite => "CompositeObservation",
        }
    }

    fn rendered_paths(&self) -> String {
        self.paths
            .iter()
            .map(ResourcePath::render)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Registry listing tag, e.g. `SingleObservation:/3/0/9`
    fn describe(&self) -> String {
        match self.kind {
            ObservationKind::Single => format!("SingleObservation:{}", self.paths[0]),
            ObservationKind::Composite => {
                format!("CompositeObservation: [{}]", self.rendered_paths())
            }
        }
    }
}

/// Result of a single-path registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    Registered,
    /// The exact path was already registered as a Single observation
    AlreadyRegistered,
}

#[derive(Debug, Default)]
struct RegistryState {
    observations: Vec<Observation>,
    attributes: HashMap<String, NotificationAttributes>,
    last_notified: HashMap<String, Instant>,
}

/// Observation and attribute state for one device identity
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Single observation, idempotent for an exact repeat
    pub fn observe_single(&self, path: ResourcePath) -> Result<ObserveOutcome> {
        let mut state = self.lock();
        for existing in &state.observations {
            if existing.kind == ObservationKind::Single && existing.paths[0] == path {
                debug!(path = %path, "observation already registered");
                return Ok(ObserveOutcome::AlreadyRegistered);
            }
            if let Some(conflict) = existing.paths.iter().find(|p| p.overlaps(&path)) {
                return Err(conflict_error(&path, existing, conflict));
            }
        }
        debug!(path = %path, "observation registered");
        state.observations.push(Observation {
            kind: ObservationKind::Single,
            paths: vec![path],
        });
        Ok(ObserveOutcome::Registered)
    }

    /// Register a Composite observation atomically
    ///
    /// The whole path set is validated first, against itself and against all
    /// existing registrations; nothing is stored on failure.
    pub fn observe_composite(&self, paths: Vec<ResourcePath>) -> Result<()> {
        if paths.is_empty() {
            return Err(Lwm2mError::BadRequest(
                "Composite observation requires at least one path!".to_string(),
            ));
        }
        for (index, first) in paths.iter().enumerate() {
            for second in &paths[index + 1..] {
                if first.overlaps(second) {
                    return Err(Lwm2mError::BadRequest(format!(
                        "Invalid path list :  {} and {} are overlapped paths",
                        first, second
                    )));
                }
            }
        }
        let mut state = self.lock();
        for candidate in &paths {
            for existing in &state.observations {
                if let Some(conflict) = existing.paths.iter().find(|p| p.overlaps(candidate)) {
                    return Err(conflict_error(candidate, existing, conflict));
                }
            }
        }
        debug!(paths = %paths.len(), "composite observation registered");
        state.observations.push(Observation {
            kind: ObservationKind::Composite,
            paths,
        });
        Ok(())
    }

    /// Cancel the Single observation exactly matching `path`
    ///
    /// Prefix matches never cancel: a registered parent is not touched by
    /// canceling one of its children, and composite members cannot be
    /// canceled individually.
    pub fn cancel_single(&self, path: &ResourcePath) -> Result<usize> {
        let mut state = self.lock();
        let position = state
            .observations
            .iter()
            .position(|obs| obs.kind == ObservationKind::Single && &obs.paths[0] == path);
        match position {
            Some(index) => {
                state.observations.remove(index);
                debug!(path = %path, "observation canceled");
                Ok(1)
            }
            None => Err(Lwm2mError::BadRequest(format!(
                "Could not find active Observe component with path: {}",
                path
            ))),
        }
    }

    /// Cancel the Composite observation with exactly this path set
    pub fn cancel_composite(&self, paths: &[ResourcePath]) -> Result<usize> {
        let mut state = self.lock();
        let position = state.observations.iter().position(|obs| {
            obs.kind == ObservationKind::Composite
                && obs.paths.len() == paths.len()
                && obs.paths.iter().all(|p| paths.contains(p))
        });
        match position {
            Some(index) => {
                state.observations.remove(index);
                Ok(1)
            }
            None => Err(Lwm2mError::BadRequest(format!(
                "Could not find active Observe Composite component with paths: [{}]",
                paths
                    .iter()
                    .map(ResourcePath::render)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Cancel every observation, returning how many were removed
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        let count = state.observations.len();
        state.observations.clear();
        count
    }

    /// Listing tags for every active observation
    pub fn read_all(&self) -> Vec<String> {
        self.lock().observations.iter().map(Observation::describe).collect()
    }

    /// Number of active observations
    pub fn observation_count(&self) -> usize {
        self.lock().observations.len()
    }

    /// Every path under observation, composites flattened
    pub fn observed_paths(&self) -> Vec<ResourcePath> {
        self.lock()
            .observations
            .iter()
            .flat_map(|obs| obs.paths.iter().cloned())
            .collect()
    }

    /// Merge a WriteAttributes payload into the stored attributes for `path`
    pub fn write_attributes(&self, path: &ResourcePath, update: &NotificationAttributes) {
        let mut state = self.lock();
        state
            .attributes
            .entry(path.render())
            .or_default()
            .merge(update);
    }

    /// Snapshot of stored attributes, keyed by rendered path
    pub fn attributes(&self) -> HashMap<String, NotificationAttributes> {
        self.lock().attributes.clone()
    }

    /// Observed paths due for an update emission at `now`, stamped as notified
    ///
    /// Called on each device registration-update event. A path is due unless
    /// its stored `pmin` says the last emission was too recent; `pmax` forces
    /// emission once exceeded regardless of `pmin`.
    pub fn due_for_update(&self, now: Instant) -> Vec<ResourcePath> {
        let mut state = self.lock();
        let mut due = Vec::new();
        let paths: Vec<ResourcePath> = state
            .observations
            .iter()
            .flat_map(|obs| obs.paths.iter().cloned())
            .collect();
        for path in paths {
            let key = path.render();
            let is_due = match state.last_notified.get(&key) {
                None => true,
                Some(last) => {
                    let elapsed = now.saturating_duration_since(*last).as_secs();
                    let attrs = state.attributes.get(&key);
                    let pmin = attrs.and_then(|a| a.pmin).unwrap_or(0);
                    let pmax = attrs.and_then(|a| a.pmax);
                    elapsed >= pmin || pmax.is_some_and(|max| elapsed >= max)
                }
            };
            if is_due {
                state.last_notified.insert(key, now);
                due.push(path);
            }
        }
        due
    }

    /// Drop all state on device deregistration
    pub fn clear(&self) {
        let mut state = self.lock();
        state.observations.clear();
        state.attributes.clear();
        state.last_notified.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        // A poisoned registry lock cannot be recovered per-device anyway;
        // take the state as it stands.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn conflict_error(
    candidate: &ResourcePath,
    existing: &Observation,
    conflict: &ResourcePath,
) -> Lwm2mError {
    if candidate == conflict {
        return Lwm2mError::BadRequest(format!("{} is already registered", candidate));
    }
    let rendered = match existing.kind {
        ObservationKind::Single => conflict.render(),
        ObservationKind::Composite => existing.rendered_paths(),
    };
    Lwm2mError::BadRequest(format!(
        "Path {} conflict with is already registered as {} [{}]",
        candidate,
        existing.kind_name(),
        rendered
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn path(text: &str) -> ResourcePath {
        ResourcePath::parse(text).unwrap()
    }

    #[test]
    fn test_single_registration_and_idempotent_repeat() {
        let registry = DeviceRegistry::new();
        assert_eq!(
            registry.observe_single(path("/3/0/9")).unwrap(),
            ObserveOutcome::Registered
        );
        assert_eq!(
            registry.observe_single(path("/3/0/9")).unwrap(),
            ObserveOutcome::AlreadyRegistered
        );
        assert_eq!(registry.observation_count(), 1);
    }

    #[test]
    fn test_parent_rejected_when_children_observed() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/5/0/7")).unwrap();
        registry.observe_single(path("/5/0/5")).unwrap();
        registry.observe_single(path("/5/0/3")).unwrap();

        let err = registry.observe_single(path("/5")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("conflict with is already registered as SingleObservation ["));
        assert_eq!(registry.observation_count(), 3);
    }

    #[test]
    fn test_child_rejected_when_parent_observed() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/5/0")).unwrap();
        assert!(registry.observe_single(path("/5/0/7")).is_err());
    }

    #[test]
    fn test_composite_intra_set_overlap() {
        let registry = DeviceRegistry::new();
        let err = registry
            .observe_composite(vec![path("/5/0"), path("/5/0/2")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid path list :  /5/0 and /5/0/2 are overlapped paths"
        );
        assert_eq!(registry.observation_count(), 0);
    }

    #[test]
    fn test_composite_conflict_with_existing_is_atomic() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/3/0/9")).unwrap();
        let err = registry
            .observe_composite(vec![path("/19/0/0"), path("/3/0/9")])
            .unwrap_err();
        assert_eq!(err.to_string(), "/3/0/9 is already registered");
        // No member of the failed set was registered.
        assert_eq!(registry.observation_count(), 1);
        assert!(registry.cancel_single(&path("/19/0/0")).is_err());
    }

    #[test]
    fn test_cancel_is_exact_match_only() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/5/0")).unwrap();
        assert!(registry.cancel_single(&path("/5/0/7")).is_err());
        assert_eq!(registry.cancel_single(&path("/5/0")).unwrap(), 1);
        assert_eq!(registry.observation_count(), 0);
    }

    #[test]
    fn test_composite_member_not_cancellable_individually() {
        let registry = DeviceRegistry::new();
        registry
            .observe_composite(vec![path("/3/0/9"), path("/19/0/0")])
            .unwrap();
        assert!(registry.cancel_single(&path("/3/0/9")).is_err());
        let err = registry.cancel_composite(&[path("/3/0/9")]).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Could not find active Observe Composite component with paths: ["));
        assert_eq!(
            registry
                .cancel_composite(&[path("/19/0/0"), path("/3/0/9")])
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_read_all_tags() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/3/0/9")).unwrap();
        registry
            .observe_composite(vec![path("/5/0/7"), path("/5/0/5")])
            .unwrap();
        let listing = registry.read_all();
        assert_eq!(listing[0], "SingleObservation:/3/0/9");
        assert_eq!(listing[1], "CompositeObservation: [/5/0/7, /5/0/5]");
    }

    #[test]
    fn test_cancel_all_returns_count() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/3/0/9")).unwrap();
        registry.observe_single(path("/5/0/7")).unwrap();
        assert_eq!(registry.cancel_all(), 2);
        assert_eq!(registry.cancel_all(), 0);
    }

    #[test]
    fn test_pmin_throttles_updates() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/3/0/9")).unwrap();
        let attrs = NotificationAttributes {
            pmin: Some(10),
            ..Default::default()
        };
        registry.write_attributes(&path("/3/0/9"), &attrs);

        let start = Instant::now();
        // First evaluation always emits.
        assert_eq!(registry.due_for_update(start).len(), 1);
        // Within pmin nothing is due.
        assert!(registry
            .due_for_update(start + Duration::from_secs(5))
            .is_empty());
        // Once pmin has elapsed the path is due again.
        assert_eq!(
            registry.due_for_update(start + Duration::from_secs(10)).len(),
            1
        );
    }

    #[test]
    fn test_attribute_merge_keeps_existing_fields() {
        let registry = DeviceRegistry::new();
        registry.write_attributes(
            &path("/3/0"),
            &NotificationAttributes {
                pmax: Some(65),
                pmin: Some(5),
                ..Default::default()
            },
        );
        registry.write_attributes(
            &path("/3/0"),
            &NotificationAttributes {
                pmax: Some(100),
                ..Default::default()
            },
        );
        let stored = registry.attributes();
        assert_eq!(stored["/3/0"].pmax, Some(100));
        assert_eq!(stored["/3/0"].pmin, Some(5));
    }

    #[test]
    fn test_clear_drops_everything() {
        let registry = DeviceRegistry::new();
        registry.observe_single(path("/3/0/9")).unwrap();
        registry.write_attributes(
            &path("/3/0/9"),
            &NotificationAttributes {
                pmin: Some(1),
                ..Default::default()
            },
        );
        registry.clear();
        assert_eq!(registry.observation_count(), 0);
        assert!(registry.attributes().is_empty());
    }
}
