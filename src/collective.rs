//! Local collective trackers.
//!
//! A collective (fence, connect, disconnect, group construct) is
//! tracked locally until every expected local participant has checked
//! in. Losing a participant's connection adjusts the expected count so
//! the operation resolves with a degraded status instead of hanging.

use crate::codec::ProcId;

/// Operation family a tracker covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveKind {
    Fence,
    Connect,
    Disconnect,
    GroupConstruct,
}

/// Resolution status of a collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveStatus {
    /// Every expected participant arrived.
    Complete,
    /// A participant was lost but others remain; resolved degraded.
    PartialSuccess,
    /// The last outstanding participant was lost.
    LostConnection,
}

/// Callback fired exactly once when a tracker resolves. Receives the
/// status and the tags on which each arrived participant expects its
/// reply.
pub type CollectiveCallback = Box<dyn FnOnce(CollectiveStatus, &[(u32, u32)]) + Send>;

/// One in-flight collective.
pub struct CollectiveTracker {
    /// Operation family.
    pub kind: CollectiveKind,
    /// Full participant signature of the operation.
    pub participants: Vec<ProcId>,
    /// Local participants still expected to check in.
    pub nlocal: usize,
    /// (peer index, reply tag) for each local participant already in.
    pub arrived: Vec<(u32, u32)>,
    /// True once the upstream host has been invoked for this tracker;
    /// after that, resolution belongs to the host's completion.
    pub host_called: bool,
    /// True when the collective involves only local participants.
    pub local_only: bool,
    /// Degraded status recorded by lost-connection handling.
    pub status: CollectiveStatus,
    callback: Option<CollectiveCallback>,
}

impl CollectiveTracker {
    /// New tracker expecting `nlocal` local participants.
    pub fn new(
        kind: CollectiveKind,
        participants: Vec<ProcId>,
        nlocal: usize,
        local_only: bool,
        callback: CollectiveCallback,
    ) -> Self {
        Self {
            kind,
            participants,
            nlocal,
            arrived: Vec::new(),
            host_called: false,
            local_only,
            status: CollectiveStatus::Complete,
            callback: Some(callback),
        }
    }

    /// True when the named process belongs to this collective.
    pub fn involves(&self, id: &ProcId) -> bool {
        self.participants.iter().any(|p| p == id)
    }

    /// Record a local participant checking in with its reply tag.
    pub fn arrive(&mut self, peer_index: u32, reply_tag: u32) {
        self.arrived.push((peer_index, reply_tag));
    }

    /// True once every still-expected local participant has arrived.
    pub fn locally_complete(&self) -> bool {
        self.arrived.len() >= self.nlocal
    }

    /// Account for a lost participant: drop its arrival record, shrink
    /// the expected count, and record the degraded status.
    ///
    /// Returns the status the tracker now carries.
    pub fn lose_participant(&mut self, peer_index: u32) -> CollectiveStatus {
        self.nlocal = self.nlocal.saturating_sub(1);
        self.arrived.retain(|(idx, _)| *idx != peer_index);
        self.status = if self.nlocal > 0 {
            CollectiveStatus::PartialSuccess
        } else {
            CollectiveStatus::LostConnection
        };
        self.status
    }

    /// Fire the resolution callback. Subsequent calls are no-ops, so a
    /// tracker can never resolve twice.
    pub fn resolve(&mut self, status: CollectiveStatus) {
        if let Some(cb) = self.callback.take() {
            cb(status, &self.arrived);
        }
    }

    /// True once the callback has fired.
    pub fn is_resolved(&self) -> bool {
        self.callback.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn tracked(
        nlocal: usize,
        participants: &[ProcId],
    ) -> (Arc<Mutex<Vec<CollectiveStatus>>>, CollectiveTracker) {
        let fired: Arc<Mutex<Vec<CollectiveStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let tracker = CollectiveTracker::new(
            CollectiveKind::Fence,
            participants.to_vec(),
            nlocal,
            true,
            Box::new(move |status, _| sink.lock().unwrap().push(status)),
        );
        (fired, tracker)
    }

    fn procs(n: u32) -> Vec<ProcId> {
        (0..n).map(|r| ProcId::new("ns", r)).collect()
    }

    #[test]
    fn test_all_arrive_completes() {
        let (fired, mut trk) = tracked(2, &procs(2));
        trk.arrive(1, 200);
        assert!(!trk.locally_complete());
        trk.arrive(2, 201);
        assert!(trk.locally_complete());

        trk.resolve(CollectiveStatus::Complete);
        assert_eq!(*fired.lock().unwrap(), vec![CollectiveStatus::Complete]);
    }

    #[test]
    fn test_lost_participant_partial() {
        let (_, mut trk) = tracked(3, &procs(3));
        trk.arrive(1, 200);
        let status = trk.lose_participant(2);
        assert_eq!(status, CollectiveStatus::PartialSuccess);
        assert_eq!(trk.nlocal, 2);
        // the lost peer never arrived, arrival list untouched
        assert_eq!(trk.arrived.len(), 1);
    }

    #[test]
    fn test_lost_participant_removes_its_arrival() {
        let (_, mut trk) = tracked(2, &procs(2));
        trk.arrive(1, 200);
        trk.arrive(2, 201);
        trk.lose_participant(1);
        assert_eq!(trk.arrived, vec![(2, 201)]);
    }

    #[test]
    fn test_losing_last_participant_is_lost_connection() {
        let (_, mut trk) = tracked(1, &procs(1));
        assert_eq!(
            trk.lose_participant(1),
            CollectiveStatus::LostConnection
        );
    }

    #[test]
    fn test_lost_then_complete_resolves_degraded() {
        // a fence that loses one of its local participants still
        // completes, degraded, once the rest arrive
        let (fired, mut trk) = tracked(3, &procs(3));
        trk.arrive(1, 200);
        trk.lose_participant(3);
        trk.arrive(2, 201);
        assert!(trk.locally_complete());
        trk.resolve(trk.status);
        assert_eq!(
            *fired.lock().unwrap(),
            vec![CollectiveStatus::PartialSuccess]
        );
    }

    #[test]
    fn test_resolve_fires_once() {
        let (fired, mut trk) = tracked(1, &procs(1));
        trk.arrive(1, 200);
        trk.resolve(CollectiveStatus::Complete);
        trk.resolve(CollectiveStatus::Complete);
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_involvement() {
        let (_, trk) = tracked(1, &procs(2));
        assert!(trk.involves(&ProcId::new("ns", 1)));
        assert!(!trk.involves(&ProcId::new("other", 1)));
    }
}
