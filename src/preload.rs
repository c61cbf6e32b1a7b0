//! Preloader (spec §4.6): warms a process-wide read cache with every
//! field the admission pipeline needs, so that admitting a ballot for
//! any eligible represented voter performs zero further database reads.
//!
//! Modelled on the crate's existing `Arc<RwLock<...>>` shared-state idiom
//! (compare [`crate::RateLimiter`]-style components): readers take a
//! cheap `Arc` clone of an immutable snapshot rather than holding the
//! lock across their own work, and a monotonic generation counter lets a
//! caller detect that a refresh landed mid-read.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::model::{GroupId, MeetingId, MeetingUserId, PollId};

/// Meeting-wide flags that govern weight resolution and delegation
/// (spec §4.4, §4.5).
#[derive(Debug, Clone, Copy)]
pub struct MeetingFlags {
    pub enable_vote_weight: bool,
    pub enable_vote_delegations: bool,
    pub forbid_delegator_to_vote: bool,
}

/// Everything the eligibility checker and weight resolver need about one
/// meeting-scoped user, without any further store access (spec §4.6).
#[derive(Debug, Clone)]
pub struct MeetingUserView {
    pub group_ids: std::collections::BTreeSet<GroupId>,
    pub vote_delegated_to: Option<MeetingUserId>,
    pub vote_weight: Option<Decimal>,
    pub default_vote_weight: Option<Decimal>,
}

/// A single poll's preloaded slice of its meeting: the flags, the
/// present-user set, the entitled groups, and every entitled member's
/// delegation/weight data (spec §4.6). Built once per `start` transition
/// and shared read-only across all admission requests until the poll
/// finishes or is reset.
#[derive(Debug, Clone)]
pub struct PreloadedPollView {
    pub meeting_id: MeetingId,
    pub flags: MeetingFlags,
    pub present_user_ids: HashSet<MeetingUserId>,
    pub entitled_group_ids: std::collections::BTreeSet<GroupId>,
    pub members: HashMap<MeetingUserId, MeetingUserView>,
    pub generation: u64,
}

impl PreloadedPollView {
    pub fn member(&self, id: MeetingUserId) -> Option<&MeetingUserView> {
        self.members.get(&id)
    }
}

/// The external collaborator that actually reads the meeting/group/user
/// tables this cache warms from. The meeting/membership/delegation schema
/// behind it is out of this crate's scope (spec §1: the read path and the
/// store's non-ballot tables are external); an embedder supplies a
/// `MeetingDataSource` backed by its own schema. `MockMeetingDataSource`
/// stands in for tests in this crate.
#[async_trait]
pub trait MeetingDataSource: Send + Sync {
    async fn load_poll_view(
        &self,
        poll_id: PollId,
    ) -> Result<PreloadedPollView, PreloadError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PreloadError {
    #[error("store error while preloading poll {0}: {1}")]
    Store(PollId, String),
}

/// Process-wide snapshot cache, mutated only by [`Preloader::preload`]
/// (spec §4.6: "triggered by a state-change notification emitted by the
/// store when `state` becomes `started`"). Readers are lock-free over an
/// immutable `Arc` snapshot per poll.
pub struct Preloader {
    source: Arc<dyn MeetingDataSource>,
    views: RwLock<HashMap<PollId, Arc<PreloadedPollView>>>,
    generation: AtomicU64,
}

impl Preloader {
    pub fn new(source: Arc<dyn MeetingDataSource>) -> Self {
        Self {
            source,
            views: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Warm the cache for `poll_id`. Called exactly once per observed
    /// `state = started` transition (spec §4.6, §5).
    pub async fn preload(&self, poll_id: PollId) -> Result<(), PreloadError> {
        let mut view = self.source.load_poll_view(poll_id).await?;
        view.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.views
            .write()
            .expect("preload cache lock poisoned")
            .insert(poll_id, Arc::new(view));
        Ok(())
    }

    /// Fetch the cached view, if this replica has observed the poll's
    /// `started` transition and preloaded it.
    pub fn get(&self, poll_id: PollId) -> Option<Arc<PreloadedPollView>> {
        self.views
            .read()
            .expect("preload cache lock poisoned")
            .get(&poll_id)
            .cloned()
    }

    /// Drop a poll's cached view (on finalize or reset, it is no longer
    /// needed for admission).
    pub fn evict(&self, poll_id: PollId) {
        self.views
            .write()
            .expect("preload cache lock poisoned")
            .remove(&poll_id);
    }
}

/// Table-driven test double, kept unconditionally public the same way
/// the teacher ships `signal::mock` — so integration tests outside this
/// crate's own `#[cfg(test)]` boundary can still depend on it.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Table-driven `MeetingDataSource` for facade/preloader tests,
    /// mirroring the crate's `MockSignalClient` testing pattern.
    #[derive(Default)]
    pub struct MockMeetingDataSource {
        views: Mutex<HashMap<PollId, PreloadedPollView>>,
    }

    impl MockMeetingDataSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, poll_id: PollId, view: PreloadedPollView) {
            self.views.lock().unwrap().insert(poll_id, view);
        }
    }

    #[async_trait]
    impl MeetingDataSource for MockMeetingDataSource {
        async fn load_poll_view(
            &self,
            poll_id: PollId,
        ) -> Result<PreloadedPollView, PreloadError> {
            self.views
                .lock()
                .unwrap()
                .get(&poll_id)
                .cloned()
                .ok_or_else(|| PreloadError::Store(poll_id, "no fixture installed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockMeetingDataSource;
    use super::*;

    fn sample_view() -> PreloadedPollView {
        PreloadedPollView {
            meeting_id: MeetingId(1),
            flags: MeetingFlags {
                enable_vote_weight: false,
                enable_vote_delegations: false,
                forbid_delegator_to_vote: false,
            },
            present_user_ids: HashSet::from([MeetingUserId(1)]),
            entitled_group_ids: std::collections::BTreeSet::from([GroupId(1)]),
            members: HashMap::new(),
            generation: 0,
        }
    }

    #[tokio::test]
    async fn preload_then_get_returns_cached_view() {
        let source = Arc::new(MockMeetingDataSource::new());
        source.set(PollId(1), sample_view());
        let preloader = Preloader::new(source);

        assert!(preloader.get(PollId(1)).is_none());
        preloader.preload(PollId(1)).await.unwrap();
        let view = preloader.get(PollId(1)).expect("preloaded");
        assert_eq!(view.meeting_id, MeetingId(1));
    }

    #[tokio::test]
    async fn evict_clears_the_cache_entry() {
        let source = Arc::new(MockMeetingDataSource::new());
        source.set(PollId(1), sample_view());
        let preloader = Preloader::new(source);
        preloader.preload(PollId(1)).await.unwrap();
        preloader.evict(PollId(1));
        assert!(preloader.get(PollId(1)).is_none());
    }

    #[tokio::test]
    async fn successive_preloads_bump_the_generation() {
        let source = Arc::new(MockMeetingDataSource::new());
        source.set(PollId(1), sample_view());
        let preloader = Preloader::new(source);
        preloader.preload(PollId(1)).await.unwrap();
        let gen1 = preloader.get(PollId(1)).unwrap().generation;
        preloader.preload(PollId(1)).await.unwrap();
        let gen2 = preloader.get(PollId(1)).unwrap().generation;
        assert!(gen2 > gen1);
    }
}
