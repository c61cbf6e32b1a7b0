//! Service facade (spec §4.7, §4.8): orchestrates every public operation.
//!
//! For every operation the facade: (a) loads the poll via the read
//! cache/store, (b) authorises via [`crate::permission::PermissionChecker`],
//! (c) opens a single database transaction, (d) applies the transition,
//! (e) commits. This module is the only place that composes the
//! eligibility checker, weight resolver, splitter, method validator, and
//! secret-ballot codec into one end-to-end operation.
//!
//! Cancellation (spec §5): a task dropped mid-operation never commits —
//! every write path in [`crate::store::StoreGateway`] only takes effect
//! on an explicit `COMMIT`, so an aborted future rolls its transaction
//! back for free. No separate cancellation token is threaded through
//! these methods.

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::codec::SecretCodec;
use crate::eligibility::check_eligibility;
use crate::error::{ErrorKind, VoteError};
use crate::methods::{MethodConfig, MethodName, MethodRegistry, TallyContext, WeightedBallot};
use crate::model::{
    Ballot, BallotId, ContentObjectId, GroupId, MeetingId, MeetingUserId, Poll, PollId, PollState,
    Visibility,
};
use crate::permission::{PermissionChecker, RequiredPermission};
use crate::preload::Preloader;
use crate::splitter;
use crate::store::{FinalizeWrite, NewPoll, PollUpdate, StoreGateway, TallyOutcome};
use crate::weight::resolve_weight;

/// Body of `/system/vote/create` (spec §6).
pub struct CreatePollRequest {
    pub title: String,
    pub content_object_id: ContentObjectId,
    pub meeting_id: MeetingId,
    pub method: MethodName,
    pub config: serde_json::Value,
    pub visibility: Visibility,
    pub entitled_group_ids: BTreeSet<GroupId>,
    pub result: Option<serde_json::Value>,
    pub published: Option<bool>,
    pub allow_invalid: bool,
    pub allow_vote_split: bool,
}

/// Body of `/system/vote/update?id=N` (spec §6): any subset of mutable
/// fields. Which subset is actually accepted depends on the poll's
/// current `state` (spec §3, §4.7).
#[derive(Default)]
pub struct UpdatePollRequest {
    pub title: Option<String>,
    pub published: Option<bool>,
    pub result: Option<serde_json::Value>,
    pub method: Option<MethodName>,
    pub config: Option<serde_json::Value>,
    pub visibility: Option<Visibility>,
    pub entitled_group_ids: Option<BTreeSet<GroupId>>,
    pub allow_invalid: Option<bool>,
    pub allow_vote_split: Option<bool>,
}

/// Body of `/system/vote/?id=N` (spec §6).
pub struct VoteRequest {
    pub meeting_user_id: Option<MeetingUserId>,
    pub value: serde_json::Value,
    pub split: bool,
}

pub struct VoteService {
    store: StoreGateway,
    methods: MethodRegistry,
    codec: Arc<dyn SecretCodec>,
    preloader: Preloader,
    permissions: Arc<dyn PermissionChecker>,
    /// Whether the deployment has electronic voting enabled at all (spec
    /// §4.7 "create": "the deployment must have electronic voting
    /// enabled" for any non-`manually` poll).
    electronic_voting_enabled: bool,
}

impl VoteService {
    pub fn new(
        store: StoreGateway,
        codec: Arc<dyn SecretCodec>,
        preloader: Preloader,
        permissions: Arc<dyn PermissionChecker>,
        electronic_voting_enabled: bool,
    ) -> Self {
        Self {
            store,
            methods: MethodRegistry::new(),
            codec,
            preloader,
            permissions,
            electronic_voting_enabled,
        }
    }

    /// Backing probe for `/system/vote/health` (spec §6).
    pub async fn health(&self) -> Result<(), VoteError> {
        self.store.health().await?;
        Ok(())
    }

    /// Read a poll's current state. Plain pass-through to the store — the
    /// generic data-retrieval path is out of scope for this core (spec
    /// §1), but every mutating operation already needs this read, so it
    /// is exposed directly rather than duplicated per caller.
    pub async fn get(&self, poll_id: PollId) -> Result<Poll, VoteError> {
        Ok(self.store.get_poll(poll_id).await?)
    }

    async fn authorize(
        &self,
        acting_user_id: MeetingUserId,
        content_object_id: &ContentObjectId,
        meeting_id: MeetingId,
    ) -> Result<(), VoteError> {
        let permission = RequiredPermission::for_collection(&content_object_id.collection)
            .map_err(|e| VoteError::invalid(e.to_string()))?;
        self.permissions
            .check(acting_user_id, content_object_id, meeting_id, permission)
            .await
            .map_err(|e| VoteError::not_allowed(e.to_string()))
    }

    pub async fn create(
        &self,
        acting_user_id: MeetingUserId,
        req: CreatePollRequest,
    ) -> Result<PollId, VoteError> {
        self.authorize(acting_user_id, &req.content_object_id, req.meeting_id)
            .await?;

        let config = MethodConfig::parse(req.method, &req.config)?;

        if req.visibility == Visibility::Manually {
            if req.allow_vote_split {
                return Err(VoteError::invalid(
                    "manually polls cannot allow vote splitting",
                ));
            }
        } else {
            if req.result.is_some() {
                return Err(VoteError::invalid(
                    "result must be absent for any visibility other than manually",
                ));
            }
            if !self.electronic_voting_enabled {
                return Err(VoteError::not_allowed(
                    "electronic voting is not enabled for this deployment",
                ));
            }
            if req.visibility == Visibility::Secret && req.allow_vote_split {
                return Err(VoteError::invalid(
                    "secret polls disallow vote splitting",
                ));
            }
        }

        let published = req.visibility == Visibility::Manually && req.published.unwrap_or(false);

        let poll_id = self
            .store
            .create_poll(NewPoll {
                meeting_id: req.meeting_id,
                content_object_id: req.content_object_id,
                title: req.title,
                method: req.method,
                config,
                visibility: req.visibility,
                entitled_group_ids: req.entitled_group_ids,
                allow_invalid: req.allow_invalid,
                allow_vote_split: req.allow_vote_split,
                result: req.result,
                published,
            })
            .await?;

        info!(poll_id = poll_id.0, "poll created");
        Ok(poll_id)
    }

    pub async fn update(
        &self,
        acting_user_id: MeetingUserId,
        poll_id: PollId,
        req: UpdatePollRequest,
    ) -> Result<(), VoteError> {
        let poll = self.store.get_poll(poll_id).await?;
        self.authorize(acting_user_id, &poll.content_object_id, poll.meeting_id)
            .await?;

        let structural_fields_touched = req.method.is_some()
            || req.config.is_some()
            || req.visibility.is_some()
            || req.entitled_group_ids.is_some()
            || req.allow_vote_split.is_some()
            || req.allow_invalid.is_some();

        if poll.structure_is_frozen() && structural_fields_touched {
            return Err(VoteError::not_allowed(
                "method, config, visibility, entitled_group_ids, allow_vote_split, allow_invalid \
                 are frozen once the poll has left the created state",
            ));
        }
        if poll.structure_is_frozen() && req.result.is_some() && poll.visibility != Visibility::Manually
        {
            return Err(VoteError::not_allowed(
                "result is only directly mutable for manually polls",
            ));
        }

        if let Some(visibility) = req.visibility {
            if (poll.visibility == Visibility::Manually) != (visibility == Visibility::Manually) {
                return Err(VoteError::not_allowed(
                    "manually cannot be converted to or from another visibility",
                ));
            }
        }

        let config = match (req.method, req.config) {
            (Some(method), Some(raw)) => Some(MethodConfig::parse(method, &raw)?),
            (None, Some(raw)) => Some(MethodConfig::parse(poll.method, &raw)?),
            (Some(_), None) => {
                return Err(VoteError::invalid(
                    "method cannot change without an accompanying config",
                ))
            }
            (None, None) => None,
        };

        self.store
            .update_poll(
                poll_id,
                PollUpdate {
                    title: req.title,
                    published: req.published,
                    result: req.result,
                    config,
                    visibility: req.visibility,
                    entitled_group_ids: req.entitled_group_ids,
                    allow_vote_split: req.allow_vote_split,
                    allow_invalid: req.allow_invalid,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, acting_user_id: MeetingUserId, poll_id: PollId) -> Result<(), VoteError> {
        let poll = self.store.get_poll(poll_id).await?;
        self.authorize(acting_user_id, &poll.content_object_id, poll.meeting_id)
            .await?;
        self.store.delete_poll(poll_id).await?;
        self.preloader.evict(poll_id);
        Ok(())
    }

    pub async fn start(&self, acting_user_id: MeetingUserId, poll_id: PollId) -> Result<(), VoteError> {
        let poll = self.store.get_poll(poll_id).await?;
        self.authorize(acting_user_id, &poll.content_object_id, poll.meeting_id)
            .await?;
        if poll.state != PollState::Created {
            return Err(VoteError::not_allowed("poll is not in the created state"));
        }
        self.store.start_poll(poll_id).await?;
        self.preloader
            .preload(poll_id)
            .await
            .map_err(|e| VoteError::internal(e.to_string()))?;
        info!(poll_id = poll_id.0, "poll started");
        Ok(())
    }

    pub async fn finalize(
        &self,
        acting_user_id: MeetingUserId,
        poll_id: PollId,
        publish: bool,
        anonymize: bool,
    ) -> Result<(), VoteError> {
        let poll = self.store.get_poll(poll_id).await?;
        self.authorize(acting_user_id, &poll.content_object_id, poll.meeting_id)
            .await?;

        if anonymize && !poll.can_anonymize() {
            return Err(VoteError::not_allowed("named polls cannot be anonymised"));
        }

        let tally = match poll.state {
            PollState::Created => {
                return Err(VoteError::not_started(
                    "poll must be started before it can be finalized",
                ))
            }
            PollState::Started => Some(self.compute_tally(&poll).await?),
            PollState::Finished => {
                debug!(poll_id = poll_id.0, "finalize is idempotent on a finished poll");
                None
            }
        };

        // One transaction carries the state transition, the voted-id and
        // ballot-rewrite bookkeeping, the publish flag, and anonymisation
        // (spec §4.7(c)): a failure partway through never leaves the poll
        // `finished` with some of those steps missing.
        self.store
            .apply_finalize(FinalizeWrite {
                poll_id,
                tally,
                published: publish,
                anonymize,
            })
            .await?;

        if poll.state == PollState::Started {
            self.preloader.evict(poll_id);
        }
        info!(poll_id = poll_id.0, publish, anonymize, "poll finalized");
        Ok(())
    }

    /// Compute (but do not store) a started poll's tally result, the
    /// represented voters to record as having voted, and — for secret
    /// polls — the decrypted values to rewrite ballots to (spec §4.7
    /// "finalize"). Pure read-and-compute: no store write happens here, so
    /// it can run ahead of the single write transaction that commits it.
    async fn compute_tally(&self, poll: &Poll) -> Result<TallyOutcome, VoteError> {
        let mut ballots = self.store.fetch_ballots(poll.id).await?;

        if poll.visibility == Visibility::Secret {
            ballots = self.decrypt_and_shuffle(ballots)?;
        }

        let voted_ids: Vec<MeetingUserId> = ballots
            .iter()
            .filter_map(|b| b.represented_user_id)
            .collect();

        let method = self.methods.get(poll.method);
        let weighted = self.expand_for_tally(poll, &ballots);
        let result = method.tally(&poll.config, &weighted, &TallyContext::default())?;

        let rewritten_ballots: Vec<(BallotId, serde_json::Value)> =
            if poll.visibility == Visibility::Secret {
                ballots.into_iter().map(|b| (b.id, b.value)).collect()
            } else {
                Vec::new()
            };

        Ok(TallyOutcome {
            result,
            voted_ids,
            rewritten_ballots,
        })
    }

    /// Decrypt every ballot's stored ciphertext, then re-order the list
    /// by plaintext value so the caller cannot correlate the rewritten
    /// on-disk order with insertion order (spec §4.3, §8
    /// "Secret ballot unlinkability at rest after finalize").
    fn decrypt_and_shuffle(&self, ballots: Vec<Ballot>) -> Result<Vec<Ballot>, VoteError> {
        let mut decrypted = Vec::with_capacity(ballots.len());
        for mut ballot in ballots {
            let stored = ballot
                .value
                .as_str()
                .ok_or_else(|| VoteError::internal("secret ballot value was not a ciphertext string"))?;
            let plaintext = self.codec.decrypt(stored)?;
            ballot.value = serde_json::from_slice(&plaintext)
                .map_err(|e| VoteError::internal(format!("corrupt plaintext ballot: {e}")))?;
            decrypted.push(ballot);
        }
        decrypted.sort_by(|a, b| a.value.to_string().cmp(&b.value.to_string()));
        Ok(decrypted)
    }

    /// Expand split ballots into their sub-ballots (spec §4.7 "finalize",
    /// §4.2). A ballot whose payload fails splitter validation at this
    /// stage contributes only to the method's `invalid` bucket.
    fn expand_for_tally(&self, poll: &Poll, ballots: &[Ballot]) -> Vec<WeightedBallot> {
        let method = self.methods.get(poll.method);
        let mut expanded = Vec::with_capacity(ballots.len());
        for ballot in ballots {
            if poll.splitting_permitted() {
                match splitter::split(method, &poll.config, ballot.weight, ballot.split, &ballot.value)
                {
                    Ok(subs) => expanded.extend(subs),
                    Err(_) => expanded.push(WeightedBallot {
                        weight: Decimal::ZERO,
                        payload: serde_json::Value::Null,
                    }),
                }
            } else {
                expanded.push(WeightedBallot {
                    weight: ballot.weight,
                    payload: ballot.value.clone(),
                });
            }
        }
        expanded
    }

    pub async fn reset(&self, acting_user_id: MeetingUserId, poll_id: PollId) -> Result<(), VoteError> {
        let poll = self.store.get_poll(poll_id).await?;
        self.authorize(acting_user_id, &poll.content_object_id, poll.meeting_id)
            .await?;
        let target_state = if poll.visibility == Visibility::Manually {
            PollState::Finished
        } else {
            PollState::Created
        };
        self.store.reset_poll(poll_id, target_state).await?;
        self.preloader.evict(poll_id);
        Ok(())
    }

    /// The admission pipeline (spec §4.8).
    pub async fn vote(
        &self,
        poll_id: PollId,
        acting_user_id: MeetingUserId,
        req: VoteRequest,
    ) -> Result<(), VoteError> {
        if acting_user_id == MeetingUserId::ANONYMOUS {
            return Err(VoteError::not_allowed("anonymous users cannot vote"));
        }
        let represented_user_id = req.meeting_user_id.unwrap_or(acting_user_id);

        let poll = self.store.get_poll(poll_id).await?;

        if req.split && (!poll.allow_vote_split || poll.visibility == Visibility::Secret) {
            return Err(VoteError::not_allowed(
                "this poll does not allow split ballots",
            ));
        }

        let view = self.preloader.get(poll_id).ok_or_else(|| {
            VoteError::not_started("poll is not currently accepting ballots")
        })?;

        check_eligibility(&view, acting_user_id, represented_user_id)?;

        let member = view
            .member(represented_user_id)
            .expect("check_eligibility already confirmed membership");
        let weight = resolve_weight(&view.flags, member);

        if !poll.allow_invalid {
            let method = self.methods.get(poll.method);
            splitter::split(method, &poll.config, weight, req.split, &req.value)?;
        }

        let stored_value = if poll.visibility == Visibility::Secret {
            let plaintext = serde_json::to_vec(&req.value)
                .map_err(|e| VoteError::internal(format!("failed to encode ballot: {e}")))?;
            serde_json::Value::String(self.codec.encrypt(&plaintext)?)
        } else {
            req.value
        };

        let outcome = self
            .store
            .admit_ballot(
                poll_id,
                acting_user_id,
                represented_user_id,
                &stored_value,
                weight,
                req.split,
            )
            .await;

        match outcome {
            Ok(_ballot_id) => Ok(()),
            Err(e) => {
                let err: VoteError = e.into();
                if err.kind == ErrorKind::DoubleVote {
                    debug!(poll_id = poll_id.0, "rejected double vote");
                } else {
                    warn!(poll_id = poll_id.0, kind = %err.kind, "ballot admission failed");
                }
                Err(err)
            }
        }
    }
}
