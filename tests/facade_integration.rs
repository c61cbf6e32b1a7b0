//! End-to-end lifecycle tests against an in-memory SQLite pool, a mock
//! `MeetingDataSource`, and an allow-all `MockPermissionChecker` — the
//! same fixture style as the teacher's `tests/phase1_integration.rs`
//! (spin up the real collaborators, fake only the external boundaries).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;

use vote_core::codec::AesGcmCodec;
use vote_core::error::ErrorKind;
use vote_core::facade::{CreatePollRequest, VoteRequest, VoteService};
use vote_core::methods::MethodName;
use vote_core::model::{ContentObjectId, GroupId, MeetingId, MeetingUserId, PollState, Visibility};
use vote_core::permission::MockPermissionChecker;
use vote_core::preload::mock::MockMeetingDataSource;
use vote_core::preload::{MeetingFlags, MeetingUserView, Preloader, PreloadedPollView};
use vote_core::store::StoreGateway;

const MANAGER: MeetingUserId = MeetingUserId(1);
const VOTER_A: MeetingUserId = MeetingUserId(2);
const VOTER_B: MeetingUserId = MeetingUserId(3);
const ENTITLED_GROUP: GroupId = GroupId(10);

async fn service(source: Arc<MockMeetingDataSource>) -> VoteService {
    let store = StoreGateway::connect("sqlite::memory:").await.unwrap();
    let codec = Arc::new(AesGcmCodec::new(b"integration test deployment secret").unwrap());
    let preloader = Preloader::new(source);
    let permissions = Arc::new(MockPermissionChecker::allow_all());
    VoteService::new(store, codec, preloader, permissions, true)
}

fn motion() -> ContentObjectId {
    ContentObjectId {
        collection: "motion".into(),
        id: 1,
    }
}

fn view_with(members: HashMap<MeetingUserId, MeetingUserView>) -> PreloadedPollView {
    PreloadedPollView {
        meeting_id: MeetingId(1),
        flags: MeetingFlags {
            enable_vote_weight: false,
            enable_vote_delegations: false,
            forbid_delegator_to_vote: false,
        },
        present_user_ids: members.keys().copied().collect::<HashSet<_>>(),
        entitled_group_ids: BTreeSet::from([ENTITLED_GROUP]),
        members,
        generation: 0,
    }
}

fn entitled_member() -> MeetingUserView {
    MeetingUserView {
        group_ids: BTreeSet::from([ENTITLED_GROUP]),
        vote_delegated_to: None,
        vote_weight: None,
        default_vote_weight: None,
    }
}

fn create_approval_poll(visibility: Visibility, allow_vote_split: bool) -> CreatePollRequest {
    CreatePollRequest {
        title: "Shall we adjourn?".into(),
        content_object_id: motion(),
        meeting_id: MeetingId(1),
        method: MethodName::Approval,
        config: json!({}),
        visibility,
        entitled_group_ids: BTreeSet::from([ENTITLED_GROUP]),
        result: None,
        published: None,
        allow_invalid: false,
        allow_vote_split,
    }
}

#[tokio::test]
async fn full_lifecycle_open_poll_tallies_approvals() {
    let source = Arc::new(MockMeetingDataSource::new());
    let svc = service(source.clone()).await;

    let poll_id = svc
        .create(MANAGER, create_approval_poll(Visibility::Open, false))
        .await
        .unwrap();

    let mut members = HashMap::new();
    members.insert(MANAGER, entitled_member());
    members.insert(VOTER_A, entitled_member());
    members.insert(VOTER_B, entitled_member());
    source.set(poll_id, view_with(members));

    svc.start(MANAGER, poll_id).await.unwrap();

    svc.vote(
        poll_id,
        VOTER_A,
        VoteRequest {
            meeting_user_id: None,
            value: json!("yes"),
            split: false,
        },
    )
    .await
    .unwrap();
    svc.vote(
        poll_id,
        VOTER_B,
        VoteRequest {
            meeting_user_id: None,
            value: json!("no"),
            split: false,
        },
    )
    .await
    .unwrap();

    svc.finalize(MANAGER, poll_id, true, false).await.unwrap();

    let poll = svc.get(poll_id).await.unwrap();
    assert_eq!(poll.state, PollState::Finished);
    assert!(poll.published);
    let result = poll.result.unwrap();
    assert_eq!(result["yes"], "1");
    assert_eq!(result["no"], "1");
}

#[tokio::test]
async fn vote_before_start_is_not_started() {
    let source = Arc::new(MockMeetingDataSource::new());
    let svc = service(source.clone()).await;
    let poll_id = svc
        .create(MANAGER, create_approval_poll(Visibility::Open, false))
        .await
        .unwrap();

    let err = svc
        .vote(
            poll_id,
            VOTER_A,
            VoteRequest {
                meeting_user_id: None,
                value: json!("yes"),
                split: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);
}

#[tokio::test]
async fn double_vote_is_rejected_through_the_facade() {
    let source = Arc::new(MockMeetingDataSource::new());
    let svc = service(source.clone()).await;
    let poll_id = svc
        .create(MANAGER, create_approval_poll(Visibility::Open, false))
        .await
        .unwrap();

    let mut members = HashMap::new();
    members.insert(VOTER_A, entitled_member());
    source.set(poll_id, view_with(members));
    svc.start(MANAGER, poll_id).await.unwrap();

    svc.vote(
        poll_id,
        VOTER_A,
        VoteRequest {
            meeting_user_id: None,
            value: json!("yes"),
            split: false,
        },
    )
    .await
    .unwrap();

    let err = svc
        .vote(
            poll_id,
            VOTER_A,
            VoteRequest {
                meeting_user_id: None,
                value: json!("no"),
                split: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DoubleVote);
}

#[tokio::test]
async fn anonymous_acting_user_cannot_vote() {
    let source = Arc::new(MockMeetingDataSource::new());
    let svc = service(source.clone()).await;
    let poll_id = svc
        .create(MANAGER, create_approval_poll(Visibility::Open, false))
        .await
        .unwrap();
    source.set(poll_id, view_with(HashMap::new()));
    svc.start(MANAGER, poll_id).await.unwrap();

    let err = svc
        .vote(
            poll_id,
            MeetingUserId::ANONYMOUS,
            VoteRequest {
                meeting_user_id: None,
                value: json!("yes"),
                split: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAllowed);
}

#[tokio::test]
async fn manually_poll_is_finished_immediately_and_accepts_no_ballots() {
    let source = Arc::new(MockMeetingDataSource::new());
    let svc = service(source.clone()).await;

    let mut req = create_approval_poll(Visibility::Manually, false);
    req.result = Some(json!({"elected": ["alice"]}));
    req.published = Some(true);
    let poll_id = svc.create(MANAGER, req).await.unwrap();

    let poll = svc.get(poll_id).await.unwrap();
    assert_eq!(poll.state, PollState::Finished);
    assert!(poll.published);
    assert_eq!(poll.result, Some(json!({"elected": ["alice"]})));
}

#[tokio::test]
async fn secret_poll_tallies_correctly_with_encrypted_storage() {
    let source = Arc::new(MockMeetingDataSource::new());
    let svc = service(source.clone()).await;

    let poll_id = svc
        .create(MANAGER, create_approval_poll(Visibility::Secret, false))
        .await
        .unwrap();

    let mut members = HashMap::new();
    members.insert(VOTER_A, entitled_member());
    members.insert(VOTER_B, entitled_member());
    source.set(poll_id, view_with(members));
    svc.start(MANAGER, poll_id).await.unwrap();

    svc.vote(
        poll_id,
        VOTER_A,
        VoteRequest {
            meeting_user_id: None,
            value: json!("yes"),
            split: false,
        },
    )
    .await
    .unwrap();
    svc.vote(
        poll_id,
        VOTER_B,
        VoteRequest {
            meeting_user_id: None,
            value: json!("yes"),
            split: false,
        },
    )
    .await
    .unwrap();

    svc.finalize(MANAGER, poll_id, false, false).await.unwrap();
    let poll = svc.get(poll_id).await.unwrap();
    assert_eq!(poll.result.unwrap()["yes"], "2");
}

#[tokio::test]
async fn split_ballot_over_weight_is_rejected_at_vote_time() {
    let source = Arc::new(MockMeetingDataSource::new());
    let svc = service(source.clone()).await;
    let poll_id = svc
        .create(MANAGER, create_approval_poll(Visibility::Open, true))
        .await
        .unwrap();

    let mut members = HashMap::new();
    members.insert(VOTER_A, entitled_member());
    source.set(poll_id, view_with(members));
    svc.start(MANAGER, poll_id).await.unwrap();

    let err = svc
        .vote(
            poll_id,
            VOTER_A,
            VoteRequest {
                meeting_user_id: None,
                value: json!({"1.3": "yes", "1.7": "no"}),
                split: true,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Invalid);
}
