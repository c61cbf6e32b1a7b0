//! Transactional store gateway (spec §4's "Transactional store gateway"
//! component): wraps the relational store with exactly the queries the
//! core needs. SQLite stands in for "a relational database is assumed"
//! (spec §1) — the teacher's `sqlx` dependency is reused as-is; nothing
//! above this module depends on the SQL dialect.
//!
//! The admission statement (spec §4.8 step 9, §5) is expressed as a
//! check-then-insert inside a single `BEGIN IMMEDIATE` transaction:
//! SQLite lacks the `INSERT ... SELECT` + `RETURNING` combination
//! Postgres would let us fold into one CTE, so the poll-state check and
//! the conditional insert are issued as two statements against the same
//! `IMMEDIATE`-locked connection, which serialises writers against the
//! same poll exactly as the spec's single-CTE description intends. The
//! unique index on `(poll_id, represented_user_id)` backstops any race
//! that slips past the explicit check.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::model::{
    Ballot, BallotId, ContentObjectId, GroupId, MeetingId, MeetingUserId, Poll, PollId, PollState,
    Visibility,
};
use crate::methods::{MethodConfig, MethodName};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("poll does not exist")]
    PollNotFound,
    #[error("poll is not started")]
    PollNotStarted,
    #[error("represented voter already has a ballot for this poll")]
    UserHasVotedBefore,
    #[error("stored config/value failed to decode: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Inputs to [`StoreGateway::create_poll`], mirroring the fields of the
/// `/system/vote/create` request body (spec §6).
pub struct NewPoll {
    pub meeting_id: MeetingId,
    pub content_object_id: ContentObjectId,
    pub title: String,
    pub method: MethodName,
    pub config: MethodConfig,
    pub visibility: Visibility,
    pub entitled_group_ids: BTreeSet<GroupId>,
    pub allow_invalid: bool,
    pub allow_vote_split: bool,
    /// Only honoured for `manually` visibility (spec §3, §4.7 "create").
    pub result: Option<serde_json::Value>,
    /// Only honoured for `manually` visibility; every other visibility is
    /// created unpublished (spec §3, §4.7 "create").
    pub published: bool,
}

/// Mutable subset of a poll accepted by `update` (spec §4.7 "update").
#[derive(Default)]
pub struct PollUpdate {
    pub title: Option<String>,
    pub published: Option<bool>,
    pub result: Option<serde_json::Value>,
    pub config: Option<MethodConfig>,
    pub visibility: Option<Visibility>,
    pub entitled_group_ids: Option<BTreeSet<GroupId>>,
    pub allow_vote_split: Option<bool>,
    pub allow_invalid: Option<bool>,
}

/// The tally-computed half of a `finalize` write: everything derived from
/// running the method over the ballot set (spec §4.7 "finalize"). Absent
/// when finalize is called idempotently on an already-`finished` poll.
pub struct TallyOutcome {
    pub result: serde_json::Value,
    pub voted_ids: Vec<MeetingUserId>,
    pub rewritten_ballots: Vec<(BallotId, serde_json::Value)>,
}

/// Inputs to [`StoreGateway::apply_finalize`] (spec §4.7 "finalize", §4.7(c)).
pub struct FinalizeWrite {
    pub poll_id: PollId,
    pub tally: Option<TallyOutcome>,
    pub published: bool,
    pub anonymize: bool,
}

pub struct StoreGateway {
    pool: SqlitePool,
}

impl StoreGateway {
    /// Connect to `database_url` (e.g. `sqlite::memory:` or a file path)
    /// and run the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let gateway = Self { pool };
        gateway.migrate().await?;
        Ok(gateway)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Backing probe for the `/system/vote/health` collaborator contract
    /// (spec §6): trivially reachable iff this succeeds.
    pub async fn health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn create_poll(&self, new: NewPoll) -> Result<PollId, StoreError> {
        let (state, result_json) = if new.visibility == Visibility::Manually {
            (PollState::Finished, new.result.clone())
        } else {
            (PollState::Created, None)
        };

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"INSERT INTO polls
                (meeting_id, content_object_collection, content_object_id, title, method,
                 config_json, visibility, state, published, allow_invalid, allow_vote_split,
                 result_json)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new.meeting_id.0)
        .bind(&new.content_object_id.collection)
        .bind(new.content_object_id.id)
        .bind(&new.title)
        .bind(new.method.to_string())
        .bind(new.config.to_json().to_string())
        .bind(visibility_str(new.visibility))
        .bind(state_str(state))
        .bind(new.published)
        .bind(new.allow_invalid)
        .bind(new.allow_vote_split)
        .bind(result_json.map(|v| v.to_string()))
        .execute(&mut *tx)
        .await?;
        let poll_id = PollId(row.last_insert_rowid());

        for group_id in &new.entitled_group_ids {
            sqlx::query("INSERT INTO poll_entitled_groups (poll_id, group_id) VALUES (?, ?)")
                .bind(poll_id.0)
                .bind(group_id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(poll_id)
    }

    pub async fn get_poll(&self, poll_id: PollId) -> Result<Poll, StoreError> {
        let row = sqlx::query(
            r#"SELECT id, meeting_id, content_object_collection, content_object_id, title,
                      method, config_json, visibility, state, published, allow_invalid,
                      allow_vote_split, result_json
               FROM polls WHERE id = ?"#,
        )
        .bind(poll_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::PollNotFound)?;

        let groups = sqlx::query("SELECT group_id FROM poll_entitled_groups WHERE poll_id = ?")
            .bind(poll_id.0)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| GroupId(r.get::<i64, _>("group_id")))
            .collect();

        poll_from_row(row, groups)
    }

    pub async fn update_poll(&self, poll_id: PollId, update: PollUpdate) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(poll_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::PollNotFound);
        }

        if let Some(title) = update.title {
            sqlx::query("UPDATE polls SET title = ? WHERE id = ?")
                .bind(title)
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(published) = update.published {
            sqlx::query("UPDATE polls SET published = ? WHERE id = ?")
                .bind(published)
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(result) = update.result {
            sqlx::query("UPDATE polls SET result_json = ? WHERE id = ?")
                .bind(result.to_string())
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(config) = update.config {
            sqlx::query("UPDATE polls SET method = ?, config_json = ? WHERE id = ?")
                .bind(config.method().to_string())
                .bind(config.to_json().to_string())
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(visibility) = update.visibility {
            sqlx::query("UPDATE polls SET visibility = ? WHERE id = ?")
                .bind(visibility_str(visibility))
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(allow_vote_split) = update.allow_vote_split {
            sqlx::query("UPDATE polls SET allow_vote_split = ? WHERE id = ?")
                .bind(allow_vote_split)
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(allow_invalid) = update.allow_invalid {
            sqlx::query("UPDATE polls SET allow_invalid = ? WHERE id = ?")
                .bind(allow_invalid)
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(group_ids) = update.entitled_group_ids {
            sqlx::query("DELETE FROM poll_entitled_groups WHERE poll_id = ?")
                .bind(poll_id.0)
                .execute(&mut *tx)
                .await?;
            for group_id in group_ids {
                sqlx::query("INSERT INTO poll_entitled_groups (poll_id, group_id) VALUES (?, ?)")
                    .bind(poll_id.0)
                    .bind(group_id.0)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_poll(&self, poll_id: PollId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ballots WHERE poll_id = ?")
            .bind(poll_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM poll_voted_users WHERE poll_id = ?")
            .bind(poll_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM poll_entitled_groups WHERE poll_id = ?")
            .bind(poll_id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM polls WHERE id = ?")
            .bind(poll_id.0)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::PollNotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    /// `start`: `UPDATE ... WHERE state = 'created'` (spec §5); zero rows
    /// affected means the poll was missing or already past `created`.
    pub async fn start_poll(&self, poll_id: PollId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE polls SET state = 'started' WHERE id = ? AND state = 'created'")
            .bind(poll_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::PollNotStarted);
        }
        Ok(())
    }

    pub async fn reset_poll(&self, poll_id: PollId, target_state: PollState) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ballots WHERE poll_id = ?")
            .bind(poll_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM poll_voted_users WHERE poll_id = ?")
            .bind(poll_id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(
            "UPDATE polls SET state = ?, result_json = NULL, published = 0 WHERE id = ?",
        )
        .bind(state_str(target_state))
        .bind(poll_id.0)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::PollNotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_ballots(&self, poll_id: PollId) -> Result<Vec<Ballot>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, poll_id, value_json, weight, split, acting_user_id, represented_user_id
               FROM ballots WHERE poll_id = ? ORDER BY id ASC"#,
        )
        .bind(poll_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ballot_from_row).collect()
    }

    /// Every write side-effect of `finalize` (spec §4.7(c): "each
    /// operation is a single transaction"), committed together: the
    /// `finished`/result transition when [`FinalizeWrite::tally`] carries
    /// one, the `published` flag, and (if requested) anonymisation. A
    /// failure partway through rolls the whole op back, so a poll can
    /// never end up `finished` with its `voted_ids`/ballot rewrite
    /// missing.
    pub async fn apply_finalize(&self, write: FinalizeWrite) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(tally) = &write.tally {
            let result_affected =
                sqlx::query("UPDATE polls SET state = 'finished', result_json = ? WHERE id = ?")
                    .bind(tally.result.to_string())
                    .bind(write.poll_id.0)
                    .execute(&mut *tx)
                    .await?;
            if result_affected.rows_affected() == 0 {
                return Err(StoreError::PollNotFound);
            }

            for id in &tally.voted_ids {
                sqlx::query(
                    "INSERT OR IGNORE INTO poll_voted_users (poll_id, represented_user_id) VALUES (?, ?)",
                )
                .bind(write.poll_id.0)
                .bind(id.0)
                .execute(&mut *tx)
                .await?;
            }

            // Rewritten in plaintext-sorted order so the on-disk row order
            // (read back without an explicit `ORDER BY id`) cannot leak the
            // original insertion order of a secret ballot (spec §4.3, §8
            // "Secret ballot unlinkability at rest after finalize").
            for (ballot_id, value) in &tally.rewritten_ballots {
                sqlx::query("UPDATE ballots SET value_json = ? WHERE id = ?")
                    .bind(value.to_string())
                    .bind(ballot_id.0)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("UPDATE polls SET published = ? WHERE id = ?")
            .bind(write.published)
            .bind(write.poll_id.0)
            .execute(&mut *tx)
            .await?;

        if write.anonymize {
            sqlx::query(
                "UPDATE ballots SET acting_user_id = NULL, represented_user_id = NULL WHERE poll_id = ?",
            )
            .bind(write.poll_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// The admission pipeline's commit step (spec §4.8 step 9, §5):
    /// serialisable against concurrent admissions for the same `(poll,
    /// represented)` via a `BEGIN IMMEDIATE` transaction plus the unique
    /// index backstop.
    pub async fn admit_ballot(
        &self,
        poll_id: PollId,
        acting: MeetingUserId,
        represented: MeetingUserId,
        value: &serde_json::Value,
        weight: Decimal,
        split: bool,
    ) -> Result<BallotId, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let state: Option<(String,)> =
            sqlx::query_as("SELECT state FROM polls WHERE id = ?")
                .bind(poll_id.0)
                .fetch_optional(&mut *conn)
                .await?;
        let state = match state {
            None => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(StoreError::PollNotFound);
            }
            Some((s,)) => s,
        };
        if state != "started" {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(StoreError::PollNotStarted);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let insert = sqlx::query(
            r#"INSERT INTO ballots
                (poll_id, value_json, weight, split, acting_user_id, represented_user_id, created_at)
               SELECT ?, ?, ?, ?, ?, ?, ?
               WHERE NOT EXISTS (
                   SELECT 1 FROM ballots WHERE poll_id = ? AND represented_user_id = ?
               )"#,
        )
        .bind(poll_id.0)
        .bind(value.to_string())
        .bind(weight.to_string())
        .bind(split)
        .bind(acting.0)
        .bind(represented.0)
        .bind(now)
        .bind(poll_id.0)
        .bind(represented.0)
        .execute(&mut *conn)
        .await?;

        if insert.rows_affected() == 0 {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(StoreError::UserHasVotedBefore);
        }
        let ballot_id = BallotId(insert.last_insert_rowid());
        sqlx::query("COMMIT").execute(&mut *conn).await?;
        Ok(ballot_id)
    }
}

fn visibility_str(v: Visibility) -> &'static str {
    match v {
        Visibility::Manually => "manually",
        Visibility::Named => "named",
        Visibility::Open => "open",
        Visibility::Secret => "secret",
    }
}

fn state_str(s: PollState) -> &'static str {
    match s {
        PollState::Created => "created",
        PollState::Started => "started",
        PollState::Finished => "finished",
    }
}

fn poll_from_row(row: sqlx::sqlite::SqliteRow, entitled_group_ids: BTreeSet<GroupId>) -> Result<Poll, StoreError> {
    let visibility = match row.get::<String, _>("visibility").as_str() {
        "manually" => Visibility::Manually,
        "named" => Visibility::Named,
        "open" => Visibility::Open,
        "secret" => Visibility::Secret,
        other => return Err(StoreError::Corrupt(format!("unknown visibility {other}"))),
    };
    let state = match row.get::<String, _>("state").as_str() {
        "created" => PollState::Created,
        "started" => PollState::Started,
        "finished" => PollState::Finished,
        other => return Err(StoreError::Corrupt(format!("unknown state {other}"))),
    };
    let method: MethodName = row
        .get::<String, _>("method")
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{e:?}")))?;
    let config_raw: serde_json::Value = row
        .get::<String, _>("config_json")
        .parse::<serde_json::Value>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let config = MethodConfig::parse(method, &config_raw)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let result = row
        .get::<Option<String>, _>("result_json")
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(Poll {
        id: PollId(row.get::<i64, _>("id")),
        meeting_id: MeetingId(row.get::<i64, _>("meeting_id")),
        content_object_id: ContentObjectId {
            collection: row.get("content_object_collection"),
            id: row.get::<i64, _>("content_object_id"),
        },
        title: row.get("title"),
        method,
        config,
        visibility,
        state,
        published: row.get("published"),
        allow_invalid: row.get("allow_invalid"),
        allow_vote_split: row.get("allow_vote_split"),
        result,
        entitled_group_ids,
    })
}

fn ballot_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Ballot, StoreError> {
    let weight: Decimal = row
        .get::<String, _>("weight")
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("bad weight: {e:?}")))?;
    let value: serde_json::Value = row
        .get::<String, _>("value_json")
        .parse()
        .map_err(|e: serde_json::Error| StoreError::Corrupt(e.to_string()))?;
    Ok(Ballot {
        id: BallotId(row.get::<i64, _>("id")),
        poll_id: PollId(row.get::<i64, _>("poll_id")),
        value,
        weight,
        split: row.get("split"),
        acting_user_id: row.get::<Option<i64>, _>("acting_user_id").map(MeetingUserId),
        represented_user_id: row
            .get::<Option<i64>, _>("represented_user_id")
            .map(MeetingUserId),
    })
}

impl std::str::FromStr for MethodName {
    type Err = crate::methods::MethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval" => Ok(MethodName::Approval),
            "selection" => Ok(MethodName::Selection),
            "rating-score" => Ok(MethodName::RatingScore),
            "rating-approval" => Ok(MethodName::RatingApproval),
            "stv-scottish" => Ok(MethodName::StvScottish),
            other => Err(crate::methods::MethodError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> StoreGateway {
        StoreGateway::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_new_poll() -> NewPoll {
        NewPoll {
            meeting_id: MeetingId(1),
            content_object_id: ContentObjectId {
                collection: "motion".into(),
                id: 1,
            },
            title: "Motion 1".into(),
            method: MethodName::Approval,
            config: MethodConfig::Approval(crate::methods::approval::ApprovalConfig::default()),
            visibility: Visibility::Open,
            entitled_group_ids: BTreeSet::from([GroupId(1)]),
            allow_invalid: false,
            allow_vote_split: false,
            result: None,
            published: false,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = memory_store().await;
        let poll_id = store.create_poll(sample_new_poll()).await.unwrap();
        let poll = store.get_poll(poll_id).await.unwrap();
        assert_eq!(poll.title, "Motion 1");
        assert_eq!(poll.state, PollState::Created);
        assert!(poll.entitled_group_ids.contains(&GroupId(1)));
    }

    #[tokio::test]
    async fn manually_poll_is_finished_on_creation() {
        let store = memory_store().await;
        let mut new = sample_new_poll();
        new.visibility = Visibility::Manually;
        new.result = Some(serde_json::json!({"elected": ["alice"]}));
        let poll_id = store.create_poll(new).await.unwrap();
        let poll = store.get_poll(poll_id).await.unwrap();
        assert_eq!(poll.state, PollState::Finished);
        assert_eq!(poll.result, Some(serde_json::json!({"elected": ["alice"]})));
    }

    #[tokio::test]
    async fn double_vote_is_rejected() {
        let store = memory_store().await;
        let poll_id = store.create_poll(sample_new_poll()).await.unwrap();
        store.start_poll(poll_id).await.unwrap();

        store
            .admit_ballot(
                poll_id,
                MeetingUserId(1),
                MeetingUserId(1),
                &serde_json::json!("yes"),
                Decimal::ONE,
                false,
            )
            .await
            .unwrap();

        let err = store
            .admit_ballot(
                poll_id,
                MeetingUserId(1),
                MeetingUserId(1),
                &serde_json::json!("no"),
                Decimal::ONE,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UserHasVotedBefore));
    }

    #[tokio::test]
    async fn vote_before_start_is_rejected() {
        let store = memory_store().await;
        let poll_id = store.create_poll(sample_new_poll()).await.unwrap();
        let err = store
            .admit_ballot(
                poll_id,
                MeetingUserId(1),
                MeetingUserId(1),
                &serde_json::json!("yes"),
                Decimal::ONE,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PollNotStarted));
    }

    #[tokio::test]
    async fn vote_on_missing_poll_is_rejected() {
        let store = memory_store().await;
        let err = store
            .admit_ballot(
                PollId(999),
                MeetingUserId(1),
                MeetingUserId(1),
                &serde_json::json!("yes"),
                Decimal::ONE,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PollNotFound));
    }
}
