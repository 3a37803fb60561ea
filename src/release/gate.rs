use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::dispatch::ReleaseExecutor;
use super::models::{NewRelease, NewStream, Release, ReleaseSignoff, ReleaseState, Stream, new_signoff_token};
use super::store::ReleaseStore;
use crate::errors::GateError;

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always reports the same instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A release together with everything needed to evaluate its gate.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSnapshot {
    pub release: Release,
    pub stream: Stream,
    pub signed: i64,
}

impl ReleaseSnapshot {
    /// Number of sign-offs recorded as signed.
    pub fn signoff_count(&self) -> i64 {
        self.signed
    }

    /// Signatures still missing. Negative when over-signed.
    pub fn signoff_remaining(&self) -> i64 {
        self.stream.required_signatures() - self.signed
    }

    pub fn is_signoff_satisfied(&self) -> bool {
        !self.stream.require_signoff || self.signoff_remaining() <= 0
    }
}

/// Result of following a sign link.
#[derive(Debug, Clone, Serialize)]
pub struct SignoffOutcome {
    pub signoff: ReleaseSignoff,
    /// False when the token had already been used.
    pub newly_signed: bool,
    /// True when this call handed the release to the executor.
    pub dispatched: bool,
    pub state: ReleaseState,
}

/// Result of pushing a build onto a stream.
#[derive(Debug, Clone, Serialize)]
pub struct PushedRelease {
    pub release: Release,
    pub signoffs: Vec<ReleaseSignoff>,
    pub dispatched: bool,
    pub state: ReleaseState,
}

/// Decides what state a release is in and when it may execute.
#[derive(Clone)]
pub struct ReleaseGate {
    clock: Arc<dyn Clock>,
}

impl Default for ReleaseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseGate {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Load a release, its stream and its signed count.
    pub fn load<S>(&self, store: &S, release_id: i64) -> Result<ReleaseSnapshot, GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        let release = store
            .get_release(release_id)
            .map_err(GateError::Database)?
            .ok_or(GateError::ReleaseNotFound { id: release_id })?;
        let stream = store
            .get_stream(release.stream_id)
            .map_err(GateError::Database)?
            .ok_or(GateError::StreamNotFound {
                id: release.stream_id,
            })?;
        let signed = store
            .count_signed(release.id)
            .map_err(GateError::Database)?;
        Ok(ReleaseSnapshot {
            release,
            stream,
            signed,
        })
    }

    /// True when no schedule is set or the scheduled instant has been reached.
    pub fn is_schedule_due(&self, release: &Release) -> bool {
        match release.scheduled_at {
            None => true,
            Some(at) => self.now() >= at,
        }
    }

    /// How long until a scheduled release becomes due, if it is not yet.
    pub fn time_until_due(&self, release: &Release) -> Option<Duration> {
        let at = release.scheduled_at?;
        (at - self.now()).to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn derive_state(&self, snapshot: &ReleaseSnapshot) -> ReleaseState {
        let release = &snapshot.release;
        if !release.waiting {
            return ReleaseState::Deployed;
        }
        if snapshot.stream.require_signoff && !snapshot.is_signoff_satisfied() {
            return ReleaseState::AwaitingSignoff {
                remaining: snapshot.signoff_remaining(),
            };
        }
        match release.scheduled_at {
            Some(at) if !self.is_schedule_due(release) => ReleaseState::Scheduled { at },
            _ => ReleaseState::Running,
        }
    }

    pub fn human_message(&self, snapshot: &ReleaseSnapshot) -> String {
        self.derive_state(snapshot).message()
    }

    /// Validate and persist a new stream.
    pub fn create_stream<S>(&self, store: &S, stream: &NewStream) -> Result<Stream, GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        stream.validate().map_err(GateError::InvalidStream)?;
        let created = store.create_stream(stream).map_err(GateError::Database)?;
        tracing::info!(stream_id = created.id, name = %created.name, "stream created");
        Ok(created)
    }

    /// Validate and apply a new name and sign-off policy to a stream.
    ///
    /// Sign-off requests already sent for existing releases are kept; a
    /// lowered quorum lets the sweep dispatch releases it now satisfies.
    pub fn update_stream<S>(&self, store: &S, id: i64, stream: &NewStream) -> Result<Stream, GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        stream.validate().map_err(GateError::InvalidStream)?;
        let updated = store
            .update_stream(id, stream)
            .map_err(GateError::Database)?
            .ok_or(GateError::StreamNotFound { id })?;
        tracing::info!(stream_id = id, name = %updated.name, "stream updated");
        Ok(updated)
    }

    /// Delete a stream together with its releases and their sign-offs.
    pub fn delete_stream<S>(&self, store: &S, id: i64) -> Result<(), GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        if !store.delete_stream(id).map_err(GateError::Database)? {
            return Err(GateError::StreamNotFound { id });
        }
        tracing::info!(stream_id = id, "stream deleted");
        Ok(())
    }

    /// Create a release for a build, request its sign-offs, and dispatch it
    /// straight away when nothing stands in the way.
    pub fn push_release<S, E>(
        &self,
        store: &S,
        executor: &E,
        new: &NewRelease,
    ) -> Result<PushedRelease, GateError>
    where
        S: ReleaseStore + ?Sized,
        E: ReleaseExecutor + ?Sized,
    {
        let stream = store
            .get_stream(new.stream_id)
            .map_err(GateError::Database)?
            .ok_or(GateError::StreamNotFound { id: new.stream_id })?;

        let release = store.create_release(new).map_err(GateError::Database)?;
        let mut signoffs = Vec::new();
        if stream.require_signoff {
            for email in stream.email_list() {
                let signoff = store
                    .create_signoff(release.id, &email, &new_signoff_token())
                    .map_err(GateError::Database)?;
                signoffs.push(signoff);
            }
        }
        tracing::info!(
            release_id = release.id,
            stream_id = stream.id,
            build_id = release.build_id,
            signoffs = signoffs.len(),
            "release created"
        );

        let snapshot = ReleaseSnapshot {
            release,
            stream,
            signed: 0,
        };
        let dispatched = snapshot.is_signoff_satisfied()
            && self.try_dispatch(store, executor, &snapshot.release)?;

        let snapshot = self.load(store, snapshot.release.id)?;
        Ok(PushedRelease {
            state: self.derive_state(&snapshot),
            release: snapshot.release,
            signoffs,
            dispatched,
        })
    }

    /// Mark the sign-off behind `token` as signed and dispatch the release if
    /// that satisfied its quorum.
    pub fn record_signoff<S, E>(
        &self,
        store: &S,
        executor: &E,
        token: &str,
    ) -> Result<SignoffOutcome, GateError>
    where
        S: ReleaseStore + ?Sized,
        E: ReleaseExecutor + ?Sized,
    {
        let signoff = store
            .get_signoff_by_token(token)
            .map_err(GateError::Database)?
            .ok_or_else(|| GateError::SignoffNotFound {
                token: token.to_string(),
            })?;
        let newly_signed = store.mark_signed(signoff.id).map_err(GateError::Database)?;
        if newly_signed {
            tracing::info!(
                release_id = signoff.release_id,
                signature = %signoff.signature,
                "release signed off"
            );
        }

        let snapshot = self.load(store, signoff.release_id)?;
        let dispatched = snapshot.release.waiting
            && snapshot.is_signoff_satisfied()
            && self.try_dispatch(store, executor, &snapshot.release)?;

        let snapshot = self.load(store, signoff.release_id)?;
        Ok(SignoffOutcome {
            signoff: ReleaseSignoff {
                signed: true,
                ..signoff
            },
            newly_signed,
            dispatched,
            state: self.derive_state(&snapshot),
        })
    }

    /// Dispatch every waiting, unclaimed release whose sign-off is satisfied.
    pub fn dispatch_ready<S, E>(&self, store: &S, executor: &E) -> Result<Vec<i64>, GateError>
    where
        S: ReleaseStore + ?Sized,
        E: ReleaseExecutor + ?Sized,
    {
        let mut dispatched = Vec::new();
        for release in store.list_unclaimed_waiting().map_err(GateError::Database)? {
            let snapshot = self.load(store, release.id)?;
            if snapshot.is_signoff_satisfied() && self.try_dispatch(store, executor, &release)? {
                dispatched.push(release.id);
            }
        }
        Ok(dispatched)
    }

    /// Record a successful deployment. This is the only way a release
    /// becomes `Deployed`.
    pub fn complete_release<S>(&self, store: &S, release_id: i64) -> Result<bool, GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        let changed = store.mark_deployed(release_id).map_err(GateError::Database)?;
        if changed {
            tracing::info!(release_id, "release deployed");
        } else if store
            .get_release(release_id)
            .map_err(GateError::Database)?
            .is_none()
        {
            return Err(GateError::ReleaseNotFound { id: release_id });
        }
        Ok(changed)
    }

    /// Drop the claim after a failed deployment so the sweep can retry.
    pub fn abandon_dispatch<S>(&self, store: &S, release_id: i64) -> Result<(), GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        store.release_claim(release_id).map_err(GateError::Database)?;
        tracing::warn!(release_id, "release dispatch abandoned");
        Ok(())
    }

    /// Reload a release this store has claimed. `None` once it was deleted,
    /// deployed, or taken over by another dispatcher.
    pub fn reload_claimed<S>(&self, store: &S, release_id: i64) -> Result<Option<ReleaseSnapshot>, GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        if !store.holds_claim(release_id).map_err(GateError::Database)? {
            return Ok(None);
        }
        self.load(store, release_id).map(Some)
    }

    /// Mark this store's dispatcher as alive.
    pub fn heartbeat<S>(&self, store: &S) -> Result<(), GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        store.heartbeat(self.now()).map_err(GateError::Database)
    }

    /// Free claims held by dispatchers that have not sent a heartbeat within
    /// `lease`, so their releases can be dispatched again.
    pub fn reclaim_stale_claims<S>(&self, store: &S, lease: Duration) -> Result<usize, GateError>
    where
        S: ReleaseStore + ?Sized,
    {
        let cutoff = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| self.now().checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let cleared = store
            .reclaim_stale_claims(cutoff)
            .map_err(GateError::Database)?;
        if cleared > 0 {
            tracing::warn!(count = cleared, "reclaimed releases from silent dispatchers");
        }
        Ok(cleared)
    }

    /// Claim the release and hand it to the executor. Returns false when
    /// someone else already holds the claim.
    fn try_dispatch<S, E>(&self, store: &S, executor: &E, release: &Release) -> Result<bool, GateError>
    where
        S: ReleaseStore + ?Sized,
        E: ReleaseExecutor + ?Sized,
    {
        if !store.try_claim(release.id).map_err(GateError::Database)? {
            tracing::debug!(release_id = release.id, "release already claimed");
            return Ok(false);
        }
        if let Err(e) = executor.execute_release(release) {
            store.release_claim(release.id).map_err(GateError::Database)?;
            return Err(GateError::Dispatch(e));
        }
        tracing::info!(release_id = release.id, "release dispatched");
        Ok(true)
    }
}
