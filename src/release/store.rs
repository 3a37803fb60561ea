use anyhow::Result;
use chrono::{DateTime, Utc};

use super::models::{NewRelease, NewStream, Release, ReleaseSignoff, Stream};

/// Typed repository over streams, releases and sign-offs.
///
/// The gate never talks to storage directly; every operation receives a
/// store so the same rules run against SQLite in production and in tests.
///
/// Each store acts on behalf of one dispatcher instance: claims it takes are
/// recorded under that instance's id, and only a heartbeat from the same
/// instance keeps them alive.
pub trait ReleaseStore {
    fn create_stream(&self, stream: &NewStream) -> Result<Stream>;

    fn get_stream(&self, id: i64) -> Result<Option<Stream>>;

    /// Replace a stream's name and sign-off policy. `None` when it does not exist.
    fn update_stream(&self, id: i64, stream: &NewStream) -> Result<Option<Stream>>;

    /// Delete a stream with all of its releases and sign-offs.
    fn delete_stream(&self, id: i64) -> Result<bool>;

    fn create_release(&self, release: &NewRelease) -> Result<Release>;

    fn get_release(&self, id: i64) -> Result<Option<Release>>;

    /// Most recent releases on a stream, newest first.
    fn list_stream_releases(&self, stream_id: i64, limit: i64) -> Result<Vec<Release>>;

    /// Releases that are still waiting and not claimed by any dispatcher.
    fn list_unclaimed_waiting(&self) -> Result<Vec<Release>>;

    /// Returns false when no release with this id existed.
    fn delete_release(&self, id: i64) -> Result<bool>;

    fn create_signoff(&self, release_id: i64, signature: &str, token: &str)
    -> Result<ReleaseSignoff>;

    fn get_signoff_by_token(&self, token: &str) -> Result<Option<ReleaseSignoff>>;

    fn list_signoffs(&self, release_id: i64) -> Result<Vec<ReleaseSignoff>>;

    /// Flip `signed` to true. Returns false when it was already signed.
    fn mark_signed(&self, signoff_id: i64) -> Result<bool>;

    fn count_signed(&self, release_id: i64) -> Result<i64>;

    /// Atomically set `locked` on a waiting, unlocked release and record
    /// this instance as its owner.
    ///
    /// Returns true only for the single caller whose update took effect.
    fn try_claim(&self, release_id: i64) -> Result<bool>;

    /// True while the release is waiting and claimed by this instance.
    fn holds_claim(&self, release_id: i64) -> Result<bool>;

    /// Clear this instance's claim on a release that is still waiting.
    fn release_claim(&self, release_id: i64) -> Result<()>;

    /// Record that this instance is alive at `at`.
    fn heartbeat(&self, at: DateTime<Utc>) -> Result<()>;

    /// Clear claims held by other instances whose last heartbeat is older
    /// than `cutoff` (or who never sent one). Returns how many were cleared.
    fn reclaim_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Flip `waiting` to false. Returns false when it was already deployed.
    fn mark_deployed(&self, release_id: i64) -> Result<bool>;
}
