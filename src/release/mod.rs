//! Release gating: sign-off quorum, scheduling and dispatch.
//!
//! ## Overview
//!
//! A build pushed onto a [`Stream`](models::Stream) becomes a
//! [`Release`](models::Release). Before it may deploy, a stream that
//! requires sign-off collects signatures through capability links; a release
//! may additionally be scheduled for a later time. [`ReleaseGate`] derives
//! the observable state and decides when a release is handed off.
//!
//! ```text
//!   push_release ──> AwaitingSignoff ──(quorum)──> Scheduled ──(time)──> Running ──> Deployed
//!                          │                                                ^            ^
//!                          └───────────── (no sign-off needed) ────────────┘            │
//!                                                                    complete_release ──┘
//! ```
//!
//! | Module     | Responsibility                                               |
//! |------------|--------------------------------------------------------------|
//! | `models`   | `Stream`, `Release`, `ReleaseSignoff`, `ReleaseState`        |
//! | `store`    | `ReleaseStore` trait, implemented by `db::SideloaderDb`      |
//! | `gate`     | `ReleaseGate`, `ReleaseSnapshot`, `Clock`                    |
//! | `dispatch` | `ReleaseExecutor`, queue executor, deploy worker, sweep      |
//!
//! ## At-most-once dispatch
//!
//! Handing a release to the executor always goes through
//! `ReleaseStore::try_claim`, a conditional update on the `locked` column.
//! Concurrent sign-offs that both observe a satisfied quorum race on that
//! update and only the winner dispatches.
//!
//! A claim records the dispatcher instance that took it. Instances sharing a
//! database heartbeat through the sweep, and a claim is only freed for
//! someone else once its owner has been silent for longer than the claim
//! lease. The deploy worker re-checks that it still holds the claim right
//! before deploying.

pub mod dispatch;
pub mod gate;
pub mod models;
pub mod store;

pub use dispatch::{CommandDeployer, DeployWorker, Deployer, QueueExecutor, ReleaseExecutor};
pub use gate::{Clock, FixedClock, PushedRelease, ReleaseGate, ReleaseSnapshot, SignoffOutcome, SystemClock};
pub use models::{NewRelease, NewStream, Release, ReleaseSignoff, ReleaseState, Stream};
pub use store::ReleaseStore;
