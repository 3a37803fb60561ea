//! Hand-off from the gate to whatever actually deploys a release.
//!
//! The gate calls [`ReleaseExecutor::execute_release`] once it has claimed a
//! release. [`QueueExecutor`] pushes the id onto a tokio channel and
//! [`DeployWorker`] drains it: it waits for the scheduled time, runs a
//! [`Deployer`], and reports the outcome back through the gate.
//!
//! [`run_sweep`] keeps this instance's heartbeat fresh, frees claims left by
//! dispatchers that stopped heartbeating, and re-offers releases that are
//! ready but unclaimed.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::gate::{ReleaseGate, ReleaseSnapshot};
use super::models::{Release, Stream};
use crate::db::DbHandle;

/// Receives releases the gate has decided may execute.
///
/// Implementations must return quickly; the call happens while the store is
/// held. An `Err` means the hand-off did not happen and the gate will drop
/// its claim.
pub trait ReleaseExecutor: Send + Sync {
    fn execute_release(&self, release: &Release) -> Result<()>;
}

/// Executor that enqueues release ids for a [`DeployWorker`].
#[derive(Clone)]
pub struct QueueExecutor {
    tx: mpsc::UnboundedSender<i64>,
}

impl QueueExecutor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<i64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReleaseExecutor for QueueExecutor {
    fn execute_release(&self, release: &Release) -> Result<()> {
        self.tx
            .send(release.id)
            .map_err(|_| anyhow::anyhow!("deploy queue is closed"))?;
        tracing::debug!(release_id = release.id, "release queued for deployment");
        Ok(())
    }
}

/// Performs the actual deployment of a release.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, release: &Release, stream: &Stream) -> Result<()>;
}

/// Runs a shell command per release, or nothing at all in dry-run mode.
pub struct CommandDeployer {
    command: Option<String>,
    timeout: Duration,
}

impl CommandDeployer {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self, release: &Release, stream: &Stream) -> Result<()> {
        let Some(command) = &self.command else {
            tracing::info!(
                release_id = release.id,
                stream = %stream.name,
                "no deploy command configured, marking release deployed"
            );
            return Ok(());
        };

        let child = tokio::process::Command::new("sh")
            .args(["-c", command.as_str()])
            .env("SIDELOADER_RELEASE_ID", release.id.to_string())
            .env("SIDELOADER_STREAM", &stream.name)
            .env("SIDELOADER_BUILD_ID", release.build_id.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn deploy command")?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("Deploy command timed out after {:?}", self.timeout))?
            .context("Failed to wait for deploy command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Deploy command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

/// Drains the deploy queue. Each release deploys in its own task so a
/// scheduled release does not hold up the ones behind it.
pub struct DeployWorker {
    db: DbHandle,
    gate: ReleaseGate,
    deployer: Arc<dyn Deployer>,
}

impl DeployWorker {
    pub fn new(db: DbHandle, gate: ReleaseGate, deployer: Arc<dyn Deployer>) -> Self {
        Self { db, gate, deployer }
    }

    /// Run until the queue's senders are all dropped and every started
    /// deployment has finished.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<i64>) {
        let mut tasks = JoinSet::new();
        while let Some(release_id) = rx.recv().await {
            let worker = self.clone();
            tasks.spawn(async move {
                if let Err(e) = worker.process(release_id).await {
                    tracing::error!(release_id, "deployment failed: {:#}", e);
                }
            });
            while tasks.try_join_next().is_some() {}
        }
        while tasks.join_next().await.is_some() {}
        tracing::debug!("deploy queue closed, worker exiting");
    }

    /// Deploy one claimed release and report back to the gate.
    ///
    /// Does nothing when the release is no longer claimed by this instance,
    /// checked both on arrival and again after waiting for its schedule.
    pub async fn process(&self, release_id: i64) -> Result<()> {
        let Some(snapshot) = self.reload(release_id).await? else {
            return Ok(());
        };

        if let Some(wait) = self.gate.time_until_due(&snapshot.release) {
            tracing::info!(release_id, "waiting {:?} for scheduled release", wait);
            tokio::time::sleep(wait).await;
            if self.reload(release_id).await?.is_none() {
                return Ok(());
            }
        }

        let outcome = self
            .deployer
            .deploy(&snapshot.release, &snapshot.stream)
            .await;

        let gate = self.gate.clone();
        match outcome {
            Ok(()) => {
                self.db
                    .call(move |db| Ok(gate.complete_release(db, release_id)?))
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.db
                    .call(move |db| Ok(gate.abandon_dispatch(db, release_id)?))
                    .await?;
                Err(e)
            }
        }
    }

    async fn reload(&self, release_id: i64) -> Result<Option<ReleaseSnapshot>> {
        let gate = self.gate.clone();
        let snapshot = self
            .db
            .call(move |db| Ok(gate.reload_claimed(db, release_id)?))
            .await?;
        if snapshot.is_none() {
            tracing::info!(release_id, "release no longer claimed here, skipping deployment");
        }
        Ok(snapshot)
    }
}

/// Every `interval`: heartbeat, reclaim releases from dispatchers silent
/// for longer than `lease`, then hand off every release that is ready but
/// unclaimed. The first pass runs immediately.
pub async fn run_sweep(
    db: DbHandle,
    gate: ReleaseGate,
    executor: Arc<dyn ReleaseExecutor>,
    interval: Duration,
    lease: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let gate = gate.clone();
        let executor = executor.clone();
        match db
            .call(move |db| {
                gate.heartbeat(db)?;
                gate.reclaim_stale_claims(db, lease)?;
                Ok(gate.dispatch_ready(db, executor.as_ref())?)
            })
            .await
        {
            Ok(ids) if !ids.is_empty() => {
                tracing::info!(count = ids.len(), ?ids, "sweep dispatched releases");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("release sweep failed: {:#}", e),
        }
    }
}
