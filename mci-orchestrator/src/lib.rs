//! Multi-cloud infrastructure (MCI) orchestration engine.
//!
//! Given a declarative request for a group of VMs (optionally spanning
//! providers and regions), this crate provisions the supporting default
//! resources, drives each VM through its lifecycle against the upstream
//! CSP-abstraction service, and maintains the authoritative deployment view
//! in an ordered key-value store. A Kubernetes cluster orchestrator builds
//! on the same shared-resource manager and client.
//!
//! Control flow is strictly top-down: [`review`] validates, [`mci`] and
//! [`k8s`] orchestrate, [`vm_lifecycle`] acts on individual VMs,
//! [`shared_resource`] reserves defaults, the spider client talks to CSPs,
//! and the store persists state. [`provision_log`] is read by the validator
//! and written on completion.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;

use mci_kvstore::{KvError, KvStore};
use mci_spider_client::SpiderClient;

mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{Pacing, Settings};

pub mod fanout;
pub mod hold;
pub use hold::{HoldDecision, HoldRegistry};

pub mod catalog;
pub mod shared_resource;
pub mod provision_log;
pub mod vm_lifecycle;
pub mod mci;
pub mod mci_action;
pub mod k8s;
pub mod review;

/// Hooks invoked after an MCI settles. SSH execution and the agent
/// installer live outside this core; embedders implement this seam.
/// Hook failures are logged and do not fail the deployment.
pub trait PostDeployHooks: Send + Sync {
    fn install_mon_agent(&self, _mci: &mci_api_types::MciInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn run_post_command(
        &self,
        _mci: &mci_api_types::MciInfo,
        _command: &mci_api_types::PostCommand,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The default hooks do nothing.
pub struct NoopHooks;

impl PostDeployHooks for NoopHooks {}

/// Handle bundling everything an operation needs.
#[derive(Clone)]
pub struct Context {
    pub kv: Arc<dyn KvStore>,
    pub spider: SpiderClient,
    pub settings: Settings,
    pub pacing: Pacing,
    pub holds: HoldRegistry,
    pub hooks: Arc<dyn PostDeployHooks>,
}

impl Context {
    /// Context with default settings/pacing and no-op hooks.
    pub fn new(kv: Arc<dyn KvStore>, spider: SpiderClient) -> Self {
        Context {
            kv,
            spider,
            settings: Settings::default(),
            pacing: Pacing::default(),
            holds: HoldRegistry::new(),
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PostDeployHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Current UNIX epoch in seconds.
pub(crate) fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Read a record, applying the corrupted-state policy: a value that fails
/// structural decoding is deleted and treated as absent.
pub(crate) async fn read_or_reset<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &str,
) -> Result<Option<T>> {
    match mci_kvstore::get_record(kv, key).await {
        Ok(value) => Ok(value),
        Err(KvError::Corrupted { key, source }) => {
            log::warn!("removing corrupted record at '{key}': {source}");
            kv.delete(&key).await?;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Read a record without side effects; corrupted values read as absent.
/// Used by the reviewer, which must not mutate state.
pub(crate) async fn read_only<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &str,
) -> Result<Option<T>> {
    match mci_kvstore::get_record(kv, key).await {
        Ok(value) => Ok(value),
        Err(KvError::Corrupted { key, .. }) => {
            log::debug!("ignoring corrupted record at '{key}' during read-only access");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
