//! Hold/continue/withdraw handoff for paused MCI creations.
//!
//! A create issued with `option=hold` parks after validation until an
//! external decision arrives. Each held MCI gets its own watch channel; the
//! REST surface (outside this core) resolves it via [`HoldRegistry::decide`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{Error, Result};

/// External decision for a held MCI creation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HoldDecision {
    /// Proceed with provisioning.
    Continue,
    /// Abandon: the held MCI is force-deleted.
    Withdraw,
}

#[derive(Clone, Default)]
pub struct HoldRegistry {
    inner: Arc<Mutex<HashMap<String, watch::Sender<Option<HoldDecision>>>>>,
}

impl HoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park the calling creation until a decision arrives for `key`
    /// (an MCI record key). Re-holding an already-held key replaces the
    /// previous channel.
    pub async fn wait(&self, key: &str) -> HoldDecision {
        let (tx, mut rx) = watch::channel(None);
        self.inner.lock().unwrap().insert(key.to_string(), tx);
        log::info!("mci '{key}' is held, waiting for continue/withdraw");

        let decision = loop {
            if let Some(decision) = *rx.borrow_and_update() {
                break decision;
            }
            if rx.changed().await.is_err() {
                // sender dropped without a decision; treat as withdraw
                break HoldDecision::Withdraw;
            }
        };
        self.inner.lock().unwrap().remove(key);
        decision
    }

    /// Resolve a held creation. Fails when nothing is held under `key`.
    pub fn decide(&self, key: &str, decision: HoldDecision) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        match inner.get(key) {
            Some(tx) => {
                let _ = tx.send(Some(decision));
                Ok(())
            }
            None => Err(Error::precondition(format!(
                "no creation is held for '{key}'"
            ))),
        }
    }

    /// Keys currently held, for inspection.
    pub fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decide_resolves_wait() {
        let holds = HoldRegistry::new();
        let waiter = {
            let holds = holds.clone();
            tokio::spawn(async move { holds.wait("/ns/demo/mci/m1").await })
        };

        // let the waiter register
        for _ in 0..100 {
            if !holds.held_keys().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        holds
            .decide("/ns/demo/mci/m1", HoldDecision::Continue)
            .unwrap();
        assert_eq!(waiter.await.unwrap(), HoldDecision::Continue);
        assert!(holds.held_keys().is_empty());
    }

    #[test]
    fn decide_without_hold_fails() {
        let holds = HoldRegistry::new();
        assert!(holds.decide("/ns/demo/mci/m1", HoldDecision::Withdraw).is_err());
    }
}
