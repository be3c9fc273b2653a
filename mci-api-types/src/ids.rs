//! Identifier grammar and key-value store key layout.
//!
//! All caller-supplied names are ASCII labels. Keys are built from those
//! labels; ordering of a prefix scan over the store is the only ordering the
//! engine relies on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Error};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;

use crate::ResourceKind;

/// Maximum length of a caller-supplied label.
pub const MAX_LABEL_LEN: usize = 40;

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Verify a caller-supplied name against the label grammar.
///
/// Labels are lowercase ASCII, start with a letter, may contain digits and
/// dashes, and do not end with a dash.
pub fn verify_label(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > MAX_LABEL_LEN {
        bail!(
            "name '{}' exceeds the maximum length of {} characters",
            name,
            MAX_LABEL_LEN
        );
    }
    if !LABEL_RE.is_match(name) {
        bail!("name '{name}' is not a valid label ([a-z]([-a-z0-9]*[a-z0-9])?)");
    }
    Ok(())
}

/// Normalize an arbitrary string into a valid label.
///
/// Uppercase is folded, runs of invalid characters collapse into a single
/// dash, and the result is truncated to [`MAX_LABEL_LEN`].
pub fn to_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.len() > MAX_LABEL_LEN {
        out.truncate(MAX_LABEL_LEN);
        while out.ends_with('-') {
            out.pop();
        }
    }
    out
}

static UID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a short, unique, label-safe identifier.
///
/// Base-36 of the current epoch milliseconds plus a process-local counter.
pub fn new_uid() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let seq = UID_COUNTER.fetch_add(1, Ordering::Relaxed) % 1296;
    let mut n = millis;
    let mut out = String::new();
    while n > 0 {
        let digit = (n % 36) as u32;
        out.insert(0, char::from_digit(digit, 36).unwrap());
        n /= 36;
    }
    out.push(char::from_digit((seq / 36) as u32, 36).unwrap());
    out.push(char::from_digit((seq % 36) as u32, 36).unwrap());
    out
}

/// Key of an MCI record.
pub fn mci_key(ns: &str, mci_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}")
}

/// Key of a VM record.
pub fn vm_key(ns: &str, mci_id: &str, vm_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}/vm/{vm_id}")
}

/// Key of a sub-group record.
pub fn subgroup_key(ns: &str, mci_id: &str, subgroup_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}/subgroup/{subgroup_id}")
}

/// Key of a resource record (shared resources, specs, images).
pub fn resource_key(ns: &str, kind: ResourceKind, id: &str) -> String {
    format!("/ns/{ns}/resources/{kind}/{id}")
}

/// Prefix under which all descendants of an MCI live.
pub fn mci_descendant_prefix(ns: &str, mci_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}/")
}

/// Key of a managed Kubernetes cluster record.
pub fn k8s_cluster_key(ns: &str, cluster_id: &str) -> String {
    format!("/ns/{ns}/k8scluster/{cluster_id}")
}

/// Key of the durable provisioning log for a spec.
///
/// The spec id may contain arbitrary characters (it names a CSP spec), so the
/// trailing segment is percent-encoded.
pub fn provision_log_key(spec_id: &str) -> String {
    format!(
        "/log/provision/{}",
        utf8_percent_encode(spec_id, NON_ALPHANUMERIC)
    )
}

/// Extract the VM id from a key listed under an MCI's descendant prefix.
///
/// A key belongs to a VM iff it is `<prefix>vm/<segment>` with no further
/// slash in the segment.
pub fn vm_id_from_descendant<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix("vm/")?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// Extract the sub-group id from a key listed under an MCI's descendant prefix.
pub fn subgroup_id_from_descendant<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix("subgroup/")?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// Canonical id of the shared resource of any kind for a (namespace,
/// connection) pair. Determinism of this id is what makes on-demand creation
/// idempotent.
pub fn shared_resource_id(ns: &str, connection_name: &str) -> String {
    format!("{ns}-shared-{connection_name}")
}

/// Name under which a logical resource is created on the CSP side.
///
/// Prefixing with the connection name keeps resources of different
/// connections from colliding within a single CSP account.
pub fn csp_resource_name(connection_name: &str, logical_name: &str) -> String {
    format!("{connection_name}-{logical_name}")
}
