//! Spec and image catalog lookups.
//!
//! Specs and images are read-only in this system; they are produced by an
//! external cataloging pipeline and consulted here. Lookups fall back to the
//! system namespace, which holds the system-owned entries that dynamic
//! requests reference by common id.

use mci_api_types::{resource_key, ImageInfo, ResourceKind, SpecInfo};

use crate::error::{Error, Result};
use crate::{read_only, Context};

/// Resolve a spec id against the request namespace, then the system one.
pub async fn get_spec(ctx: &Context, ns: &str, spec_id: &str) -> Result<SpecInfo> {
    match lookup_spec(ctx, ns, spec_id).await? {
        Some(spec) => Ok(spec),
        None => Err(Error::validation(format!(
            "spec '{spec_id}' not found in ns '{ns}' or the system namespace"
        ))),
    }
}

/// Like [`get_spec`] but absence is not an error.
pub async fn lookup_spec(ctx: &Context, ns: &str, spec_id: &str) -> Result<Option<SpecInfo>> {
    let key = resource_key(ns, ResourceKind::Spec, spec_id);
    if let Some(spec) = read_only::<SpecInfo>(ctx.kv.as_ref(), &key).await? {
        return Ok(Some(spec));
    }
    let system_key = resource_key(&ctx.settings.system_ns, ResourceKind::Spec, spec_id);
    read_only(ctx.kv.as_ref(), &system_key).await
}

/// Resolve an image id against the request namespace, then the system one.
pub async fn get_image(ctx: &Context, ns: &str, image_id: &str) -> Result<ImageInfo> {
    match lookup_image(ctx, ns, image_id).await? {
        Some(image) => Ok(image),
        None => Err(Error::validation(format!(
            "image '{image_id}' not found in ns '{ns}' or the system namespace"
        ))),
    }
}

/// Like [`get_image`] but absence is not an error.
pub async fn lookup_image(ctx: &Context, ns: &str, image_id: &str) -> Result<Option<ImageInfo>> {
    let key = resource_key(ns, ResourceKind::Image, image_id);
    if let Some(image) = read_only::<ImageInfo>(ctx.kv.as_ref(), &key).await? {
        return Ok(Some(image));
    }
    let system_key = resource_key(&ctx.settings.system_ns, ResourceKind::Image, image_id);
    read_only(ctx.kv.as_ref(), &system_key).await
}

/// Register a spec record. Catalog production is external; this is the
/// seam it uses (and what tests seed through).
pub async fn put_spec(ctx: &Context, ns: &str, spec: &SpecInfo) -> Result<()> {
    let key = resource_key(ns, ResourceKind::Spec, &spec.id);
    mci_kvstore::put_record(ctx.kv.as_ref(), &key, spec).await?;
    Ok(())
}

/// Register an image record.
pub async fn put_image(ctx: &Context, ns: &str, image: &ImageInfo) -> Result<()> {
    let key = resource_key(ns, ResourceKind::Image, &image.id);
    mci_kvstore::put_record(ctx.kv.as_ref(), &key, image).await?;
    Ok(())
}
