//! Cluster orchestration scenarios over the scripted transport.

mod common;

use http::Method;

use mci_api_types::{k8s_cluster_key, resource_key, K8sClusterDynamicReq, K8sClusterStatus,
    K8sNodeGroupDynamicReq, ResourceKind, SharedResourceInfo};
use mci_kvstore::KvStore as _;
use mci_orchestrator::k8s::{self, K8sCapabilityTable};
use mci_orchestrator::Error;

use common::{seed_catalog, test_ctx};

const NS: &str = "demo";

fn cluster_req(name: &str) -> K8sClusterDynamicReq {
    K8sClusterDynamicReq {
        name: name.into(),
        version: "1.29".into(),
        node_groups: vec![K8sNodeGroupDynamicReq {
            name: "workers".into(),
            common_spec: "aws-ap-northeast-2-t2-small".into(),
            common_image: "ubuntu22.04".into(),
            on_auto_scaling: true,
            desired_node_size: 2,
            min_node_size: 1,
            max_node_size: 4,
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn dynamic_cluster_create_bundles_node_groups() {
    let (ctx, transport, _kv) = test_ctx();
    seed_catalog(&ctx).await;

    let cluster = k8s::create_k8s_cluster_dynamic(
        &ctx,
        NS,
        &cluster_req("c1"),
        K8sCapabilityTable::builtin(),
    )
    .await
    .unwrap();

    // aws capability: version prefix match, bundled node groups, 2 subnets
    assert_eq!(cluster.version, "1.29.6");
    assert_eq!(cluster.status, K8sClusterStatus::Active);
    assert_eq!(cluster.node_groups.len(), 1);
    let group = &cluster.node_groups[0];
    assert_eq!(group.scaling.desired, 2);
    // aws designates node images, so the CSP image name is forwarded
    assert_eq!(group.csp_image_name.as_deref(), Some("ami-ubuntu-22-04"));

    assert_eq!(transport.call_count(&Method::POST, "/cluster"), 1);
    assert_eq!(
        transport.call_count(&Method::POST, "/subnet"),
        1,
        "second subnet for requiredSubnetCount=2"
    );

    // the cluster key is back-referenced from the shared resources
    let cluster_key = k8s_cluster_key(NS, "c1");
    for kind in ResourceKind::SHARED {
        let key = resource_key(NS, kind, "demo-shared-aws-ap-northeast-2");
        let raw = ctx.kv.get(&key).await.unwrap().unwrap();
        let resource: SharedResourceInfo = serde_json::from_str(&raw).unwrap();
        assert!(
            resource.associated.contains(&cluster_key),
            "{kind} misses the cluster back-reference"
        );
    }
}

#[tokio::test]
async fn autoscaling_and_scale_changes_are_persisted() {
    let (ctx, _transport, _kv) = test_ctx();
    seed_catalog(&ctx).await;
    k8s::create_k8s_cluster_dynamic(&ctx, NS, &cluster_req("c1"), K8sCapabilityTable::builtin())
        .await
        .unwrap();

    let cluster = k8s::set_node_group_autoscaling(&ctx, NS, "c1", "workers", false)
        .await
        .unwrap();
    assert!(!cluster.node_groups[0].scaling.on_auto);

    let cluster = k8s::change_node_group_scale(&ctx, NS, "c1", "workers", 3, 2, 6)
        .await
        .unwrap();
    let scaling = &cluster.node_groups[0].scaling;
    assert_eq!((scaling.desired, scaling.min, scaling.max), (3, 2, 6));

    let err = k8s::change_node_group_scale(&ctx, NS, "c1", "workers", 1, 2, 6)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");

    // state survives a re-read
    let fetched = k8s::get_k8s_cluster(&ctx, NS, "c1").await.unwrap();
    assert_eq!(fetched.node_groups[0].scaling.desired, 3);
}

#[tokio::test]
async fn upgrade_follows_version_recommendation() {
    let (ctx, _transport, _kv) = test_ctx();
    seed_catalog(&ctx).await;
    k8s::create_k8s_cluster_dynamic(&ctx, NS, &cluster_req("c1"), K8sCapabilityTable::builtin())
        .await
        .unwrap();

    let cluster = k8s::upgrade_k8s_cluster(&ctx, NS, "c1", "1.30", K8sCapabilityTable::builtin())
        .await
        .unwrap();
    assert_eq!(cluster.version, "1.30.2");

    let err = k8s::upgrade_k8s_cluster(&ctx, NS, "c1", "9.9", K8sCapabilityTable::builtin())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");
}

#[tokio::test]
async fn delete_cluster_drops_back_references() {
    let (ctx, _transport, kv) = test_ctx();
    seed_catalog(&ctx).await;
    k8s::create_k8s_cluster_dynamic(&ctx, NS, &cluster_req("c1"), K8sCapabilityTable::builtin())
        .await
        .unwrap();

    k8s::delete_k8s_cluster(&ctx, NS, "c1", false).await.unwrap();
    assert_eq!(kv.get(&k8s_cluster_key(NS, "c1")).await.unwrap(), None);

    for kind in ResourceKind::SHARED {
        let key = resource_key(NS, kind, "demo-shared-aws-ap-northeast-2");
        let raw = ctx.kv.get(&key).await.unwrap().unwrap();
        let resource: SharedResourceInfo = serde_json::from_str(&raw).unwrap();
        assert!(resource.associated.is_empty());
    }
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let (ctx, _transport, _kv) = test_ctx();
    seed_catalog(&ctx).await;

    let table = K8sCapabilityTable::from_yaml("providers: {}").unwrap();
    let err = k8s::create_k8s_cluster_dynamic(&ctx, NS, &cluster_req("c1"), &table)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");
}
