//! Integration tests for marketplace provisioning against a mock Waldur server.

use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use waldur_core::{ClientConfig, Error, RecordingSleeper, WaitOptions};
use waldur_marketplace::{
    ComponentUsage, CreateComponentUsagesRequest, FlavorChoice, InstanceRequest,
    MarketplaceClient, OrderRequest, VolumeRequest,
};
use waldur_openstack::{FloatingIpChoice, NetworkAttachment};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "6d8a7fbd33ab4b0e8e5d5f0f3c9b2a11";
const OFFERING: &str = "a1b2c3d4e5f647389a0b1c2d3e4f5a6b";
const TENANT: &str = "0c4cbd7b5a2a4d44a7e2d0f0c9a1b2c3";
const ORDER: &str = "4d5e6f7a8b9c40d1a2b3c4d5e6f7a8b9";
const INSTANCE: &str = "1f1f0c5b3ec24c7bb6f2d0a3c4e5f607";
const VOLUME: &str = "8c7b6a5f4e3d42c1b0a9f8e7d6c5b4a3";
const RESOURCE: &str = "b2c3d4e5f6a748399b0c1d2e3f4a5b6c";

/// Get the path to the test fixtures directory.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn load_fixture(name: &str) -> Value {
    let fixture_path = fixtures_dir().join(name);
    let text = fs::read_to_string(&fixture_path).unwrap_or_else(|e| {
        panic!(
            "Failed to read fixture at {}: {}",
            fixture_path.display(),
            e
        )
    });
    serde_json::from_str(&text).unwrap()
}

fn client_for(server: &MockServer, sleeper: &RecordingSleeper) -> MarketplaceClient {
    let config = ClientConfig::new(format!("{}/api/", server.uri()), "integration-token").unwrap();
    MarketplaceClient::builder(config)
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap()
}

async fn mount_lookup(server: &MockServer, collection: &str, name: &str, url: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/{collection}/")))
        .and(query_param("name_exact", name))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"url": url}])))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_offering_and_project(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/api/marketplace-public-offerings/{OFFERING}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(load_fixture("public_offering.json")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/projects/{PROJECT}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": PROJECT})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn create_instance_waits_for_order_and_external_ip() {
    let server = MockServer::start().await;
    let sleeper = RecordingSleeper::default();
    let api = format!("{}/api", server.uri());
    let flavor_url = format!("{api}/openstack-flavors/f1/");
    let image_url = format!("{api}/openstack-images/i1/");
    let subnet_url = format!("{api}/openstack-subnets/s1/");
    let group_url = format!("{api}/openstack-security-groups/g1/");

    mount_offering_and_project(&server).await;
    mount_lookup(&server, "openstack-flavors", "m1.small", &flavor_url).await;
    mount_lookup(&server, "openstack-images", "ubuntu-24.04", &image_url).await;
    mount_lookup(&server, "openstack-subnets", "private", &subnet_url).await;
    mount_lookup(&server, "openstack-security-groups", "web", &group_url).await;

    Mock::given(method("POST"))
        .and(path("/api/marketplace-orders/"))
        .and(body_json(json!({
            "project": format!("{api}/projects/{PROJECT}/"),
            "offering": format!("{api}/marketplace-public-offerings/{OFFERING}/"),
            "attributes": {
                "name": "vm1",
                "flavor": flavor_url,
                "image": image_url,
                "system_volume_size": 20480,
                "ports": [{"subnet": subnet_url}],
                "floating_ips": [{"subnet": subnet_url}],
                "security_groups": [{"url": group_url}],
                "data_volume_size": 51200
            },
            "limits": {},
            "accepting_terms_of_service": true
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uuid": ORDER})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/marketplace-orders/{ORDER}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "executing"})))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/marketplace-orders/{ORDER}/")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"state": "done", "resource_uuid": INSTANCE})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-instances/{INSTANCE}/")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"uuid": INSTANCE, "state": "OK", "external_ips": []})),
        )
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-instances/{INSTANCE}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": INSTANCE,
            "state": "OK",
            "external_ips": ["203.0.113.10"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = InstanceRequest {
        name: "vm1".into(),
        offering: OFFERING.into(),
        project: PROJECT.into(),
        image: "ubuntu-24.04".into(),
        flavor: FlavorChoice::Named("m1.small".into()),
        system_volume_size: 20,
        data_volume_size: Some(50),
        networks: vec![NetworkAttachment::subnet("private").with_floating_ip(FloatingIpChoice::Auto)],
        security_groups: vec!["web".into()],
        ..InstanceRequest::default()
    };
    let wait = WaitOptions::new().with_interval(Duration::from_secs(2));
    let client = client_for(&server, &sleeper);
    let uuid = client.create_instance(&request, &wait).await.unwrap();

    assert_eq!(uuid, INSTANCE);
    assert_eq!(
        sleeper.calls(),
        vec![Duration::from_secs(2), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn create_volume_without_wait_skips_polling_scope() {
    let server = MockServer::start().await;
    let sleeper = RecordingSleeper::default();
    let api = format!("{}/api", server.uri());
    let type_url = format!("{api}/openstack-volume-types/t1/");

    mount_offering_and_project(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/openstack-volume-types/"))
        .and(query_param("name_exact", "ssd"))
        .and(query_param("tenant_uuid", TENANT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"url": type_url}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/marketplace-orders/"))
        .and(body_json(json!({
            "project": format!("{api}/projects/{PROJECT}/"),
            "offering": format!("{api}/marketplace-public-offerings/{OFFERING}/"),
            "attributes": {"name": "data", "size": 10240, "type": type_url},
            "limits": {},
            "accepting_terms_of_service": true
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uuid": ORDER})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/marketplace-orders/{ORDER}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resource_uuid": VOLUME})))
        .expect(1)
        .mount(&server)
        .await;

    let request = VolumeRequest {
        name: "data".into(),
        offering: OFFERING.into(),
        project: PROJECT.into(),
        size: 10,
        volume_type: Some("ssd".into()),
        ..VolumeRequest::default()
    };
    let client = client_for(&server, &sleeper);
    let uuid = client
        .create_volume(&request, &WaitOptions::no_wait())
        .await
        .unwrap();

    assert_eq!(uuid, VOLUME);
    assert!(sleeper.calls().is_empty());
}

#[tokio::test]
async fn erred_order_stops_waiting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/marketplace-orders/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uuid": ORDER})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/marketplace-orders/{ORDER}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "erred",
            "error_message": "Quota exceeded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &RecordingSleeper::default());
    let err = client
        .create_resource(&OrderRequest::new(PROJECT, OFFERING), &WaitOptions::new())
        .await
        .unwrap_err();
    match err {
        Error::InvalidState(message) => assert_eq!(message, "Quota exceeded"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn delete_instance_terminates_marketplace_resource() {
    let server = MockServer::start().await;
    let scope_url = format!("{}/api/openstack-instances/{INSTANCE}/", server.uri());
    Mock::given(method("GET"))
        .and(path("/api/marketplace-resources/"))
        .and(query_param("scope", scope_url.as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"uuid": RESOURCE, "scope": scope_url}])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-instances/{INSTANCE}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": INSTANCE})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/marketplace-resources/{RESOURCE}/terminate/")))
        .and(body_json(json!({"attributes": {"delete_volumes": true, "release_floating_ips": true}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"order_uuid": ORDER})))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = Map::new();
    options.insert("delete_volumes".into(), json!(true));
    options.insert("release_floating_ips".into(), json!(true));
    let client = client_for(&server, &RecordingSleeper::default());
    let order = client
        .delete_instance(INSTANCE, Some(&options))
        .await
        .unwrap();
    assert_eq!(order, ORDER);
}

#[tokio::test]
async fn user_usage_links_offering_user() {
    let server = MockServer::start().await;
    let offering_user = "5a4b3c2d1e0f49a8b7c6d5e4f3a2b1c0";
    Mock::given(method("POST"))
        .and(path("/api/marketplace-component-usages/u1/set_user_usage/"))
        .and(body_json(json!({
            "usage": 3.5,
            "username": "alice",
            "user": format!("{}/api/marketplace-offering-users/{offering_user}/", server.uri())
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &RecordingSleeper::default());
    client
        .create_component_user_usage("u1", 3.5, "alice", Some(offering_user))
        .await
        .unwrap();
}

#[tokio::test]
async fn plan_period_usage_drops_resource() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/marketplace-component-usages/set_usage/"))
        .and(body_json(json!({
            "usages": [{"type": "storage", "amount": 100.0}],
            "plan_period": "pp1"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let request = CreateComponentUsagesRequest {
        usages: vec![ComponentUsage::new("storage", 100.0)],
        plan_period: Some("pp1".into()),
        resource: Some(RESOURCE.into()),
    };
    let client = client_for(&server, &RecordingSleeper::default());
    client.create_component_usages(&request).await.unwrap();
}
