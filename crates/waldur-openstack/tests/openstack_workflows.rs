//! Integration tests for OpenStack workflows against a mock Waldur server.

use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use waldur_core::{ClientConfig, Error, RecordingSleeper, WaitOptions};
use waldur_openstack::{
    CreateSecurityGroupRequest, OpenStackClient, SecurityGroupRule, UpdateSubnetRequest,
};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TENANT: &str = "0c4cbd7b5a2a4d44a7e2d0f0c9a1b2c3";
const GROUP: &str = "7b1e6f0a2c3d4e5f8a9b0c1d2e3f4a5b";

/// Get the path to the test fixtures directory.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn load_fixture(name: &str) -> serde_json::Value {
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

fn client_for(server: &MockServer, sleeper: &RecordingSleeper) -> OpenStackClient {
    let config = ClientConfig::new(format!("{}/api/", server.uri()), "integration-token").unwrap();
    OpenStackClient::builder(config)
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap()
}

#[test]
fn fixture_rules_deserialize() {
    let group = load_fixture("security_group.json");
    let rules: Vec<SecurityGroupRule> = serde_json::from_value(group["rules"].clone()).unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].description.as_deref(), Some("ssh"));
    assert_eq!(rules[1], SecurityGroupRule::tcp_ingress(443, "0.0.0.0/0"));
}

#[tokio::test]
async fn create_security_group_then_wait() {
    let server = MockServer::start().await;
    let sleeper = RecordingSleeper::default();
    let settled = load_fixture("security_group.json");
    let rules: Vec<SecurityGroupRule> = serde_json::from_value(settled["rules"].clone()).unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-tenants/{TENANT}/")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"uuid": TENANT, "name": "lab"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/api/openstack-tenants/{TENANT}/create_security_group/")))
        .and(body_json(json!({
            "name": "web",
            "rules": settled["rules"],
            "description": "HTTP and SSH"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "uuid": GROUP,
            "name": "web",
            "state": "Creation Scheduled",
            "rules": settled["rules"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-security-groups/{GROUP}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": GROUP,
            "state": "Creating"
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-security-groups/{GROUP}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(settled.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &sleeper);
    let request = CreateSecurityGroupRequest {
        name: "web".into(),
        rules,
        description: Some("HTTP and SSH".into()),
        tags: Vec::new(),
    };
    let wait = WaitOptions::new().with_interval(Duration::from_secs(5));
    let group = client
        .create_security_group(TENANT, None, &request, &wait)
        .await
        .unwrap();

    assert_eq!(group.uuid(), Some(GROUP));
    assert_eq!(group.name(), Some("web"));
    assert_eq!(group.get("rules"), Some(&settled["rules"]));
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(5)]);
}

#[tokio::test]
async fn security_group_erred_during_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/openstack-tenants/"))
        .and(query_param("name_exact", "lab"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"uuid": TENANT}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/openstack-tenants/{TENANT}/create_security_group/")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uuid": GROUP})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-security-groups/{GROUP}/")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"uuid": GROUP, "state": "Erred"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &RecordingSleeper::default());
    let request = CreateSecurityGroupRequest {
        name: "broken".into(),
        ..CreateSecurityGroupRequest::default()
    };
    let err = client
        .create_security_group("lab", None, &request, &WaitOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn get_security_group_missing_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/openstack-tenants/{TENANT}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": TENANT})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/openstack-security-groups/"))
        .and(query_param("tenant_uuid", TENANT))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &RecordingSleeper::default());
    assert!(client.get_security_group(TENANT, "web").await.unwrap().is_none());
}

#[tokio::test]
async fn update_subnet_conflicting_gateway_sends_nothing() {
    let server = MockServer::start().await;
    let client = client_for(&server, &RecordingSleeper::default());

    let request = UpdateSubnetRequest {
        name: "private".into(),
        gateway_ip: Some("10.0.0.1".into()),
        disable_gateway: true,
        connect: true,
        ..UpdateSubnetRequest::default()
    };
    let err = client
        .update_subnet("5e4d3c2b1a0f49e8a7b6c5d4e3f2a1b0", &request)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_of_named_volume() {
    let server = MockServer::start().await;
    let sleeper = RecordingSleeper::default();
    Mock::given(method("GET"))
        .and(path("/api/openstack-volumes/"))
        .and(query_param("name_exact", "data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"uuid": "v1"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/openstack-volumes/v1/snapshot/"))
        .and(body_json(json!({"name": "nightly"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uuid": "s1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/openstack-snapshots/s1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "s1", "state": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &sleeper);
    let request = waldur_openstack::CreateSnapshotRequest {
        name: "nightly".into(),
        ..Default::default()
    };
    let snapshot = client
        .create_snapshot("data", &request, &WaitOptions::new())
        .await
        .unwrap();
    assert_eq!(snapshot.uuid(), Some("s1"));
    assert!(sleeper.calls().is_empty());
}
