//! Controller client and flow compiler tests against a mock RESTCONF server

use super::*;
use crate::error::ConsoleError;
use crate::models::{FlowDirection, FlowStatus};
use crate::observability::{ConsoleMetrics, StructuredLogger};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;

const NODE: &str = "/rests/data/opendaylight-inventory:nodes/node=openflow:1";

fn odl() -> OdlClient {
    OdlClient::new(ControllerSettings {
        timeout_ms: 2000,
        ..Default::default()
    })
    .unwrap()
}

fn spec(controller: &str) -> FlowSpec {
    FlowSpec {
        controller: controller.to_string(),
        switch_id: "openflow:1".into(),
        category: "Zoom".into(),
        cookie: 42,
        meter_id: 3,
        protocol: TransportProtocol::Udp,
        client: Endpoint {
            ip: "192.168.1.10".parse().unwrap(),
            mac: Some("aa:bb:cc:dd:ee:01".into()),
            port: 51000,
        },
        server: Endpoint {
            ip: "198.51.100.20".parse().unwrap(),
            mac: None,
            port: 8801,
        },
        server_side_port: 1,
        client_side_port: 2,
    }
}

fn compiler(client: OdlClient) -> FlowCompiler {
    FlowCompiler::new(
        Arc::new(client),
        ConsoleMetrics::new(),
        StructuredLogger::new("test"),
    )
}

fn flow_path(flow_id: &str) -> String {
    format!("{}/flow-node-inventory:table=0/flow={}", NODE, flow_id)
}

mod client_tests {
    use super::*;

    #[tokio::test]
    async fn test_put_meter_sends_basic_auth_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", format!("{}/flow-node-inventory:meter=3", NODE).as_str())
            .match_header("authorization", "Basic YWRtaW46YWRtaW4=")
            .match_body(Matcher::PartialJson(json!({
                "flow-node-inventory:meter": [{ "meter-id": 3 }]
            })))
            .with_status(201)
            .create_async()
            .await;

        let body = json!({ "flow-node-inventory:meter": [{ "meter-id": 3 }] });
        let code = odl()
            .put_meter(&server.url(), "openflow:1", 3, &body)
            .await
            .unwrap();
        assert_eq!(code, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", flow_path("x").as_str())
            .with_status(409)
            .with_body("data-exists")
            .create_async()
            .await;

        let err = odl()
            .put_flow(&server.url(), "openflow:1", 0, "x", &json!({}))
            .await
            .unwrap_err();
        match err {
            ConsoleError::Upstream { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "data-exists");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_meter_is_ok() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", format!("{}/flow-node-inventory:meter=8", NODE).as_str())
            .with_status(404)
            .create_async()
            .await;

        let code = odl()
            .delete_meter(&server.url(), "openflow:1", 8)
            .await
            .unwrap();
        assert_eq!(code, 404);
    }
}

mod compiler_tests {
    use super::*;

    #[tokio::test]
    async fn test_both_directions_installed() {
        let mut server = mockito::Server::new_async().await;
        let flow = spec(&server.url());
        let fwd = server
            .mock("PUT", flow_path(&flow.flow_id(FlowDirection::ClientToServer)).as_str())
            .match_body(Matcher::PartialJson(json!({
                "flow-node-inventory:flow": [{ "cookie": 42 }]
            })))
            .with_status(201)
            .create_async()
            .await;
        let rev = server
            .mock("PUT", flow_path(&flow.flow_id(FlowDirection::ServerToClient)).as_str())
            .with_status(200)
            .create_async()
            .await;

        let results = compiler(odl()).install(&flow).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].direction, FlowDirection::ClientToServer);
        assert_eq!(results[0].status, FlowStatus::Success);
        assert_eq!(results[0].response_code, Some(201));
        assert_eq!(results[1].status, FlowStatus::Success);
        assert_eq!(results[1].response_code, Some(200));

        fwd.assert_async().await;
        rev.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_forward_skips_reverse() {
        let mut server = mockito::Server::new_async().await;
        let flow = spec(&server.url());
        server
            .mock("PUT", flow_path(&flow.flow_id(FlowDirection::ClientToServer)).as_str())
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let rev = server
            .mock("PUT", flow_path(&flow.flow_id(FlowDirection::ServerToClient)).as_str())
            .expect(0)
            .create_async()
            .await;

        let results = compiler(odl()).install(&flow).await;
        assert_eq!(results[0].status, FlowStatus::Failed);
        assert_eq!(results[0].response_code, Some(500));
        assert_eq!(results[1].status, FlowStatus::Skipped);
        assert_eq!(results[1].flow_id, flow.flow_id(FlowDirection::ServerToClient));
        assert!(results[1].flow_id.starts_with("42-"));
        rev.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_reverse_reported() {
        let mut server = mockito::Server::new_async().await;
        let flow = spec(&server.url());
        server
            .mock("PUT", flow_path(&flow.flow_id(FlowDirection::ClientToServer)).as_str())
            .with_status(201)
            .create_async()
            .await;
        server
            .mock("PUT", flow_path(&flow.flow_id(FlowDirection::ServerToClient)).as_str())
            .with_status(400)
            .create_async()
            .await;

        let results = compiler(odl()).install(&flow).await;
        assert_eq!(results[0].status, FlowStatus::Success);
        assert_eq!(results[1].status, FlowStatus::Failed);
        assert_eq!(results[1].response_code, Some(400));
    }

    #[tokio::test]
    async fn test_unreachable_controller() {
        let results = compiler(odl()).install(&spec("http://127.0.0.1:1")).await;
        assert_eq!(results[0].status, FlowStatus::Failed);
        assert_eq!(results[0].response_code, None);
        assert_eq!(results[1].status, FlowStatus::Skipped);
    }
}
