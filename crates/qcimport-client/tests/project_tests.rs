use qcimport_client::{ExportRequest, RateLimiter, RedcapConnection, RedcapProject};
use qcimport_core::{ConnectionParameters, HttpConfig, RecordImporter};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn project_for(server: &MockServer) -> RedcapProject {
    let config = HttpConfig::default();
    let params = ConnectionParameters::new(&format!("{}/api/", server.uri()), "TOKEN").unwrap();
    let connection = RedcapConnection::new(params, RateLimiter::shared(&config), &config).unwrap();
    RedcapProject::new(connection)
}

#[tokio::test]
async fn import_records_sends_import_fields_and_returns_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/"))
        .and(body_string_contains("content=record"))
        .and(body_string_contains("action=import"))
        .and(body_string_contains("forceAutoNumber=false"))
        .and(body_string_contains("returnContent=count"))
        .and(body_string_contains("data=%5B%7B%22error_code%22"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
        .expect(1)
        .mount(&server)
        .await;

    let project = project_for(&server);
    let payload = r#"[{"error_code":"a1-ivp-m-001"},{"error_code":"a1-ivp-m-002"}]"#;
    let count = project.import_records(payload).await.unwrap();

    assert_eq!(count, 2);
}

#[tokio::test]
async fn import_records_through_the_importer_trait() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": "1"})))
        .mount(&server)
        .await;

    let importer: Box<dyn RecordImporter> = Box::new(project_for(&server));
    assert_eq!(importer.import_records("[{}]").await.unwrap(), 1);
}

#[tokio::test]
async fn import_rejection_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": "The following fields were not found: bogus"})),
        )
        .mount(&server)
        .await;

    let err = project_for(&server)
        .import_records(r#"[{"bogus":"1"}]"#)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert!(err.message().contains("fields were not found: bogus"));
}

#[tokio::test]
async fn import_response_without_count_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": []})))
        .mount(&server)
        .await;

    let err = project_for(&server).import_records("[]").await.unwrap_err();
    assert_eq!(err.status(), None);
    assert!(err.message().contains("unexpected response shape"));
}

#[tokio::test]
async fn describe_combines_project_info_and_field_names() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("content=project"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "project_id": 342,
            "project_title": "NACC QC Checks",
            "is_longitudinal": 0,
            "has_repeating_instruments_or_events": 0,
            "record_autonumbering_enabled": 0
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("content=exportFieldNames"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"original_field_name": "error_code", "choice_value": "", "export_field_name": "error_code"},
            {"original_field_name": "error_type", "choice_value": "", "export_field_name": "error_type"}
        ])))
        .mount(&server)
        .await;

    let summary = project_for(&server).describe().await.unwrap();

    assert_eq!(summary.pid, 342);
    assert_eq!(summary.title, "NACC QC Checks");
    assert_eq!(summary.primary_key.as_deref(), Some("error_code"));
}

#[tokio::test]
async fn export_metadata_limits_forms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("content=metadata"))
        .and(body_string_contains("forms%5B0%5D=qc_checks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"field_name": "error_code", "form_name": "qc_checks", "field_type": "text"}
        ])))
        .mount(&server)
        .await;

    let metadata = project_for(&server)
        .export_metadata(&["qc_checks"])
        .await
        .unwrap();

    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0]["field_name"], json!("error_code"));
}

#[tokio::test]
async fn export_records_as_json_and_csv() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("format=csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("error_code\na1-ivp-m-001\n"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("records%5B0%5D=a1-ivp-m-001"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"error_code": "a1-ivp-m-001"}])),
        )
        .mount(&server)
        .await;

    let project = project_for(&server);
    let csv = project
        .export_records_csv(&ExportRequest::default())
        .await
        .unwrap();
    assert_eq!(csv, "error_code\na1-ivp-m-001\n");

    let request = ExportRequest {
        records: vec!["a1-ivp-m-001".into()],
        ..Default::default()
    };
    let records = project.export_records(&request).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["error_code"], json!("a1-ivp-m-001"));
}
