use recurl::HttpClient;

mod common;

use common::{MockResponse, TestServer};

#[test]
fn custom_request_headers_reach_the_server() {
    common::setup();

    let server = TestServer::spawn(|_| MockResponse::ok());
    let client = HttpClient::new().unwrap();

    client
        .get(server.endpoint())
        .header("X-Custom", "one")
        .headers(vec![("X-A", "a"), ("X-B", "b")])
        .perform()
        .unwrap();

    let request = &server.requests()[0];
    assert_eq!(request.header("X-Custom"), Some("one"));
    assert_eq!(request.header("X-A"), Some("a"));
    assert_eq!(request.header("X-B"), Some("b"));
}

#[test]
fn duplicate_response_headers_keep_the_last_value() {
    common::setup();

    let server = TestServer::spawn(|_| {
        MockResponse::ok()
            .with_header("X-Dup", "first")
            .with_header("X-Dup", "second")
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2")
    });
    let client = HttpClient::new().unwrap();

    let response = client.get(server.endpoint()).perform().unwrap();

    assert_eq!(response.header("X-Dup"), Some("second"));
    assert_eq!(response.header("Set-Cookie"), Some("b=2"));
}

#[test]
fn tracing_identity_is_propagated_in_headers() {
    common::setup();

    let server = TestServer::spawn(|_| MockResponse::ok());
    let client = HttpClient::new().unwrap();

    client.get(server.endpoint()).perform().unwrap();
    client.get(server.endpoint()).perform().unwrap();

    let requests = server.requests();

    for request in &requests {
        let span_id = request.header("X-YaSpanId").expect("span id missing");
        let trace_id = request.header("X-YaTraceId").expect("trace id missing");
        let request_id = request.header("X-YaRequestId").expect("request id missing");

        assert_eq!(span_id.len(), 16);
        assert_eq!(trace_id.len(), 32);
        assert_eq!(request_id.len(), 16);

        for id in [span_id, trace_id, request_id] {
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    // Each request gets its own identity.
    assert_ne!(
        requests[0].header("X-YaTraceId"),
        requests[1].header("X-YaTraceId")
    );
}

#[test]
fn retried_attempts_share_one_trace_identity() {
    common::setup();

    let server = TestServer::spawn(|request| {
        if request.number == 1 {
            MockResponse::status(503)
        } else {
            MockResponse::ok()
        }
    });
    let client = HttpClient::new().unwrap();

    let response = client
        .get(server.endpoint())
        .retry(2, false)
        .perform()
        .unwrap();

    assert_eq!(response.status(), 200);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);

    // The span lives across all attempts of one request.
    assert_eq!(
        requests[0].header("X-YaTraceId"),
        requests[1].header("X-YaTraceId")
    );
    assert_eq!(
        requests[0].header("X-YaSpanId"),
        requests[1].header("X-YaSpanId")
    );
}
