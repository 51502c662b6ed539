use recurl::{ErrorKind, HttpClient};
use std::time::{Duration, Instant};

mod common;

use common::{MockResponse, TestServer};

#[test]
fn cancelling_during_backoff_resolves_promptly() {
    common::setup();

    let server = TestServer::spawn(|_| MockResponse::status(500));
    let client = HttpClient::new().unwrap();

    // Plenty of attempts so the request would otherwise keep retrying.
    let future = client
        .get(server.endpoint())
        .retry(5, true)
        .async_perform();
    let handle = future.handle();

    // Wait for the first attempt to complete; with an immediate 500 the
    // request is then either in backoff or just resubmitting.
    assert!(server.wait_for_requests(1, Duration::from_secs(5)));

    let cancelled_at = Instant::now();
    handle.cancel();

    let error = futures_lite::future::block_on(future).unwrap_err();
    let elapsed = cancelled_at.elapsed();

    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert!(error.is_cancelled());

    // The pending backoff timer is expedited rather than waited out, so
    // resolution arrives within scheduler slack, not after the full delay
    // ladder.
    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);

    // No further attempts are submitted after the cancellation.
    let attempts = server.request_count();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(server.request_count(), attempts);
    assert!(attempts <= 2);
}

#[test]
fn cancel_is_idempotent() {
    common::setup();

    let server = TestServer::spawn(|_| MockResponse::status(500));
    let client = HttpClient::new().unwrap();

    let future = client
        .get(server.endpoint())
        .retry(5, true)
        .async_perform();
    let handle = future.handle();

    assert!(server.wait_for_requests(1, Duration::from_secs(5)));

    handle.cancel();
    handle.cancel();

    let error = futures_lite::future::block_on(future).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);

    // Cancelling after resolution changes nothing either.
    handle.cancel();
}

#[test]
fn cancelling_a_finished_request_is_a_no_op() {
    common::setup();

    let server = TestServer::spawn(|_| MockResponse::ok().with_body("done"));
    let client = HttpClient::new().unwrap();

    let future = client.get(server.endpoint()).async_perform();
    let handle = future.handle();

    let response = futures_lite::future::block_on(future).unwrap();
    assert_eq!(response.status(), 200);

    handle.cancel();

    assert_eq!(client.stats().attempts_ok(), 1);
    assert_eq!(client.stats().attempts_failed(), 0);
}
