use httpmock::{Method::POST, MockServer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;

use post_sampler::executor::RESPONSE_CODE_EXCEPTION;
use post_sampler::prelude::*;

// Paths used in load tests performed during these tests.
const SERVLET_PATH: &str = "/testServlet";
const MISSING_PATH: &str = "/missing";

/// A 200 response is a success, recorded with the real status and body.
#[tokio::test]
async fn test_success() {
    let server = MockServer::start();
    let servlet = server.mock(|when, then| {
        when.method(POST)
            .path(SERVLET_PATH)
            .header("content-type", "application/octet-stream")
            .body("<order id=\"1\"/>");
        then.status(200).body("accepted");
    });
    let input_dir = common::build_input_dir(&[("order-1.xml", "<order id=\"1\"/>")]);

    let configuration = common::build_configuration(&server, input_dir.path(), vec![]);
    let sampler = PostSampler::new(&configuration).unwrap();
    let result = sampler.run_sample("Thread Group 1-1").await.unwrap();

    servlet.assert();
    assert!(result.success);
    assert_eq!(result.response_code, "200");
    assert_eq!(result.response_body, "accepted");
    assert_eq!(result.label, "Thread Group 1-1 - order-1.xml");
    assert_eq!(result.file_index, 0);
    assert!(result.end_time >= result.start_time);
    assert!(sampler.selector().in_flight().is_empty());
}

/// A 404 response is a failure that keeps the real status code.
#[tokio::test]
async fn test_not_found() {
    let server = MockServer::start();
    let missing = server.mock(|when, then| {
        when.method(POST).path(MISSING_PATH);
        then.status(404);
    });
    let input_dir = common::build_input_dir(&[("a.bin", "a"), ("b.bin", "b")]);

    let configuration =
        common::build_configuration(&server, input_dir.path(), vec!["--path", MISSING_PATH]);
    let sampler = PostSampler::new(&configuration).unwrap();
    let result = sampler.run_sample("user").await.unwrap();

    missing.assert();
    assert!(!result.success);
    assert_eq!(result.response_code, "404");
    assert_eq!(result.response_message, "Not Found");
    assert!(result.file_index < 2);
    assert!(sampler.selector().in_flight().is_empty());
}

/// Nothing listening on the target: a failure with diagnostics, and the file is released.
#[tokio::test]
async fn test_connection_refused() {
    let server = MockServer::start();
    // Bind and drop a listener to find a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_address = listener.local_addr().unwrap().to_string();
    drop(listener);
    let input_dir = common::build_input_dir(&[("a.bin", "a")]);

    let configuration = common::build_configuration(
        &server,
        input_dir.path(),
        vec!["--address", &closed_address],
    );
    let sampler = PostSampler::new(&configuration).unwrap();
    let result = sampler.run_sample("user").await.unwrap();

    assert!(!result.success);
    assert_eq!(result.response_code, RESPONSE_CODE_EXCEPTION);
    assert!(!result.response_body.is_empty());
    assert!(result.end_time >= result.start_time);
    assert!(sampler.selector().in_flight().is_empty());
}

/// An empty input directory invokes the abort handler and produces no sample.
#[tokio::test]
async fn test_empty_input_dir() {
    let server = MockServer::start();
    let servlet = server.mock(|when, then| {
        when.method(POST).path(SERVLET_PATH);
        then.status(200);
    });
    let input_dir = common::build_input_dir(&[]);
    let aborted = Arc::new(AtomicUsize::new(0));
    let counter = aborted.clone();

    let configuration = common::build_configuration(&server, input_dir.path(), vec![]);
    let sampler = PostSampler::new(&configuration)
        .unwrap()
        .set_abort_handler(Arc::new(move |_: &SamplerError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    assert!(matches!(
        sampler.run_sample("user").await,
        Err(SamplerError::FatalConfiguration { .. })
    ));
    assert_eq!(aborted.load(Ordering::SeqCst), 1);
    servlet.assert_hits(0);
}

/// With a single file, a second concurrent sample waits until the first releases it.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_file_two_users() {
    let server = MockServer::start();
    let servlet = server.mock(|when, then| {
        when.method(POST).path(SERVLET_PATH);
        then.status(200).delay(Duration::from_millis(300));
    });
    let input_dir = common::build_input_dir(&[("only.bin", "only")]);

    let configuration = common::build_configuration(&server, input_dir.path(), vec![]);
    let sampler = PostSampler::new(&configuration).unwrap();

    let first = tokio::spawn({
        let sampler = sampler.clone();
        async move { sampler.run_sample("user 1").await }
    });
    let second = tokio::spawn({
        let sampler = sampler.clone();
        async move { sampler.run_sample("user 2").await }
    });
    let mut results = vec![
        first.await.unwrap().unwrap(),
        second.await.unwrap().unwrap(),
    ];
    results.sort_by_key(|result| result.start_time);

    servlet.assert_hits(2);
    assert!(results.iter().all(|result| result.success));
    assert!(results.iter().all(|result| result.file_index == 0));
    // The exchanges never overlapped.
    assert!(results[1].start_time >= results[0].end_time);
    assert!(sampler.selector().in_flight().is_empty());
}

/// With the queue disabled, concurrent samples may share a file.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_queue_shares_file() {
    let server = MockServer::start();
    let servlet = server.mock(|when, then| {
        when.method(POST).path(SERVLET_PATH);
        then.status(200).delay(Duration::from_millis(300));
    });
    let input_dir = common::build_input_dir(&[("only.bin", "only")]);

    let configuration =
        common::build_configuration(&server, input_dir.path(), vec!["--no-queue"]);
    let sampler = PostSampler::new(&configuration).unwrap();

    let (first, second) = tokio::join!(sampler.run_sample("user 1"), sampler.run_sample("user 2"));
    let (first, second) = (first.unwrap(), second.unwrap());

    servlet.assert_hits(2);
    assert!(first.success && second.success);
    // Both ran at the same time.
    assert!(second.start_time < first.end_time && first.start_time < second.end_time);
    assert!(sampler.selector().in_flight().is_empty());
}

/// Concurrent samples over several files never hold the same file at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unique_files_in_flight() {
    let server = MockServer::start();
    let servlet = server.mock(|when, then| {
        when.method(POST).path(SERVLET_PATH);
        then.status(200).delay(Duration::from_millis(200));
    });
    let input_dir = common::build_input_dir(&[
        ("a.bin", "a"),
        ("b.bin", "b"),
        ("c.bin", "c"),
        ("d.bin", "d"),
    ]);

    let configuration = common::build_configuration(&server, input_dir.path(), vec![]);
    let sampler = PostSampler::new(&configuration).unwrap();

    let handles: Vec<_> = (1..=4)
        .map(|user| {
            let sampler = sampler.clone();
            tokio::spawn(async move { sampler.run_sample(&format!("user {}", user)).await })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    servlet.assert_hits(4);
    // Any two samples that used the same file did so one after the other.
    for (i, a) in results.iter().enumerate() {
        for b in results.iter().skip(i + 1) {
            if a.file_index == b.file_index {
                assert!(a.end_time <= b.start_time || b.end_time <= a.start_time);
            }
        }
    }
    assert!(sampler.selector().in_flight().is_empty());
}
