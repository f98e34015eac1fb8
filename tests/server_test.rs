//! Lifecycle tests for a single server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::post, Router};
use serverset::error::BoxError;
use serverset::net::Address;
use serverset::server::{hook, Bind, HttpOptions, Protocol, RpcOptions, ServerConfig};
use serverset::{Error, Mode, Server, ServerState};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

mod common;

#[test]
fn rpc_without_socket_or_registration_is_invalid() {
    let err = Server::new(ServerConfig {
        name: "idx".into(),
        bind: Bind::address("", 0),
        protocol: Protocol::Rpc(RpcOptions::default()),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn rpc_with_registration_but_no_socket_is_invalid() {
    let err = Server::new(ServerConfig {
        name: "idx".into(),
        bind: Bind::address("", 0),
        protocol: Protocol::rpc(|_routes| {}),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn missing_handler_or_registration_is_invalid() {
    for protocol in [
        Protocol::RequestResponse(HttpOptions::default()),
        Protocol::QueryLanguage(HttpOptions::default()),
        Protocol::Rpc(RpcOptions::default()),
    ] {
        let err = Server::new(ServerConfig {
            name: "empty".into(),
            bind: Bind::address("127.0.0.1", 0),
            protocol,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)), "{err}");
    }
}

#[test]
fn unset_bind_is_invalid() {
    let mut config = common::rest_config("nowhere");
    config.bind = Bind::Unset;
    assert!(matches!(Server::new(config), Err(Error::InvalidConfiguration(_))));
}

#[tokio::test]
async fn externally_supplied_socket_is_used() {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();

    let mut config = common::rest_config("external");
    config.bind = Bind::Listener(socket);
    let server = Server::new(config).unwrap();
    assert_eq!(server.local_addr().unwrap(), addr);

    let _errors = server.listen_and_serve().await;
    let (status, body) = common::get_text(addr, "/").await.unwrap();
    assert_eq!((status, body.as_str()), (200, "ok"));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn rest_round_trip() {
    let server = common::rest_server("rest");
    assert_eq!(server.name(), "rest");
    assert_eq!(server.mode(), Mode::RequestResponse);
    assert!(!server.is_running());

    let _errors = server.listen_and_serve().await;
    assert!(server.is_running());

    let (status, body) = common::get_text(server.local_addr().unwrap(), "/").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, "ok");

    server.shutdown().await.unwrap();
    assert!(!server.is_running());
}

#[tokio::test]
async fn query_language_round_trip() {
    let router = Router::new().route("/graphql", post(|body: String| async move { body }));
    let server = Server::new(ServerConfig {
        name: "gql".into(),
        bind: Bind::address("127.0.0.1", 0),
        protocol: Protocol::query_language(router),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(server.mode(), Mode::QueryLanguage);

    let _errors = server.listen_and_serve().await;
    let body = reqwest::Client::new()
        .post(common::url(server.local_addr().unwrap(), "/graphql"))
        .body("{ search }")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "{ search }");
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn rpc_round_trip() {
    let server = common::grpc_server("grpc");
    assert_eq!(server.mode(), Mode::Rpc);
    let _errors = server.listen_and_serve().await;

    let mut client = common::health_client(server.local_addr().unwrap()).await;
    let response = client
        .check(HealthCheckRequest { service: String::new() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status, ServingStatus::Serving as i32);
    drop(client);

    server.shutdown().await.unwrap();
    assert!(!server.is_running());
}

#[tokio::test]
async fn listen_while_running_is_noop() {
    let server = common::rest_server("twice");
    let _errors = server.listen_and_serve().await;

    let mut second = server.listen_and_serve().await;
    assert!(second.recv().await.is_none());
    assert!(server.is_running());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_when_stopped_is_noop() {
    let server = common::rest_server("idle");
    server.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn shutdown_twice_after_serving() {
    let server = common::grpc_server("grpc-twice");
    let mut errors = server.listen_and_serve().await;
    server.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
    assert!(errors.recv().await.is_none());
}

#[tokio::test]
async fn server_restarts_on_same_socket() {
    let server = common::rest_server("again");
    let addr = server.local_addr().unwrap();
    for _ in 0..2 {
        let _errors = server.listen_and_serve().await;
        assert_eq!(common::get_text(addr, "/").await.unwrap().0, 200);
        server.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn pre_start_error_is_reported_and_serving_continues() {
    let mut config = common::rest_config("pre-start");
    config.pre_start = Some(hook(|| async { Err::<(), BoxError>("warm-up failed".into()) }));
    let server = Server::new(config).unwrap();

    let mut errors = server.listen_and_serve().await;
    let err = errors.recv().await.unwrap();
    assert!(matches!(err, Error::PreStart { ref name, .. } if name == "pre-start"));
    assert!(err.to_string().contains("warm-up failed"));

    assert_eq!(common::get_text(server.local_addr().unwrap(), "/").await.unwrap().0, 200);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn pre_stop_runs_during_probe_wait_and_error_is_returned() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = common::rest_config("pre-stop");
    config.probe_wait = Duration::from_millis(100);
    config.pre_stop = Some(hook({
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), BoxError>("deregister failed".into())
            }
        }
    }));
    let server = Server::new(config).unwrap();
    let _errors = server.listen_and_serve().await;

    let started = Instant::now();
    let err = server.shutdown().await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(err, Error::PreStop { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!server.is_running());
}

#[tokio::test]
async fn drain_deadline_is_enforced() {
    let mut config = common::rest_config("slow");
    config.shutdown_duration = Duration::from_millis(300);
    let server = Server::new(config).unwrap();
    let _errors = server.listen_and_serve().await;

    let addr = server.local_addr().unwrap();
    let _in_flight = tokio::spawn(async move { common::get_text(addr, "/slow").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let err = server.shutdown().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_deadline_exceeded(), "{err}");
    assert!(elapsed < Duration::from_millis(300) + Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn caller_deadline_caps_own_shutdown_duration() {
    let server = common::rest_server("capped");
    let _errors = server.listen_and_serve().await;

    let addr = server.local_addr().unwrap();
    let _in_flight = tokio::spawn(async move { common::get_text(addr, "/slow").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    let err = server.shutdown_until(deadline).await.unwrap_err();
    assert!(err.is_deadline_exceeded());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn hard_close_ends_open_rpc_streams() {
    let (reporter, health) = tonic_health::server::health_reporter();
    let server = Server::new(ServerConfig {
        name: "watched".into(),
        bind: Bind::address("127.0.0.1", 0),
        shutdown_duration: Duration::from_millis(300),
        protocol: Protocol::rpc(move |routes| {
            routes.add_service(health);
        }),
        ..Default::default()
    })
    .unwrap();
    let _errors = server.listen_and_serve().await;

    let mut client = common::health_client(server.local_addr().unwrap()).await;
    let mut updates = client
        .watch(HealthCheckRequest { service: String::new() })
        .await
        .unwrap()
        .into_inner();
    let first = updates.message().await.unwrap().unwrap();
    assert_eq!(first.status, ServingStatus::Serving as i32);

    // The open watch keeps the graceful drain from finishing.
    let err = server.shutdown().await.unwrap_err();
    assert!(err.is_deadline_exceeded(), "{err}");
    assert_eq!(server.state(), ServerState::Stopped);

    reporter.set_service_status("", tonic_health::ServingStatus::NotServing).await;
    let next = tokio::time::timeout(Duration::from_secs(2), updates.message())
        .await
        .expect("stream neither delivered nor ended");
    assert!(!matches!(next, Ok(Some(_))), "stream outlived the server: {next:?}");
}

#[tokio::test]
async fn pre_stop_hook_is_cancelled_at_deadline() {
    let finished = Arc::new(AtomicUsize::new(0));
    let mut config = common::rest_config("stuck-hook");
    config.shutdown_duration = Duration::from_millis(100);
    config.pre_stop = Some(hook({
        let finished = finished.clone();
        move || {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }
    }));
    let server = Server::new(config).unwrap();
    let _errors = server.listen_and_serve().await;

    let err = server.shutdown().await.unwrap_err();
    assert!(err.to_string().contains("pre-stop hook did not finish"), "{err}");

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_round_trip() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rest.sock");
    let mut config = common::rest_config("uds");
    config.bind = Bind::unix(&path);
    let server = Server::new(config).unwrap();
    assert_eq!(server.address(), &Address::Unix(path.clone()));
    assert!(server.local_addr().is_none());

    let _errors = server.listen_and_serve().await;
    let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("ok"), "{response}");

    server.shutdown().await.unwrap();
    assert!(!server.is_running());
}

#[cfg(unix)]
#[tokio::test]
async fn rpc_over_unix_socket() {
    use hyper_util::rt::TokioIo;
    use tonic::transport::{Endpoint, Uri};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grpc.sock");
    let server = Server::new(ServerConfig {
        name: "grpc-uds".into(),
        bind: Bind::unix(&path),
        protocol: Protocol::rpc(|routes| {
            let (_reporter, health) = tonic_health::server::health_reporter();
            routes.add_service(health);
        }),
        ..Default::default()
    })
    .unwrap();
    let _errors = server.listen_and_serve().await;

    let channel = Endpoint::from_static("http://localhost")
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(tokio::net::UnixStream::connect(path).await?)) }
        }))
        .await
        .unwrap();
    let response = HealthClient::new(channel)
        .check(HealthCheckRequest { service: String::new() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status, ServingStatus::Serving as i32);

    server.shutdown().await.unwrap();
}
