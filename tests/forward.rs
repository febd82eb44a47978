// ABOUTME: End-to-end tests for local port forwarding and gateways.
// ABOUTME: Drives real TCP clients against the mock transport's channels.

mod support;

use halyard::{Connection, Gateway, LocalForward};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use support::mock_dialer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn relays_bytes_in_both_directions() {
    let (dialer, mut channels) = mock_dialer();
    let conn = Connection::builder("web1")
        .dialer(dialer)
        .build()
        .expect("construction should succeed");

    let forward = conn
        .forward_local(LocalForward::port(0).remote_port(9000))
        .await
        .expect("forward should start");
    let addr = forward.local_addr();

    let mut client = TcpStream::connect(addr)
        .await
        .expect("client connect should succeed");
    let opened = channels.recv().await.expect("channel should open");
    assert_eq!(opened.dest, ("localhost".to_string(), 9000));
    assert_eq!(opened.src, ("127.0.0.1".to_string(), 0));
    let mut remote = opened.remote;

    client.write_all(b"abc").await.expect("client write");
    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await.expect("remote read");
    assert_eq!(&buf, b"abc");

    remote.write_all(b"xyz").await.expect("remote write");
    client.read_exact(&mut buf).await.expect("client read");
    assert_eq!(&buf, b"xyz");

    // Closing the local client closes the remote channel.
    client.shutdown().await.expect("client shutdown");
    let n = remote.read(&mut buf).await.expect("remote read after close");
    assert_eq!(n, 0);

    forward.stop().await;

    // Full teardown: the port is immediately rebindable.
    TcpListener::bind(addr)
        .await
        .expect("port should be free after stop");
}

#[tokio::test]
async fn scoped_forward_tears_down_on_body_error() {
    let (dialer, _channels) = mock_dialer();
    let conn = Connection::builder("web1")
        .dialer(dialer)
        .build()
        .expect("construction should succeed");

    let addr_slot = Arc::new(parking_lot::Mutex::new(None));
    let slot = addr_slot.clone();
    let out = conn
        .with_forward_local(LocalForward::port(0), move |addr| {
            let slot = slot.clone();
            async move {
                *slot.lock() = Some(addr);
                Err::<(), &str>("body failed")
            }
        })
        .await
        .expect("forward itself should succeed");
    assert_eq!(out, Err("body failed"));

    let addr = addr_slot.lock().take().expect("body should have run");
    TcpListener::bind(addr)
        .await
        .expect("port should be free after scope exit");
}

#[tokio::test]
async fn channel_open_failure_does_not_stop_the_listener() {
    let (dialer, mut channels) = mock_dialer();
    let conn = Connection::builder("web1")
        .dialer(dialer.clone())
        .build()
        .expect("construction should succeed");

    let forward = conn
        .forward_local(LocalForward::port(0).remote_port(9000))
        .await
        .expect("forward should start");
    let addr = forward.local_addr();

    dialer.transport.fail_channel_opens.store(true, Ordering::SeqCst);
    let mut refused = TcpStream::connect(addr)
        .await
        .expect("client connect should succeed");
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), refused.read(&mut buf))
        .await
        .expect("refused client should be closed promptly");
    assert!(matches!(read, Ok(0) | Err(_)));

    // The listener keeps accepting once channels open again.
    dialer.transport.fail_channel_opens.store(false, Ordering::SeqCst);
    let mut client = TcpStream::connect(addr)
        .await
        .expect("client connect should succeed");
    let opened = channels.recv().await.expect("channel should open");
    let mut remote = opened.remote;

    client.write_all(b"ok").await.expect("client write");
    let mut buf = [0u8; 2];
    remote.read_exact(&mut buf).await.expect("remote read");
    assert_eq!(&buf, b"ok");

    forward.stop().await;
}

#[tokio::test]
async fn stop_waits_for_in_flight_relay() {
    let (dialer, mut channels) = mock_dialer();
    let conn = Connection::builder("web1")
        .dialer(dialer)
        .build()
        .expect("construction should succeed");

    let forward = conn
        .forward_local(LocalForward::port(0).remote_port(9000))
        .await
        .expect("forward should start");
    let addr = forward.local_addr();

    let client = TcpStream::connect(addr)
        .await
        .expect("client connect should succeed");
    let mut remote = channels.recv().await.expect("channel should open").remote;

    // Finish the transfer shortly after shutdown is signaled; stop() must
    // block until the relay has drained.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = remote.shutdown().await;
        drop(client);
    });

    tokio::time::timeout(Duration::from_secs(5), forward.stop())
        .await
        .expect("stop should return once the relay completes");

    TcpListener::bind(addr)
        .await
        .expect("port should be free after stop");
}

#[tokio::test]
async fn dropping_the_handle_eventually_frees_the_port() {
    let (dialer, _channels) = mock_dialer();
    let conn = Connection::builder("web1")
        .dialer(dialer)
        .build()
        .expect("construction should succeed");

    let forward = conn
        .forward_local(LocalForward::port(0))
        .await
        .expect("forward should start");
    let addr = forward.local_addr();
    drop(forward);

    // The accept loop polls its shutdown flag on a 100ms interval.
    tokio::time::sleep(Duration::from_millis(400)).await;
    TcpListener::bind(addr)
        .await
        .expect("port should be free after drop");
}

#[tokio::test]
async fn chained_gateway_opens_nested_connection_first() {
    let (gw_dialer, mut gw_channels) = mock_dialer();
    let bastion = Arc::new(
        Connection::builder("bastion")
            .dialer(gw_dialer.clone())
            .build()
            .expect("construction should succeed"),
    );

    let (dialer, _channels) = mock_dialer();
    let conn = Connection::builder("deploy@inner:2201")
        .dialer(dialer.clone())
        .gateway(Gateway::Chain(bastion.clone()))
        .build()
        .expect("construction should succeed");

    conn.open().await.expect("open should succeed");

    assert!(bastion.is_connected());
    assert_eq!(gw_dialer.dials.load(Ordering::SeqCst), 1);

    // The gateway channel targets this connection's (host, port) with an
    // empty source address.
    let opened = gw_channels.try_recv().expect("gateway channel should open");
    assert_eq!(opened.dest, ("inner".to_string(), 2201));
    assert_eq!(opened.src, (String::new(), 0));

    // And that channel was handed to the dial as the socket.
    assert_eq!(*dialer.last_had_socket.lock(), Some(true));
    let params = dialer.last_params.lock().clone().expect("dial recorded");
    assert_eq!(params.user, "deploy");
    assert_eq!(params.host, "inner");
    assert_eq!(params.port, 2201);
}

#[tokio::test]
async fn proxy_command_spawns_lazily_and_substitutes_tokens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("spawned");
    let template = format!("echo h=%h p=%p > {} && cat", marker.display());

    let (dialer, _channels) = mock_dialer();
    let conn = Connection::builder("web1:2222")
        .dialer(dialer.clone())
        .gateway(Gateway::ProxyCommand(template))
        .build()
        .expect("construction should succeed");

    // Construction has zero side effects.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!marker.exists());

    conn.open().await.expect("open should succeed");
    assert_eq!(*dialer.last_had_socket.lock(), Some(true));

    // The subprocess runs concurrently; poll briefly for its output.
    let mut contents = String::new();
    for _ in 0..50 {
        if marker.exists() {
            contents = std::fs::read_to_string(&marker).expect("read marker");
            if !contents.is_empty() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(contents.trim(), "h=web1 p=2222");
}
