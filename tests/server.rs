//! Socket-level scenarios driven against a real, ephemeral-port server,
//! mirroring the literal scenarios a reference client would exercise.

use bytes::Bytes;
use std::io::Read;
use std::net::TcpStream as StdTcpStream;
use std::time::Duration;
use tokio::net::TcpStream;

use rredis::config::Config;
use rredis::eviction::EvictionPolicy;
use rredis::resp::{Connection, Frame, Limits};
use rredis::server::Server;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

async fn start_server(config: Config) -> (Server, std::net::SocketAddr) {
    let server = Server::bind(config).await.expect("bind failed");
    server.load_persisted_state().await.expect("load failed");
    let addr = server.local_addr().expect("local_addr");
    (server, addr)
}

/// Spawns `server.run` in the background and returns a handle that can be
/// aborted once the test is done driving connections against `addr`.
fn spawn_accept_loop(server: Server) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        server.run(std::future::pending()).await;
    })
}

async fn connect(addr: std::net::SocketAddr) -> Connection {
    let stream = TcpStream::connect(addr).await.expect("connect failed");
    Connection::new(stream, Limits::default())
}

fn command(parts: &[&[u8]]) -> Frame {
    let mut frame = Frame::array();
    for part in parts {
        frame.push_bulk(Bytes::copy_from_slice(part));
    }
    frame
}

async fn roundtrip(conn: &mut Connection, parts: &[&[u8]]) -> Frame {
    conn.write_frame(&command(parts)).await.unwrap();
    conn.flush().await.unwrap();
    conn.read_frame().await.unwrap().expect("connection closed unexpectedly")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s1_set_then_get() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut conn = connect(addr).await;
    assert!(matches!(roundtrip(&mut conn, &[b"SET", b"k", b"v"]).await, Frame::Simple(s) if s == "OK"));
    match roundtrip(&mut conn, &[b"GET", b"k"]).await {
        Frame::Bulk(b) => assert_eq!(&b[..], b"v"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s2_missing_key_returns_null() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut conn = connect(addr).await;
    assert!(matches!(roundtrip(&mut conn, &[b"GET", b"nope"]).await, Frame::Null));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s3_expire_and_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut conn = connect(addr).await;
    roundtrip(&mut conn, &[b"SET", b"k", b"v"]).await;
    assert!(matches!(roundtrip(&mut conn, &[b"EXPIRE", b"k", b"100"]).await, Frame::Integer(1)));
    match roundtrip(&mut conn, &[b"TTL", b"k"]).await {
        Frame::Integer(ttl) => assert!((99..=100).contains(&ttl), "ttl was {ttl}"),
        other => panic!("unexpected reply: {other:?}"),
    }
    assert!(matches!(roundtrip(&mut conn, &[b"TTL", b"absent"]).await, Frame::Integer(-2)));
    roundtrip(&mut conn, &[b"SET", b"p", b"q"]).await;
    assert!(matches!(roundtrip(&mut conn, &[b"TTL", b"p"]).await, Frame::Integer(-1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s4_del_returns_count_of_existing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut conn = connect(addr).await;
    for k in [b"a".as_slice(), b"b", b"c"] {
        roundtrip(&mut conn, &[b"SET", k, b"v"]).await;
    }
    assert!(matches!(
        roundtrip(&mut conn, &[b"DEL", b"a", b"b", b"z"]).await,
        Frame::Integer(2)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s5_keys_glob_match() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut conn = connect(addr).await;
    for k in [b"foo".as_slice(), b"foobar", b"bar"] {
        roundtrip(&mut conn, &[b"SET", k, b"v"]).await;
    }
    match roundtrip(&mut conn, &[b"KEYS", b"foo*"]).await {
        Frame::Array(items) => {
            let mut names: Vec<String> = items
                .into_iter()
                .map(|f| match f {
                    Frame::Bulk(b) => String::from_utf8(b.to_vec()).unwrap(),
                    other => panic!("unexpected element: {other:?}"),
                })
                .collect();
            names.sort();
            assert_eq!(names, vec!["foo".to_string(), "foobar".to_string()]);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_parse_rejection_closes_connection_with_reset() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut std_stream = StdTcpStream::connect(addr).unwrap();
    std_stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    std::io::Write::write_all(&mut std_stream, b"*1\r\n$99999999999\r\n").unwrap();

    // The server should reply with a protocol error and then close the
    // connection; reads either surface the error bytes or an immediate
    // reset, but must not hang or silently accept more input.
    let mut buf = [0u8; 256];
    let read = std_stream.read(&mut buf);
    match read {
        Ok(0) => {}
        Ok(n) => assert!(buf[..n].starts_with(b"-")),
        Err(e) => assert!(
            matches!(e.kind(), std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted),
            "unexpected error kind: {e:?}"
        ),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s7_eviction_bounds_dbsize_under_tight_cap() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        max_memory: 1024,
        max_memory_policy: EvictionPolicy::AllKeysLru,
        ..test_config(&dir)
    };
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut conn = connect(addr).await;
    for i in 0..200 {
        let key = format!("key:{i}");
        roundtrip(&mut conn, &[b"SET", key.as_bytes(), b"x"]).await;
    }

    match roundtrip(&mut conn, &[b"DBSIZE"]).await {
        Frame::Integer(n) => assert!(n < 200, "dbsize {n} was not bounded by eviction"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auth_gate_rejects_unauthenticated_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        requirepass: Some("secret".to_string()),
        ..test_config(&dir)
    };
    let (server, addr) = start_server(config).await;
    spawn_accept_loop(server);

    let mut conn = connect(addr).await;
    assert!(matches!(roundtrip(&mut conn, &[b"GET", b"k"]).await, Frame::Error(_)));
    assert!(matches!(roundtrip(&mut conn, &[b"PING"]).await, Frame::Simple(s) if s == "PONG"));
    assert!(matches!(roundtrip(&mut conn, &[b"AUTH", b"wrong"]).await, Frame::Error(_)));
    assert!(matches!(roundtrip(&mut conn, &[b"AUTH", b"secret"]).await, Frame::Simple(_)));
    assert!(matches!(roundtrip(&mut conn, &[b"SET", b"k", b"v"]).await, Frame::Simple(_)));
}
