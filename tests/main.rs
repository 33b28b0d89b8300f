//! End-to-end tests over a real TCP control connection.

mod common;

use std::time::Duration;

use common::*;
use ironftpd::auth::autobanner::BanOptions;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_sequence_and_pwd() {
    let home = tempfile::tempdir().unwrap();
    std::fs::create_dir(home.path().join("pub")).unwrap();

    let addr = start_server(vec![user_with_mounts(
        "alice",
        "s3cret",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    assert!(client.read_reply().await.starts_with("220 "));

    assert!(client.cmd("USER alice").await.starts_with("331 "));
    assert!(client.cmd("PASS s3cret").await.starts_with("230 "));
    assert_eq!(client.cmd("PWD").await, "257 \"/\"\r\n");
    assert!(client.cmd("CWD /pub").await.starts_with("250 "));
    assert_eq!(client.cmd("PWD").await, "257 \"/pub\"\r\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_password_is_530() {
    let addr = start_server(vec![ironftpd::auth::User::with_password("bob", "right")]).await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER bob").await;
    assert!(client.cmd("PASS wrong").await.starts_with("530 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_require_login() {
    let addr = start_server(vec![]).await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    assert!(client.cmd("PWD").await.starts_with("530 "));
    assert!(client.cmd("LIST").await.starts_with("530 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn five_failures_close_the_connection() {
    let addr = start_server(vec![]).await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    for _ in 0..4 {
        let reply = client.cmd("PWD").await;
        assert!(reply.starts_with("530 "), "got {:?}", reply);
    }
    // The fifth failure is answered, then the connection goes away.
    let reply = client.cmd("PWD").await;
    assert!(reply.starts_with("530 "), "got {:?}", reply);
    assert_eq!(client.read_reply().await, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn epsv_stor_round_trip() {
    let home = tempfile::tempdir().unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    let reply = client.cmd("EPSV").await;
    assert!(reply.starts_with("229 "), "got {:?}", reply);
    let port = epsv_port(&reply);

    let mut data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    let reply = client.cmd("STOR hello.txt").await;
    assert!(reply.starts_with("150 "), "got {:?}", reply);

    data.write_all(b"hello").await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);

    let reply = client.read_reply().await;
    assert!(reply.starts_with("226 "), "got {:?}", reply);

    assert_eq!(std::fs::read_to_string(home.path().join("hello.txt")).unwrap(), "hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn epsv_retr_with_rest() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("data.bin"), b"0123456789").unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    assert!(client.cmd("REST 5").await.starts_with("350 "));

    let reply = client.cmd("EPSV").await;
    let port = epsv_port(&reply);
    let mut data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    assert!(client.cmd("RETR data.bin").await.starts_with("150 "));

    let mut received = String::new();
    data.read_to_string(&mut received).await.unwrap();
    assert_eq!(received, "56789");

    assert!(client.read_reply().await.starts_with("226 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rest_past_eof_fails_the_transfer() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("short.txt"), b"abc").unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    client.cmd("REST 100").await;
    let reply = client.cmd("EPSV").await;
    let port = epsv_port(&reply);
    let _data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    assert!(client.cmd("RETR short.txt").await.starts_with("150 "));
    let reply = client.read_reply().await;
    assert!(reply.starts_with("550 "), "got {:?}", reply);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_shows_mount_holes_only() {
    let target = tempfile::tempdir().unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/foo/bar", target.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    // LIST /
    let reply = client.cmd("EPSV").await;
    let mut data = TcpStream::connect(("127.0.0.1", epsv_port(&reply))).await.unwrap();
    assert!(client.cmd("LIST /").await.starts_with("150 "));
    let mut listing = String::new();
    data.read_to_string(&mut listing).await.unwrap();
    client.read_reply().await;

    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 1, "expected exactly one entry, got {:?}", lines);
    assert!(lines[0].starts_with('d'));
    assert!(lines[0].ends_with("foo"));

    // MKD in the hole is refused; MKD below the mount succeeds.
    assert!(client.cmd("MKD /foo/qux").await.starts_with("550 "));
    assert!(client.cmd("MKD /foo/bar/qux").await.starts_with("257 "));
    assert!(target.path().join("qux").is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_across_mounts_but_not_mount_roots() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    std::fs::write(a.path().join("f"), b"payload").unwrap();

    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/a", a.path()), mount_record("/b", b.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    assert!(client.cmd("RNFR /a/f").await.starts_with("350 "));
    assert!(client.cmd("RNTO /b/g").await.starts_with("250 "));
    assert_eq!(std::fs::read_to_string(b.path().join("g")).unwrap(), "payload");

    // A mount root cannot be renamed.
    assert!(client.cmd("RNFR /a").await.starts_with("350 "));
    assert!(client.cmd("RNTO /c").await.starts_with("550 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn epsv_all_latches_off_the_other_modes() {
    let home = tempfile::tempdir().unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    assert!(client.cmd("EPSV ALL").await.starts_with("200 "));
    assert!(client.cmd("PASV").await.starts_with("500 "));
    assert!(client.cmd("PORT 127,0,0,1,10,10").await.starts_with("500 "));
    assert!(client.cmd("EPRT |1|127.0.0.1|2560|").await.starts_with("500 "));
    // EPSV itself still works.
    assert!(client.cmd("EPSV").await.starts_with("229 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mfmt_mdtm_round_trip() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("stamped.txt"), b"x").unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    let reply = client.cmd("MFMT 20190715103000 /stamped.txt").await;
    assert!(reply.starts_with("213 Modify=20190715103000;"), "got {:?}", reply);

    let reply = client.cmd("MDTM /stamped.txt").await;
    assert_eq!(reply, "213 20190715103000\r\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn size_and_feat_and_syst() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("five.bin"), b"12345").unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;

    let feat = client.cmd("FEAT").await;
    assert!(feat.contains("MFMT"), "got {:?}", feat);
    assert!(feat.contains("UTF8"));
    assert!(feat.contains("EPSV"));

    assert_eq!(client.cmd("SYST").await, "215 UNIX Type: L8\r\n");

    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;
    assert_eq!(client.cmd("SIZE /five.bin").await, "213 5\r\n");
    assert!(client.cmd("SIZE /").await.starts_with("550 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn opts_utf8_on_accepted_off_refused() {
    let addr = start_server(vec![]).await;
    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;

    assert!(client.cmd("OPTS UTF8 ON").await.starts_with("200 "));
    assert!(client.cmd("OPTS UTF8 OFF").await.starts_with("504 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mode_z_advertised_but_not_enabled() {
    let addr = start_server(vec![]).await;
    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;

    let feat = client.cmd("FEAT").await;
    assert!(feat.contains("MODE Z"));
    assert!(client.cmd("MODE Z").await.starts_with("504 "));
    assert!(client.cmd("MODE S").await.starts_with("200 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mlst_reports_facts_on_the_control_channel() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("facts.txt"), b"12345").unwrap();
    let addr = start_server(vec![user_with_mounts(
        "alice",
        "pw",
        vec![mount_record("/", home.path())],
    )])
    .await;

    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    client.cmd("USER alice").await;
    client.cmd("PASS pw").await;

    let reply = client.cmd("MLST /facts.txt").await;
    assert!(reply.starts_with("250-"), "got {:?}", reply);
    assert!(reply.contains("type=file;"));
    assert!(reply.contains("size=5;"));
    assert!(reply.contains(" /facts.txt"));

    // Negotiate the facts down and observe the change.
    assert!(client.cmd("OPTS MLST type;").await.starts_with("200 "));
    let reply = client.cmd("MLST /facts.txt").await;
    assert!(reply.contains("type=file;"));
    assert!(!reply.contains("size="), "got {:?}", reply);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn autoban_closes_before_greeting() {
    let addr = start_server_with(vec![ironftpd::auth::User::with_password("carol", "right")], |server| {
        server.ban_policy(BanOptions {
            max_login_failures: 3,
            login_failures_time_window: Duration::from_secs(60),
            ban_duration: Duration::from_secs(3600),
        })
    })
    .await;

    for _ in 0..3 {
        let mut client = TestClient::connect(addr).await;
        client.read_reply().await;
        client.cmd("USER carol").await;
        assert!(client.cmd("PASS wrong").await.starts_with("530 "));
    }

    // The fourth connection is closed before any greeting.
    let mut banned = TestClient::connect(addr).await;
    assert_eq!(banned.read_reply().await, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_shutdown_answers_421_and_drains() {
    let notifier = std::sync::Arc::new(ironftpd::shutdown::Notifier::new());
    let server_notifier = notifier.clone();
    let addr = start_server_with(vec![], move |server| server.shutdown_notifier(server_notifier)).await;

    let mut client = TestClient::connect(addr).await;
    assert!(client.read_reply().await.starts_with("220 "));

    notifier.notify().await;

    // The idle session is told to go away, then the socket closes.
    let reply = client.read_reply().await;
    assert!(reply.starts_with("421 "), "got {:?}", reply);
    assert_eq!(client.read_reply().await, "");

    // And once every session is gone, linger resolves.
    notifier.linger().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quit_says_goodbye_and_closes() {
    let addr = start_server(vec![]).await;
    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;

    assert!(client.cmd("QUIT").await.starts_with("221 "));
    assert_eq!(client.read_reply().await, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_command_is_500() {
    let addr = start_server(vec![]).await;
    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;
    assert!(client.cmd("FROBNICATE now").await.starts_with("500 "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prot_without_tls_is_refused() {
    let addr = start_server(vec![]).await;
    let mut client = TestClient::connect(addr).await;
    client.read_reply().await;

    // Any PROT on a plaintext control channel, C included.
    assert!(client.cmd("PROT P").await.starts_with("502 "));
    assert!(client.cmd("PROT C").await.starts_with("502 "));
    // AUTH TLS on an endpoint without certificates.
    assert!(client.cmd("AUTH TLS").await.starts_with("502 "));
}
