//! Helpers shared by the integration tests: start a server on a free port,
//! speak raw FTP over a TCP stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ironftpd::auth::file_based::FileBasedAuthenticator;
use ironftpd::auth::user::{MountRecord, User};
use ironftpd::Server;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;

/// A raw FTP client connection used by the integration tests.
pub struct TestClient {
    /// The control connection's read half.
    pub reader: BufReader<OwnedReadHalf>,
    /// The control connection's write half.
    pub writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TestClient {
    /// Connects to `addr`, retrying briefly while the server comes up.
    pub async fn connect(addr: SocketAddr) -> TestClient {
        let mut last_err = None;
        for _ in 0..50 {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    return TestClient {
                        reader: BufReader::new(read),
                        writer: write,
                    };
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
        panic!("could not connect to test server: {:?}", last_err);
    }

    /// Reads one full reply, following multi-line continuations.
    pub async fn read_reply(&mut self) -> String {
        let mut first_line = String::new();
        if self.reader.read_line(&mut first_line).await.unwrap() == 0 {
            return String::new(); // connection closed
        }

        let mut full = first_line.clone();
        if first_line.len() >= 4 && &first_line[3..4] == "-" {
            let code = &first_line[..3].to_string();
            loop {
                let mut line = String::new();
                if self.reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                full.push_str(&line);
                if line.len() >= 4 && line.starts_with(code.as_str()) && &line[3..4] == " " {
                    break;
                }
            }
        }
        full
    }

    /// Sends a command line and returns the server's reply.
    pub async fn cmd(&mut self, line: &str) -> String {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
        self.read_reply().await
    }
}

/// Picks a free port by binding and dropping a listener.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Builds a password-authenticated user with the given mount table.
pub fn user_with_mounts(name: &str, password: &str, mounts: Vec<MountRecord>) -> User {
    let mut user = User::with_password(name, password);
    user.mounts = mounts;
    user
}

/// Builds a non-recursive, non-autocreating mount record.
pub fn mount_record(tvfs_path: &str, native: &std::path::Path) -> MountRecord {
    MountRecord {
        tvfs_path: tvfs_path.to_string(),
        native_path: native.to_path_buf(),
        access: Default::default(),
        recursive: Default::default(),
        autocreate: false,
    }
}

/// Starts a server with the given users on a free localhost port.
pub async fn start_server(users: Vec<User>) -> SocketAddr {
    start_server_with(users, |server| server).await
}

/// Starts a server with the given users, letting the test adjust the builder.
pub async fn start_server_with<F>(users: Vec<User>, configure: F) -> SocketAddr
where
    F: FnOnce(Server) -> Server,
{
    let port = free_port().await;
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let authenticator = Arc::new(FileBasedAuthenticator::builder().users(users).build());
    let server = configure(Server::new(authenticator).passive_ports(50000..=51000));

    tokio::spawn(async move {
        let _ = server.listen(addr.to_string()).await;
    });

    addr
}

/// Parses the port out of a `229 Entering Extended Passive Mode (|||p|)`.
pub fn epsv_port(reply: &str) -> u16 {
    let start = reply.find("(|||").expect("229 reply shape") + 4;
    let end = reply[start..].find('|').expect("229 reply shape") + start;
    reply[start..end].parse().expect("port number")
}
