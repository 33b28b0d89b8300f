//! The parent side of the impersonation RPC: a [`Backend`] whose every call
//! executes in the worker subprocess.

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use slog::Logger;

use super::proto::{self, OpCode, Request, ARGV_SENTINEL};
use crate::auth::user::ImpersonationToken;
use crate::tvfs::{Backend, NativeInfo, OpenMode};

struct Channel {
    tx: UnixStream,
    rx: UnixStream,
}

/// A [`Backend`] that forwards every operation to a subprocess running under
/// another OS identity.
pub struct ImpersonatorClient {
    token: ImpersonationToken,
    channel: Arc<tokio::sync::Mutex<Channel>>,
    // Held so the worker is reaped (and killed) with the client.
    _child: Option<tokio::process::Child>,
    logger: Logger,
}

impl std::fmt::Debug for ImpersonatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpersonatorClient").field("token", &self.token).finish()
    }
}

impl ImpersonatorClient {
    /// Spawns `program` in worker mode as `token`, wiring the RPC channels
    /// through the child's stdin/stdout.
    pub async fn spawn(logger: Logger, program: &Path, token: ImpersonationToken) -> io::Result<ImpersonatorClient> {
        let (parent_tx, child_in) = UnixStream::pair()?;
        let (child_out, parent_rx) = UnixStream::pair()?;

        let child = tokio::process::Command::new(program)
            .arg(ARGV_SENTINEL)
            .arg("0")
            .arg("1")
            .stdin(Stdio::from(OwnedFd::from(child_in)))
            .stdout(Stdio::from(OwnedFd::from(child_out)))
            .uid(token.uid)
            .gid(token.gid)
            .kill_on_drop(true)
            .spawn()?;

        slog::info!(logger, "impersonation worker started";
            "uid" => token.uid, "gid" => token.gid);

        Ok(ImpersonatorClient {
            token,
            channel: Arc::new(tokio::sync::Mutex::new(Channel {
                tx: parent_tx,
                rx: parent_rx,
            })),
            _child: Some(child),
            logger,
        })
    }

    /// A client over pre-connected channels. For tests and custom process
    /// supervision.
    pub fn from_channel(logger: Logger, token: ImpersonationToken, tx: UnixStream, rx: UnixStream) -> ImpersonatorClient {
        ImpersonatorClient {
            token,
            channel: Arc::new(tokio::sync::Mutex::new(Channel { tx, rx })),
            _child: None,
            logger,
        }
    }

    /// The identity this client executes as.
    pub fn token(&self) -> ImpersonationToken {
        self.token
    }

    async fn call(&self, request: Request) -> io::Result<proto::Response> {
        let channel = self.channel.clone();
        let response = tokio::task::spawn_blocking(move || {
            let mut guard = channel.blocking_lock();
            proto::write_request(&mut guard.tx, &request)?;
            proto::read_response(&mut guard.rx)
        })
        .await
        .map_err(io::Error::other)??;

        if response.result != 0 {
            slog::debug!(self.logger, "impersonated call failed"; "errno" => response.result);
            return Err(io::Error::from_raw_os_error(response.result));
        }
        Ok(response)
    }

    fn path_arg(path: &Path) -> Vec<u8> {
        path.as_os_str().as_bytes().to_vec()
    }
}

#[async_trait]
impl Backend for ImpersonatorClient {
    async fn open_file(&self, path: &Path, mode: OpenMode, truncate: bool) -> io::Result<tokio::fs::File> {
        let mode_arg = match mode {
            OpenMode::Reading => 0u8,
            OpenMode::Writing => 1,
            OpenMode::ReadWrite => 2,
        };
        let response = self
            .call(Request {
                op: OpCode::OpenFile,
                args: vec![Self::path_arg(path), vec![mode_arg], vec![truncate as u8]],
            })
            .await?;

        let fd = response.fd.ok_or_else(|| io::Error::from_raw_os_error(libc::EBADMSG))?;
        Ok(tokio::fs::File::from_std(std::fs::File::from(fd)))
    }

    async fn open_directory(&self, path: &Path) -> io::Result<Vec<(String, NativeInfo)>> {
        let response = self
            .call(Request {
                op: OpCode::OpenDirectory,
                args: vec![Self::path_arg(path)],
            })
            .await?;
        proto::decode_dir_entries(&response.payload)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.call(Request {
            op: OpCode::Rename,
            args: vec![Self::path_arg(from), Self::path_arg(to)],
        })
        .await
        .map(|_| ())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.call(Request {
            op: OpCode::RemoveFile,
            args: vec![Self::path_arg(path)],
        })
        .await
        .map(|_| ())
    }

    async fn remove_directory(&self, path: &Path) -> io::Result<()> {
        self.call(Request {
            op: OpCode::RemoveDirectory,
            args: vec![Self::path_arg(path)],
        })
        .await
        .map(|_| ())
    }

    async fn info(&self, path: &Path, follow_links: bool) -> io::Result<NativeInfo> {
        let response = self
            .call(Request {
                op: OpCode::Info,
                args: vec![Self::path_arg(path), vec![follow_links as u8]],
            })
            .await?;
        proto::decode_info(&response.payload)
    }

    async fn mkdir(&self, path: &Path, recurse: bool) -> io::Result<()> {
        self.call(Request {
            op: OpCode::Mkdir,
            args: vec![Self::path_arg(path), vec![recurse as u8]],
        })
        .await
        .map(|_| ())
    }

    async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> io::Result<()> {
        self.call(Request {
            op: OpCode::SetMtime,
            args: vec![Self::path_arg(path), mtime.timestamp_millis().to_le_bytes().to_vec()],
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impersonation::server;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    /// Runs the worker loop in-process over socketpairs; exercises the whole
    /// protocol without needing a privileged spawn.
    fn loopback_client() -> ImpersonatorClient {
        let (parent_tx, worker_in) = UnixStream::pair().unwrap();
        let (worker_out, parent_rx) = UnixStream::pair().unwrap();

        std::thread::spawn(move || server::serve_connection(worker_in, worker_out));

        ImpersonatorClient::from_channel(
            test_logger(),
            ImpersonationToken { uid: 0, gid: 0 },
            parent_tx,
            parent_rx,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let client = loopback_client();

        let file_path = dir.path().join("made-remotely");
        std::fs::write(&file_path, b"via the worker").unwrap();

        let mut file = client.open_file(&file_path, OpenMode::Reading, false).await.unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "via the worker");

        let info = client.info(&file_path, true).await.unwrap();
        assert_eq!(info.size, 14);

        client.remove_file(&file_path).await.unwrap();
        let err = client.info(&file_path, true).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_directory_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let client = loopback_client();

        let sub = dir.path().join("a/b");
        client.mkdir(&sub, true).await.unwrap();

        std::fs::write(sub.join("one"), b"1").unwrap();
        let listed = client.open_directory(&sub).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "one");

        client.rename(&sub.join("one"), &sub.join("two")).await.unwrap();
        assert!(sub.join("two").exists());

        client.remove_file(&sub.join("two")).await.unwrap();
        client.remove_directory(&sub).await.unwrap();
        assert!(!sub.exists());
    }
}
