//! The worker side of the impersonation RPC.
//!
//! An embedding binary dispatches into [`run_from_argv`] when its argv starts
//! with the protocol sentinel. The worker immediately makes itself
//! untraceable (`PR_SET_DUMPABLE=0`) so a same-UID tracer cannot attach and
//! steal descriptors before startup completes, then serves requests until the
//! peer closes the request channel.

use std::io;
use std::os::fd::AsFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use chrono::TimeZone;

use super::proto::{self, OpCode, Request, ARGV_SENTINEL};
use crate::tvfs::{EntryType, NativeInfo};

/// Exit code for a clean, peer-initiated shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code for a fatal protocol or I/O error.
pub const EXIT_FAILURE: i32 = 1;

/// Entry point for the embedding binary: recognizes
/// `<sentinel> <in_fd> <out_fd>` and runs the worker loop on those
/// descriptors. Returns `None` when the argv is not a worker invocation.
pub fn run_from_argv(args: &[String]) -> Option<i32> {
    use std::os::fd::FromRawFd;

    if args.len() != 3 || args[0] != ARGV_SENTINEL {
        return None;
    }
    let in_fd: i32 = args[1].parse().ok()?;
    let out_fd: i32 = args[2].parse().ok()?;

    harden();

    // SAFETY: the parent set these descriptors up for exactly this purpose
    // and nothing else in this process uses them.
    let input = unsafe { UnixStream::from_raw_fd(in_fd) };
    let output = if out_fd == in_fd {
        match input.try_clone() {
            Ok(s) => s,
            Err(_) => return Some(EXIT_FAILURE),
        }
    } else {
        unsafe { UnixStream::from_raw_fd(out_fd) }
    };

    Some(serve_connection(input, output))
}

/// Disables ptrace-style attachment where the platform supports it.
fn harden() {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: plain prctl with immediate arguments.
        unsafe {
            libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0);
        }
    }
}

/// Serves requests from `input`, answering on `output`, until the peer shuts
/// down or a fatal error occurs. Returns the process exit code.
pub fn serve_connection(mut input: UnixStream, mut output: UnixStream) -> i32 {
    loop {
        let request = match proto::read_request(&mut input) {
            Ok(req) => req,
            Err(e) if e.raw_os_error() == Some(libc::ENODATA) => return EXIT_OK,
            Err(e) if e.raw_os_error() == Some(libc::ENOSYS) => {
                // Unknown op: report it and keep serving. The frame was
                // consumed, so we stay in sync.
                if proto::write_response(&mut output, libc::ENOSYS, None, &[]).is_err() {
                    return EXIT_FAILURE;
                }
                continue;
            }
            Err(_) => return EXIT_FAILURE,
        };

        let ok = match execute(&request) {
            Ok(Reply::Empty) => proto::write_response(&mut output, 0, None, &[]),
            Ok(Reply::Handle(file)) => proto::write_response(&mut output, 0, Some(file.as_fd()), &[]),
            Ok(Reply::Payload(payload)) => proto::write_response(&mut output, 0, None, &payload),
            Err(e) => proto::write_response(&mut output, e.raw_os_error().unwrap_or(libc::EIO), None, &[]),
        };

        if ok.is_err() {
            return EXIT_FAILURE;
        }
    }
}

enum Reply {
    Empty,
    Handle(std::fs::File),
    Payload(Vec<u8>),
}

fn arg_path(request: &Request, index: usize) -> io::Result<PathBuf> {
    let bytes = request
        .args
        .get(index)
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADMSG))?;
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

fn arg_u8(request: &Request, index: usize) -> io::Result<u8> {
    request
        .args
        .get(index)
        .and_then(|a| a.first())
        .copied()
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADMSG))
}

fn arg_i64(request: &Request, index: usize) -> io::Result<i64> {
    let bytes = request
        .args
        .get(index)
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADMSG))?;
    let arr: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| io::Error::from_raw_os_error(libc::EBADMSG))?;
    Ok(i64::from_le_bytes(arr))
}

fn info_of(meta: &std::fs::Metadata) -> NativeInfo {
    let entry_type = if meta.is_symlink() {
        EntryType::Link
    } else if meta.is_dir() {
        EntryType::Dir
    } else if meta.is_file() {
        EntryType::File
    } else {
        EntryType::Unknown
    };
    let mtime = meta
        .modified()
        .ok()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .unwrap_or_else(|| chrono::Utc.timestamp_opt(0, 0).unwrap());
    NativeInfo {
        entry_type,
        size: meta.len(),
        mtime,
    }
}

fn execute(request: &Request) -> io::Result<Reply> {
    match request.op {
        OpCode::OpenFile => {
            let path = arg_path(request, 0)?;
            let mode = arg_u8(request, 1)?;
            let truncate = arg_u8(request, 2)? != 0;

            let mut options = std::fs::File::options();
            match mode {
                0 => {
                    options.read(true);
                }
                1 => {
                    options.write(true).create(true).truncate(truncate);
                }
                _ => {
                    options.read(true).write(true).create(true).truncate(truncate);
                }
            }
            Ok(Reply::Handle(options.open(path)?))
        }
        OpCode::OpenDirectory => {
            let path = arg_path(request, 0)?;
            let mut entries = Vec::new();
            for dirent in std::fs::read_dir(path)? {
                let dirent = dirent?;
                let Ok(meta) = dirent.metadata() else { continue };
                entries.push((dirent.file_name().to_string_lossy().into_owned(), info_of(&meta)));
            }
            Ok(Reply::Payload(proto::encode_dir_entries(&entries)))
        }
        OpCode::Rename => {
            std::fs::rename(arg_path(request, 0)?, arg_path(request, 1)?)?;
            Ok(Reply::Empty)
        }
        OpCode::RemoveFile => {
            std::fs::remove_file(arg_path(request, 0)?)?;
            Ok(Reply::Empty)
        }
        OpCode::RemoveDirectory => {
            std::fs::remove_dir(arg_path(request, 0)?)?;
            Ok(Reply::Empty)
        }
        OpCode::Info => {
            let path = arg_path(request, 0)?;
            let follow = arg_u8(request, 1)? != 0;
            let meta = if follow {
                std::fs::metadata(&path)?
            } else {
                std::fs::symlink_metadata(&path)?
            };
            Ok(Reply::Payload(proto::encode_info(&info_of(&meta))))
        }
        OpCode::Mkdir => {
            let path = arg_path(request, 0)?;
            if arg_u8(request, 1)? != 0 {
                std::fs::create_dir_all(path)?;
            } else {
                std::fs::create_dir(path)?;
            }
            Ok(Reply::Empty)
        }
        OpCode::SetMtime => {
            let path = arg_path(request, 0)?;
            let millis = arg_i64(request, 1)?;
            let mtime = chrono::Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
            let file = std::fs::File::options().read(true).open(&path)?;
            file.set_times(std::fs::FileTimes::new().set_modified(std::time::SystemTime::from(mtime)))?;
            Ok(Reply::Empty)
        }
    }
}

