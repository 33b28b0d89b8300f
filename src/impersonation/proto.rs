//! The impersonation wire protocol.
//!
//! Frames are length-prefixed and self-describing. A request is an op code
//! followed by length-prefixed byte-string arguments; a response is a result
//! code (0, or an errno) plus an op-specific payload. When a response carries
//! a file handle, the descriptor is sent through `SCM_RIGHTS` *before* the
//! payload bytes, so the receiver can always associate the two.
//!
//! Protocol-level failures map onto well-known errno values: a frame beyond
//! [`MAX_PAYLOAD`] is `EFBIG`, a clean EOF at a frame boundary is `ENODATA`
//! (orderly shutdown), an unrecognized op code is `ENOSYS`.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

/// First argv token of a worker invocation; resists accidental invocation of
/// the embedding binary in worker mode.
pub const ARGV_SENTINEL: &str = "IRONFTPD-IMPERSONATE-1!";

/// Upper bound on a frame body.
pub const MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// The operations the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// `open_file(path, mode, truncate)` — returns a descriptor.
    OpenFile = 1,
    /// `open_directory(path)` — returns a serialized entry list.
    OpenDirectory = 2,
    /// `rename(from, to)`.
    Rename = 3,
    /// `remove_file(path)`.
    RemoveFile = 4,
    /// `remove_directory(path)`.
    RemoveDirectory = 5,
    /// `info(path, follow_links)` — returns a serialized entry info.
    Info = 6,
    /// `mkdir(path, recurse)`.
    Mkdir = 7,
    /// `set_mtime(path, millis)`.
    SetMtime = 8,
}

impl TryFrom<u8> for OpCode {
    type Error = io::Error;

    fn try_from(v: u8) -> Result<OpCode, io::Error> {
        Ok(match v {
            1 => OpCode::OpenFile,
            2 => OpCode::OpenDirectory,
            3 => OpCode::Rename,
            4 => OpCode::RemoveFile,
            5 => OpCode::RemoveDirectory,
            6 => OpCode::Info,
            7 => OpCode::Mkdir,
            8 => OpCode::SetMtime,
            _ => return Err(io::Error::from_raw_os_error(libc::ENOSYS)),
        })
    }
}

/// A request frame: op code plus raw byte-string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The operation.
    pub op: OpCode,
    /// Length-prefixed arguments, in op-specific order.
    pub args: Vec<Vec<u8>>,
}

/// A response frame.
#[derive(Debug)]
pub struct Response {
    /// 0 on success, an errno otherwise.
    pub result: i32,
    /// A descriptor received alongside, for open operations.
    pub fd: Option<OwnedFd>,
    /// Op-specific payload bytes.
    pub payload: Vec<u8>,
}

fn read_exact_or_nodata(stream: &mut UnixStream, buf: &mut [u8], at_boundary: bool) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            // EOF exactly between frames is an orderly shutdown.
            let errno = if at_boundary && filled == 0 { libc::ENODATA } else { libc::ECONNRESET };
            return Err(io::Error::from_raw_os_error(errno));
        }
        filled += n;
    }
    Ok(())
}

fn check_len(len: usize) -> io::Result<usize> {
    if len > MAX_PAYLOAD {
        return Err(io::Error::from_raw_os_error(libc::EFBIG));
    }
    Ok(len)
}

/// Writes a request frame.
pub fn write_request(stream: &mut UnixStream, req: &Request) -> io::Result<()> {
    let mut body = Vec::with_capacity(64);
    body.push(req.op as u8);
    for arg in &req.args {
        body.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        body.extend_from_slice(arg);
    }
    check_len(body.len())?;

    stream.write_all(&(body.len() as u32).to_le_bytes())?;
    stream.write_all(&body)?;
    Ok(())
}

/// Reads a request frame. `ENODATA` signals the peer closed between frames.
pub fn read_request(stream: &mut UnixStream) -> io::Result<Request> {
    let mut len_buf = [0u8; 4];
    read_exact_or_nodata(stream, &mut len_buf, true)?;
    let len = check_len(u32::from_le_bytes(len_buf) as usize)?;

    let mut body = vec![0u8; len];
    read_exact_or_nodata(stream, &mut body, false)?;

    if body.is_empty() {
        return Err(io::Error::from_raw_os_error(libc::EBADMSG));
    }

    let op = OpCode::try_from(body[0])?;
    let mut args = Vec::new();
    let mut pos = 1;
    while pos < body.len() {
        if pos + 4 > body.len() {
            return Err(io::Error::from_raw_os_error(libc::EBADMSG));
        }
        let arg_len = u32::from_le_bytes(body[pos..pos + 4].try_into().expect("4 bytes")) as usize;
        pos += 4;
        if pos + arg_len > body.len() {
            return Err(io::Error::from_raw_os_error(libc::EBADMSG));
        }
        args.push(body[pos..pos + arg_len].to_vec());
        pos += arg_len;
    }

    Ok(Request { op, args })
}

/// Writes a response frame, passing `fd` through the socket's ancillary data
/// before the payload.
pub fn write_response(stream: &mut UnixStream, result: i32, fd: Option<BorrowedFd<'_>>, payload: &[u8]) -> io::Result<()> {
    check_len(payload.len())?;

    let mut header = [0u8; 9];
    header[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4..8].copy_from_slice(&result.to_le_bytes());
    header[8] = fd.is_some() as u8;
    stream.write_all(&header)?;

    if let Some(fd) = fd {
        let fds = [fd.as_raw_fd()];
        let iov = [IoSlice::new(&[0xfdu8])];
        let cmsg = [ControlMessage::ScmRights(&fds)];
        sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    }

    stream.write_all(payload)?;
    Ok(())
}

/// Reads a response frame, collecting a passed descriptor when the header
/// announces one.
pub fn read_response(stream: &mut UnixStream) -> io::Result<Response> {
    let mut header = [0u8; 9];
    read_exact_or_nodata(stream, &mut header, true)?;

    let payload_len = check_len(u32::from_le_bytes(header[0..4].try_into().expect("4 bytes")) as usize)?;
    let result = i32::from_le_bytes(header[4..8].try_into().expect("4 bytes"));
    let has_fd = header[8] != 0;

    let fd = if has_fd { Some(recv_fd(stream)?) } else { None };

    let mut payload = vec![0u8; payload_len];
    read_exact_or_nodata(stream, &mut payload, false)?;

    Ok(Response { result, fd, payload })
}

fn recv_fd(stream: &mut UnixStream) -> io::Result<OwnedFd> {
    use std::os::fd::FromRawFd;

    let mut marker = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut marker)];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<()>(stream.as_raw_fd(), &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

    for cmsg in msg.cmsgs().map_err(|e| io::Error::from_raw_os_error(e as i32))? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                // SAFETY: the kernel just installed this descriptor into our
                // table for us; we are its only owner.
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }

    Err(io::Error::from_raw_os_error(libc::EBADMSG))
}

// -- payload helpers --------------------------------------------------------

/// Serialized form of a [`crate::tvfs::NativeInfo`].
pub fn encode_info(info: &crate::tvfs::NativeInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(17);
    out.push(encode_entry_type(info.entry_type));
    out.extend_from_slice(&info.size.to_le_bytes());
    out.extend_from_slice(&info.mtime.timestamp_millis().to_le_bytes());
    out
}

/// Parses what [`encode_info`] produced.
pub fn decode_info(payload: &[u8]) -> io::Result<crate::tvfs::NativeInfo> {
    use chrono::TimeZone;

    if payload.len() < 17 {
        return Err(io::Error::from_raw_os_error(libc::EBADMSG));
    }
    let entry_type = decode_entry_type(payload[0]);
    let size = u64::from_le_bytes(payload[1..9].try_into().expect("8 bytes"));
    let millis = i64::from_le_bytes(payload[9..17].try_into().expect("8 bytes"));
    let mtime = chrono::Utc
        .timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| chrono::Utc.timestamp_opt(0, 0).unwrap());
    Ok(crate::tvfs::NativeInfo { entry_type, size, mtime })
}

/// Serialized form of a directory listing.
pub fn encode_dir_entries(entries: &[(String, crate::tvfs::NativeInfo)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (name, info) in entries {
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&encode_info(info));
    }
    out
}

/// Parses what [`encode_dir_entries`] produced.
pub fn decode_dir_entries(payload: &[u8]) -> io::Result<Vec<(String, crate::tvfs::NativeInfo)>> {
    let bad = || io::Error::from_raw_os_error(libc::EBADMSG);

    if payload.len() < 4 {
        return Err(bad());
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().expect("4 bytes")) as usize;
    let mut pos = 4;
    let mut out = Vec::with_capacity(count.min(4096));

    for _ in 0..count {
        if pos + 4 > payload.len() {
            return Err(bad());
        }
        let name_len = u32::from_le_bytes(payload[pos..pos + 4].try_into().expect("4 bytes")) as usize;
        pos += 4;
        if pos + name_len + 17 > payload.len() {
            return Err(bad());
        }
        let name = String::from_utf8_lossy(&payload[pos..pos + name_len]).into_owned();
        pos += name_len;
        let info = decode_info(&payload[pos..pos + 17])?;
        pos += 17;
        out.push((name, info));
    }

    Ok(out)
}

fn encode_entry_type(t: crate::tvfs::EntryType) -> u8 {
    match t {
        crate::tvfs::EntryType::File => 0,
        crate::tvfs::EntryType::Dir => 1,
        crate::tvfs::EntryType::Link => 2,
        crate::tvfs::EntryType::Unknown => 3,
    }
}

fn decode_entry_type(v: u8) -> crate::tvfs::EntryType {
    match v {
        0 => crate::tvfs::EntryType::File,
        1 => crate::tvfs::EntryType::Dir,
        2 => crate::tvfs::EntryType::Link,
        _ => crate::tvfs::EntryType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_frames_round_trip() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let req = Request {
            op: OpCode::Rename,
            args: vec![b"/from".to_vec(), b"/to".to_vec()],
        };
        write_request(&mut a, &req).unwrap();
        assert_eq!(read_request(&mut b).unwrap(), req);
    }

    #[test]
    fn orderly_shutdown_is_enodata() {
        let (a, mut b) = UnixStream::pair().unwrap();
        drop(a);
        let err = read_request(&mut b).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENODATA));
    }

    #[test]
    fn oversized_frame_is_efbig() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&(u32::MAX).to_le_bytes()).unwrap();
        let err = read_request(&mut b).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EFBIG));
    }

    #[test]
    fn unknown_op_is_enosys() {
        let err = OpCode::try_from(99).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOSYS));
    }

    #[test]
    fn descriptor_travels_before_payload() {
        use std::os::fd::AsFd;

        let (mut a, mut b) = UnixStream::pair().unwrap();
        let file = tempfile::tempfile().unwrap();
        let fd: std::os::fd::OwnedFd = file.into();

        write_response(&mut a, 0, Some(fd.as_fd()), b"payload").unwrap();
        let resp = read_response(&mut b).unwrap();
        assert_eq!(resp.result, 0);
        assert_eq!(resp.payload, b"payload");
        assert!(resp.fd.is_some());
    }

    #[test]
    fn info_round_trip() {
        use chrono::TimeZone;
        let info = crate::tvfs::NativeInfo {
            entry_type: crate::tvfs::EntryType::File,
            size: 12345,
            mtime: chrono::Utc.timestamp_millis_opt(1_600_000_000_123).unwrap(),
        };
        assert_eq!(decode_info(&encode_info(&info)).unwrap(), info);
    }

    #[test]
    fn dir_entries_round_trip() {
        use chrono::TimeZone;
        let entries = vec![
            (
                "hello.txt".to_string(),
                crate::tvfs::NativeInfo {
                    entry_type: crate::tvfs::EntryType::File,
                    size: 5,
                    mtime: chrono::Utc.timestamp_opt(1000, 0).unwrap(),
                },
            ),
            (
                "sub".to_string(),
                crate::tvfs::NativeInfo {
                    entry_type: crate::tvfs::EntryType::Dir,
                    size: 0,
                    mtime: chrono::Utc.timestamp_opt(2000, 0).unwrap(),
                },
            ),
        ];
        assert_eq!(decode_dir_entries(&encode_dir_entries(&entries)).unwrap(), entries);
    }
}
