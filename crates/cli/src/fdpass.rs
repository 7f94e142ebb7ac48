//! Descriptor passing over the caller socket (`SCM_RIGHTS`).

use std::io::{self, IoSlice};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::sys::socket::{ControlMessage, MsgFlags, UnixAddr, sendmsg};
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;

/// Writes `line` with `fd` attached to its first byte, then the rest of the
/// line if the kernel took only part of it.
pub async fn send_with_fd(writer: &mut OwnedWriteHalf, line: &[u8], fd: &OwnedFd) -> io::Result<()> {
	let stream: &UnixStream = writer.as_ref();
	let sent = loop {
		stream.writable().await?;
		match stream.try_io(Interest::WRITABLE, || sendmsg_with_fd(stream.as_raw_fd(), line, fd.as_raw_fd())) {
			Ok(sent) => break sent,
			Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(err),
		}
	};
	if sent < line.len() {
		writer.write_all(&line[sent..]).await?;
	}
	Ok(())
}

fn sendmsg_with_fd(socket: RawFd, data: &[u8], fd: RawFd) -> io::Result<usize> {
	let iov = [IoSlice::new(data)];
	let fds = [fd];
	let control = [ControlMessage::ScmRights(&fds)];
	Ok(sendmsg::<UnixAddr>(socket, &iov, &control, MsgFlags::MSG_NOSIGNAL, None)?)
}
