use crate::error::{Error, Result};
use std::net::TcpListener;
use std::os::fd::{FromRawFd, RawFd};

/// Close a raw fd, logging instead of failing; used on teardown paths where
/// nothing useful can be done with the error.
pub fn close_fd(fd: RawFd) {
    let rc = unsafe { libc::close(fd) };
    if rc < 0 {
        tracing::warn!(fd, error = %std::io::Error::last_os_error(), "close failed");
    }
}

/// Fetch and clear the pending error on a socket (`SO_ERROR`).
pub fn take_socket_error(fd: RawFd) -> Result<i32> {
    let mut code: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut code as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(Error::from_errno(format!("getsockopt SO_ERROR failed for fd {fd}")));
    }
    Ok(code)
}

/// Human-readable description for an OS error code.
pub fn describe_os_error(code: i32) -> String {
    std::io::Error::from_raw_os_error(code).to_string()
}

/// Outcome of one non-blocking `recv` call.
pub enum RecvOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// Orderly shutdown by the peer.
    Eof,
    /// Nothing more to read right now.
    WouldBlock,
}

pub fn recv_nonblocking(fd: RawFd, buf: &mut [u8]) -> Result<RecvOutcome> {
    loop {
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if n > 0 {
            return Ok(RecvOutcome::Data(n as usize));
        }
        if n == 0 {
            return Ok(RecvOutcome::Eof);
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        match errno {
            libc::EAGAIN => return Ok(RecvOutcome::WouldBlock),
            libc::EINTR => continue,
            _ => return Err(Error::from_errno(format!("recv failed for fd {fd}"))),
        }
    }
}

/// Build a non-blocking IPv4 listener on all interfaces with
/// `SO_REUSEADDR`, so a restarted server can rebind its port immediately.
pub fn tcp_listener(port: u16, backlog: i32) -> Result<TcpListener> {
    let raw = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if raw < 0 {
        return Err(Error::from_errno("socket failed"));
    }
    // Owns the fd from here on; early returns close it.
    let listener = unsafe { TcpListener::from_raw_fd(raw) };

    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            raw,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::from_errno("setsockopt SO_REUSEADDR failed"));
    }

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: libc::INADDR_ANY.to_be(),
        },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            raw,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::from_errno(format!("bind failed for port {port}")));
    }

    if unsafe { libc::listen(raw, backlog) } < 0 {
        return Err(Error::from_errno(format!("listen failed for port {port}")));
    }

    Ok(listener)
}

/// Send the whole buffer, retrying on `EAGAIN`/`EWOULDBLOCK` with a
/// spin-then-yield backoff. This is the runtime's one designated blocking
/// point: it is bounded by the peer's socket back-pressure.
pub fn send_all(fd: RawFd, data: &[u8]) -> Result<()> {
    let backoff = crossbeam::utils::Backoff::new();
    let mut sent = 0usize;

    while sent < data.len() {
        let remaining = &data[sent..];
        let n = unsafe {
            libc::send(
                fd,
                remaining.as_ptr() as *const libc::c_void,
                remaining.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n >= 0 {
            sent += n as usize;
            backoff.reset();
            continue;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        match errno {
            libc::EAGAIN => backoff.snooze(),
            libc::EINTR => continue,
            _ => return Err(Error::from_errno(format!("send failed for fd {fd}"))),
        }
    }
    Ok(())
}
