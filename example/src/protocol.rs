//! Newline-delimited flat-JSON framing shared by the match and battle
//! services. The runtime itself imposes no framing; this is the example's.

use relayrt::prelude::*;
use std::os::fd::RawFd;

/// Serialize `body` as one JSON line and write it through the collocated
/// I/O event loop. Write failures are logged; the close event that follows
/// a dead socket cleans up the session.
pub fn send_line(ctx: &mut RunnerContext, fd: RawFd, body: &FlatJson) {
    let mut line = body.to_json_string();
    line.push('\n');

    let sent = ctx.with_service::<IoEventLoopService, _>(|io, _| io.write_to_fd(fd, line.as_bytes()));
    if let Some(Err(err)) = sent {
        tracing::warn!(fd, error = %err, "failed to write to client");
    }
}

/// Split complete lines out of `buffer`, leaving any partial tail in place.
/// Empty lines are dropped; a trailing `\r` is trimmed.
pub fn take_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if let Ok(text) = String::from_utf8(line)
            && !text.is_empty()
        {
            lines.push(text);
        }
    }
    lines
}

/// Deregister `fd` from the I/O event loop and close it if we still owned
/// it. Returns false when the loop had already released it (peer close).
pub fn release_and_close(ctx: &mut RunnerContext, fd: RawFd) -> bool {
    let released = ctx
        .with_service::<IoEventLoopService, _>(|io, _| io.remove_fd(fd).is_ok())
        .unwrap_or(false);
    if released {
        relayrt::net::socket::close_fd(fd);
    }
    released
}
