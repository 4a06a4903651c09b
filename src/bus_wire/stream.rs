use bytes::{Buf, BytesMut};

use super::frame::{FrameError, ServerFrame, ServerInfo};

/// Header of a `MSG` frame whose body has not fully arrived yet.
#[derive(Debug)]
struct PendingMessage {
    subject: String,
    sid: u64,
    reply_to: Option<String>,
    body_len: usize,
}

/// A stateful parser for the broker's line-oriented frame stream.
///
/// Bytes read off the transport are appended with [`feed`](Self::feed) and
/// complete frames are pulled out with [`next_frame`](Self::next_frame).
/// Header lines are CRLF-terminated; `MSG` frames carry a length-delimited
/// body followed by its own CRLF. Any header line or declared body length
/// larger than `max_frame_size` is a fatal decode error.
#[derive(Debug)]
pub struct FrameParser {
    buffer: BytesMut,
    max_frame_size: usize,
    pending: Option<PendingMessage>,
}

impl FrameParser {
    pub fn new(max_frame_size: usize) -> Self {
        FrameParser {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
            pending: None,
        }
    }

    /// Append raw bytes from the transport to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempt to parse a single frame from the internal buffer.
    ///
    /// Returns `Ok(Some(frame))` when a complete frame is available (its
    /// bytes are consumed), `Ok(None)` when more data is needed, and
    /// `Err(..)` on malformed or oversized input. Errors are not
    /// recoverable; the connection that produced them must be dropped.
    pub fn next_frame(&mut self) -> Result<Option<ServerFrame>, FrameError> {
        if self.pending.is_some() {
            return self.take_pending_body();
        }

        let line_end = match find_crlf(&self.buffer) {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > self.max_frame_size {
                    return Err(FrameError::TooLarge(self.max_frame_size));
                }
                return Ok(None);
            }
        };
        if line_end > self.max_frame_size {
            return Err(FrameError::TooLarge(self.max_frame_size));
        }

        let line = String::from_utf8(self.buffer[..line_end].to_vec())
            .map_err(|_| FrameError::Malformed("header line is not valid UTF-8".to_string()))?;
        self.buffer.advance(line_end + 2);

        let (op, rest) = match line.split_once(' ') {
            Some((op, rest)) => (op, rest.trim()),
            None => (line.as_str(), ""),
        };

        if op.eq_ignore_ascii_case("MSG") {
            self.pending = Some(parse_message_header(rest, self.max_frame_size)?);
            return self.take_pending_body();
        }
        if op.eq_ignore_ascii_case("INFO") {
            let info: ServerInfo = serde_json::from_str(rest)?;
            return Ok(Some(ServerFrame::Info(info)));
        }
        if op.eq_ignore_ascii_case("+OK") {
            return Ok(Some(ServerFrame::Ok));
        }
        if op.eq_ignore_ascii_case("-ERR") {
            // Brokers commonly quote the message: -ERR 'Unknown Protocol Operation'
            let message = rest.trim_matches('\'').to_string();
            return Ok(Some(ServerFrame::Err(message)));
        }
        if op.eq_ignore_ascii_case("PING") {
            return Ok(Some(ServerFrame::Ping));
        }
        if op.eq_ignore_ascii_case("PONG") {
            return Ok(Some(ServerFrame::Pong));
        }

        Err(FrameError::Malformed(format!(
            "unknown operation: {}",
            op
        )))
    }

    fn take_pending_body(&mut self) -> Result<Option<ServerFrame>, FrameError> {
        let needed = match &self.pending {
            Some(header) => header.body_len + 2,
            None => return Ok(None),
        };
        if self.buffer.len() < needed {
            return Ok(None);
        }

        let header = self.pending.take().expect("pending header present");
        let body = self.buffer[..header.body_len].to_vec();
        if &self.buffer[header.body_len..needed] != b"\r\n" {
            return Err(FrameError::Malformed(
                "message body is not CRLF-terminated".to_string(),
            ));
        }
        self.buffer.advance(needed);

        Ok(Some(ServerFrame::Message {
            subject: header.subject,
            sid: header.sid,
            reply_to: header.reply_to,
            body,
        }))
    }
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\r\n")
}

fn parse_message_header(rest: &str, max_frame_size: usize) -> Result<PendingMessage, FrameError> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let (subject, sid, reply_to, len) = match parts.as_slice() {
        [subject, sid, len] => (*subject, *sid, None, *len),
        [subject, sid, reply, len] => (*subject, *sid, Some((*reply).to_string()), *len),
        _ => {
            return Err(FrameError::Malformed(format!(
                "MSG header has {} arguments, expected 3 or 4",
                parts.len()
            )))
        }
    };

    let sid: u64 = sid
        .parse()
        .map_err(|_| FrameError::Malformed(format!("invalid subscription id: {}", sid)))?;
    let body_len: usize = len
        .parse()
        .map_err(|_| FrameError::Malformed(format!("invalid body length: {}", len)))?;
    if body_len > max_frame_size {
        return Err(FrameError::TooLarge(max_frame_size));
    }

    Ok(PendingMessage {
        subject: subject.to_string(),
        sid,
        reply_to,
        body_len,
    })
}
