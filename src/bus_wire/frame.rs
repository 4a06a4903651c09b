use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug)]
pub enum FrameError {
    /// A header line or declared body length exceeds the configured frame
    /// size limit. Fatal for the connection that produced it.
    TooLarge(usize),
    /// The frame header does not match the protocol grammar.
    Malformed(String),
    /// The JSON payload of a `CONNECT` or `INFO` frame could not be
    /// serialized or parsed.
    Json(serde_json::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::TooLarge(limit) => {
                write!(f, "frame exceeds maximum size of {} bytes", limit)
            }
            FrameError::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            FrameError::Json(e) => write!(f, "frame JSON payload error: {}", e),
        }
    }
}

impl Error for FrameError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FrameError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        FrameError::Json(e)
    }
}

/// Body of the `CONNECT` handshake frame. Credentials are omitted from the
/// JSON entirely when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    pub pedantic: bool,
    pub verbose: bool,
}

/// Capabilities advertised by the broker in its `INFO` frame.
///
/// Every field is optional and unrecognized fields are ignored; the engine
/// only uses the frame's arrival to trigger the handshake.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub max_payload: Option<u64>,
    #[serde(default)]
    pub auth_required: Option<bool>,
}

/// Frames sent from the client to the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Connect(ConnectBody),
    Publish {
        subject: String,
        reply_to: Option<String>,
        body: Vec<u8>,
    },
    Subscribe {
        sid: u64,
        subject: String,
        queue_group: Option<String>,
    },
    Unsubscribe {
        sid: u64,
        max_messages: Option<u64>,
    },
    Ping,
    Pong,
}

impl ClientFrame {
    /// Encode the frame into its CRLF-terminated wire representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::new();
        match self {
            ClientFrame::Connect(body) => {
                let json = serde_json::to_string(body)?;
                out.extend_from_slice(b"CONNECT ");
                out.extend_from_slice(json.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            ClientFrame::Publish {
                subject,
                reply_to,
                body,
            } => {
                out.extend_from_slice(b"PUB ");
                out.extend_from_slice(subject.as_bytes());
                if let Some(reply) = reply_to {
                    out.push(b' ');
                    out.extend_from_slice(reply.as_bytes());
                }
                out.extend_from_slice(format!(" {}\r\n", body.len()).as_bytes());
                out.extend_from_slice(body);
                out.extend_from_slice(b"\r\n");
            }
            ClientFrame::Subscribe {
                sid,
                subject,
                queue_group,
            } => {
                out.extend_from_slice(b"SUB ");
                out.extend_from_slice(subject.as_bytes());
                if let Some(group) = queue_group {
                    out.push(b' ');
                    out.extend_from_slice(group.as_bytes());
                }
                out.extend_from_slice(format!(" {}\r\n", sid).as_bytes());
            }
            ClientFrame::Unsubscribe { sid, max_messages } => {
                out.extend_from_slice(format!("UNSUB {}", sid).as_bytes());
                if let Some(max) = max_messages {
                    out.extend_from_slice(format!(" {}", max).as_bytes());
                }
                out.extend_from_slice(b"\r\n");
            }
            ClientFrame::Ping => out.extend_from_slice(b"PING\r\n"),
            ClientFrame::Pong => out.extend_from_slice(b"PONG\r\n"),
        }
        Ok(out)
    }
}

/// Frames received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Info(ServerInfo),
    Message {
        subject: String,
        sid: u64,
        reply_to: Option<String>,
        body: Vec<u8>,
    },
    Ok,
    Err(String),
    Ping,
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_encoding_with_credentials() {
        let frame = ClientFrame::Connect(ConnectBody {
            user: Some("alice".to_string()),
            pass: Some("secret".to_string()),
            pedantic: true,
            verbose: false,
        });
        let bytes = frame.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("CONNECT {"));
        assert!(text.ends_with("\r\n"));
        assert!(text.contains("\"user\":\"alice\""));
        assert!(text.contains("\"pass\":\"secret\""));
        assert!(text.contains("\"pedantic\":true"));
        assert!(text.contains("\"verbose\":false"));
    }

    #[test]
    fn test_connect_encoding_omits_absent_credentials() {
        let frame = ClientFrame::Connect(ConnectBody {
            user: None,
            pass: None,
            pedantic: false,
            verbose: false,
        });
        let text = String::from_utf8(frame.to_bytes().unwrap()).unwrap();
        assert!(!text.contains("user"));
        assert!(!text.contains("pass"));
    }

    #[test]
    fn test_publish_encoding() {
        let frame = ClientFrame::Publish {
            subject: "foo.bar".to_string(),
            reply_to: None,
            body: b"hello".to_vec(),
        };
        assert_eq!(frame.to_bytes().unwrap(), b"PUB foo.bar 5\r\nhello\r\n");
    }

    #[test]
    fn test_publish_encoding_with_reply() {
        let frame = ClientFrame::Publish {
            subject: "foo".to_string(),
            reply_to: Some("_INBOX.ab12".to_string()),
            body: b"hi".to_vec(),
        };
        assert_eq!(frame.to_bytes().unwrap(), b"PUB foo _INBOX.ab12 2\r\nhi\r\n");
    }

    #[test]
    fn test_publish_encoding_empty_body() {
        let frame = ClientFrame::Publish {
            subject: "ping".to_string(),
            reply_to: None,
            body: Vec::new(),
        };
        assert_eq!(frame.to_bytes().unwrap(), b"PUB ping 0\r\n\r\n");
    }

    #[test]
    fn test_subscribe_encoding() {
        let frame = ClientFrame::Subscribe {
            sid: 7,
            subject: "orders".to_string(),
            queue_group: None,
        };
        assert_eq!(frame.to_bytes().unwrap(), b"SUB orders 7\r\n");

        let frame = ClientFrame::Subscribe {
            sid: 8,
            subject: "orders".to_string(),
            queue_group: Some("workers".to_string()),
        };
        assert_eq!(frame.to_bytes().unwrap(), b"SUB orders workers 8\r\n");
    }

    #[test]
    fn test_unsubscribe_encoding() {
        let frame = ClientFrame::Unsubscribe {
            sid: 3,
            max_messages: None,
        };
        assert_eq!(frame.to_bytes().unwrap(), b"UNSUB 3\r\n");

        let frame = ClientFrame::Unsubscribe {
            sid: 3,
            max_messages: Some(5),
        };
        assert_eq!(frame.to_bytes().unwrap(), b"UNSUB 3 5\r\n");
    }

    #[test]
    fn test_ping_pong_encoding() {
        assert_eq!(ClientFrame::Ping.to_bytes().unwrap(), b"PING\r\n");
        assert_eq!(ClientFrame::Pong.to_bytes().unwrap(), b"PONG\r\n");
    }
}
