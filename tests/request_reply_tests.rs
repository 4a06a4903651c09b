//! Request/reply integration tests.
//!
//! A responder and a requester share one client against a routing broker
//! stub: replies flow through private inbox subjects, reply caps and
//! timeouts close the inbox subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use linebus::bus_client::{BusClient, ClientError, ClientOptions};

/// Minimal routing broker: PUBs are delivered to every SUB on the same
/// connection whose subject matches literally.
async fn serve_connection(
    socket: TcpStream,
    frames: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    write_half
        .write_all(b"INFO {\"server_id\":\"stub\"}\r\n")
        .await?;

    let mut reader = BufReader::new(read_half);
    let mut subs: HashMap<String, Vec<u64>> = HashMap::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let header = line.trim_end().to_string();
        frames.lock().unwrap().push(header.clone());

        let parts: Vec<String> = header.split_whitespace().map(str::to_string).collect();
        match parts[0].as_str() {
            "PING" => write_half.write_all(b"PONG\r\n").await?,
            "SUB" => {
                let subject = parts[1].clone();
                let sid: u64 = parts.last().unwrap().parse().unwrap();
                subs.entry(subject).or_default().push(sid);
            }
            "UNSUB" => {
                let sid: u64 = parts[1].parse().unwrap();
                for sids in subs.values_mut() {
                    sids.retain(|s| *s != sid);
                }
            }
            "PUB" => {
                let subject = parts[1].clone();
                let (reply, body_len): (Option<&str>, usize) = if parts.len() == 4 {
                    (Some(parts[2].as_str()), parts[3].parse().unwrap())
                } else {
                    (None, parts[2].parse().unwrap())
                };
                let mut body = vec![0u8; body_len + 2];
                reader.read_exact(&mut body).await?;
                body.truncate(body_len);

                if let Some(sids) = subs.get(&subject) {
                    for sid in sids.clone() {
                        let header = match reply {
                            Some(reply) => {
                                format!("MSG {} {} {} {}\r\n", subject, sid, reply, body_len)
                            }
                            None => format!("MSG {} {} {}\r\n", subject, sid, body_len),
                        };
                        write_half.write_all(header.as_bytes()).await?;
                        write_half.write_all(&body).await?;
                        write_half.write_all(b"\r\n").await?;
                    }
                }
            }
            _ => {}
        }
    }
}

async fn start_stub() -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let frames: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&frames);
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let _ = serve_connection(socket, Arc::clone(&log)).await;
        }
    });

    (addr, frames)
}

async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn client_for(addr: &str) -> BusClient {
    BusClient::connect(
        ClientOptions::builder()
            .host(addr)
            .reconnect_wait(Duration::from_millis(100))
            .build(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_request_reply_roundtrip() {
    let (addr, _frames) = start_stub().await;
    let client = client_for(&addr);

    // Responder: uppercase the request body.
    let responder_saw_request = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&responder_saw_request);
    client
        .subscribe("rpc", move |msg| {
            seen.lock()
                .unwrap()
                .push((msg.is_request(), msg.reply_subject().map(str::to_string)));
            let reply = msg.body_str().to_uppercase();
            msg.reply(reply).unwrap();
        })
        .unwrap();

    let replies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    let request = client
        .request("rpc", "ping", Duration::from_secs(1), move |msg| {
            sink.lock().unwrap().push(msg.body_str().to_string());
        })
        .unwrap();

    assert!(
        wait_until(|| replies.lock().unwrap().len() == 1, Duration::from_secs(5)).await,
        "expected one reply"
    );
    assert_eq!(*replies.lock().unwrap(), vec!["PING"]);
    assert_eq!(request.received_replies(), 1);
    assert_eq!(request.subject(), "rpc");
    assert_eq!(request.max_replies(), None);

    let seen = responder_saw_request.lock().unwrap();
    let (is_request, reply_subject) = &seen[0];
    assert!(is_request);
    assert!(reply_subject.as_deref().unwrap().starts_with("_INBOX."));

    client.close();
}

#[tokio::test]
async fn test_request_times_out_without_responder() {
    let (addr, frames) = start_stub().await;
    let client = client_for(&addr);

    let replies = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&replies);
    let request = client
        .request("rpc", "ping", Duration::from_millis(100), move |msg| {
            sink.lock().unwrap().push(msg.body_str().to_string());
        })
        .unwrap();

    // The timeout closes the inbox subscription, which emits UNSUB.
    assert!(
        wait_until(
            || frames.lock().unwrap().iter().any(|f| f.starts_with("UNSUB")),
            Duration::from_secs(5)
        )
        .await,
        "timeout should close the inbox subscription"
    );
    sleep(Duration::from_millis(100)).await;

    assert!(replies.lock().unwrap().is_empty());
    assert_eq!(request.received_replies(), 0);

    // Closing an already timed-out request is a no-op.
    request.close();

    client.close();
}

#[tokio::test]
async fn test_request_caps_replies_at_max() {
    let (addr, _frames) = start_stub().await;
    let client = client_for(&addr);

    // Responder answers every request twice.
    client
        .subscribe("rpc", move |msg| {
            msg.reply("first").unwrap();
            let _ = msg.reply("second");
        })
        .unwrap();

    let replies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    let request = client
        .request_with("rpc", "hi", Duration::from_millis(500), Some(1), move |msg| {
            sink.lock().unwrap().push(msg.body_str().to_string());
        })
        .unwrap();

    assert!(
        wait_until(|| replies.lock().unwrap().len() == 1, Duration::from_secs(5)).await,
        "expected the first reply"
    );
    sleep(Duration::from_millis(200)).await;

    assert_eq!(*replies.lock().unwrap(), vec!["first"]);
    assert_eq!(request.received_replies(), 1);
    assert_eq!(request.max_replies(), Some(1));

    client.close();
}

#[tokio::test]
async fn test_reply_on_plain_message_is_rejected() {
    let (addr, _frames) = start_stub().await;
    let client = client_for(&addr);

    let reply_errors: Arc<Mutex<Vec<ClientError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reply_errors);
    client
        .subscribe("plain", move |msg| {
            if let Err(e) = msg.reply("nope") {
                sink.lock().unwrap().push(e);
            }
        })
        .unwrap();
    client.publish("plain", "no reply subject here").unwrap();

    assert!(
        wait_until(|| reply_errors.lock().unwrap().len() == 1, Duration::from_secs(5)).await,
        "expected a rejected reply"
    );
    assert!(matches!(
        reply_errors.lock().unwrap()[0],
        ClientError::NotARequest
    ));

    client.close();
}

#[tokio::test]
async fn test_delayed_reply_arrives() {
    let (addr, _frames) = start_stub().await;
    let client = client_for(&addr);

    client
        .subscribe("rpc", move |msg| {
            msg.reply_delayed("late", Duration::from_millis(50)).unwrap();
        })
        .unwrap();

    let replies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    let request = client
        .request("rpc", "hi", Duration::from_secs(2), move |msg| {
            sink.lock().unwrap().push(msg.body_str().to_string());
        })
        .unwrap();

    assert!(
        wait_until(|| replies.lock().unwrap().len() == 1, Duration::from_secs(5)).await,
        "expected the delayed reply"
    );
    assert_eq!(*replies.lock().unwrap(), vec!["late"]);
    assert_eq!(request.received_replies(), 1);

    client.close();
}
