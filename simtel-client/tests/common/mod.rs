//! Shared test helpers for simtel-client integration tests.
//!
//! Provides a scripted mock simulator that accepts one connection, captures
//! the request document, then plays back pushes and pauses.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One step of the mock simulator's script.
#[derive(Debug, Clone)]
pub enum Step {
    /// Write these bytes in one call.
    Push(String),
    /// Sleep.
    Wait(Duration),
    /// Drop the connection.
    Close,
}

/// What the mock observed.
#[derive(Debug)]
pub struct PeerLog {
    /// Request document as received.
    pub request: String,
    /// Anything the client sent after the request, up to its close.
    pub trailing: String,
    /// Whether the client closed the connection before the mock gave up waiting.
    pub closed_by_client: bool,
}

/// Pushed update in the simulator's `SubscribedValues` layout.
pub fn push(speed: &str, rpm: &str) -> String {
    format!(
        "<Message><Event Name=\"SubscribedValues\">\n\
         <actualRpm>{}</actualRpm><speed>{}</speed>\n\
         </Event></Message>\n",
        rpm, speed
    )
}

/// The simulator's reply to a subscription request. Leaves are empty.
pub fn subscription_ack() -> String {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Message>\
     <Event Name=\"Subscriptions\"><actualRpm/><speed/></Event>\
     <Event Name=\"UpdateInterval\">200</Event>\
     <Event Name=\"ConnectionEstablished\"/>\
     </Message>\n"
        .to_string()
}

/// `count` pushes `every` apart with increasing speed, starting at 1.
pub fn steady_pushes(count: usize, every: Duration) -> Vec<Step> {
    let mut script = Vec::new();
    for i in 1..=count {
        script.push(Step::Push(push(&i.to_string(), &(i * 100).to_string())));
        script.push(Step::Wait(every));
    }
    script
}

/// Start a mock simulator running `script` after the first request arrives.
///
/// After the script the mock waits up to five seconds for the client to
/// close its side.
pub async fn mock_simulator(script: Vec<Step>) -> (SocketAddr, JoinHandle<PeerLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut buf = vec![0u8; 4096];
        while !String::from_utf8_lossy(&request).contains("</Message>") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let request = String::from_utf8(request).unwrap();

        for step in script {
            match step {
                Step::Push(bytes) => {
                    if stream.write_all(bytes.as_bytes()).await.is_err() {
                        return PeerLog {
                            request,
                            trailing: String::new(),
                            closed_by_client: true,
                        };
                    }
                }
                Step::Wait(d) => tokio::time::sleep(d).await,
                Step::Close => {
                    return PeerLog {
                        request,
                        trailing: String::new(),
                        closed_by_client: false,
                    };
                }
            }
        }

        let mut trailing = Vec::new();
        let closed_by_client = loop {
            match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => break true,
                Ok(Ok(n)) => trailing.extend_from_slice(&buf[..n]),
                Err(_) => break false,
            }
        };
        PeerLog {
            request,
            trailing: String::from_utf8(trailing).unwrap(),
            closed_by_client,
        }
    });

    (addr, peer)
}

/// Names of the `<Event>` elements of a request document, in order.
pub fn event_names(request: &str) -> Vec<String> {
    request
        .split("<Event Name=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}
