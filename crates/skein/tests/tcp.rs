//! End-to-end over real TCP sockets through the public façade.

use std::time::Duration;

use futures_util::StreamExt;
use skein::prelude::*;
use skein::transport::StreamTransport;
use skein::{Encoding, TcpConnector, Transport};
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Answers `numbers/*` with three payloads then COMPLETE, anything else with
/// one payload echoing the request.
async fn run_peer(listener: TcpListener) {
    while let Ok((socket, _)) = listener.accept().await {
        tokio::spawn(async move {
            let transport = Transport::Stream(StreamTransport::new(socket, Encoding::Postcard));
            while let Ok(request) = transport.recv().await {
                let Some(sid) = request.stream_id() else {
                    continue;
                };
                if request.signal_kind().is_some() {
                    continue;
                }
                if request.service_name() == "numbers" {
                    for n in 0..3 {
                        let frame = Message::new(request.qualifier())
                            .with_stream_id(sid)
                            .with_payload(n.to_string());
                        if transport.send(frame).await.is_err() {
                            return;
                        }
                    }
                    let _ = transport.send(Message::signal(sid, Signal::Complete)).await;
                } else {
                    let reply = Message::new(request.qualifier())
                        .with_stream_id(sid)
                        .with_payload(request.payload().clone());
                    let _ = transport.send(reply).await;
                }
            }
        });
    }
}

async fn setup() -> (ServiceCall, Address) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = listener.local_addr().unwrap();
    tokio::spawn(run_peer(listener));

    let routes = StaticResolver::new();
    let address: Address = format!("127.0.0.1:{}", local.port()).parse().unwrap();
    routes.register("greeting", address.clone());
    routes.register("numbers", address.clone());
    let calls = skein::client(routes, TcpConnector::default(), ClientConfig::default());
    (calls, address)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_one_over_tcp() {
    let (calls, _) = setup().await;
    let reply = timeout(
        WAIT,
        calls.request_one(Message::new("greeting/hello").with_payload("joe")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply.payload().as_ref(), b"joe");
    assert!(reply.header(skein::headers::CLIENT_RECV_TIME).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_many_over_tcp_shares_one_connection() {
    let (calls, address) = setup().await;
    let numbers: Vec<String> = timeout(
        WAIT,
        calls
            .request_many(Message::new("numbers/count"))
            .map(|r| String::from_utf8(r.unwrap().payload().to_vec()).unwrap())
            .collect(),
    )
    .await
    .unwrap();
    assert_eq!(numbers, ["0", "1", "2"]);
    let session = calls.connections().cached(&address).unwrap();

    timeout(WAIT, calls.request_one(Message::new("greeting/again")))
        .await
        .unwrap()
        .unwrap();
    let again = calls.connections().cached(&address).unwrap();
    assert!(std::sync::Arc::ptr_eq(&session, &again));
    assert!(again.pending_stream_ids().is_empty());
}
