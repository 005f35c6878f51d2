//! Many calls over one connection: stream ids, cancellation, connect-once.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::join_all;
use skein::prelude::*;
use skein_testkit::fixtures::{self, greeting_service, quote_service};
use skein_testkit::{TestCluster, init_tracing};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_connection_with_distinct_ids() {
    init_tracing();
    let cluster = TestCluster::new();
    let provider = cluster.provider(greeting_service());
    let calls = cluster.client();

    let n = 64;
    let results = timeout(
        WAIT,
        join_all((0..n).map(|i| {
            let calls = calls.clone();
            tokio::spawn(async move {
                let name = format!("caller-{i}");
                let request = fixtures::request("greeting/greeting", &name).unwrap();
                let response = calls.request_one(request).await.unwrap();
                (name, fixtures::data::<String>(&response).unwrap())
            })
        })),
    )
    .await
    .unwrap();

    for joined in results {
        let (name, greeting) = joined.unwrap();
        assert_eq!(greeting, format!(" hello to: {name}"));
    }

    let observer = provider.observer();
    assert_eq!(observer.connections(), 1);
    let mut sids: Vec<u64> = observer.requests().iter().map(|(sid, _)| *sid).collect();
    assert_eq!(sids.len(), n);
    sids.sort_unstable();
    sids.dedup();
    assert_eq!(sids.len(), n);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_first_calls_connect_once() {
    init_tracing();
    let cluster = TestCluster::new();
    let provider = cluster.provider(greeting_service());
    let connector = cluster.counting_connector();
    let calls = cluster.client_with(connector.clone(), ClientConfig::default());

    let results = timeout(
        WAIT,
        join_all((0..32).map(|_| {
            let calls = calls.clone();
            tokio::spawn(async move {
                calls
                    .request_one(Message::new("greeting/greetingNoParams"))
                    .await
            })
        })),
    )
    .await
    .unwrap();
    for joined in results {
        joined.unwrap().unwrap();
    }

    assert_eq!(connector.attempts(), 1);
    assert_eq!(provider.observer().connections(), 1);
}

#[tokio::test]
async fn abandoned_stream_sends_cancel_and_stops_delivery() {
    init_tracing();
    let cluster = TestCluster::new();
    let provider = cluster.provider(quote_service());
    let calls = cluster.client();

    let mut quotes = calls.request_many(Message::new("quotes/quotes"));
    for expected in 0..3 {
        let quote = timeout(WAIT, quotes.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(
            fixtures::data::<String>(&quote).unwrap(),
            format!("quote : {expected}")
        );
    }
    drop(quotes);

    let observer = provider.observer();
    let (sid, _) = observer.requests()[0].clone();
    timeout(WAIT, observer.cancelled(sid)).await.unwrap();
    assert_eq!(observer.cancels(), [sid]);

    let session = calls.connections().cached(provider.address()).unwrap();
    assert!(session.pending_stream_ids().is_empty());

    // Same connection, fresh stream id, normal service.
    let mut again = calls.request_many(Message::new("quotes/quotes"));
    let quote = timeout(WAIT, again.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(fixtures::data::<String>(&quote).unwrap(), "quote : 0");
    let (second_sid, _) = observer.requests()[1].clone();
    assert!(second_sid > sid);
    assert_eq!(observer.connections(), 1);
}

#[tokio::test]
async fn explicit_cancel_behaves_like_drop() {
    let cluster = TestCluster::new();
    let provider = cluster.provider(quote_service());
    let calls = cluster.client();

    let mut quotes = calls.request_many(Message::new("quotes/onlyOneAndThenNever"));
    timeout(WAIT, quotes.next()).await.unwrap().unwrap().unwrap();
    quotes.cancel();

    let (sid, _) = provider.observer().requests()[0].clone();
    timeout(WAIT, provider.observer().cancelled(sid))
        .await
        .unwrap();
}

#[tokio::test]
async fn completed_stream_sends_no_cancel() {
    let cluster = TestCluster::new();
    let provider = cluster.provider(greeting_service());
    let calls = cluster.client();

    let request = fixtures::request("greeting/manyStream", &3u64).unwrap();
    let all: Vec<_> = timeout(WAIT, calls.request_many(request).collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    // A later call on the same connection proves the earlier frames were processed.
    calls
        .request_one(Message::new("greeting/greetingNoParams"))
        .await
        .unwrap();
    assert!(provider.observer().cancels().is_empty());
}

#[tokio::test]
async fn closing_the_connection_fails_pending_calls_and_clears_the_cache() {
    init_tracing();
    let cluster = TestCluster::new();
    let provider = cluster.provider(quote_service());
    let connector = cluster.counting_connector();
    let calls = cluster.client_with(connector.clone(), ClientConfig::default());

    let mut quotes = calls.request_many(Message::new("quotes/onlyOneAndThenNever"));
    timeout(WAIT, quotes.next()).await.unwrap().unwrap().unwrap();
    let session = calls.connections().cached(provider.address()).unwrap();

    calls.connections().close(provider.address()).await;
    assert_eq!(
        timeout(WAIT, quotes.next()).await.unwrap(),
        Some(Err(CallError::Closed))
    );
    assert!(quotes.next().await.is_none());
    assert!(session.is_closed());
    assert!(calls.connections().cached(provider.address()).is_none());

    // The next call connects afresh.
    let mut again = calls.request_many(Message::new("quotes/onlyOneAndThenNever"));
    timeout(WAIT, again.next()).await.unwrap().unwrap().unwrap();
    let fresh = calls.connections().cached(provider.address()).unwrap();
    assert!(!Arc::ptr_eq(&session, &fresh));
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn full_demux_table_refuses_new_calls() {
    let cluster = TestCluster::new();
    let _provider = cluster.provider(quote_service());
    let config = ClientConfig::new(Duration::from_secs(1), 2).unwrap();
    let calls = cluster.client_with(cluster.network().clone(), config);

    let mut held = Vec::new();
    for _ in 0..2 {
        let mut quotes = calls.request_many(Message::new("quotes/onlyOneAndThenNever"));
        timeout(WAIT, quotes.next()).await.unwrap().unwrap().unwrap();
        held.push(quotes);
    }

    let err = calls
        .request_one(Message::new("quotes/onlyOneAndThenNever"))
        .await
        .unwrap_err();
    assert_eq!(err, CallError::ResourceExhausted { pending: 2, max: 2 });

    held.clear();
    let mut quotes = calls.request_many(Message::new("quotes/onlyOneAndThenNever"));
    timeout(WAIT, quotes.next()).await.unwrap().unwrap().unwrap();
}
