//! Blocking façade driven from a plain thread.

use std::time::{Duration, Instant};

use skein::prelude::*;
use skein::BlockingServiceCall;
use skein_testkit::fixtures::{self, GreetingRequest, greeting_service};
use skein_testkit::{Provider, TestCluster, init_tracing};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn setup(rt: &tokio::runtime::Runtime) -> (BlockingServiceCall, Provider) {
    let cluster = TestCluster::new();
    let provider = rt.block_on(async { cluster.provider(greeting_service()) });
    let calls = BlockingServiceCall::new(cluster.client(), rt.handle().clone());
    (calls, provider)
}

#[test]
fn blocking_calls_return_results() {
    init_tracing();
    let rt = runtime();
    let (calls, _provider) = setup(&rt);

    let request = fixtures::request("greeting/greeting", &"joe").unwrap();
    let response = calls.request_one(request).unwrap();
    assert_eq!(fixtures::data::<String>(&response).unwrap(), " hello to: joe");

    let void = fixtures::request("greeting/greetingVoid", &GreetingRequest::new("joe")).unwrap();
    calls.one_way(void).unwrap();

    let many = fixtures::request("greeting/manyStream", &30u64).unwrap();
    let first = calls
        .request_many_first(many, |m| fixtures::data::<u64>(m).unwrap() != 0)
        .unwrap();
    assert_eq!(fixtures::data::<u64>(&first).unwrap(), 1);
}

#[test]
fn blocking_call_honours_its_deadline() {
    let rt = runtime();
    let (calls, provider) = setup(&rt);

    let never = fixtures::request("greeting/greetingNever", &GreetingRequest::new("joe")).unwrap();
    let started = Instant::now();
    let err = calls
        .with_timeout(Duration::from_secs(1))
        .request_one(never)
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(2));

    let (sid, _) = provider.observer().requests()[0].clone();
    rt.block_on(async {
        tokio::time::timeout(Duration::from_secs(2), provider.observer().cancelled(sid))
            .await
            .unwrap()
    });
}

#[test]
fn exhausted_stream_without_match_is_empty() {
    let rt = runtime();
    let (calls, _provider) = setup(&rt);

    let many = fixtures::request("greeting/manyStream", &3u64).unwrap();
    let err = calls.request_many_first(many, |_| false).unwrap_err();
    assert_eq!(err, CallError::EmptyResponse);
}
