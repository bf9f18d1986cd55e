mod common;

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use common::{ScriptedBuilder, initialize, native_list, options};
use httpmock::prelude::*;
use proxypool_lib::{
    config::{
        convert,
        def::{Listable, ProviderDef},
        descriptor::ProxyKind,
    },
    proxy::{OutboundHandler, converters::DefaultOutboundBuilder, provider::Handler},
    session::{Session, SocksAddr},
};

fn url_provider(tag: &str, url: String, path: Option<String>, policy: &str) -> ProviderDef {
    ProviderDef {
        tag: tag.to_owned(),
        provider_type: "url".to_owned(),
        url: Listable::One(url),
        path: path.map(Listable::One).unwrap_or(Listable::Many(vec![])),
        policy: policy.to_owned(),
        ..Default::default()
    }
}

fn file_provider(tag: &str, path: &std::path::Path, policy: &str) -> ProviderDef {
    ProviderDef {
        tag: tag.to_owned(),
        provider_type: "file".to_owned(),
        path: Listable::One(path.to_string_lossy().into_owned()),
        policy: policy.to_owned(),
        ..Default::default()
    }
}

fn sess() -> Session {
    Session::tcp(SocksAddr::from_host_port("example.com", 443))
}

#[tokio::test]
async fn test_cache_first_load_skips_network() {
    initialize();
    let server = MockServer::start();
    let sub = server.mock(|when, then| {
        when.method(GET).path("/sub");
        then.status(200).body(native_list(&["X"]));
    });

    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("sub");
    std::fs::write(&cache, native_list(&["A", "B"])).unwrap();

    let def = url_provider(
        "sub",
        server.url("/sub"),
        Some(cache.to_string_lossy().into_owned()),
        "select",
    );
    let provider = Arc::new(
        Handler::new(options(def, dir.path()), Arc::new(DefaultOutboundBuilder)).unwrap(),
    );
    provider.start().await;

    assert_eq!(sub.hits(), 0);
    assert_eq!(provider.all(), vec!["A", "B"]);
    assert_eq!(provider.now().as_deref(), Some("A"));
    assert_eq!(provider.name(), "sub");

    provider.close().await;
}

#[tokio::test]
async fn test_share_links_fall_through_to_v2ray() {
    initialize();
    let links = "ss://YWVzLTI1Ni1nY206cGFzcw@1.2.3.4:8388#JP-1\n\
                 ss://YWVzLTI1Ni1nY206cGFzcw@5.6.7.8:8388#JP-2\n";
    let body = STANDARD.encode(links);

    let decoded = convert::decode(body.as_bytes()).unwrap();
    assert_eq!(decoded.len(), 2);
    assert!(decoded.iter().all(|d| d.kind == ProxyKind::Shadowsocks));
    assert_eq!(decoded[0].str_param("method"), Some("aes-256-gcm"));

    let server = MockServer::start();
    let sub = server.mock(|when, then| {
        when.method(GET).path("/links");
        then.status(200).body(body.clone());
    });

    let dir = tempfile::tempdir().unwrap();
    let def = url_provider("links", server.url("/links"), None, "url-test");
    let opts = options(def, dir.path());
    let cache = opts.sources[0].path.clone();
    let provider = Arc::new(Handler::new(opts, Arc::new(ScriptedBuilder::default())).unwrap());
    provider.start().await;

    sub.assert();
    assert_eq!(provider.all(), vec!["JP-1", "JP-2"]);
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), body);

    provider.close().await;
}

#[tokio::test]
async fn test_include_exclude_filters() {
    initialize();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sub.json");
    std::fs::write(&path, native_list(&["US-A", "US-B", "JP-A"])).unwrap();

    let def = ProviderDef {
        include_key_words: Listable::One("US".to_owned()),
        exclude_key_words: Listable::One("B".to_owned()),
        ..file_provider("filtered", &path, "select")
    };
    let provider = Arc::new(
        Handler::new(options(def, dir.path()), Arc::new(ScriptedBuilder::default())).unwrap(),
    );
    provider.start().await;

    assert_eq!(provider.all(), vec!["US-A"]);
    provider.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_url_test_election() {
    initialize();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sub.json");
    std::fs::write(&path, native_list(&["A", "B", "C"])).unwrap();

    let builder = ScriptedBuilder::default();
    builder.script.set("A", Some(Duration::from_millis(120)));
    builder.script.set("B", Some(Duration::from_millis(30)));
    builder.script.set("C", Some(Duration::from_millis(80)));

    let def = file_provider("fastest", &path, "url-test");
    let provider =
        Arc::new(Handler::new(options(def, dir.path()), Arc::new(builder.clone())).unwrap());
    provider.start().await;

    for _ in 0..50 {
        if provider.delay("A") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(provider.delay("B"), 30);
    assert_eq!(provider.now().as_deref(), Some("B"));

    builder.script.set("A", Some(Duration::from_millis(90)));
    builder.script.set("B", None);
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(provider.delay("B"), 0);
    assert_eq!(provider.delay("A"), 90);
    assert_eq!(provider.now().as_deref(), Some("C"));
    assert!(provider.connect_stream(&sess()).await.is_ok());
    assert!(builder.script.dials("C") >= 3);

    provider.close().await;
}

async fn refresh_twice(prune: bool) -> Vec<String> {
    initialize();
    let server = MockServer::start();
    let mut first = server.mock(|when, then| {
        when.method(GET).path("/sub");
        then.status(200).body(native_list(&["A", "B"]));
    });

    let dir = tempfile::tempdir().unwrap();
    let def = ProviderDef {
        prune,
        ..url_provider("sub", server.url("/sub"), None, "select")
    };
    let provider = Arc::new(
        Handler::new(options(def, dir.path()), Arc::new(ScriptedBuilder::default())).unwrap(),
    );
    provider.start().await;
    assert_eq!(provider.all(), vec!["A", "B"]);
    let b = provider.proxies().get("B").unwrap().clone();

    first.delete();
    server.mock(|when, then| {
        when.method(GET).path("/sub");
        then.status(200).body(native_list(&["B", "C"]));
    });
    let summary = provider.update().await.unwrap();
    assert_eq!(summary.added, vec!["C"]);
    assert!(Arc::ptr_eq(&b, provider.proxies().get("B").unwrap()));

    // same bytes again: nothing to reconcile
    let again = provider.update().await.unwrap();
    assert!(again.unchanged);
    assert!(Arc::ptr_eq(&b, provider.proxies().get("B").unwrap()));

    let all = provider.all();
    provider.close().await;
    all
}

#[tokio::test]
async fn test_refresh_adds_without_removing() {
    assert_eq!(refresh_twice(false).await, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_refresh_with_prune() {
    assert_eq!(refresh_twice(true).await, vec!["B", "C"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_during_refresh() {
    initialize();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sub.json");
    std::fs::write(&path, native_list(&["A", "B"])).unwrap();

    let builder = ScriptedBuilder::default();
    let def = ProviderDef {
        prune: true,
        ..file_provider("busy", &path, "select")
    };
    let provider =
        Arc::new(Handler::new(options(def, dir.path()), Arc::new(builder.clone())).unwrap());
    provider.start().await;

    std::fs::write(&path, native_list(&["B", "C"])).unwrap();

    let dials: Vec<_> = (0..1000)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move { provider.connect_stream(&sess()).await.map(|_| ()) })
        })
        .collect();
    let summary = provider.update().await.unwrap();
    assert_eq!(summary.removed, vec!["A"]);

    for d in dials {
        assert!(d.await.unwrap().is_ok());
    }
    // pre refresh the first inner is A, post refresh it is B
    assert_eq!(builder.script.dials("A") + builder.script.dials("B"), 1000);
    assert_eq!(builder.script.dials("C"), 0);
    assert_eq!(provider.all(), vec!["B", "C"]);

    provider.close().await;
}
