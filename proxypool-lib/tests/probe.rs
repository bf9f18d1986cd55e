mod common;

use std::{sync::Arc, time::Duration};

use common::initialize;
use httpmock::prelude::*;
use proxypool_lib::{
    app::remote_content_manager::ProxyManager,
    proxy::{AnyOutboundHandler, direct},
};

#[tokio::test]
async fn test_probe_through_direct_outbound() {
    initialize();
    let server = MockServer::start();
    let probe = server.mock(|when, then| {
        when.method(GET)
            .path("/generate_204")
            .header_exists("user-agent");
        then.status(204);
    });

    let manager = ProxyManager::new();
    let direct: AnyOutboundHandler = Arc::new(direct::Handler::default());

    let rtt = manager
        .url_test(direct.clone(), &server.url("/generate_204"), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(rtt > 0);
    probe.assert();
    assert_eq!(manager.last_delay("DIRECT"), rtt);
    assert!(manager.last_ok_at("DIRECT").is_some());

    let results = manager
        .check(&[direct], "http://127.0.0.1:1/generate_204", Duration::from_secs(5))
        .await;
    assert_eq!(results, vec![("DIRECT".to_owned(), 0)]);
    assert_eq!(manager.delay_history("DIRECT").len(), 2);
}
