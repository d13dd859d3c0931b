//! Relay round-trip benchmark suite.
//!
//! Measures page-to-daemon-to-page request latency through the full
//! pipeline (provider, content relay, background manager) against an
//! in-process daemon:
//! - Tab counts: 1, 8, 32
//! - Requests per tab per iteration: 1, 16
//!
//! Run with: cargo bench --bench relay_roundtrip
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::runtime::Runtime;

use wallet_relay::{
    Background, ContentRelay, Document, ExtensionRuntime, MemoryConnector, PageProvider,
    PageWindow, PortSender, Settings, TabId,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const TAB_COUNTS: &[u32] = &[1, 8, 32];
const REQUESTS_PER_TAB: &[usize] = &[1, 16];

// ============================================================================
// Fixture
// ============================================================================

/// One simulated tab.
struct Tab {
    _window: PageWindow,
    _relay: ContentRelay,
    provider: PageProvider,
}

/// Background, daemon and open tabs.
struct Fixture {
    _background: Arc<Background>,
    tabs: Vec<Tab>,
}

fn daemon_reply(request: &Value) -> Option<Value> {
    Some(json!({ "jsonrpc": "2.0", "id": request["id"], "result": "0x1" }))
}

async fn fixture(tab_count: u32) -> Fixture {
    let (runtime, listener) = ExtensionRuntime::new();
    let (connector, daemon) = MemoryConnector::new();
    let _server = daemon.serve(daemon_reply);

    let settings = Settings::new().with_reconnect_delay(Duration::from_millis(10));
    let background = Background::spawn(
        &settings,
        Arc::new(connector),
        runtime.bus().clone(),
        listener,
    )
    .expect("background");

    let tabs: Vec<_> = (1..=tab_count)
        .map(|id| {
            let window = PageWindow::new();
            let provider = PageProvider::new(&window);
            let relay = ContentRelay::spawn(
                Document::default(),
                window.clone(),
                runtime.clone(),
                PortSender::tab(TabId::new(id).expect("tab id")),
            );
            Tab {
                _window: window,
                _relay: relay,
                provider,
            }
        })
        .collect();

    while background.connection_count() < tab_count as usize {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Warm up: open every daemon connection before measuring.
    round(&tabs, 1).await;

    Fixture {
        _background: background,
        tabs,
    }
}

async fn round(tabs: &[Tab], per_tab: usize) {
    let requests = tabs.iter().flat_map(|tab| {
        (0..per_tab).map(move |_| tab.provider.request(json!({ "method": "eth_chainId" })))
    });

    for result in join_all(requests).await {
        result.expect("request");
    }
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("roundtrip");
    group.measurement_time(Duration::from_secs(10));

    for &tab_count in TAB_COUNTS {
        let fixture = rt.block_on(fixture(tab_count));

        for &per_tab in REQUESTS_PER_TAB {
            let id = format!("{tab_count}t_{per_tab}r");
            group.bench_with_input(BenchmarkId::new("requests", &id), &per_tab, |b, &per_tab| {
                b.to_async(&rt).iter(|| round(&fixture.tabs, per_tab));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
