//! Race scenarios driven through the public engine handle

use std::sync::Arc;
use std::time::Duration;

use marketview::backend::{MockBackend, StreamStartError};
use marketview::config::EngineConfig;
use marketview::engine::{MarketView, MarketViewHandle, StreamStatus, ViewUpdate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

struct Running {
    handle: MarketViewHandle,
    updates: mpsc::UnboundedReceiver<ViewUpdate>,
    task: JoinHandle<()>,
}

fn start(backend: Arc<MockBackend>, config: EngineConfig) -> Running {
    let (handle, updates, task) = MarketView::spawn(backend, &config);
    Running {
        handle,
        updates,
        task,
    }
}

impl Running {
    async fn collect_for(&mut self, duration: Duration) -> Vec<ViewUpdate> {
        let deadline = Instant::now() + duration;
        let mut collected = Vec::new();
        while let Ok(Some(update)) = timeout_at(deadline, self.updates.recv()).await {
            collected.push(update);
        }
        collected
    }

    async fn stop(self) {
        self.handle.shutdown().unwrap();
        self.task.await.unwrap();
    }
}

fn last_stream_state(updates: &[ViewUpdate]) -> Option<(&str, u64, &StreamStatus)> {
    updates.iter().rev().find_map(|update| match update {
        ViewUpdate::StreamState {
            symbol,
            session_id,
            status,
            ..
        } => Some((symbol.as_str(), *session_id, status)),
        _ => None,
    })
}

#[tokio::test(start_paused = true)]
async fn test_rapid_selection_settles_on_last_symbol() {
    let backend = Arc::new(
        MockBackend::new()
            .with_start_delay("AAPL", Duration::from_millis(900))
            .with_start_delay("MSFT", Duration::from_millis(20))
            .with_start_delay("TSLA", Duration::from_millis(600))
            .with_start_delay("NVDA", Duration::from_millis(300))
            .with_bar_interval(Duration::from_millis(50)),
    );
    let mut running = start(backend.clone(), EngineConfig::default());

    for symbol in ["AAPL", "MSFT", "TSLA", "NVDA"] {
        running.handle.select(symbol).unwrap();
    }

    let updates = running.collect_for(Duration::from_secs(2)).await;

    let (symbol, session_id, status) = last_stream_state(&updates).unwrap();
    assert_eq!(symbol, "NVDA");
    assert_eq!(session_id, 4);
    assert_eq!(status, &StreamStatus::Active);

    let applied: Vec<&ViewUpdate> = updates
        .iter()
        .filter(|u| matches!(u, ViewUpdate::Chart { outcome: Some(_), .. }))
        .collect();
    assert!(!applied.is_empty());
    for update in &applied {
        if let ViewUpdate::Chart {
            symbol, session_id, ..
        } = update
        {
            assert_eq!(symbol, "NVDA");
            assert_eq!(*session_id, 4);
        }
    }

    // Every superseded start that succeeded got its feed released
    assert_eq!(backend.live_feeds().await, 1);
    assert_eq!(backend.stopped_tokens().await.len(), 3);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_first_lookup_does_not_overwrite_second() {
    let backend = Arc::new(MockBackend::new().with_search_delay("A", Duration::from_millis(800)));
    let mut running = start(backend.clone(), EngineConfig::default());

    running.handle.input("A").unwrap();
    let mut updates = running.collect_for(Duration::from_millis(350)).await;
    running.handle.input("AM").unwrap();
    updates.extend(running.collect_for(Duration::from_secs(2)).await);

    let candidates: Vec<(&str, &Vec<String>)> = updates
        .iter()
        .filter_map(|u| match u {
            ViewUpdate::Candidates { query, symbols } => Some((query.as_str(), symbols)),
            _ => None,
        })
        .collect();

    assert_eq!(backend.search_calls(), 2);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].0, "AM");
    assert_eq!(candidates[0].1, &vec!["AMD".to_string(), "AMZN".to_string()]);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_typing_burst_issues_one_lookup() {
    let backend = Arc::new(MockBackend::new());
    let mut running = start(backend.clone(), EngineConfig::default());

    for text in ["N", "NV", "NVD"] {
        running.handle.input(text).unwrap();
        running.collect_for(Duration::from_millis(100)).await;
    }
    let updates = running.collect_for(Duration::from_secs(1)).await;

    assert_eq!(backend.search_calls(), 1);
    assert!(updates.contains(&ViewUpdate::Candidates {
        query: "NVD".to_string(),
        symbols: vec!["NVDA".to_string()],
    }));

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_start_timeout_fails_session() {
    let backend = Arc::new(MockBackend::new().with_start_delay("TSLA", Duration::from_secs(30)));
    let config = EngineConfig {
        stream_start_timeout_ms: 1_000,
        ..EngineConfig::default()
    };
    let mut running = start(backend, config);

    running.handle.select("tsla").unwrap();
    let updates = running.collect_for(Duration::from_secs(5)).await;

    let (symbol, _, status) = last_stream_state(&updates).unwrap();
    assert_eq!(symbol, "TSLA");
    assert_eq!(
        status,
        &StreamStatus::Failed(StreamStartError::Timeout(1_000))
    );

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_close_reports_stream_end() {
    let backend = Arc::new(
        MockBackend::new()
            .with_bar_interval(Duration::from_millis(10))
            .with_bars_per_stream(4),
    );
    let mut running = start(backend, EngineConfig::default());

    running.handle.select("AMD").unwrap();
    let updates = running.collect_for(Duration::from_secs(1)).await;

    match updates.last() {
        Some(ViewUpdate::StreamState {
            status: StreamStatus::Stopped,
            message: Some(message),
            ..
        }) => assert!(message.contains("stream ended")),
        other => panic!("unexpected last update: {:?}", other),
    }

    // Four emissions in block order 0, 2, 1, 3
    let bars = updates.iter().rev().find_map(|u| match u {
        ViewUpdate::Chart { bars, .. } => Some(bars.clone()),
        _ => None,
    });
    let bars = bars.unwrap();
    assert_eq!(bars.len(), 4);
    assert!(bars.windows(2).all(|pair| pair[0].time < pair[1].time));

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_feed_lost_before_ack_reports_stream_end() {
    let backend = Arc::new(
        MockBackend::new()
            .with_feed_closed_on_start("AAPL")
            .with_start_delay("AAPL", Duration::from_millis(5)),
    );
    let mut running = start(backend.clone(), EngineConfig::default());

    running.handle.select("AAPL").unwrap();
    let mut updates = running.collect_for(Duration::from_secs(1)).await;
    running.handle.request_status().unwrap();
    updates.extend(running.collect_for(Duration::from_millis(20)).await);

    let (symbol, session_id, status) = last_stream_state(&updates).unwrap();
    assert_eq!((symbol, session_id), ("AAPL", 1));
    assert_eq!(status, &StreamStatus::Stopped);

    let status = updates
        .iter()
        .find_map(|u| match u {
            ViewUpdate::Status(status) => Some(status.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(status.stream, Some(StreamStatus::Stopped));
    assert_eq!(backend.stopped_tokens().await.len(), 1);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_reflects_engine_state() {
    let backend = Arc::new(MockBackend::new().with_bar_interval(Duration::from_millis(100)));
    let mut running = start(backend, EngineConfig::default());

    running.handle.select("GOOGL").unwrap();
    running.collect_for(Duration::from_millis(550)).await;
    running.handle.request_status().unwrap();
    let updates = running.collect_for(Duration::from_millis(20)).await;

    let status = updates
        .iter()
        .find_map(|u| match u {
            ViewUpdate::Status(status) => Some(status.clone()),
            _ => None,
        })
        .unwrap();

    assert_eq!(status.backend, "mock");
    assert_eq!(status.symbol.as_deref(), Some("GOOGL"));
    assert_eq!(status.session_id, Some(1));
    assert_eq!(status.stream, Some(StreamStatus::Active));
    assert!(status.bar_count > 0);
    assert_eq!(status.counters.sessions_started, 1);

    running.stop().await;
}

#[tokio::test]
async fn test_dropping_every_handle_stops_engine() {
    let (handle, _updates, task) =
        MarketView::spawn(Arc::new(MockBackend::new()), &EngineConfig::default());
    let clone = handle.clone();

    drop(handle);
    assert!(!clone.is_closed());
    drop(clone);

    task.await.unwrap();
}
