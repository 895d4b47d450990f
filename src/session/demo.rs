//! Scripted symbol switching demo against the in-process simulator

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::info;

use crate::backend::{MockBackend, Side};
use crate::config::EngineConfig;
use crate::engine::{MarketView, MarketViewHandle, ViewUpdate};
use crate::ui::{self, DEFAULT_CHART_ROWS, ViewState};

/// One scripted user action followed by a pause
#[derive(Debug, Clone, PartialEq)]
pub enum DemoStep {
    Type(&'static str),
    Select(&'static str),
    Buy(f64),
    Status,
    Wait(Duration),
}

/// Typing bursts, a slow start superseded by a fast one, an order and a status request
pub fn default_script() -> Vec<DemoStep> {
    vec![
        DemoStep::Type("A"),
        DemoStep::Type("AM"),
        DemoStep::Type("AMD"),
        DemoStep::Wait(Duration::from_millis(600)),
        DemoStep::Type(""),
        DemoStep::Select("AAPL"),
        DemoStep::Select("MSFT"),
        DemoStep::Wait(Duration::from_millis(1_500)),
        DemoStep::Buy(5.0),
        DemoStep::Wait(Duration::from_millis(300)),
        DemoStep::Status,
        DemoStep::Wait(Duration::from_millis(200)),
    ]
}

/// Simulator tuned so the script produces visible races
pub fn demo_backend() -> MockBackend {
    MockBackend::new()
        .with_default_search_delay(Duration::from_millis(80))
        .with_start_delay("AAPL", Duration::from_millis(400))
        .with_start_delay("MSFT", Duration::from_millis(50))
        .with_bar_interval(Duration::from_millis(100))
}

/// Run `script` and return the final view
pub async fn run_script(
    handle: &MarketViewHandle,
    updates: &mut mpsc::UnboundedReceiver<ViewUpdate>,
    script: &[DemoStep],
    mut on_update: impl FnMut(&ViewUpdate),
) -> Result<ViewState> {
    let mut view = ViewState::new();

    for step in script {
        match step {
            DemoStep::Type(text) => handle.input(*text)?,
            DemoStep::Select(symbol) => handle.select(*symbol)?,
            DemoStep::Buy(quantity) => handle.place_order(*quantity, Side::Buy)?,
            DemoStep::Status => handle.request_status()?,
            DemoStep::Wait(duration) => {
                let deadline = Instant::now() + *duration;
                while let Ok(update) = timeout_at(deadline, updates.recv()).await {
                    let update = update.context("Market view engine stopped")?;
                    view.apply(&update);
                    on_update(&update);
                }
                continue;
            }
        }
        // Keystroke pace
        sleep(Duration::from_millis(40)).await;
    }

    while let Ok(update) = updates.try_recv() {
        view.apply(&update);
        on_update(&update);
    }

    Ok(view)
}

/// `marketview demo`
pub async fn run_demo(config: &EngineConfig) -> Result<()> {
    info!("Starting demo");
    println!("{}", "MarketView demo (simulated backend)".bold());
    println!();

    let (handle, mut updates, task) = MarketView::spawn(Arc::new(demo_backend()), config);

    let view = run_script(&handle, &mut updates, &default_script(), |update| {
        let _ = ui::cli::display_update(update);
    })
    .await?;

    println!();
    ui::cli::display_chart(&view, DEFAULT_CHART_ROWS).map_err(|e| anyhow::anyhow!(e))?;

    handle.shutdown()?;
    task.await.context("Market view engine task failed")?;

    info!("Demo completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StreamStatus;

    #[tokio::test(start_paused = true)]
    async fn test_demo_script_ends_on_last_selection() {
        let (handle, mut updates, task) =
            MarketView::spawn(Arc::new(demo_backend()), &EngineConfig::default());

        let mut chart_sessions = Vec::new();
        let view = run_script(&handle, &mut updates, &default_script(), |update| {
            if let ViewUpdate::Chart {
                session_id,
                outcome: Some(_),
                ..
            } = update
            {
                chart_sessions.push(*session_id);
            }
        })
        .await
        .unwrap();

        assert_eq!(view.symbol.as_deref(), Some("MSFT"));
        assert_eq!(view.stream, Some(StreamStatus::Active));
        assert!(!view.bars.is_empty());
        assert!(chart_sessions.iter().all(|id| *id == 2));
        assert!(view.candidates.is_empty());

        handle.shutdown().unwrap();
        task.await.unwrap();
    }
}
