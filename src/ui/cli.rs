//! Simple CLI output implementation
//!
//! Prints engine view updates, charts and status in a line-oriented format.

use chrono::{TimeZone, Utc};
use colored::Colorize;

use super::ViewState;
use crate::AppResult;
use crate::backend::types::{Bar, Side};
use crate::engine::{EngineStatus, MergeOutcome, StreamStatus, ViewUpdate};

/// Display the session banner
pub fn display_banner(backend: &str) -> AppResult<()> {
    println!();
    println!("┌─ MarketView ──────────────────────────────────────────────────────┐");
    println!("│                                                                   │");
    println!("│   Type to search symbols, pick one to stream its chart.           │");
    println!("│   Backend: {:<55}│", backend);
    println!("│   /help lists all commands.                                       │");
    println!("│                                                                   │");
    println!("└───────────────────────────────────────────────────────────────────┘");
    println!();
    Ok(())
}

/// Print one view update as it arrives
///
/// Chart updates are summarized to the latest bar; `/chart` prints the full table.
pub fn display_update(update: &ViewUpdate) -> AppResult<()> {
    match update {
        ViewUpdate::Candidates { query, symbols } => {
            if symbols.is_empty() {
                println!("🔎 {}: no matches", query);
            } else {
                let numbered: Vec<String> = symbols
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {}", i + 1, s.bold()))
                    .collect();
                println!("🔎 {}: {}", query, numbered.join("  "));
            }
        }
        ViewUpdate::CandidatesCleared => println!("🔎 search cleared"),
        ViewUpdate::SearchFailed { query, error } => {
            println!("{} {}: {}", "🔎 search failed".red(), query, error);
        }
        ViewUpdate::Chart {
            symbol,
            outcome,
            bars,
            ..
        } => {
            if let (Some(outcome), Some(last)) = (outcome, bars.last()) {
                println!(
                    "📈 {} {} | {} bars | {}",
                    symbol.bold(),
                    format_bar(last),
                    bars.len(),
                    describe_outcome(*outcome).dimmed()
                );
            }
        }
        ViewUpdate::StreamState {
            symbol,
            session_id,
            status,
            message,
        } => {
            let label = match status {
                StreamStatus::Pending => "connecting".yellow(),
                StreamStatus::Active => "live".green(),
                StreamStatus::Stopped => "stopped".normal(),
                StreamStatus::Failed(_) => "failed".red(),
            };
            print!("📡 {} [{}] session {}", symbol.bold(), label, session_id);
            match message {
                Some(message) => println!(" - {}", message),
                None => println!(),
            }
        }
        ViewUpdate::OrderPlaced(confirmation) => {
            println!(
                "✅ {} {} {} accepted as {} ({})",
                side_label(confirmation.side),
                confirmation.quantity,
                confirmation.symbol,
                confirmation.order_id,
                confirmation.status
            );
        }
        ViewUpdate::OrderFailed { request, error } => match request {
            Some(request) => println!(
                "{} {} {} {}: {}",
                "❌ order failed:".red(),
                side_label(request.side),
                request.quantity,
                request.symbol,
                error
            ),
            None => println!("{} {}", "❌ order not sent:".red(), error),
        },
        ViewUpdate::Status(status) => display_status(status)?,
    }
    Ok(())
}

/// Display the chart table for the current state
pub fn display_chart(state: &ViewState, rows: usize) -> AppResult<()> {
    let Some(symbol) = &state.symbol else {
        println!("No symbol selected");
        return Ok(());
    };

    println!("📊 {} ({} bars)", symbol.bold(), state.bars.len());
    if state.bars.is_empty() {
        println!("   (waiting for data)");
        return Ok(());
    }

    println!(
        "   {:<19} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "time", "open", "high", "low", "close", "volume"
    );
    let skip = state.bars.len().saturating_sub(rows);
    for bar in state.bars.iter().skip(skip) {
        let close = format!("{:>10.2}", bar.close);
        let close = if bar.close >= bar.open {
            close.green()
        } else {
            close.red()
        };
        println!(
            "   {:<19} {:>10.2} {:>10.2} {:>10.2} {} {:>10}",
            format_time(bar.time),
            bar.open,
            bar.high,
            bar.low,
            close,
            bar.volume
                .map(|v| format!("{:.0}", v))
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

/// Display engine status
pub fn display_status(status: &EngineStatus) -> AppResult<()> {
    let counters = &status.counters;

    println!("🔍 MarketView Status:");
    println!("   Backend: {}", status.backend);
    println!(
        "   Symbol: {}",
        status.symbol.as_deref().unwrap_or("(none)")
    );
    match (&status.stream, status.session_id) {
        (Some(stream), Some(id)) => println!("   Stream: {} (session {})", stream, id),
        (Some(stream), None) => println!("   Stream: {}", stream),
        (None, _) => println!("   Stream: idle"),
    }
    println!("   Bars: {}", status.bar_count);
    if let Some(bar) = &status.latest_bar {
        println!("   Last: {}", format_bar(bar));
    }
    println!("   Candidates: {}", status.candidate_count);
    println!(
        "   Lookups: {} dispatched, {} stale, {} failed",
        counters.lookups_dispatched, counters.stale_lookups_dropped, counters.lookup_failures
    );
    println!(
        "   Sessions: {} started, {} failed",
        counters.sessions_started, counters.start_failures
    );
    println!(
        "   Bars: {} applied, {} stale dropped",
        counters.bars_applied, counters.stale_bars_dropped
    );
    println!(
        "   Stream ack P50/P95/P99: {}/{}/{}ms",
        counters.ack_latency_p50, counters.ack_latency_p95, counters.ack_latency_p99
    );
    println!(
        "   Orders: {} placed, {} failed",
        counters.orders_placed, counters.order_failures
    );
    Ok(())
}

/// One-line bar summary
pub fn format_bar(bar: &Bar) -> String {
    format!(
        "{} O {:.2} H {:.2} L {:.2} C {:.2}",
        format_time(bar.time),
        bar.open,
        bar.high,
        bar.low,
        bar.close
    )
}

fn format_time(time: i64) -> String {
    Utc.timestamp_opt(time, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| time.to_string())
}

fn describe_outcome(outcome: MergeOutcome) -> &'static str {
    match outcome {
        MergeOutcome::Appended => "new bar",
        MergeOutcome::Inserted => "late bar",
        MergeOutcome::Replaced => "updated bar",
        MergeOutcome::Discarded => "discarded",
    }
}

fn side_label(side: Side) -> colored::ColoredString {
    match side {
        Side::Buy => "BUY".green(),
        Side::Sell => "SELL".red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bar() {
        let bar = Bar::new(1_704_209_400, 150.1, 150.9, 149.8, 150.5);
        assert_eq!(
            format_bar(&bar),
            "2024-01-02 15:30:00 O 150.10 H 150.90 L 149.80 C 150.50"
        );
    }

    #[test]
    fn test_format_time_out_of_range() {
        assert_eq!(format_time(i64::MAX), i64::MAX.to_string());
    }
}
