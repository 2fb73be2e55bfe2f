use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::{SinkExt, StreamExt};
use liquidation_data::{
    event::{Asset, LiquidationEvent, Side},
    exchange::ExchangeId,
    message::{ClientMessage, ServerMessage},
    stats::StatsSnapshot,
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, BorderType, Cell, List, ListItem, Paragraph, Row, Table},
};
use std::{collections::VecDeque, io, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:9001";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_LIQUIDATIONS: usize = 100;

const ACCENT: Color = Color::Rgb(100, 255, 218);
const GOLD: Color = Color::Rgb(255, 215, 0);
const GREEN: Color = Color::Rgb(0, 255, 127);
const RED: Color = Color::Rgb(255, 69, 58);
const MUTED: Color = Color::Rgb(128, 128, 150);
const TEXT: Color = Color::Rgb(200, 200, 220);
const PANEL_BG: Color = Color::Rgb(15, 15, 25);
const ROW_BG_EVEN: Color = Color::Rgb(25, 25, 35);
const ROW_BG_ODD: Color = Color::Rgb(20, 20, 30);

/// Application state
#[derive(Clone)]
struct AppState {
    stats: StatsSnapshot,
    /// Newest first.
    liquidations: VecDeque<LiquidationEvent>,
    last_update: DateTime<Utc>,
    last_heartbeat_ack: Option<DateTime<Utc>>,
    connected: bool,
    notice: Option<String>,
}

impl AppState {
    fn new() -> Self {
        Self {
            stats: StatsSnapshot::default(),
            liquidations: VecDeque::with_capacity(MAX_LIQUIDATIONS),
            last_update: Utc::now(),
            last_heartbeat_ack: None,
            connected: false,
            notice: None,
        }
    }

    fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { message, .. } => {
                self.notice = Some(message);
            }
            ServerMessage::Snapshot(stats) => {
                self.stats = stats;
            }
            ServerMessage::Liquidation(event) => {
                if self.liquidations.len() >= MAX_LIQUIDATIONS {
                    self.liquidations.pop_back();
                }
                self.liquidations.push_front(event);
            }
            ServerMessage::Recent { events } => {
                self.liquidations = events.into_iter().take(MAX_LIQUIDATIONS).collect();
            }
            ServerMessage::HeartbeatAck { timestamp } => {
                self.last_heartbeat_ack = Some(timestamp);
                return;
            }
            ServerMessage::GoingAway { reason } => {
                self.notice = Some(format!("Server going away: {reason}"));
            }
        }
        self.last_update = Utc::now();
    }

    fn set_connected(&mut self, connected: bool, notice: Option<String>) {
        self.connected = connected;
        if notice.is_some() {
            self.notice = notice;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::var("LIQ_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Create app state
    let state = Arc::new(Mutex::new(AppState::new()));

    // Start WebSocket connection
    let client = tokio::spawn(websocket_client(url, Arc::clone(&state)));

    // Run TUI
    let res = run_app(&mut terminal, state).await;
    client.abort();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

/// Connect to the server & keep `state` updated, reconnecting whenever the connection drops.
async fn websocket_client(url: String, state: Arc<Mutex<AppState>>) {
    let heartbeat = match serde_json::to_string(&ClientMessage::Heartbeat) {
        Ok(heartbeat) => heartbeat,
        Err(e) => {
            state
                .lock()
                .await
                .set_connected(false, Some(format!("Failed to encode heartbeat: {e}")));
            return;
        }
    };

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                state
                    .lock()
                    .await
                    .set_connected(true, Some(format!("Connected to {url}")));

                let (mut write, mut read) = ws_stream.split();

                // Heartbeat task keeps this subscriber registered on the server
                let (dead_tx, mut dead_rx) = tokio::sync::mpsc::channel::<()>(1);
                let heartbeat = heartbeat.clone();
                let heartbeat_task = tokio::spawn(async move {
                    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
                    loop {
                        interval.tick().await;
                        if write.send(Message::text(heartbeat.clone())).await.is_err() {
                            break;
                        }
                    }
                    let _ = dead_tx.send(()).await;
                });

                let notice = loop {
                    tokio::select! {
                        msg = read.next() => {
                            let Some(msg) = msg else {
                                break "Connection ended".to_string();
                            };
                            match msg {
                                Ok(Message::Text(text)) => {
                                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                                        Ok(message) => state.lock().await.apply(message),
                                        Err(e) => {
                                            state.lock().await.notice =
                                                Some(format!("Failed to parse message: {e}"));
                                        }
                                    }
                                }
                                Ok(Message::Close(_)) => break "Server closed connection".to_string(),
                                Ok(_) => {}
                                Err(e) => break format!("WebSocket error (will reconnect): {e}"),
                            }
                        }
                        _ = dead_rx.recv() => {
                            break "Heartbeat failed, reconnecting".to_string();
                        }
                    }
                };

                heartbeat_task.abort();
                state.lock().await.set_connected(false, Some(notice));
            }
            Err(e) => {
                state
                    .lock()
                    .await
                    .set_connected(false, Some(format!("Connection to {url} failed: {e}")));
            }
        }

        // Wait before reconnecting
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    state: Arc<Mutex<AppState>>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = std::time::Instant::now();

    loop {
        let state_snapshot = {
            let s = state.lock().await;
            s.clone()
        };

        terminal.draw(|f| ui(f, &state_snapshot))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') || key.code == KeyCode::Esc {
                    return Ok(());
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = std::time::Instant::now();
        }
    }
}

fn ui(f: &mut Frame, state: &AppState) {
    // Status bar, stats table, liquidations feed, notice line
    let [status, stats, feed, notice] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(Asset::COUNT as u16 + 5),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(f.area());

    render_status_bar(f, status, state);
    render_stats(f, stats, state);
    render_liquidations(f, feed, state);
    render_notice(f, notice, state);
}

fn bold(color: Color) -> Style {
    Style::new().fg(color).add_modifier(Modifier::BOLD)
}

/// Rounded panel with a centred `icon TITLE` heading.
fn panel<'a>(icon: &'a str, title: &'a str, extra: Option<String>, border: Color) -> Block<'a> {
    let mut heading = vec![
        Span::styled(format!(" {icon} "), bold(border)),
        Span::styled(title, bold(Color::White)),
    ];
    if let Some(extra) = extra {
        heading.push(Span::styled(format!(" ({extra}) "), Style::new().fg(MUTED)));
    }

    Block::bordered()
        .border_type(BorderType::Rounded)
        .border_style(Style::new().fg(border))
        .title_top(Line::from(heading).centered())
        .style(Style::new().bg(PANEL_BG))
}

fn render_status_bar(f: &mut Frame, area: Rect, state: &AppState) {
    let (symbol, label, color) = if state.connected {
        ("●", "CONNECTED", GREEN)
    } else {
        ("○", "DISCONNECTED", RED)
    };

    let line = Line::from(vec![
        Span::styled(format!(" {symbol} {label} "), bold(color)),
        Span::styled(
            format!(" ⏱  {} ", state.last_update.format("%H:%M:%S%.3f")),
            Style::new().fg(Color::Rgb(100, 149, 237)),
        ),
        Span::styled(" ◆ LIQUIDATION TERMINAL ◆ ", bold(GOLD)),
        Span::styled(" [Q] Quit ", Style::new().fg(Color::DarkGray)),
    ]);

    let block = Block::bordered()
        .border_type(BorderType::Double)
        .border_style(Style::new().fg(Color::Rgb(138, 43, 226)))
        .style(Style::new().bg(Color::Rgb(18, 18, 28)));

    f.render_widget(Paragraph::new(line).block(block).centered(), area);
}

fn render_stats(f: &mut Frame, area: Rect, state: &AppState) {
    let header = Row::new(["Asset", "Long Liqs", "Short Liqs", "Total Value (USD)"])
        .style(bold(Color::White))
        .bottom_margin(1);

    let rows = Asset::ALL.into_iter().map(|asset| {
        let stats = state.stats.get(asset);
        Row::new([
            Cell::from(asset.as_str()).style(bold(ACCENT)),
            Cell::from(stats.long_count.to_string()).style(Style::new().fg(side_color(Side::Long))),
            Cell::from(stats.short_count.to_string())
                .style(Style::new().fg(side_color(Side::Short))),
            Cell::from(format!("${}", format_usd(stats.cumulative_value)))
                .style(Style::new().fg(GOLD)),
        ])
    });

    let widths = [
        Constraint::Length(8),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Min(20),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(panel("📊", "LIQUIDATION STATS", None, ACCENT));

    f.render_widget(table, area);
}

fn render_liquidations(f: &mut Frame, area: Rect, state: &AppState) {
    let block = panel(
        "⚡",
        "LIQUIDATIONS FEED",
        Some(state.liquidations.len().to_string()),
        RED,
    );

    if state.liquidations.is_empty() {
        let waiting = Paragraph::new(Text::from(vec![
            Line::default(),
            Line::styled(
                "⏳ Waiting for liquidations...",
                Style::new().fg(MUTED).add_modifier(Modifier::ITALIC),
            ),
        ]))
        .block(block)
        .centered();

        f.render_widget(waiting, area);
        return;
    }

    let rows = area.height.saturating_sub(2) as usize;
    let items = state
        .liquidations
        .iter()
        .take(rows)
        .enumerate()
        .map(|(idx, liq)| {
            let bg = if idx % 2 == 0 { ROW_BG_EVEN } else { ROW_BG_ODD };
            let color = side_color(liq.side);
            let arrow = match liq.side {
                Side::Long => "▼",
                Side::Short => "▲",
            };

            ListItem::new(Line::from(vec![
                Span::styled(
                    format!(" {} ", liq.observed_at.format("%H:%M:%S")),
                    Style::new().fg(MUTED),
                ),
                Span::styled(format!("{arrow} {:<5} ", liq.side.to_string()), bold(color)),
                Span::styled(
                    format!("[{:^10}] ", exchange_label(liq.source_exchange)),
                    Style::new().fg(exchange_color(liq.source_exchange)),
                ),
                Span::styled(format!("{:<4} ", liq.asset.as_str()), Style::new().fg(TEXT)),
                Span::styled(format!("@ ${:>10.2} ", liq.price), bold(GOLD)),
                Span::styled(
                    format!(" x {:.4} ", liq.quantity),
                    Style::new().fg(Color::Rgb(255, 105, 180)),
                ),
                Span::styled(format!(" ${} ", format_usd(liq.notional_value)), Style::new().fg(color)),
            ]))
            .style(Style::new().bg(bg))
        })
        .collect::<Vec<_>>();

    f.render_widget(List::new(items).block(block), area);
}

fn render_notice(f: &mut Frame, area: Rect, state: &AppState) {
    let ack = match state.last_heartbeat_ack {
        Some(time) => format!("last heartbeat ack {}", time.format("%H:%M:%S")),
        None => "no heartbeat ack".to_string(),
    };

    let line = Line::from(vec![
        Span::styled(
            format!(" {} ", state.notice.as_deref().unwrap_or_default()),
            Style::new().fg(TEXT),
        ),
        Span::styled(format!("| {ack} "), Style::new().fg(MUTED)),
    ]);

    f.render_widget(Paragraph::new(line), area);
}

fn side_color(side: Side) -> Color {
    match side {
        Side::Long => RED,
        Side::Short => GREEN,
    }
}

fn exchange_label(exchange: ExchangeId) -> &'static str {
    match exchange {
        ExchangeId::BinanceFuturesUsd => "Binance",
        ExchangeId::BybitPerpetualsUsd => "Bybit",
        ExchangeId::GateioFuturesUsd => "Gate.io",
        ExchangeId::Okx => "OKX",
    }
}

fn exchange_color(exchange: ExchangeId) -> Color {
    match exchange {
        ExchangeId::Okx => Color::Rgb(0, 120, 255),
        ExchangeId::BinanceFuturesUsd => Color::Rgb(240, 185, 11),
        ExchangeId::GateioFuturesUsd => Color::Rgb(35, 84, 230),
        ExchangeId::BybitPerpetualsUsd => Color::Rgb(255, 92, 0),
    }
}

/// Format a USD amount with thousands separators & two decimals, eg/ `1,234,567.89`.
fn format_usd(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (integer, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}")
}
