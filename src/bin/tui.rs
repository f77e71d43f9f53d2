//! Expedição TUI - live productivity dashboard for the dispatch floor
//!
//! Subscribes to the MQTT live topics for low-latency hints and reconciles
//! from `GET /productivity` on a fixed interval. Displays:
//! - Per-station totals and pace (packages/hour)
//! - Hour-bucket table for the business date
//! - Goal progress
//! - Recent registrations and day closures

use chrono::{Local, NaiveDate};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use expedicao::domain::types::{LiveEvent, StationId};
use expedicao::io::HttpDispatchClient;
use expedicao::services::{GoalProgress, ProductivitySnapshot};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Row, Table},
    Frame, Terminal,
};
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Maximum events to keep in history
const MAX_RECENT_EVENTS: usize = 20;

/// Expedição dashboard
#[derive(Parser, Debug)]
#[command(name = "expedicao-tui", version, about)]
struct Args {
    /// Server base URL for reconciliation
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,
    #[arg(long)]
    mqtt_username: Option<String>,
    #[arg(long)]
    mqtt_password: Option<String>,
    /// Seconds between productivity reconciliations
    #[arg(long, default_value_t = 10)]
    reconcile_secs: u64,
}

struct DashboardState {
    connected: bool,
    last_message: Option<Instant>,
    snapshot: Option<ProductivitySnapshot>,
    last_reconcile: Option<Instant>,
    reconcile_error: Option<String>,
    /// Orders already applied as hints since the last reconcile
    hinted: FxHashSet<String>,
    recent: VecDeque<LiveEvent>,
    last_closure: Option<(NaiveDate, NaiveDate, u64)>,
}

impl DashboardState {
    fn new() -> Self {
        Self {
            connected: false,
            last_message: None,
            snapshot: None,
            last_reconcile: None,
            reconcile_error: None,
            hinted: FxHashSet::default(),
            recent: VecDeque::with_capacity(MAX_RECENT_EVENTS),
            last_closure: None,
        }
    }

    /// Snapshot is authoritative; hints only bridge the gap until the next one
    fn reconcile(&mut self, snapshot: ProductivitySnapshot) {
        self.snapshot = Some(snapshot);
        self.hinted.clear();
        self.last_reconcile = Some(Instant::now());
        self.reconcile_error = None;
    }

    fn handle_event(&mut self, event: LiveEvent) {
        match &event {
            LiveEvent::NewPackage { station, order_id, business_date, .. } => {
                let fresh = self.hinted.insert(order_id.as_str().to_string());
                if let Some(snapshot) = self.snapshot.as_mut() {
                    if fresh && snapshot.business_date == *business_date {
                        snapshot.total_packages += 1;
                        *snapshot.total_by_station.entry(*station).or_insert(0) += 1;
                    }
                }
            }
            LiveEvent::DayClosed { date, next_date, total_packages } => {
                self.last_closure = Some((*date, *next_date, *total_packages));
            }
        }

        self.recent.push_front(event);
        if self.recent.len() > MAX_RECENT_EVENTS {
            self.recent.pop_back();
        }
        self.last_message = Some(Instant::now());
    }
}

type SharedState = Arc<Mutex<DashboardState>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let client = HttpDispatchClient::new(&args.server, Duration::from_secs(5))?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let state = Arc::new(Mutex::new(DashboardState::new()));

    let mqtt_state = state.clone();
    let mqtt_args = (args.mqtt_host.clone(), args.mqtt_port, args.mqtt_username.clone(), args.mqtt_password.clone());
    let mqtt_handle = tokio::spawn(async move {
        let (host, port, user, pass) = mqtt_args;
        run_mqtt_subscriber(&host, port, user, pass, mqtt_state).await;
    });

    let reconcile_state = state.clone();
    let reconcile_every = Duration::from_secs(args.reconcile_secs.max(1));
    let reconcile_handle = tokio::spawn(async move {
        run_reconciler(client, reconcile_every, reconcile_state).await;
    });

    let result = run_ui(&mut terminal, state).await;

    mqtt_handle.abort();
    reconcile_handle.abort();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

async fn run_reconciler(client: HttpDispatchClient, every: Duration, state: SharedState) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let result = client.productivity(None).await;
        let mut s = state.lock().await;
        match result {
            Ok(snapshot) => s.reconcile(snapshot),
            Err(e) => s.reconcile_error = Some(e.to_string()),
        }
    }
}

async fn run_mqtt_subscriber(
    host: &str,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    state: SharedState,
) {
    let client_id = format!("expedicao-tui-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, host, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_clean_session(true);

    if let (Some(user), Some(pass)) = (username, password) {
        mqttoptions.set_credentials(user, pass);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let _ = client.subscribe("expedicao/#", QoS::AtMostOnce).await;

    loop {
        match eventloop.poll().await {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                state.lock().await.connected = true;
            }
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                if let Ok(event) = serde_json::from_slice::<LiveEvent>(&publish.payload) {
                    state.lock().await.handle_event(event);
                }
            }
            Ok(_) => {}
            Err(_) => {
                state.lock().await.connected = false;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error>> {
    let tick_rate = Duration::from_millis(200);

    loop {
        let s = state.lock().await;
        terminal.draw(|f| draw_ui(f, &s))?;
        drop(s);

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let KeyCode::Char('q') | KeyCode::Esc = key.code {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn draw_ui(f: &mut Frame, state: &DashboardState) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(6), // Stations
            Constraint::Min(0),    // Bottom panels
        ])
        .split(f.area());

    draw_header(f, main_chunks[0], state);
    draw_station_panel(f, main_chunks[1], state);

    let bottom_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(20), Constraint::Percentage(30)])
        .split(main_chunks[2]);

    draw_hourly_panel(f, bottom_chunks[0], state);
    draw_goal_panel(f, bottom_chunks[1], state);
    draw_events_panel(f, bottom_chunks[2], state);
}

fn draw_header(f: &mut Frame, area: Rect, state: &DashboardState) {
    let status_color = if state.connected { Color::Green } else { Color::Red };
    let status_text = if state.connected { "LIVE" } else { "NO MQTT" };

    let date = state
        .snapshot
        .as_ref()
        .map(|s| s.business_date.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| "--/--/----".to_string());
    let total = state.snapshot.as_ref().map(|s| s.total_packages).unwrap_or(0);

    let synced = match (&state.reconcile_error, state.last_reconcile) {
        (Some(e), _) => Span::styled(format!("sync failed: {e}"), Style::default().fg(Color::Red)),
        (None, Some(at)) => Span::raw(format!("synced {}s ago", at.elapsed().as_secs())),
        (None, None) => Span::raw("not synced"),
    };

    let mut spans = vec![
        Span::styled("Expedição ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw(format!(" | Dia {date} | Pacotes: ")),
        Span::styled(total.to_string(), Style::default().fg(Color::Yellow)),
        Span::raw(" | "),
        synced,
    ];
    if let Some((closed, next, packages)) = state.last_closure {
        spans.push(Span::raw(format!(" | Fechado {closed} ({packages}) -> {next}")));
    }
    spans.push(Span::raw(format!(" | {} | 'q' sai", Local::now().format("%H:%M"))));

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn draw_station_panel(f: &mut Frame, area: Rect, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 4); 4])
        .split(area);

    let snapshot = state.snapshot.as_ref();
    let max = snapshot
        .map(|s| s.total_by_station.values().copied().max().unwrap_or(0))
        .unwrap_or(0)
        .max(1);

    for (i, station) in StationId::ALL.iter().enumerate() {
        let count = snapshot.and_then(|s| s.total_by_station.get(station).copied()).unwrap_or(0);
        let pace = snapshot
            .and_then(|s| s.pace_by_station.as_ref())
            .and_then(|p| p.get(station).copied());
        let leading = snapshot.and_then(|s| s.leading_station) == Some(*station);

        let color = if leading { Color::Green } else { Color::Cyan };
        let title = match pace {
            Some(rate) => format!(" {station} {rate:.0}/h "),
            None => format!(" {station} "),
        };
        let gauge = Gauge::default()
            .block(Block::default().title(title).borders(Borders::ALL).border_style(Style::default().fg(color)))
            .gauge_style(Style::default().fg(color))
            .ratio((count as f64 / max as f64).min(1.0))
            .label(count.to_string());
        f.render_widget(gauge, chunks[i]);
    }
}

fn draw_hourly_panel(f: &mut Frame, area: Rect, state: &DashboardState) {
    let header = Row::new(
        std::iter::once("Horário".to_string())
            .chain(StationId::ALL.iter().map(|s| s.to_string()))
            .chain(std::iter::once("Total".to_string())),
    )
    .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = state
        .snapshot
        .as_ref()
        .map(|s| {
            s.hourly
                .iter()
                .map(|bucket| {
                    let cells = std::iter::once(bucket.label.clone())
                        .chain(
                            StationId::ALL
                                .iter()
                                .map(|st| bucket.by_station.get(st).copied().unwrap_or(0).to_string()),
                        )
                        .chain(std::iter::once(bucket.total.to_string()));
                    Row::new(cells)
                })
                .collect()
        })
        .unwrap_or_default();

    let widths = [
        Constraint::Length(16),
        Constraint::Length(5),
        Constraint::Length(5),
        Constraint::Length(5),
        Constraint::Length(5),
        Constraint::Length(6),
    ];
    let table = Table::new(rows, widths).header(header).block(
        Block::default()
            .title(" Produtividade por hora ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );
    f.render_widget(table, area);
}

fn draw_goal_panel(f: &mut Frame, area: Rect, state: &DashboardState) {
    let lines: Vec<Line> = match state.snapshot.as_ref().and_then(|s| s.goal_progress.as_ref()) {
        None => vec![Line::from("Sem meta")],
        Some(GoalProgress::Aggregate { actual, goal, percent }) => {
            vec![Line::from(format!("{actual}/{goal}")), Line::from(format!("{percent:.1}%"))]
        }
        Some(GoalProgress::PerSeller { sellers }) => sellers
            .iter()
            .map(|(seller, p)| Line::from(format!("{:<14} {}/{} {:.0}%", seller.label(), p.actual, p.goal, p.percent)))
            .collect(),
    };

    let goal = Paragraph::new(lines).block(
        Block::default()
            .title(" Meta ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );
    f.render_widget(goal, area);
}

fn draw_events_panel(f: &mut Frame, area: Rect, state: &DashboardState) {
    let items: Vec<ListItem> = state
        .recent
        .iter()
        .map(|event| match event {
            LiveEvent::NewPackage { station, seller, order_id, registered_at, .. } => {
                let seller = seller.map(|s| s.label()).unwrap_or("-");
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{station} "), Style::default().fg(Color::Cyan)),
                    Span::raw(format!(
                        "{} {} {}",
                        registered_at.with_timezone(&Local).format("%H:%M:%S"),
                        order_id.as_str(),
                        seller
                    )),
                ]))
            }
            LiveEvent::DayClosed { date, next_date, total_packages } => ListItem::new(Line::from(Span::styled(
                format!("DIA {date} FECHADO ({total_packages}) -> {next_date}"),
                Style::default().fg(Color::Magenta),
            ))),
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Últimos registros ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(list, area);
}
