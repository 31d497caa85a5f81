//! Multi-headset recording dashboard.
//!
//! Usage:
//!   cargo run --bin tui -- --username alice               # Bluetooth headsets
//!   cargo run --bin tui -- --username alice --simulate    # synthetic headsets
//!
//! Keys
//! ----
//!   c        connect another headset (opens the picker after a BLE scan)
//!   r        start / stop recording on every connected headset
//!   d        disconnect the selected headset
//!   Tab      select the next headset
//!   +  / -   zoom the waveform out / in
//!   q / Esc  quit (a running recording is stopped and uploaded first)
//!
//! Picker overlay: ↑ / ↓ to move, Enter to connect, Esc to cancel.

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Clear, Dataset, GraphType, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use tokio::sync::{mpsc, oneshot};

use muse_recorder::config::RecorderCli;
use muse_recorder::display::WAVEFORM_LEN;
use muse_recorder::prelude::*;
use muse_recorder::protocol::{EEG_CHANNEL_NAMES, EEG_FREQUENCY, REFERENCE_ELECTRODE};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Half-range steps of the waveform Y axis in µV.
const Y_SCALES: &[f64] = &[25.0, 50.0, 100.0, 200.0, 500.0, 1000.0];
const DEFAULT_SCALE: usize = 2;

/// Colour per panel, cycled.
const COLORS: [Color; 4] = [Color::Cyan, Color::Yellow, Color::Green, Color::Magenta];

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

// ── Device picker bridge ──────────────────────────────────────────────────────

/// A scan finished and the chooser is blocked waiting for the user.
struct PickerRequest {
    entries: Vec<String>,
    reply: std::sync::mpsc::Sender<Option<usize>>,
}

/// Shorten a BLE identifier: last 8 characters, upper-cased.
fn short_id(id: &str) -> String {
    let trimmed = id.trim_matches(|c: char| c == '{' || c == '}');
    let start = trimmed.len().saturating_sub(8);
    trimmed.get(start..).unwrap_or(trimmed).to_uppercase()
}

/// Chooser that hands the scan results to the UI thread and waits.
fn picker_chooser(tx: mpsc::UnboundedSender<PickerRequest>) -> DeviceChooser {
    Arc::new(move |devices: &[FoundDevice]| {
        let (reply, answer) = std::sync::mpsc::channel();
        let entries = devices
            .iter()
            .map(|d| format!("{}  [{}]", d.name, short_id(&d.id)))
            .collect();
        tx.send(PickerRequest { entries, reply }).ok()?;
        answer.recv().ok().flatten()
    })
}

// ── App state ─────────────────────────────────────────────────────────────────

struct Panel {
    session: Arc<DeviceSession>,
    view: Arc<DeviceView>,
}

struct Picker {
    entries: Vec<String>,
    cursor: usize,
    reply: std::sync::mpsc::Sender<Option<usize>>,
}

struct App {
    panels: Vec<Panel>,
    selected: usize,
    scale_idx: usize,
    connecting: bool,
    picker: Option<Picker>,
    recording: bool,
    status: Option<StatusUpdate>,
    username: String,
}

impl App {
    fn y_range(&self) -> f64 {
        Y_SCALES[self.scale_idx]
    }

    fn select_next(&mut self) {
        if !self.panels.is_empty() {
            self.selected = (self.selected + 1) % self.panels.len();
        }
    }

    fn remove(&mut self, name: &str) {
        self.panels.retain(|p| p.session.name() != name);
        if self.selected >= self.panels.len() {
            self.selected = self.panels.len().saturating_sub(1);
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

fn key(s: &str) -> Span<'_> {
    Span::styled(s, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
}

fn draw(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    draw_header(frame, header, app);
    draw_panels(frame, body, app);
    draw_footer(frame, footer, app);

    if let Some(picker) = &app.picker {
        draw_picker(frame, area, picker);
    }
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (state, state_color) = if app.recording {
        ("● REC".to_string(), Color::Red)
    } else {
        ("○ Idle".to_string(), Color::DarkGray)
    };
    let devices = if app.connecting {
        format!("{} connecting… ({} connected)", spinner_str(), app.panels.len())
    } else {
        format!("{} connected", app.panels.len())
    };
    let (status, status_color) = match &app.status {
        Some(s) if s.is_failure() => (s.to_string(), Color::Red),
        Some(s) => (s.to_string(), Color::White),
        None => (String::new(), Color::White),
    };

    let line = Line::from(vec![
        Span::styled(
            " MUSE Recorder ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(state, Style::default().fg(state_color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(app.username.as_str(), Style::default().fg(Color::LightBlue)),
        sep(),
        Span::raw(devices),
        sep(),
        Span::styled(status, Style::default().fg(status_color)),
    ]);
    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn draw_panels(frame: &mut Frame, area: Rect, app: &App) {
    if app.panels.is_empty() {
        frame.render_widget(
            Paragraph::new(Line::from(vec![
                Span::raw(" No headsets connected. Press "),
                key("[c]"),
                Span::raw(" to connect one."),
            ]))
            .block(Block::default().borders(Borders::ALL)),
            area,
        );
        return;
    }
    let n = app.panels.len() as u32;
    let rows = Layout::vertical((0..n).map(|_| Constraint::Ratio(1, n))).split(area);
    for (i, panel) in app.panels.iter().enumerate() {
        draw_panel(frame, rows[i], app, i, panel);
    }
}

fn fmt_xyz(v: Option<XyzSample>) -> String {
    let v = v.unwrap_or_default();
    format!("{:+.2} {:+.2} {:+.2}", v.x, v.y, v.z)
}

fn draw_panel(frame: &mut Frame, area: Rect, app: &App, i: usize, panel: &Panel) {
    let color = COLORS[i % COLORS.len()];
    let snap: DeviceSnapshot = panel.view.snapshot();
    let counts = panel.session.buffered();
    let selected = i == app.selected;

    let link = if snap.connected { "" } else { "  [LINK LOST]" };
    let marker = if selected { "▶ " } else { "  " };
    let title = format!(" {marker}{}{link} ", panel.session.name());
    let border = if selected {
        Style::default().fg(color).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let block = Block::default()
        .title(Span::styled(title, Style::default().fg(color).add_modifier(Modifier::BOLD)))
        .borders(Borders::ALL)
        .border_style(border);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let [stats_area, chart_area] =
        Layout::horizontal([Constraint::Length(34), Constraint::Min(0)]).areas(inner);

    let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::DarkGray));
    let mut lines = vec![];
    for (ch, rms) in snap.rms.iter().enumerate() {
        let name = EEG_CHANNEL_NAMES.get(ch).copied().unwrap_or("?");
        lines.push(Line::from(vec![
            label("RMS "),
            Span::raw(format!("{name:4} {rms:6.1} µV")),
        ]));
    }
    let blink = snap.blink.map(|b| b.to_string()).unwrap_or_default();
    let blink_color = match snap.blink {
        Some(BlinkState::Blink) => Color::Red,
        _ => Color::Green,
    };
    lines.push(Line::from(Span::styled(blink, Style::default().fg(blink_color))));
    lines.push(Line::from(vec![
        label("Rate "),
        Span::raw(
            snap.frame_rate
                .map(|f| format!("{f:5.1} fps"))
                .unwrap_or_else(|| "  …".into()),
        ),
        label("  Bat "),
        Span::raw(
            snap.battery
                .map(|b| format!("{b:.0}%"))
                .unwrap_or_else(|| "N/A".into()),
        ),
    ]));
    if !snap.ppg.is_empty() {
        let levels: Vec<String> = snap.ppg.iter().map(|v| format!("{v:.0}")).collect();
        lines.push(Line::from(vec![label("PPG "), Span::raw(levels.join(" "))]));
    }
    lines.push(Line::from(vec![label("Acc "), Span::raw(fmt_xyz(snap.accel))]));
    lines.push(Line::from(vec![label("Gyr "), Span::raw(fmt_xyz(snap.gyro))]));
    lines.push(Line::from(vec![
        label("Buf "),
        Span::styled(
            format!(
                "{} eeg {} ppg {} imu",
                counts.eeg,
                counts.ppg,
                counts.accel + counts.gyro
            ),
            Style::default().fg(if app.recording { Color::Red } else { Color::DarkGray }),
        ),
    ]));
    frame.render_widget(Paragraph::new(lines), stats_area);

    let y_range = app.y_range();
    let window_secs = WAVEFORM_LEN as f64 / EEG_FREQUENCY;
    let data: Vec<(f64, f64)> = snap
        .waveform
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64 / EEG_FREQUENCY, v.clamp(-y_range, y_range)))
        .collect();
    let chart = Chart::new(vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&data)])
    .block(Block::default().title(Span::styled(
        format!(" {} ", EEG_CHANNEL_NAMES[REFERENCE_ELECTRODE]),
        Style::default().fg(Color::DarkGray),
    )))
    .x_axis(
        Axis::default()
            .bounds([0.0, window_secs])
            .style(Style::default().fg(Color::DarkGray)),
    )
    .y_axis(
        Axis::default()
            .bounds([-y_range, y_range])
            .labels(vec![format!("{:+.0}", -y_range), "0".into(), format!("{:+.0}", y_range)])
            .style(Style::default().fg(Color::DarkGray)),
    );
    frame.render_widget(chart, chart_area);
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let keys = Line::from(vec![
        Span::raw(" "),
        key("[c]"),
        Span::raw("Connect  "),
        key("[r]"),
        Span::raw(if app.recording { "Stop recording  " } else { "Record  " }),
        key("[d]"),
        Span::raw("Disconnect  "),
        key("[Tab]"),
        Span::raw("Next  "),
        key("[+/-]"),
        Span::raw(format!("Scale ±{:.0} µV  ", app.y_range())),
        key("[q]"),
        Span::raw("Quit"),
    ]);
    frame.render_widget(
        Paragraph::new(keys).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn draw_picker(frame: &mut Frame, area: Rect, picker: &Picker) {
    let n = picker.entries.len().max(1) as u16;
    let box_h = (n + 4).min(area.height);
    let box_w = (area.width * 60 / 100).max(48).min(area.width);
    let x = area.x + area.width.saturating_sub(box_w) / 2;
    let y = area.y + area.height.saturating_sub(box_h) / 2;
    let popup = Rect::new(x, y, box_w, box_h);

    frame.render_widget(Clear, popup);
    frame.render_widget(
        Block::default()
            .title(format!(" Select Device  ({} found) ", picker.entries.len()))
            .borders(Borders::ALL),
        popup,
    );
    let inner = popup.inner(Margin {
        horizontal: 1,
        vertical: 1,
    });
    let [list_area, hint_area] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(inner);

    let items: Vec<ListItem> = if picker.entries.is_empty() {
        vec![ListItem::new(Span::styled(
            "  No headsets found",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        picker.entries.iter().map(|e| ListItem::new(e.as_str())).collect()
    };
    let mut state = ListState::default();
    if !picker.entries.is_empty() {
        state.select(Some(picker.cursor));
    }
    frame.render_stateful_widget(
        List::new(items)
            .highlight_style(Style::default().fg(Color::Black).bg(Color::White))
            .highlight_symbol("▶ "),
        list_area,
        &mut state,
    );
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            key(" [↑↓]"),
            Span::raw(" Navigate  "),
            key("[↵]"),
            Span::raw(" Connect  "),
            key("[Esc]"),
            Span::raw(" Cancel"),
        ])),
        hint_area,
    );
}

// ── Entry point ───────────────────────────────────────────────────────────────

type ConnectResult = Result<(Arc<DeviceSession>, Arc<DeviceView>), ConnectError>;

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: the recorder dashboard requires a real terminal (TTY).");
        std::process::exit(1);
    }

    let config = RecorderCli::parse().recorder;

    // Log to a file so log lines never land on the dashboard.
    if let Ok(file) = std::fs::File::create("muse-recorder-tui.log") {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    }

    let status = StatusLine::new();
    let uploader = UploadClient::new(config.server.clone(), Arc::new(config.gateway()))?;
    let coordinator = RecordingCoordinator::new(Arc::new(uploader), status.clone());
    let registry = Arc::new(DeviceRegistry::new(
        coordinator.flag(),
        config.username.clone(),
    ));

    let (picker_tx, mut picker_rx) = mpsc::unbounded_channel();
    let chooser = picker_chooser(picker_tx);
    let mut pending_connect: Option<oneshot::Receiver<ConnectResult>> = None;
    let mut connects = 0usize;

    let mut app = App {
        panels: vec![],
        selected: 0,
        scale_idx: DEFAULT_SCALE,
        connecting: false,
        picker: None,
        recording: false,
        status: None,
        username: config.username.clone(),
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(33);

    'main: loop {
        // ── 1. Background results ─────────────────────────────────────────────
        if let Ok(request) = picker_rx.try_recv() {
            app.picker = Some(Picker {
                entries: request.entries,
                cursor: 0,
                reply: request.reply,
            });
        }

        if let Some(rx) = pending_connect.as_mut() {
            if let Ok(result) = rx.try_recv() {
                pending_connect = None;
                app.connecting = false;
                match result {
                    Ok((session, view)) => {
                        status.report(StatusUpdate::Connected {
                            device: session.name().to_string(),
                        });
                        app.panels.push(Panel { session, view });
                        app.selected = app.panels.len() - 1;
                    }
                    Err(ConnectError::Cancelled) => {}
                    Err(e) => status.report(StatusUpdate::Notice(e.to_string())),
                }
            }
        }

        for name in registry.prune() {
            status.report(StatusUpdate::Disconnected {
                device: name.clone(),
            });
            app.remove(&name);
        }
        app.recording = coordinator.state() == RecordingState::Recording;
        app.status = status.latest();

        // ── 2. Render ─────────────────────────────────────────────────────────
        terminal.draw(|f| draw(f, &app))?;

        // ── 3. Keyboard ───────────────────────────────────────────────────────
        if !event::poll(tick)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if ctrl_c {
            break 'main;
        }

        if let Some(picker) = app.picker.as_mut() {
            match key.code {
                KeyCode::Up => picker.cursor = picker.cursor.saturating_sub(1),
                KeyCode::Down => {
                    picker.cursor = (picker.cursor + 1).min(picker.entries.len().saturating_sub(1))
                }
                KeyCode::Enter => {
                    let choice = (!picker.entries.is_empty()).then_some(picker.cursor);
                    let _ = picker.reply.send(choice);
                    app.picker = None;
                }
                KeyCode::Esc | KeyCode::Char('q') => {
                    let _ = picker.reply.send(None);
                    app.picker = None;
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break 'main,
            KeyCode::Char('c') if pending_connect.is_none() => {
                connects += 1;
                let source = config.new_source(connects, &chooser);
                let registry = Arc::clone(&registry);
                let (tx, rx) = oneshot::channel();
                tokio::spawn(async move {
                    let view = DeviceView::new();
                    let display: Arc<dyn DisplaySurface> = view.clone();
                    let result = registry
                        .connect(source, Some(display))
                        .await
                        .map(|session| (session, view));
                    let _ = tx.send(result);
                });
                pending_connect = Some(rx);
                app.connecting = true;
            }
            KeyCode::Char('r') => {
                coordinator.toggle(&registry);
            }
            KeyCode::Char('d') => {
                let Some(name) = app
                    .panels
                    .get(app.selected)
                    .map(|p| p.session.name().to_string())
                else {
                    continue;
                };
                app.remove(&name);
                let registry = Arc::clone(&registry);
                let status = status.clone();
                // Never block the render loop on a BLE call.
                tokio::spawn(async move {
                    match registry.disconnect(&name).await {
                        Ok(true) => status.report(StatusUpdate::Disconnected { device: name }),
                        Ok(false) => {}
                        Err(e) => status.report(StatusUpdate::Notice(format!("{name}: {e}"))),
                    }
                });
            }
            KeyCode::Tab => app.select_next(),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                app.scale_idx = (app.scale_idx + 1).min(Y_SCALES.len() - 1);
            }
            KeyCode::Char('-') => app.scale_idx = app.scale_idx.saturating_sub(1),
            _ => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Some(picker) = app.picker.take() {
        let _ = picker.reply.send(None);
    }
    if coordinator.state() == RecordingState::Recording {
        eprintln!("Uploading the running recording…");
        for upload in coordinator.toggle(&registry).uploads {
            match upload.handle.await {
                Ok(Ok(())) => eprintln!("{}: saved", upload.device),
                Ok(Err(e)) => eprintln!("{}: ERROR: Data not saved ({e})", upload.device),
                Err(e) => eprintln!("{}: upload task failed: {e}", upload.device),
            }
        }
    }
    registry.disconnect_all().await;
    Ok(())
}
