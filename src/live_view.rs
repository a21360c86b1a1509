//! Terminal live plot of a running sweep.

use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::symbols;
use ratatui::text::Span;
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, Paragraph};
use ratatui::{Frame, Terminal};

use pv_tracer::{CurveSnapshot, MaxPowerPoint, StopReason, SweepController, SweepEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// Restores the terminal however the view exits.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(TerminalGuard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

#[derive(Default)]
struct ViewState {
    title: String,
    snapshot: CurveSnapshot,
    summary: Option<Option<MaxPowerPoint>>,
    finished: Option<StopReason>,
    stop_requested: bool,
}

impl ViewState {
    fn apply(&mut self, event: SweepEvent) {
        match event {
            SweepEvent::Update(snapshot) => self.snapshot = snapshot,
            SweepEvent::Summary(max_power) => self.summary = Some(max_power),
            SweepEvent::Finished(reason) => self.finished = Some(reason),
        }
    }
}

/// Shows the sweep until it finishes and a key is pressed. `q` or `Esc`
/// asks the controller to stop early.
pub fn run(controller: &SweepController, events: Receiver<SweepEvent>, title: &str) -> Result<Option<StopReason>> {
    let _guard = TerminalGuard::enter()?;
    let mut terminal: Terminal<CrosstermBackend<Stdout>> = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;

    let mut state = ViewState { title: title.to_string(), ..Default::default() };

    loop {
        loop {
            match events.try_recv() {
                Ok(event) => state.apply(event),
                Err(TryRecvError::Empty) => break,
                // worker gone without a final event
                Err(TryRecvError::Disconnected) => {
                    if state.finished.is_none() {
                        state.finished = Some(StopReason::InstrumentError(String::from("sweep worker exited")));
                    }
                    break;
                }
            }
        }

        terminal.draw(|frame| draw(frame, &state))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if state.finished.is_some() {
                    break;
                }
                let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
                let stop = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) || ctrl_c;
                if stop && !state.stop_requested {
                    controller.cancel();
                    state.stop_requested = true;
                }
            }
        }
    }

    Ok(state.finished)
}

fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() || !max.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((max - min) * 0.05).max(1e-3);
    [min - pad, max + pad]
}

fn axis<'a>(title: &'a str, range: [f64; 2]) -> Axis<'a> {
    let mid = (range[0] + range[1]) / 2.0;
    Axis::default()
        .title(title)
        .style(Style::default().fg(Color::Gray))
        .bounds(range)
        .labels(vec![
            Span::raw(format!("{:.2}", range[0])),
            Span::raw(format!("{:.2}", mid)),
            Span::raw(format!("{:.2}", range[1])),
        ])
}

fn curve_chart(frame: &mut Frame, area: Rect, name: &str, points: &[(f64, f64)], y_title: &str, color: Color) {
    let x_range = bounds(points.iter().map(|p| p.0));
    let y_range = bounds(points.iter().map(|p| p.1));
    let dataset = Dataset::default()
        .name(name.to_string())
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(points);
    let chart = Chart::new(vec![dataset])
        .block(Block::default().title(name.to_string()).borders(Borders::ALL))
        .x_axis(axis("Voltage (V)", x_range))
        .y_axis(axis(y_title, y_range));
    frame.render_widget(chart, area);
}

fn draw(frame: &mut Frame, state: &ViewState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(10), Constraint::Length(3), Constraint::Length(3)])
        .split(frame.size());

    let status = match (&state.finished, state.stop_requested) {
        (Some(reason), _) => format!("{} (press any key to exit)", reason),
        (None, true) => String::from("Stopping after the current measurement..."),
        (None, false) => String::from("Sweeping (q / Esc to stop)"),
    };
    let header = Paragraph::new(status).block(Block::default().title(state.title.clone()).borders(Borders::ALL));
    frame.render_widget(header, rows[0]);

    let charts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);
    let snapshot = &state.snapshot;
    let iv: Vec<(f64, f64)> = snapshot.voltages.iter().copied().zip(snapshot.currents.iter().copied()).collect();
    let pv: Vec<(f64, f64)> = snapshot.voltages.iter().copied().zip(snapshot.powers.iter().copied()).collect();
    curve_chart(frame, charts[0], "I-V", &iv, "Current (A)", Color::Cyan);
    curve_chart(frame, charts[1], "P-V", &pv, "Power (W)", Color::Yellow);

    let progress = snapshot.progress;
    let gauge = Gauge::default()
        .block(Block::default().title("Progress").borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(progress.ratio())
        .label(format!("{}/{}", progress.completed, progress.total));
    frame.render_widget(gauge, rows[2]);

    let summary = match state.summary {
        Some(Some(mpp)) => format!("Pmp = {:.3} W   Vmp = {:.3} V   Imp = {:.3} A", mpp.pmp, mpp.vmp, mpp.imp),
        Some(None) => String::from("No data"),
        None => match snapshot.voltages.last() {
            Some(v) => format!(
                "V = {:.3} V   I = {:.3} A   P = {:.3} W",
                v,
                snapshot.currents.last().copied().unwrap_or_default(),
                snapshot.powers.last().copied().unwrap_or_default()
            ),
            None => String::from("Waiting for the first measurement"),
        },
    };
    frame.render_widget(Paragraph::new(summary).block(Block::default().title("Maximum power").borders(Borders::ALL)), rows[3]);
}
