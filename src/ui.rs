use itertools::Itertools;
use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Cell, Gauge, Paragraph, Row, Table, Widget, Wrap},
};

use saccade::driver::WarmupView;
use saccade::record::SessionResult;
use saccade::session::DotView;

use crate::{App, AppState, VIRTUAL_HEIGHT, VIRTUAL_WIDTH};

const HORIZONTAL_MARGIN: u16 = 5;

const ORANGE: Color = Color::Rgb(255, 165, 0);
const DOT_RED: Color = Color::Rgb(221, 73, 75);

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width == 0 || area.height == 0 {
            return;
        }
        match &self.state {
            AppState::Trial => render_trial(self, area, buf),
            AppState::Results => render_results(self, area, buf),
            AppState::Aborted(notice) => render_aborted(notice, area, buf),
        }
    }
}

fn render_trial(app: &App, area: Rect, buf: &mut Buffer) {
    let dim_style = Style::default().add_modifier(Modifier::DIM);
    let phase_label = Paragraph::new(Span::styled(app.driver.phase().to_string(), dim_style))
        .alignment(Alignment::Right);
    let header = Rect {
        height: 1.min(area.height),
        ..area
    };
    phase_label.render(header, buf);

    if let Some(warmup) = app.driver.warmup() {
        render_warmup(&warmup, area, buf);
    } else if let Some(notice) = app.driver.notice() {
        render_notice(notice, area, buf);
    } else if let Some(dot) = app.driver.dot() {
        render_dot(&dot, area, buf);
    }

    if let Some((ex, ey)) = app.last_estimate {
        render_estimate_marker(ex, ey, area, buf);
    }
}

/// Live gaze-estimate marker. Estimates can land outside the virtual
/// screen, so off-screen positions are simply not drawn.
fn render_estimate_marker(ex: f64, ey: f64, area: Rect, buf: &mut Buffer) {
    let x = (ex / VIRTUAL_WIDTH * (area.width.saturating_sub(1)) as f64).round();
    let y = (ey / VIRTUAL_HEIGHT * (area.height.saturating_sub(1)) as f64).round();
    if x < 0.0 || y < 0.0 || x >= area.width as f64 || y >= area.height as f64 {
        return;
    }
    buf.set_string(
        area.x + x as u16,
        area.y + y as u16,
        "+",
        Style::default().fg(Color::Cyan),
    );
}

fn render_warmup(warmup: &WarmupView, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(0),
        ])
        .split(area);

    let instructions = Paragraph::new(vec![
        Line::from("Position your head so the camera has a good view of your eyes."),
        Line::from("Center your face in the box and keep still while the meter fills."),
        Line::from(""),
        Line::from(Span::styled(
            "Quality of detection:",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ])
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true });
    instructions.render(chunks[1], buf);

    let gauge_color = if warmup.face_ok {
        Color::Green
    } else {
        ORANGE
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(gauge_color))
        .ratio(warmup.quality.clamp(0.0, 1.0))
        .label(format!(
            "{:.0}% (need more than {:.0}%)",
            warmup.quality * 100.0,
            warmup.threshold * 100.0
        ));
    gauge.render(chunks[2], buf);

    let hint = if !warmup.ready {
        Span::styled("starting camera...", Style::default().add_modifier(Modifier::DIM))
    } else if warmup.face_ok {
        Span::styled(
            "press SPACE to continue",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(
            "adjust lighting or camera angle to improve the score",
            Style::default().add_modifier(Modifier::ITALIC),
        )
    };
    Paragraph::new(hint)
        .alignment(Alignment::Center)
        .render(chunks[3], buf);
}

fn render_notice(notice: &str, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(4),
            Constraint::Min(0),
        ])
        .split(area);

    Paragraph::new(notice)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(chunks[1], buf);
}

fn render_dot(dot: &DotView, area: Rect, buf: &mut Buffer) {
    let x = (dot.cx / VIRTUAL_WIDTH * (area.width.saturating_sub(1)) as f64).round() as u16;
    let y = (dot.cy / VIRTUAL_HEIGHT * (area.height.saturating_sub(1)) as f64).round() as u16;
    let x = area.x + x.min(area.width.saturating_sub(1));
    let y = area.y + y.min(area.height.saturating_sub(1));

    let color = match dot.verdict {
        Some(true) => Color::Green,
        Some(false) => ORANGE,
        None => DOT_RED,
    };
    buf.set_string(
        x,
        y,
        "⬤",
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    );

    if dot.countdown > 0 && x + 2 < area.right() {
        buf.set_string(
            x + 2,
            y,
            dot.countdown.to_string(),
            Style::default().add_modifier(Modifier::DIM),
        );
    }
}

fn render_results(app: &App, area: Rect, buf: &mut Buffer) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let dim = Style::default().add_modifier(Modifier::DIM);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(6),
            Constraint::Length(1 + app.recent.len() as u16),
            Constraint::Length(2),
        ])
        .split(area);

    let validation = app.driver.validation_result();

    let mut title_lines = Vec::new();
    match validation {
        Some(result) => {
            let accuracy_style = if result.accuracy > 0.7 {
                bold.fg(Color::Green)
            } else {
                bold.fg(ORANGE)
            };
            title_lines.push(Line::from(vec![
                Span::styled(
                    format!("tracking accuracy {:.0}%", result.accuracy * 100.0),
                    accuracy_style,
                ),
                Span::styled(
                    format!(
                        "  ({}/{} points passed)",
                        result.passed_count(),
                        result.points.len()
                    ),
                    dim,
                ),
            ]));
            if let Some(summary) = result.distance_summary() {
                title_lines.push(Line::from(Span::styled(
                    format!(
                        "gaze error: mean {:.0}px / sd {:.0}px / worst {:.0}px",
                        summary.mean, summary.std_dev, summary.max
                    ),
                    dim,
                )));
            }
        }
        None => {
            title_lines.push(Line::from(Span::styled("validation skipped", bold)));
        }
    }
    if let Some(best) = app.best_accuracy {
        title_lines.push(Line::from(Span::styled(
            format!("best accuracy on record: {:.0}%", best * 100.0),
            dim,
        )));
    }
    if let Some(payload) = &app.payload {
        title_lines.push(Line::from(Span::styled(
            format!(
                "{} raw gaze samples handed to the host",
                payload.validation_history.len()
            ),
            dim,
        )));
    }
    Paragraph::new(title_lines).render(chunks[0], buf);

    if let Some(result) = validation {
        render_point_table(result, chunks[1], buf);
    }

    if !app.recent.is_empty() {
        let mut lines = vec![Line::from(Span::styled("recent sessions", bold))];
        for row in &app.recent {
            let when: String = row.timestamp.chars().take(19).collect();
            lines.push(Line::from(Span::styled(
                format!(
                    "{when}  {:11}  {} pts  {} passed  acc {:.2}",
                    row.kind, row.points, row.passed, row.accuracy
                ),
                dim,
            )));
        }
        Paragraph::new(lines).render(chunks[2], buf);
    }

    Paragraph::new(Span::styled("(r)etry / (esc)ape", Style::default().fg(Color::Magenta)))
        .alignment(Alignment::Center)
        .render(chunks[3], buf);
}

fn render_point_table(result: &SessionResult, area: Rect, buf: &mut Buffer) {
    let header = Row::new(vec!["x%", "y%", "hits", "samples", "ratio", "verdict"]).style(
        Style::default()
            .add_modifier(Modifier::BOLD)
            .add_modifier(Modifier::UNDERLINED),
    );

    // Worst-tracked points first so problem areas stand out.
    let rows: Vec<Row> = result
        .points
        .iter()
        .sorted_by(|a, b| {
            a.hit_ratio
                .partial_cmp(&b.hit_ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|p| {
            let verdict_style = if p.valid {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(ORANGE)
            };
            Row::new(vec![
                Cell::from(format!("{:.0}", p.x)),
                Cell::from(format!("{:.0}", p.y)),
                Cell::from(p.hit_count.to_string()),
                Cell::from(p.total_count.to_string()),
                Cell::from(format!("{:.2}", p.hit_ratio)),
                Cell::from(Span::styled(
                    if p.valid { "pass" } else { "fail" },
                    verdict_style,
                )),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(5),
            Constraint::Length(6),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Length(8),
        ],
    )
    .header(header);
    Widget::render(table, area, buf);
}

fn render_aborted(notice: &str, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(4),
            Constraint::Length(2),
            Constraint::Min(0),
        ])
        .split(area);

    Paragraph::new(Span::styled(
        notice,
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    ))
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .render(chunks[1], buf);

    Paragraph::new(Span::styled(
        "the session cannot continue; press ESC and start over",
        Style::default().add_modifier(Modifier::DIM),
    ))
    .alignment(Alignment::Center)
    .render(chunks[2], buf);
}
