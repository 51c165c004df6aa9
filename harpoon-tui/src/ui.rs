//! Ratatui rendering for the TUI.

use chrono::Local;
use harpoon_core::event::MessageKind;
use harpoon_core::presenter::{DisplayLine, View};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::input::InputLine;

/// Columns used by the `HH:MM:SS | ` timestamp gutter.
pub const TIME_COLUMNS: u16 = 11;
/// Width of the user list.
pub const USERS_COLUMNS: u16 = 30;
/// Rows taken by the input box.
const INPUT_ROWS: u16 = 3;

/// Rows available to the chat pane in a terminal `height` rows tall.
pub fn chat_rows(height: u16) -> usize {
    height.saturating_sub(INPUT_ROWS + 2) as usize
}

pub fn draw(frame: &mut Frame, view: &View, input: &InputLine, channel: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),              // chat + user list
            Constraint::Length(INPUT_ROWS), // input
        ])
        .split(frame.area());

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Min(TIME_COLUMNS + 1), // chat
            Constraint::Length(USERS_COLUMNS), // user list
        ])
        .split(chunks[0]);

    draw_chat(frame, view, channel, cols[0]);
    draw_users(frame, view, cols[1]);
    draw_input(frame, input, chunks[1]);
}

fn draw_chat(frame: &mut Frame, view: &View, channel: &str, area: Rect) {
    let scroll = view.scroll_offset();
    let title = if scroll > 0 {
        format!(" ?{channel} [+{scroll}] ")
    } else {
        format!(" ?{channel} ")
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    view.set_wrap_width(inner.width.saturating_sub(TIME_COLUMNS) as usize);
    let rows = inner.height as usize;
    let window = view.window(rows);
    // Short transcripts sit at the bottom of the pane.
    let mut lines: Vec<Line> = vec![Line::default(); rows.saturating_sub(window.len())];
    lines.extend(window.iter().map(render_line));
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_line(line: &DisplayLine) -> Line<'static> {
    let body_style = match line.kind {
        MessageKind::Status => Style::default().fg(Color::Cyan),
        MessageKind::Whisper | MessageKind::Emote => Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::ITALIC),
        MessageKind::Normal => Style::default(),
    };

    let Some(header) = &line.header else {
        return Line::from(vec![
            Span::raw(" ".repeat(TIME_COLUMNS as usize)),
            Span::styled(line.text.clone(), body_style),
        ]);
    };

    let mut spans = vec![Span::styled(
        format!("{} | ", header.timestamp.with_timezone(&Local).format("%H:%M:%S")),
        Style::default().fg(Color::DarkGray),
    )];
    let (open, close) = if line.kind == MessageKind::Status {
        ("[", "]")
    } else {
        ("<", ">")
    };
    let shows_sender = line.kind.shows_sender();
    if shows_sender {
        spans.push(Span::raw(open));
    }
    if let Some(trip) = &header.trip {
        spans.push(Span::styled(trip.clone(), Style::default().fg(Color::Magenta)));
        spans.push(Span::raw(" "));
    }
    if shows_sender {
        let sender_style = if header.is_mod {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Green)
        };
        spans.push(Span::styled(header.sender.clone(), sender_style));
        spans.push(Span::raw(format!("{close} ")));
    }
    spans.push(Span::styled(line.text.clone(), body_style));
    Line::from(spans)
}

fn draw_users(frame: &mut Frame, view: &View, area: Rect) {
    let names = view.roster_snapshot();
    let inner_height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = names
        .iter()
        .take(inner_height)
        .map(|n| Line::from(n.clone()))
        .collect();
    let title = format!(" {} users ", names.len());
    let users = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(users, area);
}

fn draw_input(frame: &mut Frame, input: &InputLine, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Input ")
        .title_bottom(" F10-Quit ");
    frame.render_widget(Paragraph::new(input.as_str()).block(block), area);

    let max_x = area.x + area.width.saturating_sub(2);
    let cursor_x = (area.x + 1 + input.width() as u16).min(max_x);
    frame.set_cursor_position((cursor_x, area.y + 1));
}
