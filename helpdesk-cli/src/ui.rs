use helpdesk_shared::MessageRole;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::session::ReplyState;
use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Status line
            Constraint::Min(1),    // Chat area takes remaining space
            Constraint::Length(3), // Input box is always 3 lines
        ])
        .split(f.area());

    render_status(f, app, chunks[0]);
    render_chat(f, app, chunks[1]);
    render_input(f, app, chunks[2]);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let (text, color) = match app.session.state() {
        ReplyState::Idle | ReplyState::Complete => ("● Ready".to_string(), Color::Green),
        ReplyState::Waiting => ("● Waiting for reply...".to_string(), Color::Yellow),
        ReplyState::Streaming => ("● Receiving...".to_string(), Color::Yellow),
        ReplyState::Failed(reason) => (format!("● Error: {}", reason), Color::Red),
    };

    f.render_widget(
        Paragraph::new(Line::from(Span::styled(text, Style::default().fg(color)))),
        area,
    );
}

fn render_chat(f: &mut Frame, app: &App, area: Rect) {
    let mut all_lines: Vec<Line> = Vec::new();
    let streaming = app.session.is_busy();
    let messages = app.session.messages();

    for (i, msg) in messages.iter().enumerate() {
        let (prefix, style) = match msg.role {
            MessageRole::System => ("System", Style::default().fg(Color::Yellow)),
            MessageRole::User => ("You", Style::default().fg(Color::Cyan)),
            MessageRole::Assistant => ("Assistant", Style::default().fg(Color::Green)),
        };

        all_lines.push(Line::from(Span::styled(
            format!("{}:", prefix),
            style.add_modifier(Modifier::BOLD),
        )));

        let is_live = streaming && i + 1 == messages.len();
        let content = if is_live && msg.content.is_empty() {
            "●●●".to_string()
        } else if is_live {
            format!("{}▌", msg.content)
        } else {
            msg.content.clone()
        };

        for line in content.lines() {
            all_lines.push(Line::from(Span::styled(line.to_string(), style)));
        }
        all_lines.push(Line::from(""));
    }

    // Scroll offset counts lines up from the bottom.
    let total_lines = all_lines.len();
    let visible_height = area.height as usize;
    let start_line = if total_lines > visible_height {
        let max_scroll = total_lines - visible_height;
        max_scroll - app.scroll_offset.min(max_scroll)
    } else {
        0
    };
    let end_line = (start_line + visible_height).min(total_lines);

    let chat = Paragraph::new(all_lines[start_line..end_line].to_vec())
        .block(Block::default().borders(Borders::NONE))
        .wrap(Wrap { trim: false });

    f.render_widget(chat, area);
}

fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let (input_text, style) = if app.input.is_empty() {
        ("Type your message...", Style::default().fg(Color::DarkGray))
    } else {
        (app.input.as_str(), Style::default())
    };

    let title = if app.session.is_busy() {
        "Sending... (Ctrl-Q to quit)"
    } else {
        "Input (Enter to send, Ctrl-Q to quit, ↑↓ to scroll)"
    };

    let input = Paragraph::new(input_text)
        .style(style)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(Color::White)),
        )
        .wrap(Wrap { trim: true });

    f.render_widget(input, area);

    if !app.input.is_empty() {
        let cursor_chars = app.input[..app.cursor_position].chars().count() as u16;
        let cursor_x = area.x + cursor_chars + 1;
        let cursor_y = area.y + 1;
        f.set_cursor_position((cursor_x.min(area.x + area.width.saturating_sub(2)), cursor_y));
    }
}
