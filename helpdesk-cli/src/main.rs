mod client;
mod decoder;
mod session;
mod ui;

use anyhow::Result;
use client::{BackendClient, StreamEvent};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use session::ChatSession;
use std::io;
use tokio::sync::mpsc;
use tracing::{info, trace};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

pub struct App {
    session: ChatSession,
    input: String,
    /// Byte offset into `input`, always on a char boundary.
    cursor_position: usize,
    scroll_offset: usize,
}

impl App {
    fn new() -> Self {
        let session = ChatSession::new().with_observer(|messages| {
            if let Some(last) = messages.last() {
                trace!(chars = last.content.len(), "Reply updated");
            }
        });

        Self {
            session,
            input: String::new(),
            cursor_position: 0,
            scroll_offset: 0,
        }
    }

    /// Hand the input to the session. Returns the history to send if a new
    /// turn was started.
    fn take_submission(&mut self) -> Option<Vec<helpdesk_shared::ChatMessage>> {
        let history = self.session.submit(&self.input)?;
        self.input.clear();
        self.cursor_position = 0;
        self.scroll_to_bottom();
        Some(history)
    }

    fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk(bytes) => self.session.on_chunk(&bytes),
            StreamEvent::End => self.session.on_end(),
            StreamEvent::Failed(reason) => self.session.on_error(reason),
        }
        self.scroll_to_bottom();
    }

    fn move_cursor_left(&mut self) {
        if let Some(c) = self.input[..self.cursor_position].chars().next_back() {
            self.cursor_position -= c.len_utf8();
        }
    }

    fn move_cursor_right(&mut self) {
        if let Some(c) = self.input[self.cursor_position..].chars().next() {
            self.cursor_position += c.len_utf8();
        }
    }

    fn insert_char(&mut self, c: char) {
        self.input.insert(self.cursor_position, c);
        self.cursor_position += c.len_utf8();
    }

    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.move_cursor_left();
            self.input.remove(self.cursor_position);
        }
    }

    fn scroll_up(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(amount);
    }

    fn scroll_down(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
    }

    fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Log to a file instead of the terminal to avoid corrupting the TUI
    let log_file = std::fs::File::create("helpdesk-cli.log").ok();
    if let Some(file) = log_file {
        tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .init();
    }

    let server_url = std::env::var("HELPDESK_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    info!("Using server {}", server_url);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();
    let (client, mut stream_rx) = BackendClient::new(&server_url);

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(event) = event::read() {
            if ui_tx.send(event).is_err() {
                break;
            }
        }
    });

    let res = run_app(&mut terminal, &mut app, &client, &mut stream_rx, &mut ui_rx).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    client: &BackendClient,
    stream_rx: &mut mpsc::UnboundedReceiver<StreamEvent>,
    ui_rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        tokio::select! {
            // One redraw per received chunk.
            Some(event) = stream_rx.recv() => {
                app.apply(event);
            }
            Some(event) = ui_rx.recv() => {
                match event {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match key.code {
                            KeyCode::Char('q') | KeyCode::Char('c')
                                if key.modifiers.contains(event::KeyModifiers::CONTROL) =>
                            {
                                return Ok(());
                            }
                            KeyCode::Char(c) => app.insert_char(c),
                            KeyCode::Backspace => app.delete_char(),
                            KeyCode::Left => app.move_cursor_left(),
                            KeyCode::Right => app.move_cursor_right(),
                            KeyCode::Enter => {
                                if let Some(history) = app.take_submission() {
                                    client.send_message(history);
                                }
                            }
                            KeyCode::Up => app.scroll_up(1),
                            KeyCode::Down => app.scroll_down(1),
                            KeyCode::PageUp => app.scroll_up(10),
                            KeyCode::PageDown => app.scroll_down(10),
                            KeyCode::Home => app.cursor_position = 0,
                            KeyCode::End => app.cursor_position = app.input.len(),
                            _ => {}
                        }
                    }
                    Event::Mouse(mouse) => match mouse.kind {
                        event::MouseEventKind::ScrollUp => app.scroll_up(3),
                        event::MouseEventKind::ScrollDown => app.scroll_down(3),
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }
}
