use crate::attachment::{AttachmentError, PendingUpload};
use crate::conversation::{ConversationLog, ConversationTurn, Role, TurnState};
use crate::error::ClientError;
use crate::messages;
use crate::pipeline::{ChatSession, SendRejected, StreamUpdate, stream_turn};
use crate::segments::{self, Segment};
use crate::session::SessionToken;
use arboard::Clipboard;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
// Live reply area plus the input box.
const VIEWPORT_HEIGHT: u16 = 18;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn turn_line_specs(turn: &ConversationTurn) -> Vec<LineSpec> {
    let (label, color) = match turn.role() {
        Role::User => ("You:", Color::Blue),
        Role::Assistant => ("DietMate:", Color::Yellow),
    };
    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = Style::default().fg(color);
    let generating_style = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::ITALIC);
    let mut lines = vec![LineSpec::new(label, header_style)];

    if turn.is_error() {
        let alert_style = Style::default().fg(Color::Red).add_modifier(Modifier::BOLD);
        for line in turn.content().lines() {
            lines.push(LineSpec::new(format!("  {}", line), alert_style));
        }
        return lines;
    }

    for segment in segments::parse(turn.content(), turn.is_in_progress()) {
        match segment {
            Segment::Prose(text) => {
                for line in text.lines() {
                    lines.push(LineSpec::new(format!("  {}", line), body_style));
                }
            }
            Segment::Code {
                language,
                code,
                closed,
            } => {
                let frame_style = Style::default().fg(Color::DarkGray);
                let code_style = Style::default().fg(Color::Green);
                lines.push(LineSpec::new(format!("  ┌ {}", language), frame_style));
                for line in code.lines() {
                    lines.push(LineSpec::new(format!("  │ {}", line), code_style));
                }
                if closed {
                    lines.push(LineSpec::new("  └", frame_style));
                }
            }
        }
    }

    if turn.is_in_progress() {
        lines.push(LineSpec::new(
            format!("  {}", messages::GENERATING),
            generating_style,
        ));
    }
    lines
}

fn notice_line_specs(text: &str) -> Vec<LineSpec> {
    let style = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::ITALIC);
    text.trim_matches('\n')
        .lines()
        .map(|line| LineSpec::new(format!("ℹ {}", line), style))
        .collect()
}

fn to_text(specs: Vec<LineSpec>) -> Text<'static> {
    let lines = specs
        .into_iter()
        .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
        .collect::<Vec<_>>();
    Text::from(lines)
}

fn rendered_height(specs: &[LineSpec], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = specs
        .iter()
        .map(|spec| spec.text.chars().count().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

/// Picks the `argument`th code block (1-based, default 1) of the latest
/// completed reply. The error is the notice to show instead.
fn code_block_to_copy(log: &ConversationLog, argument: &str) -> Result<String, String> {
    let index = if argument.is_empty() {
        1
    } else {
        argument
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("Usage: /copy [n], got {}", argument))?
    };

    let reply = log
        .turns()
        .iter()
        .rev()
        .find(|turn| turn.role() == Role::Assistant && turn.state() == TurnState::Completed)
        .ok_or_else(|| "There is no reply to copy from yet.".to_string())?;

    let mut blocks = segments::code_blocks(reply.content());
    match blocks.len() {
        0 => Err("The last reply has no code blocks.".to_string()),
        count if index > count => Err(format!("The last reply has only {} code blocks.", count)),
        _ => Ok(blocks.swap_remove(index - 1)),
    }
}

fn copy_to_clipboard(text: String) -> Result<(), arboard::Error> {
    let mut clipboard = Clipboard::new()?;
    clipboard.set_text(text)
}

#[derive(Debug)]
pub enum UiEvent {
    Stream { epoch: u64, update: StreamUpdate },
    Session(Result<SessionToken, ClientError>),
    Attachment(Result<PendingUpload, AttachmentError>),
}

/// Multi-line editor for the input box. Cursor columns count characters,
/// not bytes.
struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let idx = byte_index(line, self.cursor_x);
        line.insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let idx = byte_index(line, self.cursor_x - 1);
            line.remove(idx);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let line = &mut self.lines[self.cursor_y];
        let idx = byte_index(line, self.cursor_x);
        let remaining = line.split_off(idx);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn home(&mut self) {
        self.cursor_x = 0;
    }

    fn end(&mut self) {
        self.cursor_x = self.line_len(self.cursor_y);
    }

    fn add_prefix(&mut self, prefix: char) {
        if self.lines[0].starts_with(prefix) {
            return;
        }
        self.lines[0].insert(0, prefix);
        if self.cursor_y == 0 {
            self.cursor_x += 1;
        }
    }

    fn remove_prefix(&mut self, prefix: char) {
        if !self.lines[0].starts_with(prefix) {
            return;
        }
        self.lines[0].remove(0);
        if self.cursor_y == 0 {
            self.cursor_x = self.cursor_x.saturating_sub(1);
        }
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn is_command(&self) -> bool {
        self.lines[0].starts_with('/')
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Type your message here...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

fn byte_index(line: &str, char_idx: usize) -> usize {
    line.char_indices()
        .nth(char_idx)
        .map(|(idx, _)| idx)
        .unwrap_or(line.len())
}

pub struct App {
    chat: ChatSession,
    input: InputBuffer,
    at_prefix: bool,
    should_quit: bool,
    sender: mpsc::UnboundedSender<UiEvent>,
    receiver: mpsc::UnboundedReceiver<UiEvent>,
    // Turns already written to the scrollback.
    flushed: usize,
    acquiring: bool,
}

impl App {
    pub fn new(chat: ChatSession) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            chat,
            input: InputBuffer::new(),
            at_prefix: false,
            should_quit: false,
            sender,
            receiver,
            flushed: 0,
            acquiring: false,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [live_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)])
                .areas(f.area());

        let live = match self.chat.log().in_progress() {
            Some(turn) => turn_line_specs(turn),
            None => notice_line_specs(&self.status_line()),
        };
        let height = rendered_height(&live, live_area.width);
        let offset = height.saturating_sub(live_area.height);
        let live_paragraph = Paragraph::new(to_text(live))
            .wrap(Wrap { trim: false })
            .scroll((offset, 0));
        f.render_widget(live_paragraph, live_area);

        let mut title = String::from(" Input (Enter to send, Esc to quit) ");
        if self.chat.is_generating() {
            title.push_str("[Generating...] ");
        }
        if self.at_prefix {
            title.push_str("[@] ");
        }
        if let Some(upload) = self.chat.pending_upload() {
            title.push_str(&format!("[file: {}] ", upload.name()));
        }

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width - 2);
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height - 2);
        f.set_cursor_position((x, y));
    }

    fn status_line(&self) -> String {
        match self.chat.session().current() {
            Some(_) => "Connected.".to_string(),
            None if self.acquiring => "Starting a session...".to_string(),
            None => "No session. Send a message or /reset to retry.".to_string(),
        }
    }

    fn insert_lines(&mut self, terminal: &mut TuiTerminal, specs: Vec<LineSpec>) -> UiResult<()> {
        let width = terminal.size()?.width;
        let height = rendered_height(&specs, width).saturating_add(1);
        let mut text = to_text(specs);
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })?;
        Ok(())
    }

    fn notice(&mut self, terminal: &mut TuiTerminal, text: &str) -> UiResult<()> {
        self.insert_lines(terminal, notice_line_specs(text))
    }

    /// Moves finished turns into the scrollback; the in-progress turn stays
    /// in the viewport until it ends.
    fn flush_turns(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        while let Some(turn) = self.chat.log().turns().get(self.flushed) {
            if turn.is_in_progress() {
                break;
            }
            let specs = turn_line_specs(turn);
            self.insert_lines(terminal, specs)?;
            self.flushed += 1;
        }
        Ok(())
    }

    fn request_session(&mut self) {
        self.acquiring = true;
        let client = self.chat.session().client().clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = client.fetch_session().await;
            let _ = sender.send(UiEvent::Session(result));
        });
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        while let Ok(event) = self.receiver.try_recv() {
            match event {
                UiEvent::Stream { epoch, update } => {
                    self.chat.apply(epoch, update);
                }
                UiEvent::Session(result) => {
                    self.acquiring = false;
                    let settled = self.chat.session_mut().settle(result).map(|_| ());
                    if let Err(err) = settled {
                        self.notice(terminal, &format!("Could not start a session: {}", err))?;
                    }
                }
                UiEvent::Attachment(Ok(upload)) => {
                    let name = upload.name().to_string();
                    match self.chat.attach(upload) {
                        Ok(()) => self.notice(terminal, &format!("Attached {}", name))?,
                        Err(err) => {
                            self.notice(terminal, &format!("Cannot attach {}: {}", name, err))?
                        }
                    }
                }
                UiEvent::Attachment(Err(err)) => {
                    self.notice(terminal, &err.to_string())?;
                }
            }
        }
        self.flush_turns(terminal)?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    return Ok(true);
                }
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
                {
                    self.should_quit = true;
                    return Ok(false);
                }
                if key.code == KeyCode::Esc {
                    self.should_quit = true;
                    return Ok(false);
                }
                // The input box is disabled while a reply is being generated.
                if self.chat.is_generating() {
                    return Ok(true);
                }

                match key.code {
                    KeyCode::Char('t') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        self.at_prefix = !self.at_prefix;
                        if self.at_prefix {
                            if !self.input.is_empty() && !self.input.is_command() {
                                self.input.add_prefix('@');
                            }
                        } else {
                            self.input.remove_prefix('@');
                        }
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else if self.can_submit() {
                            self.submit(terminal)?;
                        }
                    }
                    KeyCode::Char(c) => {
                        self.type_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.home();
                    }
                    KeyCode::End => {
                        self.input.end();
                    }
                    _ => {}
                }
            }
        }

        Ok(!self.should_quit)
    }

    // A file may be sent on its own, without a prompt.
    fn can_submit(&self) -> bool {
        !self.input.is_empty() || self.chat.pending_upload().is_some()
    }

    fn type_char(&mut self, c: char) {
        // Slash commands never get the `@` prefix.
        if self.at_prefix && self.input.is_empty() && c != '@' && c != '/' {
            self.input.insert_char('@');
        }
        self.input.insert_char(c);
    }

    fn submit(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let text = self.input.to_string();
        let trimmed = text.trim();

        if let Some(command) = trimmed.strip_prefix('/') {
            let command = command.to_string();
            self.input.clear();
            return self.run_command(terminal, &command);
        }

        match self.chat.begin_turn(trimmed) {
            Ok(ticket) => {
                self.input.clear();
                let epoch = ticket.epoch();
                let sender = self.sender.clone();
                tokio::spawn(stream_turn(ticket.into_request(), move |update| {
                    let _ = sender.send(UiEvent::Stream { epoch, update });
                }));
                self.flush_turns(terminal)?;
            }
            Err(SendRejected::Empty) | Err(SendRejected::Busy) => {}
            Err(SendRejected::NoSession) => {
                self.notice(terminal, messages::NO_SESSION)?;
                if !self.acquiring {
                    self.request_session();
                }
            }
            Err(err @ SendRejected::Log(_)) => {
                debug!(error = %err, "turn rejected");
                self.notice(terminal, &err.to_string())?;
            }
        }
        Ok(())
    }

    fn run_command(&mut self, terminal: &mut TuiTerminal, command: &str) -> UiResult<()> {
        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        match name {
            "quit" | "exit" => {
                self.should_quit = true;
            }
            "help" => {
                self.notice(terminal, messages::HELP_TEXT)?;
            }
            "reset" => {
                self.chat.clear();
                self.flushed = 0;
                self.notice(terminal, messages::CONVERSATION_RESET)?;
                self.request_session();
            }
            "attach" if !argument.is_empty() => {
                let path = PathBuf::from(argument);
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    let result = PendingUpload::load(&path).await;
                    let _ = sender.send(UiEvent::Attachment(result));
                });
            }
            "attach" => {
                self.notice(terminal, "Usage: /attach <path>")?;
            }
            "copy" => match code_block_to_copy(self.chat.log(), argument) {
                Ok(code) => {
                    let lines = code.lines().count();
                    match copy_to_clipboard(code) {
                        Ok(()) => {
                            let message = format!("Copied {} lines to the clipboard.", lines);
                            self.notice(terminal, &message)?;
                        }
                        Err(err) => {
                            warn!(error = %err, "clipboard unavailable");
                            self.notice(terminal, &format!("Failed to copy: {}", err))?;
                        }
                    }
                }
                Err(message) => self.notice(terminal, &message)?,
            },
            "detach" => match self.chat.detach() {
                Some(upload) => self.notice(terminal, &format!("Removed {}", upload.name()))?,
                None => self.notice(terminal, "No file attached.")?,
            },
            other => {
                self.notice(terminal, &format!("Unknown command: /{}", other))?;
            }
        }
        Ok(())
    }
}

pub fn run_tui(chat: ChatSession) -> UiResult<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(VIEWPORT_HEIGHT),
        },
    )?;

    let mut app = App::new(chat);

    let _guard = TerminalGuard::new();

    app.notice(&mut terminal, messages::WELCOME_TEXT)?;
    app.request_session();
    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}
