//! Interactive chat session.
//!
//! On a terminal, keys are read in raw mode through crossterm so Tab can
//! complete `@mentions` and incoming messages can be printed above the line
//! being typed. Otherwise lines come from a dedicated stdin thread. Either
//! way the foreground loop notices the stop flag between inputs, and all
//! output goes through one [`Console`].

use crate::console::{Console, EditorAction, RawMode};
use crate::render::Renderer;
use chat_core::{decorate, ChatEngine, ChatError, Message, Notification, SyncListener};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::tty::IsTty;
use std::io::{self, BufRead};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const INPUT_POLL: Duration = Duration::from_millis(200);

const HELP: &str = "\
Commands:
  /help                  show this help
  /history               show recent messages
  /who                   list known users and how many are online
  /set_gemini_key <key>  share an assistant API key with the room
  /clear_gemini_key      remove the shared assistant key
  /quit                  leave the chat
Messages:
  add /silent to send only to the @users you mention
  type @prefix and press Tab to complete a username";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Help,
    History,
    Who,
    Quit,
    SetKey(String),
    ClearKey,
    Usage(&'static str),
    Send(String),
}

pub fn parse_input_line(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };
    match command.to_ascii_lowercase().as_str() {
        "/help" => Input::Help,
        "/history" => Input::History,
        "/who" => Input::Who,
        "/quit" | "/exit" => Input::Quit,
        "/clear_gemini_key" => Input::ClearKey,
        "/set_gemini_key" if rest.is_empty() => Input::Usage("/set_gemini_key <key>"),
        "/set_gemini_key" => Input::SetKey(rest.to_string()),
        _ => Input::Send(trimmed.to_string()),
    }
}

enum Flow {
    Continue,
    Quit,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sync Output
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects one sync batch and prints it as a block.
pub struct TerminalListener {
    engine: Arc<ChatEngine>,
    identity: String,
    console: Arc<Console>,
    notifications: bool,
    pending: Mutex<Vec<String>>,
}

impl TerminalListener {
    pub fn new(engine: Arc<ChatEngine>, identity: String, console: Arc<Console>) -> Self {
        let notifications = engine.config().ui.notifications;
        Self {
            engine,
            identity,
            console,
            notifications,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, line: String) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }

    fn renderer(&self) -> &Renderer {
        self.console.renderer()
    }

    fn refresh_prompt(&self) {
        self.console
            .set_prompt(self.renderer().prompt(self.engine.current_active_count()));
    }
}

impl SyncListener for TerminalListener {
    fn on_batch_start(&self, _visible: usize) {
        self.push(self.renderer().banner());
    }

    fn on_new_visible_message(&self, message: &Message) {
        self.push(self.renderer().message(&decorate(message, &self.identity)));
    }

    fn on_notification(&self, notification: &Notification) {
        if self.notifications {
            self.push(self.renderer().notification(notification));
        }
    }

    fn on_batch_end(&self) {
        let lines = mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if !lines.is_empty() {
            self.refresh_prompt();
            self.console.print_lines(lines);
        }
    }

    fn on_store_failure(&self, error: &ChatError) {
        self.console.println(
            self.renderer()
                .failure(&format!("Connection problem, retrying: {}", error)),
        );
    }

    fn on_recovered(&self) {
        self.refresh_prompt();
        self.console
            .println(self.renderer().success("Connection restored"));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Keyboard
// ═══════════════════════════════════════════════════════════════════════════════

enum Keyboard {
    /// Key events from a raw-mode terminal.
    Raw { _mode: RawMode },
    /// Whole lines from the stdin reader thread.
    Lines(Receiver<String>),
}

impl Keyboard {
    fn open() -> Result<Self, String> {
        if io::stdin().is_tty() && io::stdout().is_tty() {
            match RawMode::enable() {
                Ok(mode) => return Ok(Keyboard::Raw { _mode: mode }),
                Err(err) => warn!(error = %err, "Raw mode unavailable, reading whole lines"),
            }
        }
        spawn_stdin_reader().map(Keyboard::Lines)
    }

    fn is_raw(&self) -> bool {
        matches!(self, Keyboard::Raw { .. })
    }

    /// Next submitted line. `None` on end of input, interrupt, or stop.
    fn read_line(
        &self,
        console: &Console,
        stop: &AtomicBool,
        complete: impl Fn(&str) -> Vec<String>,
    ) -> Option<String> {
        match self {
            Keyboard::Lines(lines) => {
                let line = next_line(lines, stop);
                console.line_entered();
                line
            }
            Keyboard::Raw { .. } => loop {
                if stop.load(Ordering::SeqCst) {
                    return None;
                }
                match read_key_action(console) {
                    Ok(Some(EditorAction::Submit(line))) => return Some(line),
                    Ok(Some(EditorAction::Complete)) => {
                        console.complete(&complete(&console.buffer()));
                    }
                    Ok(Some(EditorAction::Interrupt)) => {
                        stop.store(true, Ordering::SeqCst);
                        return None;
                    }
                    Ok(Some(EditorAction::EndOfInput)) => return None,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "Failed to read terminal input");
                        return None;
                    }
                }
            },
        }
    }
}

fn read_key_action(console: &Console) -> io::Result<Option<EditorAction>> {
    if !event::poll(INPUT_POLL)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => Ok(Some(console.handle_key(key))),
        Event::Resize(..) => {
            console.show_prompt();
            Ok(None)
        }
        other => {
            debug!(event = ?other, "Ignoring terminal event");
            Ok(None)
        }
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>, String> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if sender.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to read stdin");
                        break;
                    }
                }
            }
        })
        .map_err(|err| format!("Failed to start input reader: {}", err))?;
    Ok(receiver)
}

/// Blocks for the next input line. `None` on EOF or once `stop` is set.
fn next_line(lines: &Receiver<String>, stop: &AtomicBool) -> Option<String> {
    loop {
        if stop.load(Ordering::SeqCst) {
            return None;
        }
        match lines.recv_timeout(INPUT_POLL) {
            Ok(line) => return Some(line),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Foreground Loop
// ═══════════════════════════════════════════════════════════════════════════════

pub fn run(
    mut engine: ChatEngine,
    username: Option<String>,
    stop: Arc<AtomicBool>,
) -> Result<(), String> {
    let keyboard = Keyboard::open()?;
    let console = Arc::new(Console::new(Renderer::detect(), keyboard.is_raw()));
    let renderer = *console.renderer();

    let Some(identity) = choose_identity(&mut engine, username, &keyboard, &stop, &console)?
    else {
        return Ok(());
    };
    console.println(renderer.success(&format!(
        "Joined as {}. Type /help for commands.",
        identity
    )));

    report_shared_key(&engine, &console);
    if let Err(err) = engine.initialize_cursor() {
        warn!(error = %err, "Failed to read ledger length at startup");
        console.println(
            renderer.info("Could not read the message count yet; catching up on the next sync."),
        );
    }
    print_history(&engine, &console);

    let engine = Arc::new(engine);
    let listener = Arc::new(TerminalListener::new(
        Arc::clone(&engine),
        identity.clone(),
        Arc::clone(&console),
    ));
    let sync = engine
        .start_sync(listener, Arc::clone(&stop))
        .map_err(String::from)?;

    prompt(&engine, &console);
    while let Some(line) = keyboard.read_line(&console, &stop, |partial| engine.complete(partial)) {
        match handle(&engine, &console, parse_input_line(&line)) {
            Flow::Continue => prompt(&engine, &console),
            Flow::Quit => break,
        }
    }

    stop.store(true, Ordering::SeqCst);
    sync.stop();
    console.set_prompt(String::new());
    console.println(renderer.info("Goodbye."));
    info!(identity = %identity, "Session ended");
    Ok(())
}

fn choose_identity(
    engine: &mut ChatEngine,
    username: Option<String>,
    keyboard: &Keyboard,
    stop: &AtomicBool,
    console: &Console,
) -> Result<Option<String>, String> {
    let mut candidate = username;
    loop {
        let name = match candidate.take() {
            Some(name) => name,
            None => {
                console.set_prompt("Enter your username: ".to_string());
                console.show_prompt();
                match keyboard.read_line(console, stop, |_| Vec::new()) {
                    Some(line) => line,
                    None => return Ok(None),
                }
            }
        };

        match engine.register(&name) {
            Ok(identity) => return Ok(Some(identity)),
            Err(ChatError::InvalidIdentity(reason)) => {
                console.println(console.renderer().failure(&reason));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn prompt(engine: &ChatEngine, console: &Console) {
    console.set_prompt(console.renderer().prompt(engine.current_active_count()));
    console.show_prompt();
}

fn handle(engine: &ChatEngine, console: &Console, input: Input) -> Flow {
    let renderer = console.renderer();
    match input {
        Input::Empty => {}
        Input::Help => console.println(HELP),
        Input::History => print_history(engine, console),
        Input::Who => {
            let names: Vec<String> = engine.known_identities().into_iter().collect();
            console.print_lines(vec![
                format!("Known users: {}", names.join(", ")),
                renderer.info(&format!("{} online", engine.current_active_count())),
            ]);
        }
        Input::Quit => return Flow::Quit,
        Input::SetKey(key) => match engine.set_shared_assistant_key(&key) {
            Ok(()) => console.println(renderer.success("Shared assistant key saved")),
            Err(err) => console.println(renderer.failure(&err.to_string())),
        },
        Input::ClearKey => match engine.clear_shared_assistant_key() {
            Ok(true) => console.println(renderer.success("Shared assistant key cleared")),
            Ok(false) => console.println(renderer.info("No shared assistant key was set")),
            Err(err) => console.println(renderer.failure(&err.to_string())),
        },
        Input::Usage(usage) => console.println(renderer.info(&format!("Usage: {}", usage))),
        Input::Send(text) => send(engine, console, &text),
    }
    Flow::Continue
}

fn send(engine: &ChatEngine, console: &Console, text: &str) {
    let renderer = console.renderer();
    match engine.send_message(text) {
        Ok(message) if message.silent => {
            console.println(renderer.success("Silent message sent"))
        }
        Ok(_) => console.println(renderer.success("Message sent")),
        Err(ChatError::InvalidMessage(reason)) => console.println(renderer.info(&reason)),
        Err(err) => {
            warn!(error = %err, "Send failed");
            console.println(renderer.failure("Failed to send message"));
        }
    }
}

pub fn print_history(engine: &ChatEngine, console: &Console) {
    let renderer = console.renderer();
    let identity = engine.identity().unwrap_or_default().to_string();
    match engine.history() {
        Ok(messages) if messages.is_empty() => {
            console.println(renderer.info("No messages yet."));
        }
        Ok(messages) => {
            let mut lines = Vec::with_capacity(messages.len() + 1);
            lines.push(renderer.info(&format!("--- Last {} message(s) ---", messages.len())));
            lines.extend(
                messages
                    .iter()
                    .map(|message| renderer.message(&decorate(message, &identity))),
            );
            console.print_lines(lines);
        }
        Err(err) => {
            warn!(error = %err, "History fetch failed");
            console.println(renderer.failure("Failed to load history"));
        }
    }
}

fn report_shared_key(engine: &ChatEngine, console: &Console) {
    let renderer = console.renderer();
    match engine.shared_assistant_key() {
        Ok(Some(_)) => console.println(renderer.info("Shared assistant key is configured.")),
        Ok(None) => console.println(
            renderer.info("No shared assistant key. Use /set_gemini_key <key> to add one."),
        ),
        Err(err) => warn!(error = %err, "Failed to read shared assistant key"),
    }
}
