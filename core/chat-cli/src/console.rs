//! Terminal input and output for the interactive session.
//!
//! In interactive mode the terminal is in raw mode: keys are read one at a
//! time through crossterm, and any output from either thread clears the input
//! line, prints, then redraws the prompt with whatever has been typed so far.
//! When stdin or stdout is not a terminal, plain lines are written instead.

use crate::render::Renderer;
use crossterm::cursor::MoveToColumn;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType};
use std::io::{self, Write};
use std::mem;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

// ═══════════════════════════════════════════════════════════════════════════════
// Line Editor
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorAction {
    Ignored,
    Redraw,
    Submit(String),
    Complete,
    Interrupt,
    EndOfInput,
}

/// Single-line input buffer edited at its end.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: String,
}

impl LineEditor {
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> EditorAction {
        if key.kind == KeyEventKind::Release {
            return EditorAction::Ignored;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char('c') if ctrl => EditorAction::Interrupt,
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    EditorAction::EndOfInput
                } else {
                    EditorAction::Ignored
                }
            }
            KeyCode::Char('u') if ctrl => {
                self.buffer.clear();
                EditorAction::Redraw
            }
            KeyCode::Char(c) if !ctrl => {
                self.buffer.push(c);
                EditorAction::Redraw
            }
            KeyCode::Backspace => {
                self.buffer.pop();
                EditorAction::Redraw
            }
            KeyCode::Esc => {
                self.buffer.clear();
                EditorAction::Redraw
            }
            KeyCode::Enter => EditorAction::Submit(mem::take(&mut self.buffer)),
            KeyCode::Tab => EditorAction::Complete,
            _ => EditorAction::Ignored,
        }
    }

    /// Applies `@mention` candidates for the last word.
    ///
    /// A single candidate replaces the word. Several candidates extend it to
    /// their common prefix and are returned so they can be listed.
    pub fn apply_completion(&mut self, candidates: &[String]) -> Option<Vec<String>> {
        match candidates {
            [] => None,
            [only] => {
                self.replace_last_word(&format!("{} ", only));
                None
            }
            many => {
                let prefix = common_prefix(many);
                if prefix.chars().count() > self.last_word().chars().count() {
                    self.replace_last_word(&prefix);
                }
                Some(many.to_vec())
            }
        }
    }

    fn last_word(&self) -> &str {
        self.buffer.rsplit(' ').next().unwrap_or("")
    }

    fn replace_last_word(&mut self, replacement: &str) {
        let keep = self.buffer.rfind(' ').map_or(0, |space| space + 1);
        self.buffer.truncate(keep);
        self.buffer.push_str(replacement);
    }
}

fn common_prefix(words: &[String]) -> String {
    let Some((first, rest)) = words.split_first() else {
        return String::new();
    };
    let mut prefix: Vec<char> = first.chars().collect();
    for word in rest {
        let shared = prefix
            .iter()
            .zip(word.chars())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(shared);
    }
    prefix.into_iter().collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Raw Mode
// ═══════════════════════════════════════════════════════════════════════════════

/// Keeps the terminal in raw mode until dropped.
pub struct RawMode;

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            debug!(error = %err, "Failed to leave raw mode");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Console
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct ConsoleState {
    prompt: String,
    editor: LineEditor,
    /// Line mode only: a prompt is on screen without a newline after it.
    prompt_open: bool,
}

/// Output shared by the foreground loop and the sync thread.
pub struct Console {
    renderer: Renderer,
    interactive: bool,
    state: Mutex<ConsoleState>,
}

impl Console {
    pub fn new(renderer: Renderer, interactive: bool) -> Self {
        Self {
            renderer,
            interactive,
            state: Mutex::new(ConsoleState::default()),
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the prompt used by the next redraw.
    pub fn set_prompt(&self, prompt: String) {
        self.state().prompt = prompt;
    }

    pub fn show_prompt(&self) {
        let mut state = self.state();
        let mut out = io::stdout().lock();
        let result = if self.interactive {
            redraw(&mut out, &state)
        } else {
            state.prompt_open = true;
            queue!(out, Print(&state.prompt)).and_then(|_| out.flush())
        };
        report(result);
    }

    pub fn println(&self, line: impl Into<String>) {
        self.print_lines(vec![line.into()]);
    }

    pub fn print_lines(&self, lines: Vec<String>) {
        let mut state = self.state();
        let mut out = io::stdout().lock();
        report(write_lines(&mut out, &mut state, self.interactive, &lines));
    }

    /// Line mode only: the user ended the prompt line by pressing Enter.
    pub fn line_entered(&self) {
        self.state().prompt_open = false;
    }

    pub fn buffer(&self) -> String {
        self.state().editor.buffer().to_string()
    }

    /// Feeds one key to the editor and echoes the result.
    pub fn handle_key(&self, key: KeyEvent) -> EditorAction {
        let mut state = self.state();
        let action = state.editor.handle_key(key);
        let mut out = io::stdout().lock();
        let result = match &action {
            EditorAction::Redraw => redraw(&mut out, &state),
            EditorAction::Submit(_) | EditorAction::Interrupt | EditorAction::EndOfInput => {
                queue!(out, Print("\r\n")).and_then(|_| out.flush())
            }
            _ => Ok(()),
        };
        report(result);
        action
    }

    pub fn complete(&self, candidates: &[String]) {
        let mut state = self.state();
        let listed = state.editor.apply_completion(candidates);
        let mut out = io::stdout().lock();
        let result = match listed {
            Some(names) => write_lines(&mut out, &mut state, self.interactive, &[names.join("  ")]),
            None => redraw(&mut out, &state),
        };
        report(result);
    }
}

fn newline(interactive: bool) -> &'static str {
    if interactive {
        "\r\n"
    } else {
        "\n"
    }
}

fn redraw(out: &mut impl Write, state: &ConsoleState) -> io::Result<()> {
    queue!(
        out,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(&state.prompt),
        Print(state.editor.buffer())
    )?;
    out.flush()
}

fn write_lines(
    out: &mut impl Write,
    state: &mut ConsoleState,
    interactive: bool,
    lines: &[String],
) -> io::Result<()> {
    let reopen = !interactive && state.prompt_open;
    if interactive {
        queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    } else if reopen {
        queue!(out, Print("\n"))?;
    }

    for line in lines {
        for part in line.split('\n') {
            queue!(out, Print(part), Print(newline(interactive)))?;
        }
    }

    if interactive || reopen {
        queue!(out, Print(&state.prompt), Print(state.editor.buffer()))?;
    }
    out.flush()
}

fn report(result: io::Result<()>) {
    if let Err(err) = result {
        debug!(error = %err, "Terminal write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn typed(text: &str) -> LineEditor {
        let mut editor = LineEditor::default();
        for c in text.chars() {
            editor.handle_key(key(KeyCode::Char(c)));
        }
        editor
    }

    #[test]
    fn typing_and_enter_submit_the_line() {
        let mut editor = typed("hi");
        assert_eq!(editor.handle_key(key(KeyCode::Backspace)), EditorAction::Redraw);
        assert_eq!(editor.buffer(), "h");
        assert_eq!(
            editor.handle_key(key(KeyCode::Enter)),
            EditorAction::Submit("h".to_string())
        );
        assert_eq!(editor.buffer(), "");
    }

    #[test]
    fn tab_key_requests_completion() {
        let mut editor = typed("hey @bo");
        assert_eq!(editor.handle_key(key(KeyCode::Tab)), EditorAction::Complete);
        assert_eq!(editor.buffer(), "hey @bo");
    }

    #[test]
    fn control_keys_interrupt_and_end_input() {
        let mut editor = typed("x");
        assert_eq!(editor.handle_key(ctrl('c')), EditorAction::Interrupt);
        assert_eq!(editor.handle_key(ctrl('d')), EditorAction::Ignored);
        assert_eq!(editor.handle_key(ctrl('u')), EditorAction::Redraw);
        assert_eq!(editor.handle_key(ctrl('d')), EditorAction::EndOfInput);
    }

    #[test]
    fn key_releases_are_ignored() {
        let mut editor = LineEditor::default();
        let mut release = key(KeyCode::Char('a'));
        release.kind = KeyEventKind::Release;
        assert_eq!(editor.handle_key(release), EditorAction::Ignored);
        assert_eq!(editor.buffer(), "");
    }

    #[test]
    fn single_candidate_replaces_last_word() {
        let mut editor = typed("hey @bo");
        assert_eq!(editor.apply_completion(&["@bob".to_string()]), None);
        assert_eq!(editor.buffer(), "hey @bob ");
    }

    #[test]
    fn several_candidates_extend_to_common_prefix() {
        let mut editor = typed("@b");
        let candidates = vec!["@bella".to_string(), "@belle".to_string()];
        assert_eq!(editor.apply_completion(&candidates), Some(candidates.clone()));
        assert_eq!(editor.buffer(), "@bell");

        let mut editor = typed("@b");
        let mixed = vec!["@Bob".to_string(), "@bella".to_string()];
        assert!(editor.apply_completion(&mixed).is_some());
        assert_eq!(editor.buffer(), "@b");
    }

    #[test]
    fn no_candidates_leave_buffer_alone() {
        let mut editor = typed("@zz");
        assert_eq!(editor.apply_completion(&[]), None);
        assert_eq!(editor.buffer(), "@zz");
    }

    #[test]
    fn interactive_output_clears_line_and_redraws_prompt() {
        let mut state = ConsoleState {
            prompt: "[Live:2] >>> ".to_string(),
            editor: typed("half typ"),
            prompt_open: false,
        };
        let mut out = Vec::new();
        write_lines(&mut out, &mut state, true, &["one\ntwo".to_string()]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("one\r\ntwo\r\n"));
        assert!(text.ends_with("[Live:2] >>> half typ"));
        assert!(text.contains("\u{1b}["));
    }

    #[test]
    fn line_mode_breaks_an_open_prompt_and_reprints_it() {
        let mut state = ConsoleState {
            prompt: ">>> ".to_string(),
            prompt_open: true,
            ..ConsoleState::default()
        };
        let mut out = Vec::new();
        write_lines(&mut out, &mut state, false, &["hello".to_string()]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\nhello\n>>> ");
        assert!(state.prompt_open);
    }

    #[test]
    fn line_mode_without_prompt_writes_bare_lines() {
        let mut state = ConsoleState {
            prompt: ">>> ".to_string(),
            ..ConsoleState::default()
        };
        let mut out = Vec::new();
        write_lines(&mut out, &mut state, false, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a\nb\n");
    }
}
