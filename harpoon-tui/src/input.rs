//! Key handling for the input line and transcript navigation.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// The line being typed. Editing happens at the end only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InputLine {
    text: String,
}

impl InputLine {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Cursor column, in characters.
    pub fn width(&self) -> usize {
        self.text.chars().count()
    }

    pub fn push(&mut self, c: char) {
        self.text.push(c);
    }

    pub fn backspace(&mut self) {
        self.text.pop();
    }

    /// Take the line and clear the buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

/// What the terminal loop should do after a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    None,
    Redraw,
    Submit(String),
    ScrollUp(usize),
    ScrollDown(usize),
    PageUp,
    PageDown,
    ScrollToBottom,
    Quit,
}

pub fn handle_key(key: KeyEvent, input: &mut InputLine) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::F(10) => KeyAction::Quit,
        KeyCode::Char('c') if ctrl => KeyAction::Quit,
        KeyCode::Up => KeyAction::ScrollUp(1),
        KeyCode::Down => KeyAction::ScrollDown(1),
        KeyCode::PageUp => KeyAction::PageUp,
        KeyCode::PageDown => KeyAction::PageDown,
        KeyCode::End => KeyAction::ScrollToBottom,
        KeyCode::Enter => {
            if input.as_str().is_empty() {
                KeyAction::None
            } else {
                KeyAction::Submit(input.take())
            }
        }
        KeyCode::Backspace => {
            input.backspace();
            KeyAction::Redraw
        }
        KeyCode::Char(c) if !ctrl => {
            input.push(c);
            KeyAction::Redraw
        }
        _ => KeyAction::None,
    }
}
