//! Terminal driver: raw mode, the render loop and keyboard input.
//!
//! Runs on the main thread. It reads the shared [`View`] only through its
//! snapshot methods and produces input through the orchestrator, so nothing
//! here blocks a dispatch thread.

use std::io::{self, Stdout, stdout};
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use harpoon_core::CancellationToken;
use harpoon_core::orchestrator::Orchestrator;
use harpoon_core::presenter::View;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use crate::input::{self, InputLine, KeyAction};
use crate::ui;

/// How long to wait for a key before checking for new state to draw.
const TICK: Duration = Duration::from_millis(100);

/// Owns the terminal for the lifetime of the UI; restores it on drop.
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
        Ok(Self { terminal })
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        restore();
        let _ = self.terminal.show_cursor();
    }
}

/// Leave raw mode and the alternate screen. Safe to call more than once.
pub fn restore() {
    let _ = disable_raw_mode();
    let _ = stdout().execute(LeaveAlternateScreen);
}

/// Draw and handle keys until the user quits or `shutdown` fires.
pub fn run(orchestrator: &Orchestrator, shutdown: &CancellationToken, channel: &str) -> anyhow::Result<()> {
    let mut tui = Tui::enter()?;
    let view = orchestrator.view();
    let mut input = InputLine::default();
    let mut redraw = true;

    while !shutdown.is_cancelled() {
        let transcript = view.take_transcript_dirty();
        let roster = view.take_roster_dirty();
        if redraw || transcript || roster {
            tui.terminal
                .draw(|frame| ui::draw(frame, &view, &input, channel))?;
            redraw = false;
        }

        if !event::poll(TICK)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) => {
                let page = ui::chat_rows(tui.terminal.size()?.height).max(1);
                match input::handle_key(key, &mut input) {
                    KeyAction::Quit => {
                        tracing::info!("quit requested");
                        shutdown.cancel();
                    }
                    KeyAction::Submit(text) => {
                        orchestrator.submit_input(text);
                        redraw = true;
                    }
                    action => redraw |= navigate(&view, action, page),
                }
            }
            Event::Resize(..) => redraw = true,
            _ => {}
        }
    }
    Ok(())
}

/// Apply a scroll or redraw action to the view. Returns whether to redraw.
fn navigate(view: &View, action: KeyAction, page: usize) -> bool {
    match action {
        KeyAction::ScrollUp(lines) => view.scroll_up(lines),
        KeyAction::ScrollDown(lines) => view.scroll_down(lines),
        KeyAction::PageUp => view.scroll_up(page),
        KeyAction::PageDown => view.scroll_down(page),
        KeyAction::ScrollToBottom => view.scroll_to_bottom(),
        KeyAction::Redraw => return true,
        KeyAction::None | KeyAction::Quit | KeyAction::Submit(_) => return false,
    }
    false
}
