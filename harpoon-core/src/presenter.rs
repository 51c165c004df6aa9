//! Presentation state fed by the UI-bound bus.
//!
//! [`Presenter`] is the dispatch target; it mutates a shared [`View`] that
//! the render loop reads. Every lock is held only for the structural
//! mutation or the copy of visible lines, never across rendering.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::bus::{BusSender, Dispatch};
use crate::event::{ChatMessage, MessageKind, RosterChange, ServiceEvent, UiEvent};
use crate::wrap;

/// Maximum number of messages kept in the transcript.
pub const BACKLOG_CAPACITY: usize = 800;

/// Wrap width used until the renderer reports a real one.
pub const DEFAULT_WRAP_WIDTH: usize = 80;

/// One transcript message and its wrapped lines for the last width asked.
#[derive(Debug, Clone)]
pub struct BacklogEntry {
    message: ChatMessage,
    prefix: usize,
    cached_width: Option<usize>,
    lines: Vec<String>,
}

impl BacklogEntry {
    pub fn new(message: ChatMessage) -> Self {
        let prefix = wrap::prefix_len(&message);
        Self {
            message,
            prefix,
            cached_width: None,
            lines: Vec::new(),
        }
    }

    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    /// Columns reserved on the first line for the sender and trip.
    pub fn prefix_len(&self) -> usize {
        self.prefix
    }

    /// Width the cached lines were computed for.
    pub fn cached_width(&self) -> Option<usize> {
        self.cached_width
    }

    /// Display lines at `width`, recomputed only when the width changed.
    pub fn lines(&mut self, width: usize) -> &[String] {
        if self.cached_width != Some(width) {
            self.lines = wrap::wrap(&self.message.body, width, self.prefix);
            self.cached_width = Some(width);
        }
        &self.lines
    }

    pub fn line_count(&mut self, width: usize) -> usize {
        self.lines(width).len()
    }
}

/// Newest-first bounded sequence of entries.
#[derive(Debug)]
pub struct Backlog {
    entries: VecDeque<BacklogEntry>,
    capacity: usize,
}

impl Backlog {
    /// A backlog holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(BACKLOG_CAPACITY)),
            capacity,
        }
    }

    /// Insert at the head, evicting the oldest entries beyond capacity.
    pub fn push(&mut self, message: ChatMessage) -> &mut BacklogEntry {
        self.entries.push_front(BacklogEntry::new(message));
        self.entries.truncate(self.capacity);
        &mut self.entries[0]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries newest first.
    pub fn iter(&self) -> impl Iterator<Item = &BacklogEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BacklogEntry> {
        self.entries.iter_mut()
    }

    pub fn newest(&self) -> Option<&BacklogEntry> {
        self.entries.front()
    }

    pub fn oldest(&self) -> Option<&BacklogEntry> {
        self.entries.back()
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new(BACKLOG_CAPACITY)
    }
}

/// Unique user names in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Roster {
    names: Vec<String>,
}

impl Roster {
    /// Replace every name; later duplicates are dropped.
    pub fn replace(&mut self, names: &[String]) {
        self.names.clear();
        for name in names {
            self.add(name);
        }
    }

    /// Append `name` unless present.
    pub fn add(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    /// Remove the first match. Absent names are ignored.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.names.iter().position(|n| n == name) {
            Some(idx) => {
                self.names.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Backlog plus the scroll offset, in lines above the live edge.
#[derive(Debug, Default)]
struct Transcript {
    backlog: Backlog,
    scroll: usize,
}

impl Transcript {
    fn total_lines(&mut self, width: usize) -> usize {
        self.backlog.iter_mut().map(|e| e.line_count(width)).sum()
    }
}

/// Sender details shown on the first line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineHeader {
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub trip: Option<String>,
    pub is_mod: bool,
}

/// One row of the chat pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    /// Present on the first line of each message only.
    pub header: Option<LineHeader>,
    pub text: String,
    pub kind: MessageKind,
}

/// State shared between the presenter's dispatch thread and the renderer.
#[derive(Debug)]
pub struct View {
    transcript: Mutex<Transcript>,
    roster: Mutex<Roster>,
    transcript_dirty: AtomicBool,
    roster_dirty: AtomicBool,
    wrap_width: AtomicUsize,
}

impl Default for View {
    fn default() -> Self {
        Self {
            transcript: Mutex::new(Transcript::default()),
            roster: Mutex::new(Roster::default()),
            transcript_dirty: AtomicBool::new(true),
            roster_dirty: AtomicBool::new(true),
            wrap_width: AtomicUsize::new(DEFAULT_WRAP_WIDTH),
        }
    }
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the transcript changed since the last call, and clears the flag.
    pub fn take_transcript_dirty(&self) -> bool {
        self.transcript_dirty.swap(false, Ordering::AcqRel)
    }

    pub fn take_roster_dirty(&self) -> bool {
        self.roster_dirty.swap(false, Ordering::AcqRel)
    }

    fn mark_transcript(&self) {
        self.transcript_dirty.store(true, Ordering::Release);
    }

    pub fn wrap_width(&self) -> usize {
        self.wrap_width.load(Ordering::Acquire)
    }

    /// Width available to message text; set by the renderer on resize.
    pub fn set_wrap_width(&self, width: usize) {
        if self.wrap_width.swap(width, Ordering::AcqRel) != width {
            self.mark_transcript();
        }
    }

    /// Add a message at the live edge.
    ///
    /// A viewer scrolled back keeps looking at the same lines: the offset
    /// grows by the number of lines the new message occupies, up to the
    /// oldest line still in the backlog.
    pub fn push_message(&self, message: ChatMessage) {
        let width = self.wrap_width();
        {
            let mut transcript = self.transcript.lock();
            let scrolled = transcript.scroll > 0;
            let added = transcript.backlog.push(message).line_count(width);
            if scrolled {
                // Eviction may have removed the lines being looked at.
                let limit = transcript.total_lines(width).saturating_sub(1);
                transcript.scroll = (transcript.scroll + added).min(limit);
            }
        }
        self.mark_transcript();
    }

    pub fn replace_roster(&self, names: &[String]) {
        self.roster.lock().replace(names);
        self.roster_dirty.store(true, Ordering::Release);
    }

    pub fn update_roster(&self, name: &str, change: RosterChange) {
        let changed = {
            let mut roster = self.roster.lock();
            match change {
                RosterChange::Add => roster.add(name),
                RosterChange::Remove => roster.remove(name),
            }
        };
        if changed {
            self.roster_dirty.store(true, Ordering::Release);
        }
    }

    pub fn roster_snapshot(&self) -> Vec<String> {
        self.roster.lock().names().to_vec()
    }

    pub fn backlog_len(&self) -> usize {
        self.transcript.lock().backlog.len()
    }

    /// Bodies of the stored messages, newest first.
    pub fn message_bodies(&self) -> Vec<String> {
        self.transcript
            .lock()
            .backlog
            .iter()
            .map(|e| e.message().body.clone())
            .collect()
    }

    pub fn scroll_offset(&self) -> usize {
        self.transcript.lock().scroll
    }

    /// Scroll toward older lines; stops at the first line of the oldest message.
    pub fn scroll_up(&self, lines: usize) {
        let width = self.wrap_width();
        {
            let mut transcript = self.transcript.lock();
            let limit = transcript.total_lines(width).saturating_sub(1);
            transcript.scroll = (transcript.scroll + lines).min(limit);
        }
        self.mark_transcript();
    }

    pub fn scroll_down(&self, lines: usize) {
        {
            let mut transcript = self.transcript.lock();
            transcript.scroll = transcript.scroll.saturating_sub(lines);
        }
        self.mark_transcript();
    }

    /// Jump back to the live edge.
    pub fn scroll_to_bottom(&self) {
        self.transcript.lock().scroll = 0;
        self.mark_transcript();
    }

    /// Copy the `rows` lines visible at the current scroll offset, oldest at
    /// the top. Fewer lines come back when the backlog is short.
    pub fn window(&self, rows: usize) -> Vec<DisplayLine> {
        let width = self.wrap_width();
        let mut transcript = self.transcript.lock();
        let wanted = transcript.scroll + rows;
        let skip = transcript.scroll;

        // Bottom-up: index 0 is the last line of the newest message.
        let mut bottom_up: Vec<DisplayLine> = Vec::with_capacity(wanted);
        for entry in transcript.backlog.iter_mut() {
            if bottom_up.len() >= wanted {
                break;
            }
            let message = entry.message.clone();
            let lines = entry.lines(width);
            for (idx, text) in lines.iter().enumerate().rev() {
                let header = (idx == 0).then(|| LineHeader {
                    timestamp: message.timestamp,
                    sender: message.sender.clone(),
                    trip: message.trip().map(str::to_string),
                    is_mod: message.is_mod(),
                });
                bottom_up.push(DisplayLine {
                    header,
                    text: text.clone(),
                    kind: message.kind,
                });
            }
        }
        drop(transcript);

        let mut visible: Vec<DisplayLine> = bottom_up.into_iter().skip(skip).take(rows).collect();
        visible.reverse();
        visible
    }
}

/// The UI-bound dispatch target.
pub struct Presenter {
    view: Arc<View>,
    session: BusSender<ServiceEvent>,
}

impl Presenter {
    pub fn new(view: Arc<View>, session: BusSender<ServiceEvent>) -> Self {
        Self { view, session }
    }

    pub fn view(&self) -> &Arc<View> {
        &self.view
    }
}

impl Dispatch<UiEvent> for Presenter {
    fn dispatch(&mut self, event: &UiEvent) {
        match event {
            UiEvent::Input(text) => self.session.submit(ServiceEvent::SendMessage(text.clone())),
            UiEvent::UserListReplace(names) => self.view.replace_roster(names),
            UiEvent::UserDelta { name, change } => self.view.update_roster(name, *change),
            UiEvent::ChatMessage(message) => self.view.push_message(message.clone()),
        }
    }
}
