//! Line wrapping for transcript entries.

use crate::event::ChatMessage;

/// Columns taken by the sender/trip prefix on a message's first line.
///
/// A trip code costs its length plus one separator; a visible sender costs
/// its length plus three (`<`, `>` and a space).
pub fn prefix_len(message: &ChatMessage) -> usize {
    let trip = message.trip().map_or(0, |t| t.chars().count() + 1);
    let sender = if message.kind.shows_sender() {
        message.sender.chars().count() + 3
    } else {
        0
    };
    trip + sender
}

/// Split `body` into display lines no wider than `width` columns.
///
/// Explicit newlines always break. The first line has `prefix` fewer columns
/// available than the rest. Trailing newlines produce no empty lines. A width
/// that cannot fit the prefix yields nothing.
pub fn wrap(body: &str, width: usize, prefix: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if width <= prefix {
        return lines;
    }
    let mut available = width - prefix;
    for segment in body.trim_end_matches('\n').split('\n') {
        let chars: Vec<char> = segment.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            available = width;
            continue;
        }
        let mut start = 0;
        while start < chars.len() {
            let end = (start + available).min(chars.len());
            lines.push(chars[start..end].iter().collect());
            start = end;
            available = width;
        }
    }
    lines
}
