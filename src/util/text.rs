use std::borrow::Cow;

/// Removes terminal control characters and ANSI escape sequences.
///
/// Feed titles and summaries are attacker-controlled and end up in chats or
/// terminals, so every text field of a [`Message`](crate::Message) goes
/// through here. Tab, newline and carriage return are kept. CSI sequences
/// (`ESC [ ... final`) and OSC sequences (`ESC ] ... BEL` or `ESC ] ... ESC \`)
/// are dropped whole; any other ESC is dropped on its own.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if is_stripped(c) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

fn is_stripped(c: char) -> bool {
    c == '\x1b' || c == '\x7f' || (c < '\x20' && !matches!(c, '\t' | '\n' | '\r'))
}

/// Strips control characters, collapses whitespace runs to one space and trims.
///
/// Used for single-line fields such as titles.
pub fn single_line(s: &str) -> String {
    strip_control_chars(s)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
