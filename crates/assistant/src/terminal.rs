//! Plain-text transcript rendering for the terminal binary.

use crate::chat::{ConversationSnapshot, Message, MessageId, Role};

const USER_LABEL: &str = "You";

#[derive(Debug, Clone, PartialEq, Eq)]
struct RenderedMessage {
    id: MessageId,
    text: String,
    is_error: bool,
}

/// Turns successive snapshots into the text that still needs printing.
///
/// Growing bubbles emit only their new suffix. A bubble whose text was replaced
/// (a fallback) is printed again in full on its own line.
#[derive(Debug, Clone)]
pub struct TranscriptRenderer {
    assistant_label: String,
    rendered: Vec<RenderedMessage>,
    line_open: bool,
}

impl TranscriptRenderer {
    pub fn new(assistant_label: impl Into<String>) -> Self {
        Self {
            assistant_label: assistant_label.into(),
            rendered: Vec::new(),
            line_open: false,
        }
    }

    pub fn render(&mut self, snapshot: &ConversationSnapshot) -> String {
        let mut out = String::new();

        for (index, message) in snapshot.messages.iter().enumerate() {
            let Some(seen) = self.rendered.get(index) else {
                self.close_line(&mut out);
                self.open_bubble(&mut out, message);
                self.rendered.push(RenderedMessage {
                    id: message.id,
                    text: message.text.clone(),
                    is_error: message.is_error,
                });
                continue;
            };

            if seen.id == message.id
                && seen.text == message.text
                && seen.is_error == message.is_error
            {
                continue;
            }

            let grows = seen.id == message.id
                && !message.is_error
                && message.text.starts_with(&seen.text);
            if grows {
                out.push_str(&message.text[seen.text.len()..]);
                self.line_open = true;
            } else {
                self.close_line(&mut out);
                self.open_bubble(&mut out, message);
            }
            self.rendered[index] = RenderedMessage {
                id: message.id,
                text: message.text.clone(),
                is_error: message.is_error,
            };
        }

        if !snapshot.is_loading {
            self.close_line(&mut out);
        }
        out
    }

    fn open_bubble(&mut self, out: &mut String, message: &Message) {
        let label = match message.role {
            Role::User => USER_LABEL,
            Role::Assistant => self.assistant_label.as_str(),
        };
        out.push_str(label);
        if message.is_error {
            out.push_str(" (offline)");
        }
        out.push_str(": ");
        out.push_str(&message.text);
        self.line_open = true;
    }

    fn close_line(&mut self, out: &mut String) {
        if self.line_open {
            out.push('\n');
            self.line_open = false;
        }
    }
}
