/// One framed server-sent message, before schema decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// `event:` field. `None` means the SSE default (`message`).
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

/// Incremental SSE framer. Chunks may split lines, fields or UTF-8 sequences
/// anywhere; complete messages come out in arrival order.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    pending: PendingMessage,
    last_event_id: Option<String>,
}

#[derive(Debug, Default)]
struct PendingMessage {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<RawMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        let mut start = 0;

        while let Some((line_end, next)) = find_line_end(&self.buffer[start..]) {
            let line = String::from_utf8_lossy(&self.buffer[start..start + line_end]).into_owned();
            start += next;

            if line.is_empty() {
                if let Some(message) = self.dispatch() {
                    messages.push(message);
                }
            } else {
                self.read_field(&line);
            }
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        messages
    }

    /// Id of the most recent message that carried one.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Drop whatever was not terminated by a blank line and return it as text.
    pub fn flush(&mut self) -> String {
        let mut leftover = String::new();
        let pending = std::mem::take(&mut self.pending);
        if let Some(event) = pending.event {
            leftover.push_str(&format!("event: {event}\n"));
        }
        if let Some(data) = pending.data {
            for line in data.split('\n') {
                leftover.push_str(&format!("data: {line}\n"));
            }
        }
        leftover.push_str(&String::from_utf8_lossy(&std::mem::take(&mut self.buffer)));
        leftover
    }

    fn read_field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => match &mut self.pending.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_string()),
            },
            "id" if !value.contains('\0') => self.pending.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<RawMessage> {
        let pending = std::mem::take(&mut self.pending);
        if let Some(id) = &pending.id {
            self.last_event_id = Some(id.clone());
        }
        if pending.event.is_none() && pending.data.is_none() {
            return None;
        }
        Some(RawMessage {
            event: pending.event.filter(|event| !event.is_empty()),
            data: pending.data.unwrap_or_default(),
            id: pending.id,
        })
    }
}

/// Length of the first line in `bytes` and the offset just past its terminator.
/// A trailing `\r` waits for the next chunk in case a `\n` follows.
fn find_line_end(bytes: &[u8]) -> Option<(usize, usize)> {
    let position = bytes.iter().position(|&b| b == b'\n' || b == b'\r')?;
    if bytes[position] == b'\n' {
        return Some((position, position + 1));
    }
    match bytes.get(position + 1) {
        Some(b'\n') => Some((position, position + 2)),
        Some(_) => Some((position, position + 1)),
        None => None,
    }
}
