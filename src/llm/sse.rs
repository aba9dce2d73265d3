/// Accumulates decoded text and yields the `data:` payload of every complete
/// server-sent event. Events are separated by a blank line; multiple `data:`
/// lines inside one event are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) -> Vec<String> {
        // Gemini uses \r\n line endings. A read may end between the \r and
        // the \n, so normalise the whole buffer rather than each piece.
        self.buffer.push_str(text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..end + 2).collect();
            if let Some(data) = event_data(&event) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Returns the payload of a trailing event that was never terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_data(&rest)
    }
}

fn event_data(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| {
            line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
