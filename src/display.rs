//! Transcript and status output.
//!
//! Inbound tts/stt/llm messages carry conversation text; the controller
//! forwards them here and nothing else happens to them. The console
//! implementation deduplicates against the last printed line, since the
//! server repeats sentence text across tts and llm messages.

pub trait TranscriptDisplay: Send {
    /// Text spoken by the assistant (tts sentence_start, llm)
    fn assistant_text(&mut self, text: &str);
    /// Recognized user speech (stt)
    fn user_text(&mut self, text: &str);
    /// Transient status line (connection progress, playback state)
    fn status(&mut self, text: &str);
}

#[derive(Default)]
pub struct ConsoleDisplay {
    last_printed: String,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TranscriptDisplay for ConsoleDisplay {
    fn assistant_text(&mut self, text: &str) {
        if text.is_empty() || text == self.last_printed {
            return;
        }
        println!("assistant: {}", text);
        self.last_printed = text.to_string();
    }

    fn user_text(&mut self, text: &str) {
        if !text.is_empty() {
            println!("you: {}", text);
        }
    }

    fn status(&mut self, text: &str) {
        println!("[{}]", text);
        // A new status breaks the dedup chain deliberately.
        self.last_printed.clear();
    }
}
