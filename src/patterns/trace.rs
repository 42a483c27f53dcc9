use serde::Deserialize;
use tracing::debug;

/// A tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub name: String,
}

/// Message content: a plain string or a list of typed blocks
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessageContent {
    /// The text blocks, joined by blank lines. Other blocks are skipped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// One message of a session transcript, by role
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum SessionMessage {
    User {
        content: MessageContent,
    },
    Assistant {
        #[serde(default)]
        content: Option<MessageContent>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        name: String,
        #[serde(default)]
        content: Option<MessageContent>,
    },
    #[serde(other)]
    Other,
}

/// A parsed session transcript
#[derive(Debug, Clone, Default)]
pub struct SessionTrace {
    pub messages: Vec<SessionMessage>,
    /// Lines that were not valid messages
    pub skipped: usize,
}

impl SessionTrace {
    /// Parse one JSON message per line. Invalid lines are skipped and counted.
    pub fn from_jsonl(text: &str) -> Self {
        let mut trace = SessionTrace::default();

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<SessionMessage>(line) {
                Ok(message) => trace.messages.push(message),
                Err(e) => {
                    debug!(line = line_no + 1, error = %e, "skipping transcript line");
                    trace.skipped += 1;
                }
            }
        }

        trace
    }

    /// Names of the tools the assistant called, in order
    pub fn tool_sequence(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                SessionMessage::Assistant { tool_calls, .. } => Some(tool_calls),
                _ => None,
            })
            .flatten()
            .map(|call| call.name.as_str())
            .collect()
    }

    /// Text of the first user message that has any
    pub fn first_prompt(&self) -> Option<String> {
        self.messages.iter().find_map(|m| match m {
            SessionMessage::User { content } => {
                let text = content.text();
                (!text.trim().is_empty()).then_some(text)
            }
            _ => None,
        })
    }
}
