//! Raw sample normalization.
//!
//! Raw samples arrive as loosely structured JSON objects. Normalization merges
//! the optional `thinking`/`response` side-channel fields into the canonical
//! message list, then reduces each object to a typed [`NormalizedSample`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One content element of a chat message. Image payloads stay encoded (base64
/// or `data:` URI) until collation, where decoding failures are isolated per
/// sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    Image { image: String },
}

/// A chat message with an ordered content sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentItem>,
}

/// A structurally validated training sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub messages: Vec<Message>,
}

impl NormalizedSample {
    /// A sample is usable iff at least one message carries content.
    pub fn is_valid(&self) -> bool {
        self.messages.iter().any(|m| !m.content.is_empty())
    }
}

/// Merges top-level `thinking` and `response` fields into the message list as
/// a trailing assistant message. Samples without a message array (or without
/// side-channel fields) pass through untouched; structural validation drops
/// them later.
pub fn merge_reasoning_fields(sample: Value, use_thinking: bool) -> Value {
    let Some(obj) = sample.as_object() else {
        return sample;
    };
    let Some(messages) = obj.get("messages").and_then(Value::as_array) else {
        return sample;
    };

    let thinking = obj.get("thinking").and_then(Value::as_str);
    let response = obj.get("response").and_then(Value::as_str);
    if thinking.is_none() && response.is_none() {
        return sample;
    }

    let mut final_text = String::new();
    if use_thinking {
        if let Some(thinking) = thinking.filter(|t| !t.is_empty()) {
            final_text.push_str(&format!("<think>\n{thinking}\n</think>\n"));
        }
    }
    if let Some(response) = response.filter(|r| !r.is_empty()) {
        final_text.push_str(response);
    }
    if final_text.is_empty() {
        return sample;
    }

    let mut new_messages = messages.clone();
    new_messages.push(json!({
        "role": "assistant",
        "content": [{"type": "text", "text": final_text}],
    }));
    json!({ "messages": new_messages })
}

/// Reduces a raw JSON object to a [`NormalizedSample`], tolerating missing or
/// oddly shaped fields: messages without a content array are dropped, unknown
/// content item types are ignored, roles default to "user". Returns `None`
/// when the result fails structural validation.
pub fn normalize(sample: &Value) -> Option<NormalizedSample> {
    let messages = sample.get("messages")?.as_array()?;

    let mut normalized = Vec::new();
    for message in messages {
        let Some(content) = message.get("content").and_then(Value::as_array) else {
            continue;
        };
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("user")
            .to_string();

        let mut items = Vec::new();
        for item in content {
            match item.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = item
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    items.push(ContentItem::Text { text });
                }
                Some("image") => {
                    if let Some(image) = item.get("image").and_then(Value::as_str) {
                        items.push(ContentItem::Image { image: image.to_string() });
                    }
                }
                _ => {}
            }
        }

        if !items.is_empty() {
            normalized.push(Message { role, content: items });
        }
    }

    let sample = NormalizedSample { messages: normalized };
    sample.is_valid().then_some(sample)
}
