use std::collections::BTreeMap;

use crate::agent::ToolStatus;

/// Locally assigned record key. Ids only grow, so map order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayRecord {
    User { content: String },
    Assistant { content: String },
    ToolCall { tool_name: String, arguments: String },
    ToolResult { tool_name: String, content: String, status: ToolStatus },
}

impl DisplayRecord {
    /// Assistant records that never received text are hidden.
    pub fn is_visible(&self) -> bool {
        match self {
            DisplayRecord::Assistant { content } => !content.trim().is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    records: BTreeMap<RecordId, DisplayRecord>,
    next_id: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: DisplayRecord) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        self.records.insert(id, record);
        id
    }

    /// Appends to the growable part of a record: assistant content or tool
    /// call arguments. Returns false for any other record or a missing id.
    pub fn append(&mut self, id: RecordId, text: &str) -> bool {
        match self.records.get_mut(&id) {
            Some(DisplayRecord::Assistant { content }) => {
                content.push_str(text);
                true
            }
            Some(DisplayRecord::ToolCall { arguments, .. }) => {
                arguments.push_str(text);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: RecordId) -> Option<DisplayRecord> {
        self.records.remove(&id)
    }

    pub fn get(&self, id: RecordId) -> Option<&DisplayRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &DisplayRecord)> {
        self.records.iter().map(|(id, r)| (*id, r))
    }

    pub fn visible(&self) -> Vec<&DisplayRecord> {
        self.records.values().filter(|r| r.is_visible()).collect()
    }
}

pub fn display_arguments(arguments: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(v) => serde_json::to_string_pretty(&v).unwrap_or_else(|_| arguments.to_string()),
        Err(_) => arguments.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_insertion_order_and_grow_in_place() {
        let mut t = Timeline::new();
        let user = t.push(DisplayRecord::User { content: "hi".into() });
        let a = t.push(DisplayRecord::Assistant { content: String::new() });
        assert!(user < a);
        assert!(t.append(a, "Hel"));
        assert!(t.append(a, "lo"));
        assert!(!t.append(user, "x"));
        assert_eq!(t.get(a), Some(&DisplayRecord::Assistant { content: "Hello".into() }));

        let ids: Vec<RecordId> = t.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![user, a]);
    }

    #[test]
    fn removed_ids_are_never_reused() {
        let mut t = Timeline::new();
        let a = t.push(DisplayRecord::Assistant { content: String::new() });
        t.remove(a);
        let b = t.push(DisplayRecord::Assistant { content: String::new() });
        assert_ne!(a, b);
        assert!(!t.append(a, "lost"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn empty_assistant_is_hidden_but_empty_tool_call_is_not() {
        let mut t = Timeline::new();
        t.push(DisplayRecord::Assistant { content: "  ".into() });
        t.push(DisplayRecord::ToolCall { tool_name: "search_documents".into(), arguments: String::new() });
        let visible = t.visible();
        assert_eq!(visible.len(), 1);
        assert!(matches!(visible[0], DisplayRecord::ToolCall { .. }));
    }

    #[test]
    fn arguments_are_pretty_printed_only_when_valid_json() {
        assert_eq!(display_arguments(r#"{"query":"x"}"#), "{\n  \"query\": \"x\"\n}");
        assert_eq!(display_arguments(r#"{"query":"x"#), r#"{"query":"x"#);
    }
}
