use std::collections::HashMap;

/// The replicated state machine. The consensus core hands it committed
/// commands in log order and forwards its output to the proposing client.
/// Each peer owns its machine exclusively; apply runs to completion inside
/// the handler that advanced the commit index.
pub trait StateMachine: Send {
    fn apply(&mut self, command: &[u8]) -> Vec<u8>;
}

/// Text-command key/value store: `set K V`, `get K`, `del K`. Small enough
/// to observe identical apply order across peers in tests.
#[derive(Default)]
pub struct KvMachine {
    data: HashMap<String, String>,
}

impl KvMachine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateMachine for KvMachine {
    fn apply(&mut self, command: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(command);
        let mut parts = text.splitn(3, ' ');

        let reply = match (parts.next(), parts.next(), parts.next()) {
            (Some("set"), Some(key), Some(value)) => {
                self.data.insert(key.to_string(), value.to_string());
                "ok".to_string()
            }
            (Some("get"), Some(key), None) => self
                .data
                .get(key)
                .cloned()
                .unwrap_or_else(|| "nil".to_string()),
            (Some("del"), Some(key), None) => {
                if self.data.remove(key).is_some() {
                    "ok".to_string()
                } else {
                    "nil".to_string()
                }
            }
            _ => format!("bad command: {}", text),
        };

        reply.into_bytes()
    }
}
