//! Point-in-time statistics snapshot, matching SPEC_FULL.md §6 exactly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-client view, keyed by `client_id` (`"{ip}:{port}"`) in [`Stats::clients_info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    pub address: String,
    pub name: Option<String>,
    pub connected_at: String,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub chat_partner: bool,
    pub chat_partner_name: Option<String>,
    pub groups: Vec<String>,
}

/// Full statistics snapshot, serializable as the JSON shape GUIs consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub connected_clients: usize,
    pub total_messages: usize,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub clients_info: HashMap<String, ClientStats>,
    pub groups: HashMap<String, Vec<String>>,
    pub chat_connections: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_serialize_to_expected_shape() {
        let mut clients_info = HashMap::new();
        clients_info.insert(
            "127.0.0.1:1".to_string(),
            ClientStats {
                address: "127.0.0.1:1".into(),
                name: Some("Alice".into()),
                connected_at: "2026-07-31T00:00:00".into(),
                messages_sent: 1,
                messages_received: 2,
                chat_partner: true,
                chat_partner_name: Some("Bob".into()),
                groups: vec!["room".into()],
            },
        );

        let stats = Stats {
            connected_clients: 1,
            total_messages: 3,
            messages_received: 2,
            messages_sent: 1,
            clients_info,
            groups: HashMap::from([("room".to_string(), vec!["Alice".to_string()])]),
            chat_connections: HashMap::from([("127.0.0.1:1".to_string(), "Bob".to_string())]),
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["connected_clients"], 1);
        assert_eq!(json["clients_info"]["127.0.0.1:1"]["name"], "Alice");
        assert_eq!(json["groups"]["room"][0], "Alice");
        assert_eq!(json["chat_connections"]["127.0.0.1:1"], "Bob");
    }
}
