use serde::{Deserialize, Serialize};

/// Inbound frame from a connected listener. Every field is optional; a frame
/// carrying none of them is a no-op.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub ping: Option<bool>,
    pub enable: Option<String>,
    pub disable: Option<String>,
    pub name: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ServerMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl ServerMessage {
    pub fn pong() -> Self {
        Self {
            pong: Some(true),
            ..Default::default()
        }
    }

    pub fn success(value: bool) -> Self {
        Self {
            success: Some(value),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frames_match_the_wire_contract() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::pong()).unwrap(),
            r#"{"pong":true}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::success(true)).unwrap(),
            r#"{"success":true}"#
        );
    }

    #[test]
    fn client_frames_parse_with_any_subset_of_fields() {
        let enable: ClientMessage = serde_json::from_str(r#"{"enable":"build-failed"}"#).unwrap();
        assert_eq!(enable.enable.as_deref(), Some("build-failed"));
        assert!(enable.ping.is_none());
        assert!(enable.disable.is_none());

        let empty: ClientMessage = serde_json::from_str("{}").unwrap();
        assert!(empty.ping.is_none());
        assert!(empty.name.is_none());
    }
}
