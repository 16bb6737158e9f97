use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CallerId {
    pub name: String,
    pub number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub language: String,
    pub caller: CallerId,
    pub connected: CallerId,
    #[serde(rename = "linkedid")]
    pub linkedid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AriEvent {
    StasisStart {
        channel: Channel,
        #[serde(default)]
        args: Vec<String>,
    },
    StasisEnd {
        channel: Channel,
    },
    #[serde(rename = "channelHangup")]
    ChannelHangup {
        channel: Channel,
    },
    ChannelLeftBridge {
        channel: Channel,
        bridge: Bridge,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bridge {
    pub id: String,
}

/// Response body of `POST /channels/externalMedia`: besides the new
/// channel's id, Asterisk reports the local RTP port it bound for this
/// leg under `channelvars.UNICASTRTP_LOCAL_PORT`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalMediaChannel {
    pub id: String,
    pub channelvars: ExternalMediaChannelVars,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalMediaChannelVars {
    #[serde(rename = "UNICASTRTP_LOCAL_PORT")]
    pub unicastrtp_local_port: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stasis_start() {
        let raw = r#"{
            "type": "StasisStart",
            "args": [],
            "channel": {
                "id": "call-A",
                "name": "PJSIP/trunk-00000001",
                "language": "en",
                "caller": {"name": "Alice", "number": "1001"},
                "connected": {"name": "Bob", "number": "1002"},
                "linkedid": "1753700000.1"
            }
        }"#;
        let event: AriEvent = serde_json::from_str(raw).expect("parse");
        match event {
            AriEvent::StasisStart { channel, .. } => assert_eq!(channel.id, "call-A"),
            other => panic!("expected StasisStart, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_parse_as_other() {
        let raw = r#"{"type": "PlaybackFinished"}"#;
        let event: AriEvent = serde_json::from_str(raw).expect("parse");
        assert!(matches!(event, AriEvent::Other));
    }

    #[test]
    fn parses_channel_hangup() {
        let raw = r#"{
            "type": "channelHangup",
            "channel": {
                "id": "call-A",
                "name": "PJSIP/trunk-00000001",
                "language": "en",
                "caller": {"name": "Alice", "number": "1001"},
                "connected": {"name": "Bob", "number": "1002"},
                "linkedid": "1753700000.1"
            }
        }"#;
        let event: AriEvent = serde_json::from_str(raw).expect("parse");
        match event {
            AriEvent::ChannelHangup { channel } => assert_eq!(channel.id, "call-A"),
            other => panic!("expected ChannelHangup, got {other:?}"),
        }
    }
}
