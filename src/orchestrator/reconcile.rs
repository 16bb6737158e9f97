use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn other(self) -> Direction {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    Snoop,
    ExtMedia,
}

pub fn snoop_id(call_id: &str, direction: Direction) -> String {
    format!("snoop-{direction}-{call_id}")
}

pub fn ext_media_id(call_id: &str, direction: Direction) -> String {
    format!("ext-media-{direction}-{call_id}")
}

pub fn bridge_id(call_id: &str, direction: Direction) -> String {
    format!("bridge-{direction}-{call_id}")
}

/// Anchored-prefix parse of an auxiliary channel id, resolving the Open
/// Question left by the distilled spec: direction is always the segment
/// immediately after the kind prefix, never a free substring search, so a
/// `call_id` that itself contains "in" or "out" cannot be misparsed.
pub fn parse_auxiliary_id(id: &str) -> Option<(AuxKind, Direction, &str)> {
    for (prefix, kind) in [("snoop-", AuxKind::Snoop), ("ext-media-", AuxKind::ExtMedia)] {
        if let Some(rest) = id.strip_prefix(prefix) {
            if let Some(call_id) = rest.strip_prefix("in-") {
                return Some((kind, Direction::In, call_id));
            }
            if let Some(call_id) = rest.strip_prefix("out-") {
                return Some((kind, Direction::Out, call_id));
            }
        }
    }
    None
}

/// True when the PBX reported the two external-media local RTP ports
/// swapped relative to direction: the "in" stream's bound remote port
/// equals the advertised "out" source port.
pub fn ports_need_swap(stream_in_remote_port: u16, source_port_out: u16) -> bool {
    stream_in_remote_port == source_port_out
}

/// Best-effort decimal-prefix parse of a PBX `linkedid`
/// (`<epoch>.<sequence>`) into the call start epoch.
pub fn call_start_epoch(linkedid: &str) -> Option<f64> {
    linkedid.split('.').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snoop_in_and_out() {
        assert_eq!(
            parse_auxiliary_id("snoop-in-call-A"),
            Some((AuxKind::Snoop, Direction::In, "call-A"))
        );
        assert_eq!(
            parse_auxiliary_id("snoop-out-call-A"),
            Some((AuxKind::Snoop, Direction::Out, "call-A"))
        );
    }

    #[test]
    fn parses_ext_media_in_and_out() {
        assert_eq!(
            parse_auxiliary_id("ext-media-in-call-A"),
            Some((AuxKind::ExtMedia, Direction::In, "call-A"))
        );
    }

    #[test]
    fn call_id_containing_in_and_out_is_not_misparsed() {
        // The call id itself contains both "in" and "out" as substrings,
        // but the anchored parse only looks at the segment right after
        // the kind prefix, so this must not be confused for a direction
        // token embedded deeper in the id.
        let id = "snoop-in-PJSIP/trunk-outbound-00000001";
        let (kind, dir, call_id) = parse_auxiliary_id(id).expect("should parse");
        assert_eq!(kind, AuxKind::Snoop);
        assert_eq!(dir, Direction::In);
        assert_eq!(call_id, "PJSIP/trunk-outbound-00000001");
    }

    #[test]
    fn non_auxiliary_id_does_not_parse() {
        assert_eq!(parse_auxiliary_id("PJSIP/trunk-00000001"), None);
    }

    #[test]
    fn port_reconciliation_swaps_when_pbx_ordering_is_reversed() {
        assert!(ports_need_swap(20002, 20002));
        assert!(!ports_need_swap(20000, 20002));
    }

    #[test]
    fn call_start_epoch_parses_decimal_prefix() {
        assert_eq!(call_start_epoch("1753700000.1"), Some(1753700000.0));
        assert_eq!(call_start_epoch("not-a-number"), None);
    }
}
