/// Streaming parser for the line-oriented output of `usbguard watch`.
///
/// The backend prints one header line per record followed by indented
/// `key=value` attribute lines:
///
/// ```text
/// [device] PresenceChanged: id=1337
///  event=Insert
///  target=block
///  device_rule=block id dead:beef serial "000000000" name "Wireless " ...
/// ```
///
/// A record is complete once its `device_rule` attribute arrives; only then is
/// it emitted.
use thiserror::Error;
use tracing::warn;

use crate::record::{PolicyChangeEvent, PresenceEvent, Record};

/// First line the backend prints after connecting to the daemon.
pub const HANDSHAKE: &str = "[IPC] Connected";

const DEVICE_MARKER: &str = "[device]";
const PRESENCE_LABEL: &str = "PresenceChanged:";
const POLICY_LABEL: &str = "PolicyChanged:";
const TERMINAL_KEY: &str = "device_rule";

/// The backend output no longer matches the expected framing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected handshake line: {0:?}")]
    Handshake(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("invalid device id in header line: {0:?}")]
    InvalidId(String),
    #[error("malformed attribute line: {0:?}")]
    MalformedAttribute(String),
}

/// Checks the first line of the stream.
pub fn expect_handshake(line: &str) -> Result<(), ProtocolError> {
    if line == HANDSHAKE {
        Ok(())
    } else {
        Err(ProtocolError::Handshake(line.to_string()))
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Presence(PresenceEvent),
    Policy(PolicyChangeEvent),
    /// A `[device]` record of a kind we do not model (e.g. `PolicyApplied:`).
    Skipping,
}

#[derive(Debug, Default)]
pub struct RecordParser {
    state: State,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one line (without its newline). Returns the completed record
    /// when `line` was the terminal attribute of a modelled record.
    pub fn feed(&mut self, line: &str) -> Result<Option<Record>, ProtocolError> {
        if line.starts_with(DEVICE_MARKER) {
            self.begin(line)?;
            return Ok(None);
        }

        let (key, value) = parse_attribute(line)?;
        let terminal = key == TERMINAL_KEY;

        match &mut self.state {
            State::Idle => {
                // Orphan attribute with no open record: tolerated.
                return Ok(None);
            }
            State::Skipping => {}
            State::Presence(event) => event.set(key, value),
            State::Policy(change) => change.set(key, value),
        }

        if !terminal {
            return Ok(None);
        }

        Ok(match std::mem::take(&mut self.state) {
            State::Presence(event) => Some(Record::Presence(event)),
            State::Policy(change) => Some(Record::PolicyChange(change)),
            State::Idle | State::Skipping => None,
        })
    }

    fn begin(&mut self, line: &str) -> Result<(), ProtocolError> {
        let mut parts = line.splitn(3, ' ');
        let _marker = parts.next();
        let (Some(label), Some(rest)) = (parts.next(), parts.next()) else {
            return Err(ProtocolError::MalformedHeader(line.to_string()));
        };
        let id_str = rest
            .strip_prefix("id=")
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        let id: u32 = id_str
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidId(line.to_string()))?;

        if !matches!(self.state, State::Idle) {
            warn!(id, "discarding incomplete record before new header");
        }

        self.state = match label {
            PRESENCE_LABEL => State::Presence(PresenceEvent::new(id)),
            POLICY_LABEL => State::Policy(PolicyChangeEvent::new(id)),
            _ => State::Skipping,
        };
        Ok(())
    }
}

/// Splits ` key=value` into its parts. The value keeps any further `=` and spaces.
fn parse_attribute(line: &str) -> Result<(&str, &str), ProtocolError> {
    line.split_once(' ')
        .and_then(|(_, pair)| pair.split_once('='))
        .ok_or_else(|| ProtocolError::MalformedAttribute(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PresenceKind;

    const RULE: &str = r#"block id dead:beef serial "000000000" name "Wireless " hash "31337" parent-hash "foobar" via-port "2-1" with-interface ff:ff:ff with-connect-type "hotplug""#;

    fn feed_all(parser: &mut RecordParser, lines: &[String]) -> Vec<Record> {
        lines
            .iter()
            .filter_map(|l| parser.feed(l).unwrap())
            .collect()
    }

    fn example_stream() -> Vec<String> {
        vec![
            "[device] PresenceChanged: id=1337".to_string(),
            " event=Insert".to_string(),
            " target=block".to_string(),
            format!(" device_rule={RULE}"),
            "[device] PolicyChanged: id=1337".to_string(),
            " target_old=block".to_string(),
            " target_new=allow".to_string(),
            format!(" device_rule={RULE}"),
            " rule_id=313373".to_string(),
        ]
    }

    // ── handshake ─────────────────────────────────────────────────────────────

    #[test]
    fn handshake_accepts_exact_literal() {
        assert!(expect_handshake("[IPC] Connected").is_ok());
    }

    #[test]
    fn handshake_rejects_anything_else() {
        let err = expect_handshake("[IPC] Disconnected").unwrap_err();
        assert_eq!(err, ProtocolError::Handshake("[IPC] Disconnected".into()));
        assert!(expect_handshake("[IPC] Connected ").is_err());
    }

    // ── records ───────────────────────────────────────────────────────────────

    #[test]
    fn example_stream_yields_one_of_each() {
        let mut parser = RecordParser::new();
        let records = feed_all(&mut parser, &example_stream());
        assert_eq!(records.len(), 2);

        assert_eq!(
            records[0],
            Record::Presence(PresenceEvent {
                id: 1337,
                kind: PresenceKind::Insert,
                target: "block".into(),
                device_rule: RULE.into(),
            })
        );
        assert_eq!(
            records[1],
            Record::PolicyChange(PolicyChangeEvent {
                id: 1337,
                target_old: "block".into(),
                target_new: "allow".into(),
                device_rule: RULE.into(),
            })
        );
    }

    #[test]
    fn emitted_count_matches_device_rule_lines() {
        let mut lines = Vec::new();
        for id in 0..5 {
            lines.push(format!("[device] PresenceChanged: id={id}"));
            lines.push(" event=Remove".into());
            lines.push(" target=allow".into());
            lines.push(format!(" device_rule=allow id {id}"));
            lines.push(format!("[device] PolicyChanged: id={id}"));
            lines.push(" target_old=allow".into());
            lines.push(" target_new=block".into());
            lines.push(format!(" device_rule=block id {id}"));
            lines.push(" rule_id=9".into());
        }
        let rules = lines.iter().filter(|l| l.starts_with(" device_rule=")).count();

        let mut parser = RecordParser::new();
        let records = feed_all(&mut parser, &lines);
        assert_eq!(records.len(), rules);
    }

    #[test]
    fn record_is_not_emitted_before_device_rule() {
        let mut parser = RecordParser::new();
        assert_eq!(parser.feed("[device] PresenceChanged: id=4").unwrap(), None);
        assert_eq!(parser.feed(" event=Insert").unwrap(), None);
        assert_eq!(parser.feed(" target=block").unwrap(), None);
        assert!(parser.feed(" device_rule=block").unwrap().is_some());
    }

    #[test]
    fn value_keeps_spaces_and_equals() {
        let mut parser = RecordParser::new();
        parser.feed("[device] PresenceChanged: id=1").unwrap();
        let record = parser.feed(" device_rule=a=b c = d").unwrap();
        let Some(Record::Presence(event)) = record else {
            panic!("expected presence record");
        };
        assert_eq!(event.device_rule, "a=b c = d");
    }

    #[test]
    fn attributes_after_terminal_are_ignored() {
        let mut parser = RecordParser::new();
        parser.feed("[device] PolicyChanged: id=2").unwrap();
        assert!(parser.feed(" device_rule=x").unwrap().is_some());
        assert_eq!(parser.feed(" rule_id=5").unwrap(), None);
        assert_eq!(parser.feed(" device_rule=y").unwrap(), None);
    }

    #[test]
    fn orphan_attribute_is_a_no_op() {
        let mut parser = RecordParser::new();
        assert_eq!(parser.feed(" event=Insert").unwrap(), None);
        assert_eq!(parser.feed(" device_rule=x").unwrap(), None);
    }

    #[test]
    fn unmodelled_record_kind_is_skipped() {
        let mut parser = RecordParser::new();
        parser.feed("[device] PolicyApplied: id=3").unwrap();
        assert_eq!(parser.feed(" target_new=allow").unwrap(), None);
        assert_eq!(parser.feed(" device_rule=allow id 1:2").unwrap(), None);
        // The next modelled record parses normally.
        parser.feed("[device] PresenceChanged: id=4").unwrap();
        assert!(parser.feed(" device_rule=allow").unwrap().is_some());
    }

    #[test]
    fn new_header_discards_incomplete_record() {
        let mut parser = RecordParser::new();
        parser.feed("[device] PresenceChanged: id=1").unwrap();
        parser.feed(" event=Insert").unwrap();
        parser.feed("[device] PolicyChanged: id=2").unwrap();
        let record = parser.feed(" device_rule=r").unwrap();
        assert!(matches!(record, Some(Record::PolicyChange(p)) if p.id == 2));
    }

    // ── protocol violations ───────────────────────────────────────────────────

    #[test]
    fn header_without_id_is_fatal() {
        let mut parser = RecordParser::new();
        let err = parser.feed("[device] PresenceChanged: 1337").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    }

    #[test]
    fn header_with_too_few_fields_is_fatal() {
        let mut parser = RecordParser::new();
        assert!(matches!(
            parser.feed("[device] PresenceChanged:").unwrap_err(),
            ProtocolError::MalformedHeader(_)
        ));
    }

    #[test]
    fn header_with_non_numeric_id_is_fatal() {
        let mut parser = RecordParser::new();
        assert!(matches!(
            parser.feed("[device] PresenceChanged: id=abc").unwrap_err(),
            ProtocolError::InvalidId(_)
        ));
    }

    #[test]
    fn malformed_header_emits_nothing_for_its_record() {
        let mut parser = RecordParser::new();
        assert!(parser.feed("[device] PresenceChanged: nope").is_err());
        // The broken header never opened a builder.
        assert_eq!(parser.feed(" device_rule=x").unwrap(), None);
    }

    #[test]
    fn attribute_without_equals_is_fatal() {
        let mut parser = RecordParser::new();
        parser.feed("[device] PresenceChanged: id=1").unwrap();
        assert!(matches!(
            parser.feed(" event").unwrap_err(),
            ProtocolError::MalformedAttribute(_)
        ));
    }

    #[test]
    fn line_without_space_is_fatal() {
        let mut parser = RecordParser::new();
        assert!(matches!(
            parser.feed("garbage").unwrap_err(),
            ProtocolError::MalformedAttribute(_)
        ));
        assert!(parser.feed("").is_err());
    }
}
