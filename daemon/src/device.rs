/// Human-readable device names pulled out of usbguard rule text.
use std::sync::OnceLock;

use regex::Regex;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"name "([^"]*)""#).expect("device name pattern is valid"))
}

/// Returns the quoted value after the first `name` token in `rule`, with the
/// first space inside it removed. usbguard often emits names with a stray
/// leading space (`name " SanDisk 3.2Gen1"`). Rules without a name yield "".
pub fn device_name(rule: &str) -> String {
    name_pattern()
        .captures(rule)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replacen(' ', "", 1))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_exactly_one_leading_space() {
        let rule = r#"block id dead:beef serial "0" name " Wireless " hash "x""#;
        assert_eq!(device_name(rule), "Wireless ");
    }

    #[test]
    fn only_first_space_is_removed() {
        let rule = r#"allow name "   Three" hash "y""#;
        assert_eq!(device_name(rule), "  Three");
    }

    #[test]
    fn inner_space_is_removed_when_there_is_no_leading_one() {
        // Matches the backend's observed quirk, not a cleanup rule.
        assert_eq!(device_name(r#"name "SanDisk 3.2Gen1""#), "SanDisk3.2Gen1");
    }

    #[test]
    fn first_match_wins() {
        let rule = r#"name "First" name "Second""#;
        assert_eq!(device_name(rule), "First");
    }

    #[test]
    fn missing_name_is_empty() {
        assert_eq!(device_name(r#"block id dead:beef serial "0""#), "");
        assert_eq!(device_name(""), "");
    }

    #[test]
    fn empty_quoted_name_is_empty() {
        assert_eq!(device_name(r#"name "" hash "z""#), "");
    }

    #[test]
    fn example_rule_from_backend() {
        let rule = r#"block id dead:beef serial "000000000" name "Wireless " hash "31337" parent-hash "foobar" via-port "2-1" with-interface ff:ff:ff with-connect-type "hotplug""#;
        assert_eq!(device_name(rule), "Wireless");
    }
}
