//! `KEY: value` extraction from step output

use regex::Regex;
use std::sync::LazyLock;

static OUTPUT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9_]*):\s*(.+)$").expect("output line regex is valid")
});

/// Parse `KEY: value` lines from a completion output
///
/// Keys are lowercased and values trimmed. Lines that do not match, or whose
/// value is blank, are ignored. Later lines win when a key repeats.
pub fn parse_output_values(output: &str) -> Vec<(String, String)> {
    let mut values: Vec<(String, String)> = Vec::new();

    for line in output.lines() {
        let Some(caps) = OUTPUT_LINE.captures(line.trim_end()) else {
            continue;
        };
        let value = caps[2].trim();
        if value.is_empty() {
            continue;
        }
        let key = caps[1].to_lowercase();
        match values.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => values.push((key, value.to_string())),
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value_lines() {
        let output = "Did the thing.\nSTATUS: done\nBRANCH_NAME:  feature/login \nnotes: ignored\n";
        let values = parse_output_values(output);
        assert_eq!(
            values,
            vec![
                ("status".to_string(), "done".to_string()),
                ("branch_name".to_string(), "feature/login".to_string()),
            ]
        );
    }

    #[test]
    fn test_ignores_indented_and_blank_values() {
        let output = "  STATUS: indented\nEMPTY:   \n2FA: no\nCHANGES: a: b\n";
        let values = parse_output_values(output);
        assert_eq!(values, vec![("changes".to_string(), "a: b".to_string())]);
    }

    #[test]
    fn test_repeated_key_keeps_last() {
        let values = parse_output_values("STATUS: retry\nSTATUS: done");
        assert_eq!(values, vec![("status".to_string(), "done".to_string())]);
    }

    #[test]
    fn test_crlf_lines() {
        let values = parse_output_values("STATUS: done\r\nREPO: x\r\n");
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].1, "done");
    }
}
