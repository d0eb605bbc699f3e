//! The flat `key=value` line codec for session metadata.

use std::collections::HashMap;

/// Encodes a metadata map as sorted `key=value` lines.
///
/// Keys are sorted so repeated encodes of the same map are byte-identical.
/// Newlines in values are escaped as `\n` to keep the format line-oriented;
/// everything else is verbatim. Values may contain `=`.
pub fn encode(map: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    let mut out = String::new();
    for key in keys {
        out.push_str(key);
        out.push('=');
        out.push_str(&escape(&map[key]));
        out.push('\n');
    }
    out
}

/// Decodes `key=value` lines into a map.
///
/// Lines without `=` and blank lines are skipped. Later duplicates win.
pub fn decode(data: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in data.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.to_string(), unescape(value));
        }
    }
    map
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_sorted_and_line_oriented() {
        let map = HashMap::from([
            ("status".to_string(), "working".to_string()),
            ("branch".to_string(), "feat/42".to_string()),
        ]);
        assert_eq!(encode(&map), "branch=feat/42\nstatus=working\n");
    }

    #[test]
    fn decode_skips_malformed_lines() {
        let map = decode("a=1\n\nnot a pair\nb=2\n");
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "1");
        assert_eq!(map["b"], "2");
    }

    #[test]
    fn values_may_contain_equals() {
        let map = decode("url=https://x/y?a=b\n");
        assert_eq!(map["url"], "https://x/y?a=b");
    }

    #[test]
    fn round_trip_with_newlines_and_backslashes() {
        let map = HashMap::from([
            ("note".to_string(), "line one\nline two".to_string()),
            ("path".to_string(), "C:\\work".to_string()),
        ]);
        assert_eq!(decode(&encode(&map)), map);
    }

    #[test]
    fn round_trip_is_stable() {
        let map = HashMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        let once = encode(&map);
        let twice = encode(&decode(&once));
        assert_eq!(once, twice);
    }
}
