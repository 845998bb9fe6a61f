// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal frontmatter parsing for `format=parsed` reads.
//!
//! Recognises a leading `---` block of scalar `key: value` lines (strings,
//! quoted strings, booleans, integers, floats, and `[a, b]` string lists).
//! Anything else stays a string.  Documents without a well-formed block
//! return no frontmatter and the content untouched.

use serde_json::Value;
use std::collections::BTreeMap;

/// Split `content` into an optional frontmatter map and the body.
pub fn parse_frontmatter(content: &str) -> (Option<BTreeMap<String, Value>>, &str) {
    let Some(rest) = content.strip_prefix("---\n").or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let Some(end) = find_closing_fence(rest) else {
        return (None, content);
    };
    let (block, body) = rest.split_at(end.block_len);
    let body = &body[end.fence_len..];

    let mut map = BTreeMap::new();
    for line in block.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            // A malformed line voids the whole block.
            return (None, content);
        };
        let key = key.trim();
        if key.is_empty() {
            return (None, content);
        }
        map.insert(key.to_string(), parse_scalar(value.trim()));
    }

    (Some(map), body)
}

struct Fence {
    block_len: usize,
    fence_len: usize,
}

fn find_closing_fence(rest: &str) -> Option<Fence> {
    let mut offset = 0;
    // split_inclusive also yields a final fence with no trailing newline.
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(Fence {
                block_len: offset,
                fence_len: line.len(),
            });
        }
        offset += line.len();
    }
    None
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    if (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
        || (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
    {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    if raw.starts_with('[') && raw.ends_with(']') {
        let items: Vec<Value> = raw[1..raw.len() - 1]
            .split(',')
            .map(|item| parse_scalar(item.trim()))
            .filter(|v| !matches!(v, Value::String(s) if s.is_empty()))
            .collect();
        return Value::Array(items);
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>()
        && let Some(number) = serde_json::Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_document_has_no_frontmatter() {
        let (fm, body) = parse_frontmatter("# Title\n\nBody.");
        assert!(fm.is_none());
        assert_eq!(body, "# Title\n\nBody.");
    }

    #[test]
    fn scalar_block() {
        let doc = "---\ntitle: Hello\ndraft: true\nweight: 3\n---\n# Body\n";
        let (fm, body) = parse_frontmatter(doc);
        let fm = fm.unwrap();
        assert_eq!(fm["title"], json!("Hello"));
        assert_eq!(fm["draft"], json!(true));
        assert_eq!(fm["weight"], json!(3));
        assert_eq!(body, "# Body\n");
    }

    #[test]
    fn quoted_strings_and_lists() {
        let doc = "---\nname: \"a: b\"\ntags: [one, two]\n---\nx";
        let (fm, body) = parse_frontmatter(doc);
        let fm = fm.unwrap();
        assert_eq!(fm["name"], json!("a: b"));
        assert_eq!(fm["tags"], json!(["one", "two"]));
        assert_eq!(body, "x");
    }

    #[test]
    fn unclosed_fence_is_not_frontmatter() {
        let doc = "---\ntitle: Hello\nno closing fence";
        let (fm, body) = parse_frontmatter(doc);
        assert!(fm.is_none());
        assert_eq!(body, doc);
    }

    #[test]
    fn malformed_line_voids_block() {
        let doc = "---\njust some text\n---\nbody";
        let (fm, body) = parse_frontmatter(doc);
        assert!(fm.is_none());
        assert_eq!(body, doc);
    }

    #[test]
    fn empty_block_is_empty_map() {
        let (fm, body) = parse_frontmatter("---\n---\nbody");
        assert_eq!(fm.unwrap().len(), 0);
        assert_eq!(body, "body");
    }
}
