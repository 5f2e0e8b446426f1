//! Minimal XML helpers for the Tigo Pesa wire format.
//!
//! Extraction is a first-match open/close tag scan, which is all the flat
//! `<COMMAND>` documents need. Callers only go through [`extract_tag`] and
//! [`XmlDocument`], so a full parser can replace this module in isolation.

use regex::Regex;

/// Text between the first `<tag>` and the following `</tag>`, trimmed and
/// unescaped. `None` when the tag is absent or empty.
pub fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(
        r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}\s*>",
        tag = regex::escape(tag)
    );
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(xml)?.get(1)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(unescape(value))
    }
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Builder for a flat, single-root XML document.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    root: String,
    fields: Vec<(String, String)>,
}

impl XmlDocument {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, tag: &str, value: impl ToString) -> Self {
        self.fields.push((tag.to_string(), value.to_string()));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        out.push_str(&format!("<{}>", self.root));
        for (tag, value) in &self.fields {
            out.push_str(&format!("<{tag}>{}</{tag}>", escape(value), tag = tag));
        }
        out.push_str(&format!("</{}>", self.root));
        out
    }
}
