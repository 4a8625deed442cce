//! `@username` mention parsing and rendering.

use std::collections::HashSet;
use std::fmt::Write as _;

use ammonia::Builder as AmmoniaBuilder;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

static MENTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@(\w+)").unwrap_or_else(|err| panic!("mention pattern must compile: {err}"))
});

static THREAD_SANITIZER: Lazy<AmmoniaBuilder<'static>> = Lazy::new(|| {
    let mut builder = AmmoniaBuilder::empty();
    builder
        .add_tags(&["a", "br"])
        .add_tag_attributes("a", &["href", "class"])
        .url_schemes(HashSet::from(["http", "https"]))
        .url_relative(ammonia::UrlRelative::PassThrough)
        .link_rel(None);
    builder
});

/// Every `@name` token in `text`, lowercased, de-duplicated in first-seen order.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|name| name.as_str().to_lowercase())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Whether `text` mentions `username` as a whole word, ignoring case.
pub fn mentions_username(text: &str, username: &str) -> bool {
    if username.is_empty() {
        return false;
    }
    let pattern = format!(r"@{}\b", regex::escape(username));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Render thread text as HTML: escaped, line breaks kept, and mentions of
/// `known` usernames linked to their profile.
pub fn render_text_html(text: &str, known: &HashSet<String>) -> String {
    let mut html = String::with_capacity(text.len() + 16);
    let mut last = 0;

    for caps in MENTION_PATTERN.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let lowered = name.as_str().to_lowercase();
        if !known.contains(&lowered) {
            continue;
        }
        push_escaped(&mut html, &text[last..whole.start()]);
        let _ = write!(
            html,
            "<a class=\"mention\" href=\"/profile/{lowered}\">@{}</a>",
            ammonia::clean_text(name.as_str())
        );
        last = whole.end();
    }
    push_escaped(&mut html, &text[last..]);

    THREAD_SANITIZER.clean(&html).to_string()
}

fn push_escaped(out: &mut String, segment: &str) {
    let mut lines = segment.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(&ammonia::clean_text(first));
    }
    for line in lines {
        out.push_str("<br>");
        out.push_str(&ammonia::clean_text(line));
    }
}
