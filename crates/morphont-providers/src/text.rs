//! Small text helpers for provider payloads and model replies.

use morphont_core::CollabError;
use serde_json::Value;

const ELLIPSIS: &str = "...";

/// Collapse runs of whitespace to single spaces.
pub fn collapse_whitespace(text: &str) -> String {
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace, then cut to at most `width` characters at a word
/// boundary, ending with `...` when anything was dropped.
pub fn shorten(text: &str, width: usize) -> String {
  let collapsed = collapse_whitespace(text);
  if collapsed.chars().count() <= width {
    return collapsed;
  }

  let budget = width.saturating_sub(ELLIPSIS.len());
  let mut out = String::new();
  let mut used = 0;
  for word in collapsed.split(' ') {
    let len = word.chars().count();
    let needed = if used == 0 { len } else { len + 1 };
    if used + needed > budget {
      break;
    }
    if used > 0 {
      out.push(' ');
    }
    out.push_str(word);
    used += needed;
  }

  if out.is_empty() {
    out = collapsed.chars().take(budget).collect();
  }
  out.push_str(ELLIPSIS);
  out
}

/// Drop `<...>` markup, keeping the text between tags.
pub fn strip_tags(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut in_tag = false;
  for c in text.chars() {
    match c {
      '<' => in_tag = true,
      '>' if in_tag => {
        in_tag = false;
        out.push(' ');
      }
      _ if !in_tag => out.push(c),
      _ => {}
    }
  }
  collapse_whitespace(&out)
}

/// Parse a model reply as JSON.
///
/// Accepts a bare document, one wrapped in a Markdown code fence, or one
/// embedded in surrounding prose (the outermost `[...]` or `{...}` span).
/// Anything else is [`CollabError::Malformed`].
pub fn json_payload(reply: &str) -> Result<Value, CollabError> {
  let trimmed = strip_fence(reply.trim());
  if let Ok(value) = serde_json::from_str(trimmed) {
    return Ok(value);
  }

  for (open, close) in [('[', ']'), ('{', '}')] {
    if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
      && start < end
      && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
    {
      return Ok(value);
    }
  }

  Err(CollabError::Malformed(format!(
    "reply is not JSON: {}",
    shorten(reply, 120)
  )))
}

fn strip_fence(text: &str) -> &str {
  let Some(rest) = text.strip_prefix("```") else { return text };
  // skip an info string such as `json`
  let rest = rest.split_once('\n').map_or("", |(_, body)| body);
  rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn short_text_is_only_collapsed() {
    assert_eq!(shorten("  a \n b  ", 10), "a b");
  }

  #[test]
  fn long_text_is_cut_at_a_word_boundary() {
    let out = shorten("alpha beta gamma delta", 14);
    assert_eq!(out, "alpha beta...");
    assert!(out.chars().count() <= 14);
  }

  #[test]
  fn a_single_long_word_is_hard_cut() {
    assert_eq!(shorten("abcdefghij", 6), "abc...");
  }

  #[test]
  fn tags_are_removed() {
    assert_eq!(strip_tags("<h4>Background</h4>Nodal <i>metastasis</i>."), "Background Nodal metastasis .");
  }

  #[test]
  fn fenced_and_embedded_json_is_recovered() {
    assert_eq!(json_payload("```json\n[\"a\", \"b\"]\n```").unwrap(), json!(["a", "b"]));
    assert_eq!(json_payload("Sure! {\"summary\": \"s\"} Hope it helps").unwrap(), json!({"summary": "s"}));
    assert_eq!(json_payload(" [1] ").unwrap(), json!([1]));
  }

  #[test]
  fn prose_is_malformed() {
    assert!(json_payload("no json here").unwrap_err().is_malformed());
  }
}
