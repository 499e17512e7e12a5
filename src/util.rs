//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Case-insensitive substring test against a list of tokens.
/// Matches anywhere in the text ("Yay!!", "espèce de moldue" both hit).
pub fn contains_any_token(text: &str, tokens: &[&str]) -> bool {
  let lower = text.to_lowercase();
  tokens.iter().any(|t| lower.contains(&t.to_lowercase()))
}

/// Trim + lowercase comparison used to recognise suggested actions echoed back by the player.
pub fn same_phrase(a: &str, b: &str) -> bool {
  a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_every_key() {
    let out = fill_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
    assert_eq!(out, "x and y and x");
  }

  #[test]
  fn tokens_match_case_insensitively_inside_words() {
    assert!(contains_any_token("YAY!!", &["yay"]));
    assert!(contains_any_token("Espèce de MOLDUE", &["moldu"]));
    assert!(!contains_any_token("hello there", &["yay", "moldu"]));
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    let s = "é".repeat(50);
    let t = trunc_for_log(&s, 10);
    assert!(t.starts_with(&"é".repeat(10)));
    assert!(t.contains("bytes total"));
    assert_eq!(trunc_for_log("short", 10), "short");
  }
}
