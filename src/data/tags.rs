/// Split a comma-separated tag string, trimming whitespace and dropping
/// empty segments. `None` yields no tags.
pub fn split_tags<'a>(input: impl Into<Option<&'a str>>) -> Vec<String> {
  input
    .into()
    .map(|raw| {
      raw
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_trims_whitespace() {
    assert_eq!(split_tags("tag1, tag2,tag3"), vec!["tag1", "tag2", "tag3"]);
  }

  #[test]
  fn test_empty_and_missing() {
    assert!(split_tags("").is_empty());
    assert!(split_tags(None).is_empty());
    assert!(split_tags(" , ,").is_empty());
  }

  #[test]
  fn test_drops_empty_segments() {
    assert_eq!(split_tags("tag1,,tag2"), vec!["tag1", "tag2"]);
  }

  #[test]
  fn test_join_then_split_reconstructs() {
    let cases: &[&[&str]] = &[
      &[],
      &["rock"],
      &["lo-fi", "hip hop", "jazz"],
      &["a b c", "d"],
    ];
    for tags in cases {
      let joined = tags.join(",");
      assert_eq!(split_tags(joined.as_str()), *tags);
    }
  }
}
