//! Secondary index from tag to the names carrying it.

use std::collections::BTreeSet;

use dashmap::DashMap;

#[derive(Default)]
pub(crate) struct TagIndex {
  by_tag: DashMap<String, BTreeSet<String>>,
}

impl TagIndex {
  pub(crate) fn insert<'a>(&self, name: &str, tags: impl IntoIterator<Item = &'a String>) {
    for tag in tags {
      self
        .by_tag
        .entry(tag.clone())
        .or_default()
        .insert(name.to_owned());
    }
  }

  /// Names carrying `tag`, sorted.
  pub(crate) fn names(&self, tag: &str) -> Vec<String> {
    self
      .by_tag
      .get(tag)
      .map(|names| names.iter().cloned().collect())
      .unwrap_or_default()
  }
}
