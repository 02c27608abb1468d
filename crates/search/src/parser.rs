//! Two-step query parser (spec §4.G): splits a caller's query into a short
//! phrase used for retrieval and a longer context used for reranking.

/// Parse `query` into `(search_phrase, rerank_context)`.
///
/// Precedence:
/// 1. `"[SEARCH] phrase [TASK] context"` — both markers present.
/// 2. `"phrase | context"` — pipe delimiter.
/// 3. Fallback — the full query, unchanged, used for both.
///
/// If either half of a parsed format is empty after trimming, the whole
/// query falls back to rule 3 rather than returning a partial split.
pub fn parse_two_phase_query(query: &str) -> (String, String) {
  if query.contains("[SEARCH]") && query.contains("[TASK]") {
    if let Some((prefix, task_part)) = query.split_once("[TASK]") {
      let search_part = prefix.replacen("[SEARCH]", "", 1);
      return build_context(query, task_part, &search_part);
    }
  }

  if let Some((search_part, task_part)) = query.split_once('|') {
    return build_context(query, task_part, search_part);
  }

  (query.to_string(), query.to_string())
}

fn build_context(original: &str, task_part: &str, search_part: &str) -> (String, String) {
  let task = task_part.trim();
  let search = search_part.trim();
  if task.is_empty() || search.is_empty() {
    return (original.to_string(), original.to_string());
  }
  (search.to_string(), format!("{task}\n\nRelevant concepts: {search}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn two_phase_format_splits_phrase_and_context() {
    let (search, context) = parse_two_phase_query("[SEARCH] auth patterns [TASK] Implement OAuth2 login");
    assert_eq!(search, "auth patterns");
    assert!(context.contains("Implement OAuth2 login"));
    assert!(context.contains("auth patterns"));
  }

  #[test]
  fn fallback_when_no_markers_present() {
    let query = "authentication patterns";
    let (search, context) = parse_two_phase_query(query);
    assert_eq!(search, query);
    assert_eq!(context, query);
  }

  #[test]
  fn empty_search_phrase_falls_back_to_full_query() {
    let query = "[SEARCH]   [TASK] Implement OAuth2";
    let (search, context) = parse_two_phase_query(query);
    assert_eq!(search, query);
    assert_eq!(context, query);
  }

  #[test]
  fn empty_task_falls_back_to_full_query() {
    let query = "[SEARCH] auth patterns [TASK]  ";
    let (search, context) = parse_two_phase_query(query);
    assert_eq!(search, query);
    assert_eq!(context, query);
  }

  #[test]
  fn whitespace_around_markers_is_stripped() {
    let (search, context) = parse_two_phase_query("[SEARCH]  auth patterns   [TASK]  Implement OAuth2 login  ");
    assert_eq!(search, "auth patterns");
    assert!(context.contains("Implement OAuth2 login"));
  }

  #[test]
  fn task_body_containing_search_keyword_is_not_reparsed() {
    let query = "[SEARCH] database patterns [TASK] SEARCH for user records in database";
    let (search, context) = parse_two_phase_query(query);
    assert_eq!(search, "database patterns");
    assert!(context.contains("SEARCH for user records in database"));
  }

  #[test]
  fn multiline_task_survives_verbatim() {
    let (search, context) = parse_two_phase_query("[SEARCH] migration patterns [TASK] Migrate database\nwith zero downtime");
    assert_eq!(search, "migration patterns");
    assert!(context.contains("Migrate database"));
    assert!(context.contains("zero downtime"));
  }

  #[test]
  fn only_search_marker_falls_back_to_full_query() {
    let query = "[SEARCH] auth patterns";
    let (search, context) = parse_two_phase_query(query);
    assert_eq!(search, query);
    assert_eq!(context, query);
  }

  #[test]
  fn only_task_marker_falls_back_to_full_query() {
    let query = "[TASK] Implement OAuth2 login";
    let (search, context) = parse_two_phase_query(query);
    assert_eq!(search, query);
    assert_eq!(context, query);
  }

  #[test]
  fn context_format_matches_expected_structure() {
    let (_, context) = parse_two_phase_query("[SEARCH] auth patterns [TASK] Implement OAuth2");
    assert!(context.starts_with("Implement OAuth2"));
    assert!(context.contains("\n\n"));
    assert!(context.ends_with("auth patterns"));
    assert!(context.contains("Relevant concepts:"));
  }

  #[test]
  fn pipe_delimiter_splits_phrase_and_context() {
    let (search, context) = parse_two_phase_query("auth patterns | Implement OAuth2 login");
    assert_eq!(search, "auth patterns");
    assert!(context.contains("Implement OAuth2 login"));
  }
}
