//! Text validation and truncation before handing text to an encoder, guarding
//! against chunks that would exceed the model's context window.

use tracing::warn;

/// Rough estimate used when the exact tokenizer isn't available to this crate.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct TextValidationConfig {
  pub max_tokens: usize,
  pub chars_per_token: usize,
}

impl TextValidationConfig {
  pub fn for_max_tokens(max_tokens: usize) -> Self {
    Self { max_tokens, chars_per_token: CHARS_PER_TOKEN }
  }

  pub fn max_chars(&self) -> usize {
    self.max_tokens * self.chars_per_token
  }

  pub fn estimate_tokens(&self, text: &str) -> usize {
    text.len() / self.chars_per_token.max(1)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
  Valid,
  Truncated { original_len: usize, truncated_len: usize, estimated_original_tokens: usize },
}

/// Truncate `text` to the configured token budget at a character boundary.
pub fn validate_and_truncate(text: &str, config: &TextValidationConfig) -> (String, ValidationResult) {
  let estimated_tokens = config.estimate_tokens(text);
  if estimated_tokens <= config.max_tokens {
    return (text.to_string(), ValidationResult::Valid);
  }

  let max_chars = config.max_chars();
  let truncated: String = text.chars().take(max_chars).collect();
  let truncated_len = truncated.len();

  warn!(
    original_len = text.len(),
    truncated_len,
    estimated_tokens,
    max_tokens = config.max_tokens,
    "text exceeds embedding context limit, truncating"
  );

  (truncated, ValidationResult::Truncated { original_len: text.len(), truncated_len, estimated_original_tokens: estimated_tokens })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn text_within_budget_is_untouched() {
    let config = TextValidationConfig::for_max_tokens(100);
    let (text, result) = validate_and_truncate("Hello, world!", &config);
    assert_eq!(text, "Hello, world!");
    assert_eq!(result, ValidationResult::Valid);
  }

  #[test]
  fn oversized_text_is_truncated_at_char_boundary() {
    let config = TextValidationConfig { max_tokens: 2, chars_per_token: 4 };
    let (text, result) = validate_and_truncate("Hello, wonderful world!", &config);
    assert_eq!(text, "Hello, w");
    match result {
      ValidationResult::Truncated { original_len, truncated_len, .. } => {
        assert_eq!(original_len, 23);
        assert_eq!(truncated_len, 8);
      }
      _ => panic!("expected truncation"),
    }
  }

  #[test]
  fn truncation_does_not_split_multibyte_chars() {
    let config = TextValidationConfig { max_tokens: 1, chars_per_token: 4 };
    let (text, _) = validate_and_truncate("Hello 世界!", &config);
    assert_eq!(text.chars().count(), 4);
  }
}
