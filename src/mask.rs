//! Literal-text redaction applied before tokenization.

use serde::{Deserialize, Serialize};

/// One ordered substitution rule. Matching is literal, not regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRule {
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl MaskRule {
    pub fn new<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Applies every rule in order. Empty `from` patterns are skipped.
#[must_use]
pub fn apply_mask(text: &str, rules: &[MaskRule]) -> String {
    let mut output = text.to_owned();
    for rule in rules {
        if rule.from.is_empty() {
            continue;
        }
        output = output.replace(&rule.from, &rule.to);
    }
    output
}
