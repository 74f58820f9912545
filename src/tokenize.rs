//! Script-aware tokenizer.
//!
//! Latin-ish text is split into `[a-z0-9_]+` runs; CJK text is split into
//! single characters. Tokens are lowercased, alias-canonicalized, and filtered
//! against a stopword set. N-grams downstream only form across tokens of the
//! same script class, so the class is tagged here.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

pub const BUILT_IN_STOPWORDS: &[&str] = &[
    // English fillers
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had", "has",
    "have", "he", "her", "hers", "him", "his", "how", "i", "if", "in", "is", "it", "its", "me",
    "my", "of", "on", "or", "ours", "she", "so", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "too", "us", "was", "we", "were", "what", "when", "where",
    "which", "who", "why", "with", "you", "your",
    // Common chat fillers
    "okay", "ok", "yeah", "yep", "hey", "hi", "hello", "thanks", "thank", "please",
    // Simplified Chinese stopwords (light)
    "的", "了", "是", "我", "你", "他", "她", "它", "们", "和", "啊", "吧", "吗", "呢", "就",
    "在", "还", "很", "都", "要", "会", "有", "也", "对", "着", "把", "给", "个", "再", "让",
    "又", "被", "去", "来", "好", "跟", "用", "于",
];

/// Underscored export variants collapsed to canonical tokens.
const ALIASES: &[(&str, &str)] = &[
    ("chat_gpt", "chatgpt"),
    ("open_ai", "openai"),
    ("gpt_3", "gpt3"),
    ("gpt_4", "gpt4"),
    ("gpt_4o", "gpt4o"),
    ("mid_journey", "midjourney"),
    ("deep_seek", "deepseek"),
];

/// Canonical product/brand tokens given a modest scoring bonus downstream.
#[allow(clippy::expect_used)]
pub static WHITELIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "chatgpt", "openai", "gpt3", "gpt4", "gpt4o", "claude", "anthropic", "gemini", "copilot",
        "llama", "midjourney", "deepseek", "mistral",
    ]
    .into_iter()
    .collect()
});

#[allow(clippy::expect_used)]
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]|[a-z0-9_]+").expect("token regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptClass {
    Cjk,
    Latin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub script: ScriptClass,
}

/// Stopword filter: the built-in set plus any caller-provided extras.
#[derive(Debug, Clone)]
pub struct StopwordSet {
    words: HashSet<String>,
}

impl Default for StopwordSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StopwordSet {
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            words: BUILT_IN_STOPWORDS.iter().map(|w| (*w).to_owned()).collect(),
        }
    }

    /// Extends the built-in set with extra entries. Entries are trimmed and
    /// lowercased; empty entries are ignored.
    #[must_use]
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::builtin();
        for entry in extra {
            let normalized = entry.as_ref().trim().to_lowercase();
            if !normalized.is_empty() {
                set.words.insert(normalized);
            }
        }
        set
    }

    /// Parses a free-form extras string: entries split on whitespace, commas,
    /// and semicolons (ASCII and fullwidth).
    #[must_use]
    pub fn parse_extra(extra: &str) -> Self {
        Self::with_extra(
            extra.split(|c: char| {
                c.is_whitespace() || matches!(c, ',' | ';' | '\u{3000}' | '\u{FF0C}' | '\u{FF1B}')
            }),
        )
    }

    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.words.contains(token)
    }
}

fn canonicalize(token: &str) -> &str {
    for (from, to) in ALIASES {
        if token == *from {
            return to;
        }
    }
    token
}

/// Tokenizes `text`, tagging each token with its script class.
///
/// Single-character Latin tokens and digit runs longer than six characters are
/// dropped; both are noise in chat corpora.
#[must_use]
pub fn tokenize(text: &str, stopwords: &StopwordSet) -> Vec<Token> {
    if text.is_empty() {
        return Vec::new();
    }
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    for found in TOKEN_RE.find_iter(&lower) {
        let raw = found.as_str();
        let token = canonicalize(raw);
        if token.is_empty() || stopwords.contains(token) {
            continue;
        }
        if token.is_ascii() {
            let mut chars = token.chars();
            if chars.next().is_some() && chars.next().is_none() && !token.starts_with(|c: char| c.is_ascii_digit()) {
                continue; // drop single-character latin tokens
            }
            if token.len() > 6 && token.bytes().all(|b| b.is_ascii_digit()) {
                continue; // drop long numeric sequences
            }
            tokens.push(Token {
                text: token.to_owned(),
                script: ScriptClass::Latin,
            });
        } else {
            // CJK alternatives in the pattern match exactly one character.
            tokens.push(Token {
                text: token.to_owned(),
                script: ScriptClass::Cjk,
            });
        }
    }
    tokens
}

/// Splits a token slice into maximal runs of the same script class.
#[must_use]
pub fn script_runs(tokens: &[Token]) -> Vec<&[Token]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..tokens.len() {
        if tokens[i].script != tokens[start].script {
            runs.push(&tokens[start..i]);
            start = i;
        }
    }
    if start < tokens.len() {
        runs.push(&tokens[start..]);
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn aliases_collapse_to_canonical_tokens() {
        let tokens = tokenize("Chat_GPT + Open_AI & GPT_4", &StopwordSet::default());
        assert_eq!(texts(&tokens), vec!["chatgpt", "openai", "gpt4"]);
    }

    #[test]
    fn stopwords_and_noise_are_dropped() {
        let tokens = tokenize("the quick brown fox is a 1234567 x", &StopwordSet::default());
        assert_eq!(texts(&tokens), vec!["quick", "brown", "fox"]);
    }

    #[test]
    fn extra_stopwords_parse_from_mixed_separators() {
        let set = StopwordSet::parse_extra("Foo, bar；baz\u{3000}qux");
        let tokens = tokenize("foo bar baz qux keep", &set);
        assert_eq!(texts(&tokens), vec!["keep"]);
    }

    #[test]
    fn cjk_splits_into_single_characters() {
        let tokens = tokenize("模型训练", &StopwordSet::default());
        assert_eq!(texts(&tokens), vec!["模", "型", "训", "练"]);
        assert!(tokens.iter().all(|t| t.script == ScriptClass::Cjk));
    }

    #[test]
    fn script_runs_split_on_class_change() {
        let tokens = tokenize("rust 模型 rocks", &StopwordSet::default());
        let runs = script_runs(&tokens);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0][0].script, ScriptClass::Latin);
        assert_eq!(runs[1][0].script, ScriptClass::Cjk);
        assert_eq!(runs[2][0].script, ScriptClass::Latin);
    }

    #[test]
    fn whitelist_carries_expected_canonical_tokens() {
        assert!(WHITELIST.contains("openai"));
        assert!(WHITELIST.contains("chatgpt"));
    }
}
