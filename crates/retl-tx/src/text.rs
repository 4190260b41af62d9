//! Word tokenisation over text-carrying records.

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use retl_core::record::{Context, KeyPath, Record, Value, ValueKind};
use retl_core::{Operator, Transformer};
use serde_json::Map;
use tracing::debug;

use crate::{apply_value_mappers, map_records, MapConfig, ValueMapper};

/// Predicate deciding whether a token is dropped after mapping.
pub type WordPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

enum Splitter {
    Pattern(Regex),
    Custom(Arc<dyn Fn(&str, &mut Vec<String>) + Send + Sync>),
}

/// Splits a string into words and yields one `{word}` record per surviving
/// token.
///
/// Token post-processing order: `remove_chars`, then the mapper chain (a
/// `None` drops the token), then the `ignore_word` predicate.
pub struct WordTokenizer {
    cfg: MapConfig,
    splitter: Splitter,
    remove_chars: Vec<char>,
    mappers: Vec<ValueMapper>,
    ignore_word: Option<WordPredicate>,
}

impl WordTokenizer {
    /// Tokenizer splitting on a regular expression.
    pub fn pattern(
        pattern: &str,
        input_key_path: Option<KeyPath>,
        output_key: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            cfg: MapConfig::new(input_key_path, ValueKind::String, output_key),
            splitter: Splitter::Pattern(Regex::new(pattern)?),
            remove_chars: Vec::new(),
            mappers: Vec::new(),
            ignore_word: None,
        })
    }

    /// Tokenizer with a language-specific splitting rule.
    pub fn with_splitter(
        splitter: Arc<dyn Fn(&str, &mut Vec<String>) + Send + Sync>,
        input_key_path: Option<KeyPath>,
        output_key: Option<&str>,
    ) -> Self {
        Self {
            cfg: MapConfig::new(input_key_path, ValueKind::String, output_key),
            splitter: Splitter::Custom(splitter),
            remove_chars: Vec::new(),
            mappers: Vec::new(),
            ignore_word: None,
        }
    }

    /// Characters stripped from every token before the mapper chain runs.
    pub fn remove_chars(mut self, chars: &[char]) -> Self {
        self.remove_chars = chars.to_vec();
        self
    }

    pub fn mappers(mut self, mappers: Vec<ValueMapper>) -> Self {
        self.mappers = mappers;
        self
    }

    pub fn ignore_word(mut self, predicate: WordPredicate) -> Self {
        self.ignore_word = Some(predicate);
        self
    }

    pub fn copy_values(mut self, copies: Vec<(String, KeyPath)>) -> Self {
        self.cfg.copy_values_key_paths = copies;
        self
    }

    pub fn remove_keys(mut self, keys: Vec<KeyPath>) -> Self {
        self.cfg.remove_key_paths = keys;
        self
    }

    fn split(&self, text: &str, tokens: &mut Vec<String>) {
        match &self.splitter {
            Splitter::Pattern(re) => {
                tokens.extend(re.split(text).filter(|t| !t.is_empty()).map(str::to_owned));
            }
            Splitter::Custom(f) => f(text, tokens),
        }
    }
}

impl Operator for WordTokenizer {
    fn name(&self) -> &str {
        "word-tokenizer"
    }
}

impl Transformer for WordTokenizer {
    fn transform(&self, item: Record, ctx: &mut Context) -> Result<Vec<Record>> {
        map_records(&self.cfg, &item, ctx, |input, _ctx, emit| {
            let text = input.as_str().unwrap_or_default();
            let mut tokens = Vec::new();
            self.split(text, &mut tokens);
            for mut token in tokens {
                if !self.remove_chars.is_empty() {
                    token.retain(|c| !self.remove_chars.contains(&c));
                }
                let Some(mapped) = apply_value_mappers(Value::String(token), &self.mappers)
                else {
                    continue;
                };
                let Some(word) = mapped.as_str() else {
                    debug!("token mapper produced a non-string value, token dropped");
                    continue;
                };
                if word.is_empty() {
                    continue;
                }
                if let Some(ignore) = &self.ignore_word {
                    if ignore(word) {
                        continue;
                    }
                }
                let mut wrapped = Map::new();
                wrapped.insert("word".to_owned(), Value::String(word.to_owned()));
                emit(Value::Object(wrapped));
            }
            Ok(())
        })
    }

    fn set_default_paths(&mut self, input_key_path: &[String], output_key: &str) {
        self.cfg.apply_defaults(input_key_path, output_key);
    }
}
