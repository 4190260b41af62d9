//! Arabic corpus tokenisation.
//!
//! Words are extracted as runs of Arabic letters; anything else (digits,
//! latin text, punctuation) separates runs. Diacritics are kept by the
//! tokenizer and stripped by the [`remove_diacritics`] mapper so callers can
//! index either form.

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use retl_core::record::KeyPath;
use serde_json::Value;

use crate::text::WordTokenizer;
use crate::ValueMapper;

const ARABIC_RUN_PATTERN: &str = "[\u{064E}\u{064F}\u{0650}\u{0652}\u{0640}\u{064B}\u{064C}\u{064D}\u{0651}ؤائءآىإأبتثجحخدذرزسشصضطظعغفقكلمنهوي]+";

const DIACRITICS: [char; 8] = [
    '\u{064E}', // fatha
    '\u{0651}', // shadda
    '\u{0650}', // kasra
    '\u{064F}', // damma
    '\u{0652}', // sukun
    '\u{064B}', // fathatan
    '\u{064C}', // dammatan
    '\u{064D}', // kasratan
];

/// Tokenizer yielding `{word}` records for every Arabic word in the input
/// text.
pub fn arabic_words(input_key_path: Option<KeyPath>, output_key: Option<&str>) -> Result<WordTokenizer> {
    let run = Regex::new(ARABIC_RUN_PATTERN)?;
    let splitter = Arc::new(move |text: &str, tokens: &mut Vec<String>| {
        for m in run.find_iter(text) {
            let cleaned = m.as_str().replace('×', "");
            for word in cleaned.split_whitespace() {
                if !word.is_empty() {
                    tokens.push(word.to_owned());
                }
            }
        }
    });
    Ok(WordTokenizer::with_splitter(
        splitter,
        input_key_path,
        output_key,
    ))
}

/// Word mapper stripping the eight Arabic diacritic marks.
pub fn remove_diacritics() -> ValueMapper {
    Arc::new(|value| {
        let word = value.as_str()?;
        Some(Value::String(
            word.chars().filter(|c| !DIACRITICS.contains(c)).collect(),
        ))
    })
}
