//! Named analyzers. PropertyDescriptors reference analyzers by name; this
//! registry resolves the names and installs them on every opened index.

use std::fs;

use log::warn;
use tantivy::tokenizer::{
    LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer,
};
use tantivy::Index;

/// Whitespace/punctuation tokenization, lower-cased.
pub const SIMPLE_LC: &str = "simple_lc";
/// As [`SIMPLE_LC`] plus the configured stop words.
pub const SIMPLE_LC_STOP: &str = "simple_lc_stop";
/// The whole value as one token, original case.
pub const KEYWORD: &str = "keyword";
/// The whole value as one token, lower-cased.
pub const KEYWORD_LC: &str = "keyword_lc";

const MAX_TOKEN_LEN: usize = 80;

#[derive(Clone, Debug, Default)]
pub struct AnalyzerRegistry {
    stopwords: Vec<String>,
}

impl AnalyzerRegistry {
    pub fn new(stopwords: Vec<String>) -> Self {
        Self { stopwords }
    }

    /// Build from a CSV string ("of,the,in") as found in the `efo.stopwords`
    /// setting, or a path to a file holding one.
    pub fn from_stopwords_setting(setting: &str) -> Self {
        if setting.is_empty() {
            return Self::default();
        }
        let csv = if std::path::Path::new(setting).exists() {
            match fs::read_to_string(setting) {
                Ok(content) => content,
                Err(e) => {
                    warn!("could not read stopword file {}: {}", setting, e);
                    return Self::default();
                }
            }
        } else {
            setting.to_string()
        };
        let words = csv
            .split(',')
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self::new(words)
    }

    pub fn install(&self, index: &Index) {
        let tokenizers = index.tokenizers();
        tokenizers.register(
            SIMPLE_LC,
            TextAnalyzer::from(SimpleTokenizer)
                .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
                .filter(LowerCaser),
        );
        tokenizers.register(
            SIMPLE_LC_STOP,
            TextAnalyzer::from(SimpleTokenizer)
                .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
                .filter(LowerCaser)
                .filter(StopWordFilter::remove(self.stopwords.clone())),
        );
        tokenizers.register(KEYWORD, TextAnalyzer::from(RawTokenizer));
        tokenizers.register(KEYWORD_LC, TextAnalyzer::from(RawTokenizer).filter(LowerCaser));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_setting_is_split_and_lowercased() {
        let reg = AnalyzerRegistry::from_stopwords_setting("Of, the , IN,");
        assert_eq!(reg.stopwords, vec!["of", "the", "in"]);
    }

    #[test]
    fn empty_setting_gives_no_stopwords() {
        let reg = AnalyzerRegistry::from_stopwords_setting("");
        assert!(reg.stopwords.is_empty());
    }
}
