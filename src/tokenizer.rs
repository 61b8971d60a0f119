use unicode_segmentation::UnicodeSegmentation;

/// Estimates how many model tokens a piece of text occupies. Only used for
/// sizing decisions, never for billing.
pub trait TokenCounter {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Word-level tokenizer: every word and every punctuation mark counts as one
/// token, whitespace counts as nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl TokenCounter for WordTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_word_bounds()
            .filter(|w| !w.trim().is_empty())
            .count()
    }
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize,
{
    fn count_tokens(&self, text: &str) -> usize {
        self(text)
    }
}
