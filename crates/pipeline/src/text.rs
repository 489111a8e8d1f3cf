//! Pre-TTS text aggregation
//!
//! Buffers the LLM token stream into fragments sized for the synthesizer.
//! The flush condition is the configured buffering level; the residual
//! buffer is always flushed at turn end.

use voxbridge_config::BufferingLevel;

const CLAUSE_TERMINATORS: &[char] = &['.', '!', '?', ';', ':'];
const MEDIUM_WORD_FLUSH: usize = 4;

/// Token-to-fragment aggregator. One per assistant turn.
#[derive(Debug)]
pub struct TextAggregator {
    level: BufferingLevel,
    buffer: String,
}

impl TextAggregator {
    pub fn new(level: BufferingLevel) -> Self {
        Self {
            level,
            buffer: String::new(),
        }
    }

    /// Feed one token; returns fragments ready for TTS, in order.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        if self.level == BufferingLevel::None {
            if token.is_empty() {
                return Vec::new();
            }
            return vec![token.to_string()];
        }

        self.buffer.push_str(token);

        // Fragments keep their whitespace: concatenating every emitted
        // fragment reproduces the token stream byte for byte, which is what
        // the history commit relies on.
        let mut fragments = Vec::new();
        while let Some(end) = self.next_flush_point() {
            let fragment: String = self.buffer.drain(..end).collect();
            if !fragment.trim().is_empty() {
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Flush whatever remains. Called at turn end.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    /// Byte offset one past the earliest flush boundary, if any.
    fn next_flush_point(&self) -> Option<usize> {
        match self.level {
            BufferingLevel::None => None,
            BufferingLevel::Low => {
                // Word boundary: flush through the last whitespace run so the
                // trailing partial word stays buffered.
                self.buffer
                    .char_indices()
                    .find(|(_, c)| c.is_whitespace())
                    .map(|(idx, c)| idx + c.len_utf8())
            }
            BufferingLevel::Medium => {
                if let Some(p) = self.punctuation_flush_point() {
                    return Some(p);
                }
                self.word_count_flush_point(MEDIUM_WORD_FLUSH)
            }
            BufferingLevel::High => self.punctuation_flush_point(),
        }
    }

    fn punctuation_flush_point(&self) -> Option<usize> {
        self.buffer
            .char_indices()
            .find(|(_, c)| CLAUSE_TERMINATORS.contains(c))
            .map(|(idx, c)| idx + c.len_utf8())
    }

    fn word_count_flush_point(&self, words: usize) -> Option<usize> {
        let mut complete_words = 0;
        let mut in_word = false;
        for (idx, c) in self.buffer.char_indices() {
            if c.is_whitespace() {
                if in_word {
                    complete_words += 1;
                    in_word = false;
                }
                if complete_words >= words {
                    return Some(idx + c.len_utf8());
                }
            } else {
                in_word = true;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(level: BufferingLevel, tokens: &[&str]) -> (Vec<String>, Option<String>) {
        let mut aggregator = TextAggregator::new(level);
        let mut fragments = Vec::new();
        for token in tokens {
            fragments.extend(aggregator.push(token));
        }
        let rest = aggregator.flush();
        (fragments, rest)
    }

    #[test]
    fn test_none_forwards_every_token() {
        let (fragments, rest) = feed(BufferingLevel::None, &["Hel", "lo ", "there"]);
        assert_eq!(fragments, vec!["Hel", "lo ", "there"]);
        assert!(rest.is_none());
    }

    #[test]
    fn test_low_flushes_on_word_boundary() {
        let (fragments, rest) = feed(BufferingLevel::Low, &["Hel", "lo ", "wor", "ld"]);
        assert_eq!(fragments, vec!["Hello "]);
        assert_eq!(rest.as_deref(), Some("world"));
    }

    #[test]
    fn test_medium_flushes_on_four_words() {
        let (fragments, rest) = feed(
            BufferingLevel::Medium,
            &["one ", "two ", "three ", "four ", "five"],
        );
        assert_eq!(fragments, vec!["one two three four "]);
        assert_eq!(rest.as_deref(), Some("five"));
    }

    #[test]
    fn test_medium_flushes_on_punctuation_first() {
        let (fragments, _) = feed(BufferingLevel::Medium, &["Yes.", " More words follow here"]);
        assert_eq!(fragments[0], "Yes.");
    }

    #[test]
    fn test_high_waits_for_punctuation() {
        let (fragments, rest) = feed(
            BufferingLevel::High,
            &["a long stretch of words ", "without any stop ", "until here."],
        );
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].ends_with('.'));
        assert!(rest.is_none());
    }

    #[test]
    fn test_residual_flush_at_turn_end() {
        let (fragments, rest) = feed(BufferingLevel::High, &["no terminator at all"]);
        assert!(fragments.is_empty());
        assert_eq!(rest.as_deref(), Some("no terminator at all"));
    }

    #[test]
    fn test_multiple_sentences_in_one_token() {
        let (fragments, _) = feed(BufferingLevel::High, &["First. Second! Third?"]);
        assert_eq!(fragments, vec!["First.", " Second!", " Third?"]);
    }

    #[test]
    fn test_fragments_concatenate_to_input() {
        let tokens = ["One two ", "three. Four ", "five six seven ", "eight?"];
        let mut aggregator = TextAggregator::new(BufferingLevel::Medium);
        let mut assembled = String::new();
        for token in tokens {
            for fragment in aggregator.push(token) {
                assembled.push_str(&fragment);
            }
        }
        if let Some(rest) = aggregator.flush() {
            assembled.push_str(&rest);
        }
        assert_eq!(assembled, tokens.concat());
    }

    #[test]
    fn test_utf8_boundaries() {
        let (fragments, rest) = feed(BufferingLevel::Low, &["héllo wörld"]);
        assert_eq!(fragments, vec!["héllo "]);
        assert_eq!(rest.as_deref(), Some("wörld"));
    }
}
