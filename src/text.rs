//! Splitting source text into chunk texts.

/// Splits `text` into ordered chunks of at most `max_chars` characters.
///
/// Paragraphs (separated by blank lines) always start a new chunk. Within a
/// paragraph, whole sentences are packed together while they fit; a sentence
/// longer than the budget is cut at whitespace, or mid-word if it has none.
/// Whitespace-only input yields no chunks.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();

    for paragraph in paragraphs(text) {
        let mut current = String::new();
        for sentence in split_sentences(&paragraph) {
            for piece in cut_to_budget(&sentence, max_chars) {
                let needed = if current.is_empty() {
                    piece.chars().count()
                } else {
                    current.chars().count() + 1 + piece.chars().count()
                };
                if needed > max_chars && !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&piece);
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
    }

    chunks
}

/// Paragraphs with internal line breaks folded into single spaces.
fn paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

/// Very lightweight sentence splitter based on punctuation.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '…') {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

fn cut_to_budget(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let mut word = word;
        // Words longer than the budget are cut at character boundaries
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let split_at = word
                .char_indices()
                .nth(max_chars)
                .map_or(word.len(), |(i, _)| i);
            pieces.push(word[..split_at].to_string());
            word = &word[split_at..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if needed > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_on_punctuation() {
        let sentences = split_sentences("Hello there. How are you? Fine!  Trailing");
        assert_eq!(
            sentences,
            vec!["Hello there.", "How are you?", "Fine!", "Trailing"]
        );
    }

    #[test]
    fn test_sentences_are_packed_up_to_budget() {
        let chunks = split_text("One. Two. Three. Four.", 10);
        assert_eq!(chunks, vec!["One. Two.", "Three.", "Four."]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_paragraphs_start_new_chunks() {
        let text = "First line\ncontinues here.\n\n\nSecond paragraph.";
        let chunks = split_text(text, 1000);
        assert_eq!(
            chunks,
            vec!["First line continues here.", "Second paragraph."]
        );
    }

    #[test]
    fn test_long_sentence_is_cut_at_whitespace() {
        let chunks = split_text("alpha beta gamma delta epsilon", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta", "epsilon"]);
    }

    #[test]
    fn test_long_word_is_cut_on_char_boundaries() {
        let chunks = split_text("ääääääää", 3);
        assert_eq!(chunks, vec!["äää", "äää", "ää"]);
    }

    #[test]
    fn test_blank_input_has_no_chunks() {
        assert!(split_text("   \n\n \t", 100).is_empty());
        assert!(split_text("", 100).is_empty());
    }
}
