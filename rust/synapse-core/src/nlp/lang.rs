//! Sentence language classification.
//!
//! Classifies a sentence as Korean, English, or other. Hangul syllables are
//! checked first because short mixed-script sentences confuse statistical
//! detection; everything else goes through whatlang.

use serde::{Deserialize, Serialize};

/// Language of a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lang {
    /// Korean.
    Ko,
    /// English.
    En,
    /// Anything else (or undecidable).
    Other,
}

/// Classify the language of a sentence.
#[must_use]
pub fn detect_lang(text: &str) -> Lang {
    if text.chars().any(is_hangul) {
        return Lang::Ko;
    }

    match whatlang::detect(text) {
        Some(info) if info.lang() == whatlang::Lang::Kor => Lang::Ko,
        Some(info) if info.lang() == whatlang::Lang::Eng => Lang::En,
        Some(info) if info.is_reliable() => Lang::Other,
        // Short Latin fragments carry too little signal for the detector;
        // fall back on the script itself.
        _ if looks_latin(text) => Lang::En,
        _ => Lang::Other,
    }
}

/// Hangul syllables and jamo.
fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

fn looks_latin(text: &str) -> bool {
    let alnum = text.chars().filter(|c| c.is_alphanumeric()).count();
    let ascii_alpha = text.chars().filter(char::is_ascii_alphabetic).count();
    alnum > 0 && ascii_alpha * 2 >= alnum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_korean_detection() {
        assert_eq!(detect_lang("지식 그래프는 문서를 연결한다."), Lang::Ko);
    }

    #[test]
    fn test_korean_wins_in_mixed_script() {
        assert_eq!(detect_lang("LLM 기반 지식 그래프"), Lang::Ko);
    }

    #[test]
    fn test_english_detection() {
        assert_eq!(
            detect_lang("Knowledge graphs connect concepts across documents."),
            Lang::En
        );
    }

    #[test]
    fn test_short_latin_fallback() {
        // Too short for reliable statistical detection.
        assert_ne!(detect_lang("ab cd"), Lang::Ko);
    }
}
