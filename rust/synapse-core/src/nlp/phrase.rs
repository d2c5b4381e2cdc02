//! Candidate phrase extraction.
//!
//! Per language:
//! - **Korean**: eojeol-level part-of-speech guessing. Particles are
//!   stripped from noun eojeols, predicate eojeols are reduced to stems,
//!   and contiguous noun/foreign and predicate runs become phrases.
//! - **English**: stop-word delimited word runs, lowercased.
//! - **Other**: the trimmed sentence as a single token.
//!
//! Stop-word lists are read-only and process-global, initialized once.

use super::lang::Lang;
use std::collections::HashSet;
use std::sync::OnceLock;
use unicode_segmentation::UnicodeSegmentation;

fn english_stopwords() -> &'static HashSet<String> {
    static WORDS: OnceLock<HashSet<String>> = OnceLock::new();
    WORDS.get_or_init(|| {
        stop_words::get(stop_words::LANGUAGE::English)
            .into_iter()
            .map(|w| w.to_lowercase())
            .collect()
    })
}

/// Frequent particles and connectives that never make useful concept nodes.
const KOREAN_STOPWORDS: &[&str] = &[
    "의", "가", "이", "은", "는", "를", "을", "에", "로", "으로", "와", "과",
    "도", "만", "에서", "까지", "부터", "에게", "한테", "께", "더", "덜",
    "가장", "매우", "정말", "그리고", "하지만", "그러나", "그래서", "따라서",
    "또는", "즉", "왜냐하면", "그런데", "하고", "이나", "거나", "것", "수",
    "때", "등", "및", "또", "또한",
];

fn korean_stopwords() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| KOREAN_STOPWORDS.iter().copied().collect())
}

/// Particles stripped from the tail of noun eojeols. Longer ones first so
/// the longest suffix wins.
const JOSA: &[&str] = &[
    "에서", "으로", "까지", "부터", "에게", "한테", "처럼", "보다", "마다",
    "조차", "밖에", "은", "는", "이", "가", "을", "를", "에", "의", "로",
    "와", "과", "도", "만",
];

/// Conjugation endings marking adjective/verb eojeols.
const PREDICATE_ENDINGS: &[&str] = &[
    "습니다", "합니다", "입니다", "지만", "다", "요", "죠", "며",
];

/// Characters that may not terminate a predicate stem.
const BANNED_STEM_TAILS: &[char] = &['다', '요', '죠', '며', '지', '만'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PosGuess {
    Noun,
    Foreign,
    Predicate,
    Other,
}

/// Guess the part of speech of one eojeol and normalize it (particle
/// stripped for nouns, stem for predicates).
fn tag_eojeol(eojeol: &str) -> (PosGuess, String) {
    let trimmed: String = eojeol
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    if trimmed.is_empty() {
        return (PosGuess::Other, String::new());
    }

    if trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return (PosGuess::Foreign, trimmed.to_lowercase());
    }

    for ending in PREDICATE_ENDINGS {
        if let Some(stem) = trimmed.strip_suffix(ending) {
            let stem_len = stem.chars().count();
            let tail_ok = stem
                .chars()
                .last()
                .is_some_and(|c| !BANNED_STEM_TAILS.contains(&c));
            if stem_len > 1 && tail_ok {
                return (PosGuess::Predicate, stem.to_string());
            }
            return (PosGuess::Other, String::new());
        }
    }

    // Noun eojeol: strip one trailing particle when enough stem remains.
    for josa in JOSA {
        if let Some(stem) = trimmed.strip_suffix(josa) {
            if stem.chars().count() >= 2 {
                return (PosGuess::Noun, stem.to_string());
            }
        }
    }
    (PosGuess::Noun, trimmed)
}

/// Extract candidate phrases from one sentence.
///
/// The result is deduplicated within the sentence, insertion order kept.
#[must_use]
pub fn extract_phrases(text: &str, lang: Lang) -> Vec<String> {
    let phrases = match lang {
        Lang::Ko => extract_korean(text),
        Lang::En => extract_english(text),
        Lang::Other => extract_other(text),
    };

    let mut seen = HashSet::new();
    phrases
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

fn extract_korean(text: &str) -> Vec<String> {
    let stopwords = korean_stopwords();
    let tagged: Vec<(PosGuess, String)> = text
        .split_whitespace()
        .map(tag_eojeol)
        .filter(|(_, form)| !form.is_empty() && !stopwords.contains(form.as_str()))
        .collect();

    let mut phrases = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let mut run_kind: Option<PosGuess> = None;

    for (tag, form) in &tagged {
        let compatible = match (run_kind, tag) {
            (Some(PosGuess::Noun | PosGuess::Foreign), PosGuess::Noun | PosGuess::Foreign) => true,
            (Some(PosGuess::Predicate), PosGuess::Predicate) => true,
            _ => false,
        };
        if !compatible {
            flush_run(&mut run, &mut phrases);
            run_kind = None;
        }
        match tag {
            PosGuess::Noun | PosGuess::Foreign | PosGuess::Predicate => {
                run.push(form);
                run_kind = Some(*tag);
            }
            PosGuess::Other => {}
        }
    }
    flush_run(&mut run, &mut phrases);

    phrases
        .into_iter()
        .filter(|p| p.chars().count() >= 2 && !stopwords.contains(p.as_str()))
        .collect()
}

fn flush_run(run: &mut Vec<&str>, phrases: &mut Vec<String>) {
    if !run.is_empty() {
        phrases.push(run.join(" "));
        run.clear();
    }
}

fn extract_english(text: &str) -> Vec<String> {
    let stopwords = english_stopwords();
    let mut phrases = Vec::new();
    let mut run: Vec<String> = Vec::new();

    for word in text.unicode_words() {
        let lower = word.to_lowercase();
        if stopwords.contains(&lower) || lower.chars().all(|c| c.is_numeric()) {
            if !run.is_empty() {
                phrases.push(run.join(" "));
                run.clear();
            }
        } else {
            run.push(lower);
        }
    }
    if !run.is_empty() {
        phrases.push(run.join(" "));
    }

    phrases
        .into_iter()
        .filter(|p| p.chars().count() >= 2)
        .collect()
}

fn extract_other(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.chars().count() >= 2 {
        vec![trimmed.to_string()]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_stopword_runs() {
        let phrases = extract_phrases("Alpha is a letter", Lang::En);
        assert_eq!(phrases, vec!["alpha", "letter"]);
    }

    #[test]
    fn test_english_multiword_chunk() {
        let phrases = extract_phrases("The knowledge graph connects related concepts", Lang::En);
        assert!(phrases.contains(&"knowledge graph connects related concepts".to_string()));
    }

    #[test]
    fn test_english_dedup_within_sentence() {
        let phrases = extract_phrases("graph and graph and graph", Lang::En);
        assert_eq!(phrases, vec!["graph"]);
    }

    #[test]
    fn test_korean_particle_stripping() {
        let phrases = extract_phrases("그래프는 문서의 개념을 연결합니다", Lang::Ko);
        assert!(phrases.iter().any(|p| p.contains("그래프")));
        assert!(phrases.iter().all(|p| !p.ends_with('는')));
    }

    #[test]
    fn test_korean_foreign_alpha_joins_noun_run() {
        let phrases = extract_phrases("LLM 모델과 지식 그래프", Lang::Ko);
        assert!(phrases.iter().any(|p| p.starts_with("llm")));
    }

    #[test]
    fn test_korean_predicate_stem_rule() {
        // Stems ending in a banned tail character are rejected.
        let phrases = extract_phrases("나는 갔다", Lang::Ko);
        assert!(phrases.iter().all(|p| !p.ends_with('다')));
    }

    #[test]
    fn test_other_falls_back_to_sentence() {
        let phrases = extract_phrases("  bonjour le monde  ", Lang::Other);
        assert_eq!(phrases, vec!["bonjour le monde"]);
    }

    #[test]
    fn test_short_phrases_dropped() {
        let phrases = extract_phrases("a b", Lang::En);
        assert!(phrases.is_empty());
    }
}
