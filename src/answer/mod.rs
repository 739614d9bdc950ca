//! Answer Synthesizer - 기사에서 추출형 답변과 핵심 사실 뽑기
//!
//! 질의 키워드와 가장 많이 겹치는 문장(숫자/금액/비율이 있으면 가산)을 직답으로 고르고,
//! 바로 뒤의 관련 문장을 최대 3문장까지 이어 붙입니다.
//! 핵심 사실은 수치나 사실 동사가 들어간 문장을 본문 순서대로 뽑습니다.
//!
//! 관련 문장이 없으면 직답과 핵심 사실 모두 비어 있습니다 (에러 아님).

use std::collections::HashSet;

use regex::Regex;
use serde::Serialize;

use crate::embedding::tokenize;
use crate::error::{NewsError, Result};
use crate::knowledge::Article;

/// 직답 최대 문장 수
const MAX_ANSWER_SENTENCES: usize = 3;
/// 직답 후보 문장 최소 길이 (문자 수)
const MIN_ANSWER_CHARS: usize = 20;
/// 핵심 사실 문장 길이 범위 (문자 수)
const MIN_FACT_CHARS: usize = 30;
const MAX_FACT_CHARS: usize = 300;
/// 핵심 사실 중복 판정 접두어 길이
const FACT_KEY_CHARS: usize = 50;
/// 수치 포함 문장 가산점
const NUMERIC_BONUS: usize = 2;

const NUMERIC_PATTERN: &str =
    r"(?i)\$\s?\d[\d,.]*|\d+(?:\.\d+)?\s*%|\d+(?:\.\d+)?\s*(?:million|billion|barrels?|bpd|mcf)\b";
const FACTUAL_PATTERN: &str =
    r"(?i)\b(?:announced|reported|said|increased|decreased|plans|will|agreed)\b";

// ============================================================================
// Types
// ============================================================================

/// 합성 결과
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Answer {
    /// 1~3문장 추출형 직답 (없으면 빈 문자열)
    pub direct_answer: String,
    /// 본문 등장 순서의 핵심 사실
    pub key_facts: Vec<String>,
}

impl Answer {
    /// "답변 없음" 결과인지
    pub fn is_empty(&self) -> bool {
        self.direct_answer.is_empty() && self.key_facts.is_empty()
    }
}

// ============================================================================
// AnswerSynthesizer
// ============================================================================

/// 추출형 답변 합성기
#[derive(Debug, Clone)]
pub struct AnswerSynthesizer {
    max_key_facts: usize,
    numeric: Regex,
    factual: Regex,
}

impl AnswerSynthesizer {
    pub fn new(max_key_facts: usize) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| NewsError::ModelUnavailable(format!("answer pattern: {}", e)))
        };

        Ok(Self {
            max_key_facts,
            numeric: compile(NUMERIC_PATTERN)?,
            factual: compile(FACTUAL_PATTERN)?,
        })
    }

    /// 질의와 기사 본문으로 직답/핵심 사실 생성
    pub fn synthesize(&self, query: &str, article: &Article) -> Answer {
        self.synthesize_text(query, &article.body)
    }

    pub fn synthesize_text(&self, query: &str, body: &str) -> Answer {
        let keywords = query_keywords(query);
        if keywords.is_empty() || body.trim().is_empty() {
            return Answer::default();
        }

        let sentences = split_sentences(body);
        let matches: Vec<usize> = sentences
            .iter()
            .map(|s| keyword_matches(s, &keywords))
            .collect();

        // 최고 점수 문장 (동점이면 앞 문장)
        let mut best: Option<(usize, usize)> = None;
        for (i, sentence) in sentences.iter().enumerate() {
            if matches[i] == 0 || sentence.chars().count() < MIN_ANSWER_CHARS {
                continue;
            }
            let mut score = matches[i];
            if self.numeric.is_match(sentence) {
                score += NUMERIC_BONUS;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((start, _)) = best else {
            return Answer::default();
        };

        let mut parts = vec![sentences[start]];
        for i in start + 1..sentences.len() {
            if parts.len() >= MAX_ANSWER_SENTENCES || matches[i] == 0 {
                break;
            }
            parts.push(sentences[i]);
        }

        Answer {
            direct_answer: parts.join(" "),
            key_facts: self.key_facts(&sentences),
        }
    }

    /// 수치/사실 동사가 들어간 문장 (본문 순서, 접두어 기준 중복 제거)
    fn key_facts(&self, sentences: &[&str]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut facts = Vec::new();

        for sentence in sentences {
            if facts.len() >= self.max_key_facts {
                break;
            }

            let len = sentence.chars().count();
            if !(MIN_FACT_CHARS..=MAX_FACT_CHARS).contains(&len) {
                continue;
            }

            let key: String = sentence.chars().take(FACT_KEY_CHARS).collect::<String>().to_lowercase();
            if !seen.insert(key) {
                continue;
            }

            if self.numeric.is_match(sentence) || self.factual.is_match(sentence) {
                facts.push(sentence.to_string());
            }
        }

        facts
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 질의 키워드 (불용어 제거, 3자 이상, 중복 제거)
pub fn query_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// 문장 안에 나타난 질의 키워드 수 (단순 복수형 허용)
fn keyword_matches(sentence: &str, keywords: &[String]) -> usize {
    let tokens: HashSet<String> = tokenize(sentence).into_iter().collect();
    keywords
        .iter()
        .filter(|kw| {
            tokens.contains(kw.as_str())
                || tokens.contains(&format!("{}s", kw))
                || kw.strip_suffix('s').map_or(false, |stem| tokens.contains(stem))
        })
        .count()
}

/// 문장 분리
///
/// `.`/`!`/`?` 뒤에 공백이 오고 그다음이 대문자, 숫자, 따옴표일 때만 자릅니다.
/// 그래서 "1.4 million" 같은 소수점은 문장 경계가 아닙니다.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }

        let end = i + c.len_utf8();
        let rest = &text[end..];
        let trimmed = rest.trim_start();
        if trimmed.len() == rest.len() {
            continue;
        }

        let next = trimmed.chars().next();
        let boundary = next.map_or(false, |n| {
            n.is_uppercase() || n.is_ascii_digit() || matches!(n, '"' | '\'' | '“' | '‘')
        });

        if boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// 직답이 없을 때 보여줄 대체 문장 (본문 첫 문장, 없으면 제목)
pub fn lead_sentence(article: &Article) -> String {
    split_sentences(&article.body)
        .first()
        .map(|s| s.to_string())
        .unwrap_or_else(|| article.title.clone())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const OPEC_BODY: &str = "OPEC+ agreed to extend production cuts through Q1 2026, keeping \
                             output reduced by 2.2 million bpd. Saudi Arabia leads voluntary cuts.";

    fn synthesizer() -> AnswerSynthesizer {
        AnswerSynthesizer::new(3).unwrap()
    }

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let sentences =
            split_sentences("Output rose 1.4 million bpd. Prices fell! Why? \"Quote\" here.");
        assert_eq!(
            sentences,
            vec!["Output rose 1.4 million bpd.", "Prices fell!", "Why?", "\"Quote\" here."]
        );
    }

    #[test]
    fn test_split_sentences_lowercase_continuation() {
        // 소문자로 이어지면 경계 아님 (e.g. 약어)
        assert_eq!(split_sentences("Shares of U.S. firms rose."), vec!["Shares of U.S. firms rose."]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_opec_direct_answer() {
        let answer = synthesizer().synthesize_text("What is the latest OPEC decision?", OPEC_BODY);
        assert_eq!(
            answer.direct_answer,
            "OPEC+ agreed to extend production cuts through Q1 2026, keeping output reduced by 2.2 million bpd."
        );
        assert!(answer.direct_answer.contains("production cuts"));
        assert_eq!(answer.key_facts.len(), 1);
    }

    #[test]
    fn test_no_matching_terms_is_empty_answer() {
        let answer = synthesizer().synthesize_text("weather forecast tomorrow", OPEC_BODY);
        assert!(answer.is_empty());

        let answer = synthesizer().synthesize_text("", OPEC_BODY);
        assert!(answer.is_empty());
    }

    #[test]
    fn test_answer_extends_with_following_relevant_sentences() {
        let body = "Brent crude climbed 3% on Monday morning. Brent futures settled at $82 per barrel. \
                    Analysts expect volatility. Brent may fall again.";
        let answer = synthesizer().synthesize_text("Brent price", body);
        assert_eq!(
            answer.direct_answer,
            "Brent crude climbed 3% on Monday morning. Brent futures settled at $82 per barrel."
        );
        assert_eq!(
            answer.key_facts,
            vec![
                "Brent crude climbed 3% on Monday morning.".to_string(),
                "Brent futures settled at $82 per barrel.".to_string(),
            ]
        );
    }

    #[test]
    fn test_short_sentences_are_not_answers() {
        let answer = synthesizer().synthesize_text("OPEC meeting", "OPEC met. Nothing else happened here today.");
        assert!(answer.direct_answer.is_empty());
    }

    #[test]
    fn test_key_facts_capped_and_deduplicated() {
        let body = "Exxon reported output of 1.2 million bpd in Guyana. \
                    Exxon reported output of 1.2 million bpd in Guyana again. \
                    Chevron said it will invest $5 billion this year. \
                    Shell announced a 10% increase in LNG exports. \
                    BP plans to cut 500 jobs across its refining unit.";
        let answer = AnswerSynthesizer::new(2).unwrap().synthesize_text("Exxon output", body);
        assert!(!answer.direct_answer.is_empty());
        assert_eq!(answer.key_facts.len(), 2);
        assert!(answer.key_facts[0].starts_with("Exxon reported"));
        assert!(answer.key_facts[1].starts_with("Chevron said"));
    }

    #[test]
    fn test_query_keywords() {
        assert_eq!(query_keywords("What is the latest OPEC decision?"), vec!["opec", "decision"]);
        assert_eq!(query_keywords("oil oil of US"), vec!["oil"]);
    }

    #[test]
    fn test_plural_keyword_matches() {
        let answer = synthesizer().synthesize_text("production cut", OPEC_BODY);
        assert!(answer.direct_answer.starts_with("OPEC+ agreed"));
    }
}
