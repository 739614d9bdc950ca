//! 엔티티 사전 (gazetteer) - 조직/지역 이름 목록과 매처
//!
//! 엔티티 모델 아티팩트는 이름 목록 자체이며, 로드 시 정규식으로 컴파일됩니다.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NewsError, Result};

/// 기본 엔티티 모델 버전
pub const BUILTIN_ENTITY_VERSION: &str = "gazetteer-v1";

const ORGANIZATIONS: &[&str] = &[
    "OPEC+", "OPEC", "IEA", "EIA", "ExxonMobil", "Exxon", "Chevron", "Shell", "BP",
    "TotalEnergies", "ConocoPhillips", "Occidental", "EOG Resources", "Pioneer Natural Resources",
    "Devon Energy", "Hess", "Marathon Oil", "Apache", "Diamondback", "Coterra", "APA Corporation",
    "Saudi Aramco", "Aramco", "Gazprom", "Rosneft", "Lukoil", "PetroChina", "Sinopec", "CNOOC",
    "Petrobras", "Equinor", "Eni", "Repsol", "OMV", "Woodside", "Santos", "ONGC",
    "Reliance", "ADNOC", "QatarEnergy", "Kuwait Oil", "NIOC", "Pemex", "Schlumberger", "SLB",
    "Halliburton", "Baker Hughes", "Weatherford", "NOV", "Cheniere", "Enbridge", "TC Energy",
    "Kinder Morgan",
];

const LOCATIONS: &[&str] = &[
    "Permian Basin", "Eagle Ford", "Bakken", "Marcellus", "Haynesville", "Gulf of Mexico",
    "North Sea", "Caspian Sea", "South China Sea", "Persian Gulf", "Arabian Gulf",
    "Mediterranean", "Strait of Hormuz", "Guyana", "Namibia", "Suriname", "Texas", "Oklahoma",
    "North Dakota", "Louisiana", "Alaska", "Alberta", "British Columbia", "Saudi Arabia",
    "UAE", "Kuwait", "Qatar", "Iraq", "Iran", "Russia", "Norway", "UK", "United States",
    "Nigeria", "Angola", "Libya", "Algeria", "Venezuela", "Brazil", "Mexico", "Canada",
    "China", "India",
];

/// 엔티티 모델 아티팩트 (이름 목록)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityModel {
    pub version: String,
    pub organizations: Vec<String>,
    pub locations: Vec<String>,
}

impl EntityModel {
    /// 내장 기본 목록
    pub fn builtin() -> Self {
        Self {
            version: BUILTIN_ENTITY_VERSION.to_string(),
            organizations: ORGANIZATIONS.iter().map(|s| s.to_string()).collect(),
            locations: LOCATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// JSON 아티팩트 로드
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NewsError::ModelUnavailable(format!("entity model {:?}: {}", path, e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| NewsError::ModelUnavailable(format!("entity model {:?}: {}", path, e)))
    }
}

// ============================================================================
// Gazetteer Matcher
// ============================================================================

/// 이름 목록 매처
///
/// 대소문자/공백 변형을 하나의 표준 이름으로 정규화합니다.
/// 짧거나 전부 대문자인 약어(BP, UK, Eni 등)는 대소문자가 정확히 맞아야 하고,
/// 나머지 이름도 대문자로 시작하는 경우만 인정합니다.
#[derive(Debug, Clone)]
pub(crate) struct Gazetteer {
    pattern: Option<Regex>,
    /// 정규화 키 -> 표준 이름
    canonical: HashMap<String, String>,
}

impl Gazetteer {
    pub(crate) fn new(names: &[String]) -> Result<Self> {
        let mut names: Vec<&String> = names.iter().filter(|n| !n.trim().is_empty()).collect();
        // 긴 이름 우선 (leftmost-first 매칭에서 "OPEC+"가 "OPEC"보다 먼저)
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let canonical = names
            .iter()
            .map(|n| (lookup_key(n), n.trim().to_string()))
            .collect();

        let pattern = if names.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = names
                .iter()
                .map(|n| {
                    n.split_whitespace()
                        .map(regex::escape)
                        .collect::<Vec<_>>()
                        .join(r"\s+")
                })
                .collect();
            let regex = Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))
                .map_err(|e| NewsError::ModelUnavailable(format!("gazetteer pattern: {}", e)))?;
            Some(regex)
        };

        Ok(Self { pattern, canonical })
    }

    /// 텍스트에서 (시작 위치, 원문, 표준 이름) 매칭을 등장 순서대로 반환
    pub(crate) fn find<'t>(&self, text: &'t str) -> Vec<(usize, &'t str, &str)> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };

        pattern
            .find_iter(text)
            .filter(|m| is_word_boundary(text, m.start(), m.end()))
            .filter_map(|m| {
                let canonical = self.canonical.get(&lookup_key(m.as_str()))?;
                let accepted = if requires_exact_case(canonical) {
                    same_words(m.as_str(), canonical)
                } else {
                    starts_uppercase(m.as_str())
                };
                if !accepted {
                    return None;
                }
                Some((m.start(), m.as_str(), canonical.as_str()))
            })
            .collect()
    }
}

/// 대소문자/공백 무시 키
fn lookup_key(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn requires_exact_case(name: &str) -> bool {
    let letters: String = name.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() <= 3 || letters.chars().all(|c| c.is_uppercase())
}

/// 소문자로 시작하는 일반 단어("shell rock", "reliance on")는 회사명이 아님
fn starts_uppercase(span: &str) -> bool {
    span.chars()
        .find(|c| c.is_alphabetic())
        .map_or(false, |c| c.is_uppercase())
}

fn same_words(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

/// 매칭 앞뒤가 영숫자가 아닌지 확인
fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.map(|c| c.is_alphanumeric()).unwrap_or(false)
        && !after.map(|c| c.is_alphanumeric()).unwrap_or(false)
}
