//! 금액 표현 추출
//!
//! `$82 per barrel`, `$82/bbl`, `$3.10/MMBtu`, `$53 billion`, `US$1.2 million`,
//! `USD 500 million`, `40 dollars a barrel` 등을 `USD <금액> [규모] [per 단위]`로 정규화합니다.

use regex::{Captures, Regex};

const AMOUNT: &str = r"(\d[\d,]*(?:\.\d+)?)";
const SCALE: &str = r"(?:\s*(million|billion|trillion|mln|bln|bn|mn|m|b)\b)?";
const UNIT: &str = r"(?:\s*(?:/|per|a)\s*(barrel|bbl|mmbtu|mcf|tonne|ton|gallon)s?\b)?";

/// 금액 매처
#[derive(Debug, Clone)]
pub(crate) struct MoneyMatcher {
    symbol: Regex,
    words: Regex,
}

impl MoneyMatcher {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        // 1: amount, 2: scale, 3: unit
        let symbol = Regex::new(&format!(r"(?i)(?:US\$|\$|\bUSD\s?)\s?{AMOUNT}{SCALE}{UNIT}"))?;
        let words = Regex::new(&format!(r"(?i)\b{AMOUNT}{SCALE}\s*dollars?\b{UNIT}"))?;
        Ok(Self { symbol, words })
    }

    /// (원문, 정규화 값)을 등장 순서대로 반환
    pub(crate) fn find<'t>(&self, text: &'t str) -> Vec<(usize, &'t str, String)> {
        let mut found: Vec<(usize, &'t str, String)> = self
            .symbol
            .captures_iter(text)
            .chain(self.words.captures_iter(text))
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((whole.start(), whole.as_str().trim(), normalize(&caps)?))
            })
            .collect();

        found.sort_by_key(|(start, _, _)| *start);
        found
    }
}

fn normalize(caps: &Captures<'_>) -> Option<String> {
    let amount = caps.get(1)?.as_str().replace(',', "");
    let mut value = format!("USD {}", amount);

    if let Some(scale) = caps.get(2) {
        let scale = match scale.as_str().to_lowercase().as_str() {
            "million" | "mln" | "mn" | "m" => "million",
            "billion" | "bln" | "bn" | "b" => "billion",
            _ => "trillion",
        };
        value.push(' ');
        value.push_str(scale);
    }

    if let Some(unit) = caps.get(3) {
        let unit = match unit.as_str().to_lowercase().as_str() {
            "barrel" | "bbl" => "barrel",
            "mmbtu" => "MMBtu",
            "mcf" => "Mcf",
            "tonne" | "ton" => "tonne",
            _ => "gallon",
        };
        value.push_str(" per ");
        value.push_str(unit);
    }

    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(text: &str) -> Vec<String> {
        MoneyMatcher::new()
            .unwrap()
            .find(text)
            .into_iter()
            .map(|(_, _, v)| v)
            .collect()
    }

    #[test]
    fn test_price_per_barrel_forms() {
        assert_eq!(normalized("Brent hit $82 per barrel"), vec!["USD 82 per barrel"]);
        assert_eq!(normalized("WTI at $78.50/bbl"), vec!["USD 78.50 per barrel"]);
        assert_eq!(normalized("around 40 dollars a barrel"), vec!["USD 40 per barrel"]);
        assert_eq!(normalized("Henry Hub $3.10/MMBtu"), vec!["USD 3.10 per MMBtu"]);
    }

    #[test]
    fn test_deal_sizes() {
        assert_eq!(normalized("a $53 billion deal"), vec!["USD 53 billion"]);
        assert_eq!(normalized("US$1.2 million"), vec!["USD 1.2 million"]);
        assert_eq!(normalized("USD 500 million investment"), vec!["USD 500 million"]);
        assert_eq!(normalized("$1,250 million"), vec!["USD 1250 million"]);
    }

    #[test]
    fn test_volumes_are_not_money() {
        assert!(normalized("reduced by 2.2 million bpd").is_empty());
        assert!(normalized("$82 bpd").iter().all(|v| v == "USD 82"));
    }
}
