//! 엔티티 추출 모듈
//!
//! 기사 본문에서 조직, 지역, 금액 엔티티를 추출합니다.
//! - 조직/지역: 사전(gazetteer) 매칭
//! - 금액: 정규식 패턴 매칭 후 `USD ...` 형태로 정규화
//!
//! 같은 정규화 값의 반복 언급은 첫 등장 하나로 합칩니다.

mod gazetteer;
mod money;

use std::collections::HashSet;

pub use gazetteer::{EntityModel, BUILTIN_ENTITY_VERSION};

use gazetteer::Gazetteer;
use money::MoneyMatcher;

use crate::error::{NewsError, Result};
use crate::knowledge::{Entity, EntityKind};

/// 추출 대상 텍스트 최대 크기 (바이트)
pub const MAX_EXTRACT_BYTES: usize = 2 * 1024 * 1024;

// ============================================================================
// Entity Extractor
// ============================================================================

/// 엔티티 추출기
///
/// 로드 이후 불변이며 여러 스레드에서 동시에 사용할 수 있습니다.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    version: String,
    organizations: Gazetteer,
    locations: Gazetteer,
    money: MoneyMatcher,
}

impl EntityExtractor {
    /// 엔티티 모델로 추출기 생성
    pub fn new(model: &EntityModel) -> Result<Self> {
        let money = MoneyMatcher::new()
            .map_err(|e| NewsError::ModelUnavailable(format!("money pattern: {}", e)))?;

        Ok(Self {
            version: model.version.clone(),
            organizations: Gazetteer::new(&model.organizations)?,
            locations: Gazetteer::new(&model.locations)?,
            money,
        })
    }

    /// 내장 기본 모델로 생성
    pub fn builtin() -> Result<Self> {
        Self::new(&EntityModel::builtin())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 텍스트에서 엔티티 추출
    ///
    /// 결과는 첫 등장 순서이며 (kind, normalized) 기준으로 중복이 없습니다.
    /// 너무 큰 입력은 `ExtractionFailure`를 반환합니다. 호출자는 빈 집합으로 대체합니다.
    pub fn extract(&self, text: &str) -> Result<Vec<Entity>> {
        if text.len() > MAX_EXTRACT_BYTES {
            return Err(NewsError::ExtractionFailure(format!(
                "text too large ({} bytes, limit {})",
                text.len(),
                MAX_EXTRACT_BYTES
            )));
        }

        let mut found: Vec<(usize, Entity)> = Vec::new();

        for (kind, gazetteer) in [
            (EntityKind::Organization, &self.organizations),
            (EntityKind::Location, &self.locations),
        ] {
            for (offset, span, canonical) in gazetteer.find(text) {
                found.push((
                    offset,
                    Entity {
                        span: span.to_string(),
                        kind,
                        normalized: canonical.to_string(),
                    },
                ));
            }
        }

        for (offset, span, normalized) in self.money.find(text) {
            found.push((
                offset,
                Entity {
                    span: span.to_string(),
                    kind: EntityKind::MonetaryValue,
                    normalized,
                },
            ));
        }

        // 등장 순서 정렬 후 중복 제거
        found.sort_by_key(|(offset, _)| *offset);

        let mut seen: HashSet<(EntityKind, String)> = HashSet::new();
        let entities = found
            .into_iter()
            .map(|(_, entity)| entity)
            .filter(|e| seen.insert((e.kind, e.normalized.clone())))
            .collect();

        Ok(entities)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<Entity> {
        EntityExtractor::builtin().unwrap().extract(text).unwrap()
    }

    fn has(entities: &[Entity], normalized: &str, kind: EntityKind) -> bool {
        entities
            .iter()
            .any(|e| e.normalized == normalized && e.kind == kind)
    }

    #[test]
    fn test_opec_article_entities() {
        let entities = extract(
            "OPEC+ Maintains Production Cuts. OPEC+ agreed to extend production cuts through \
             Q1 2026, keeping output reduced by 2.2 million bpd. Saudi Arabia leads voluntary cuts.",
        );
        assert!(has(&entities, "OPEC+", EntityKind::Organization));
        assert!(has(&entities, "Saudi Arabia", EntityKind::Location));
        // "OPEC+"는 두 번 등장하지만 하나로 합쳐짐
        assert_eq!(entities.iter().filter(|e| e.normalized == "OPEC+").count(), 1);
        assert!(!entities.iter().any(|e| e.kind == EntityKind::MonetaryValue));
    }

    #[test]
    fn test_variants_deduplicate_to_canonical_form() {
        let entities = extract("Saudi  Arabia said... later SAUDI ARABIA and saudi arabia again");
        let locations: Vec<_> = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Location)
            .collect();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].normalized, "Saudi Arabia");
        assert_eq!(locations[0].span, "Saudi  Arabia");
    }

    #[test]
    fn test_lowercase_common_words_are_not_organizations() {
        let entities =
            extract("Drillers rely on shell rock; reliance on imports grew, santos said nothing.");
        assert!(!entities.iter().any(|e| e.kind == EntityKind::Organization));

        let entities = extract("Shell and Santos signed a supply deal.");
        assert!(has(&entities, "Shell", EntityKind::Organization));
        assert!(has(&entities, "Santos", EntityKind::Organization));
    }

    #[test]
    fn test_entities_in_order_of_appearance() {
        let entities = extract(
            "Chevron will pay $53 billion for Hess, gaining assets in Guyana and the Permian Basin.",
        );
        let normalized: Vec<&str> = entities.iter().map(|e| e.normalized.as_str()).collect();
        assert_eq!(
            normalized,
            vec!["Chevron", "USD 53 billion", "Hess", "Guyana", "Permian Basin"]
        );
    }

    #[test]
    fn test_money_duplicates_merge() {
        let entities = extract("Brent at $82/bbl, or $82 per barrel.");
        let money: Vec<_> = entities
            .iter()
            .filter(|e| e.kind == EntityKind::MonetaryValue)
            .collect();
        assert_eq!(money.len(), 1);
        assert_eq!(money[0].normalized, "USD 82 per barrel");
    }

    #[test]
    fn test_oversized_text_is_extraction_failure() {
        let extractor = EntityExtractor::builtin().unwrap();
        let huge = "a".repeat(MAX_EXTRACT_BYTES + 1);
        let err = extractor.extract(&huge).unwrap_err();
        assert!(matches!(err, NewsError::ExtractionFailure(_)));
    }

    #[test]
    fn test_empty_text() {
        assert!(extract("").is_empty());
    }
}
