//! Structured assistant output

use crate::config::StageConfig;
use crate::error::AssistanceError;
use crate::types::{ChipId, ChipMap};
use serde::{Deserialize, Serialize};

/// A trade the assistant recommends proposing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuggestedOffer {
    pub buy_chip: ChipId,
    pub buy_quantity: u32,
    pub sell_chip: ChipId,
    pub sell_quantity: u32,
    pub reasoning: String,
}

impl SuggestedOffer {
    /// Buy and sell maps in the form `offer` takes
    pub fn into_maps(&self) -> (ChipMap, ChipMap) {
        let mut buy = ChipMap::new();
        buy.insert(self.buy_chip.clone(), self.buy_quantity);
        let mut sell = ChipMap::new();
        sell.insert(self.sell_chip.clone(), self.sell_quantity);
        (buy, sell)
    }
}

/// Accept/decline advice on a pending offer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuggestedResponse {
    pub accept: bool,
    pub feedback: String,
    pub reasoning: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOffer {
    suggested_buy_type: String,
    suggested_buy_quantity: u32,
    suggested_sell_type: String,
    suggested_sell_quantity: u32,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    trade_explanation: Option<String>,
}

#[derive(Deserialize)]
struct RawResponse {
    response: bool,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    reasoning: String,
}

/// Parse an offer suggestion. Anything that could not be turned into a
/// valid offer for this stage is `Malformed`, carrying the raw text.
pub fn parse_offer(raw: &str, stage: &StageConfig) -> Result<SuggestedOffer, AssistanceError> {
    let malformed = || AssistanceError::Malformed {
        raw: raw.to_string(),
    };

    let parsed: RawOffer = serde_json::from_str(json_body(raw)).map_err(|_| malformed())?;
    let buy_chip = resolve_chip(stage, &parsed.suggested_buy_type).ok_or_else(malformed)?;
    let sell_chip = resolve_chip(stage, &parsed.suggested_sell_type).ok_or_else(malformed)?;
    if buy_chip == sell_chip || parsed.suggested_buy_quantity == 0 || parsed.suggested_sell_quantity == 0 {
        return Err(malformed());
    }

    Ok(SuggestedOffer {
        buy_chip,
        buy_quantity: parsed.suggested_buy_quantity,
        sell_chip,
        sell_quantity: parsed.suggested_sell_quantity,
        reasoning: parsed
            .trade_explanation
            .or(parsed.reasoning)
            .unwrap_or_default(),
    })
}

pub fn parse_response(raw: &str) -> Result<SuggestedResponse, AssistanceError> {
    let parsed: RawResponse =
        serde_json::from_str(json_body(raw)).map_err(|_| AssistanceError::Malformed {
            raw: raw.to_string(),
        })?;

    Ok(SuggestedResponse {
        accept: parsed.response,
        feedback: parsed.feedback,
        reasoning: parsed.reasoning,
    })
}

/// Strip code fences or chatter around the JSON object
fn json_body(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    }
}

/// Models name chips by color; accept the id or the display name
fn resolve_chip(stage: &StageConfig, name: &str) -> Option<ChipId> {
    let name = name.trim();
    stage
        .chips
        .iter()
        .find(|chip| chip.id.as_str().eq_ignore_ascii_case(name) || chip.name.eq_ignore_ascii_case(name))
        .map(|chip| chip.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures;
    use crate::types::chip_map;

    #[test]
    fn test_parse_offer() {
        let stage = fixtures::stage(3);
        let raw = "```json\n{\"suggestedBuyType\": \"Blue\", \"suggestedBuyQuantity\": 3, \"suggestedSellType\": \"red\", \"suggestedSellQuantity\": 2, \"reasoning\": \"blue is worth more to you\", \"check\": \"ok\"}\n```";

        let offer = parse_offer(raw, &stage).unwrap();

        assert_eq!(offer.buy_chip, ChipId::from("blue"));
        assert_eq!(offer.sell_quantity, 2);
        assert_eq!(offer.reasoning, "blue is worth more to you");
        assert_eq!(
            offer.into_maps(),
            (chip_map([("blue", 3)]), chip_map([("red", 2)]))
        );
    }

    #[test]
    fn test_parse_offer_prefers_trade_explanation() {
        let stage = fixtures::stage(3);
        let raw = r#"{"suggestedBuyType": "green", "suggestedBuyQuantity": 1, "suggestedSellType": "red", "suggestedSellQuantity": 1, "reasoning": "internal", "tradeExplanation": "shown to player"}"#;

        assert_eq!(parse_offer(raw, &stage).unwrap().reasoning, "shown to player");
    }

    #[test]
    fn test_parse_offer_malformed_keeps_raw() {
        let stage = fixtures::stage(3);

        for raw in [
            "I think you should buy blue chips",
            r#"{"suggestedBuyType": "purple", "suggestedBuyQuantity": 1, "suggestedSellType": "red", "suggestedSellQuantity": 1}"#,
            r#"{"suggestedBuyType": "red", "suggestedBuyQuantity": 1, "suggestedSellType": "red", "suggestedSellQuantity": 1}"#,
            r#"{"suggestedBuyType": "blue", "suggestedBuyQuantity": 0, "suggestedSellType": "red", "suggestedSellQuantity": 1}"#,
        ] {
            let err = parse_offer(raw, &stage).unwrap_err();
            assert_eq!(err.raw_output(), Some(raw));
        }
    }

    #[test]
    fn test_parse_response() {
        let parsed = parse_response(r#"Sure: {"response": true, "feedback": "good deal"}"#).unwrap();
        assert!(parsed.accept);
        assert_eq!(parsed.feedback, "good deal");
        assert_eq!(parsed.reasoning, "");

        assert!(matches!(
            parse_response(r#"{"feedback": "missing answer"}"#),
            Err(AssistanceError::Malformed { .. })
        ));
    }
}
