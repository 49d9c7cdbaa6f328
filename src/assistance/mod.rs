//! LLM assistance boundary
//!
//! Suggests offers and responses to a human player. The assistant only reads
//! snapshots; acting on a suggestion goes through the coordinator like any
//! other request, so a failing or slow provider can never touch game state.

pub mod context;
pub mod suggestion;

pub use context::{AssistanceContext, AssistanceKind};
pub use suggestion::{parse_offer, parse_response, SuggestedOffer, SuggestedResponse};

use crate::config::{AssistanceConfig, StageConfig};
use crate::error::AssistanceError;
use crate::negotiation::types::NegotiationSnapshot;
use crate::types::ParticipantId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Request handed to a provider
#[derive(Clone, Debug)]
pub struct AssistanceRequest {
    pub context: AssistanceContext,
    pub prompt: String,
}

/// Model backend. Returns the raw model text; parsing is done here.
#[async_trait]
pub trait AssistanceProvider: Send + Sync {
    async fn complete(&self, request: &AssistanceRequest) -> Result<String, AssistanceError>;
}

pub struct Assistant<P: ?Sized> {
    provider: Arc<P>,
    timeout: Duration,
}

impl<P: AssistanceProvider + ?Sized> Assistant<P> {
    pub fn new(provider: Arc<P>, config: &AssistanceConfig) -> Self {
        Self {
            provider,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub async fn suggest_offer(
        &self,
        snapshot: &NegotiationSnapshot,
        stage: &StageConfig,
        player: &ParticipantId,
    ) -> Result<SuggestedOffer, AssistanceError> {
        let raw = self.ask(snapshot, stage, player, AssistanceKind::Offer).await?;
        parse_offer(&raw, stage).map_err(|e| {
            tracing::warn!(participant = %player, "Unparseable offer suggestion");
            e
        })
    }

    pub async fn suggest_response(
        &self,
        snapshot: &NegotiationSnapshot,
        stage: &StageConfig,
        player: &ParticipantId,
    ) -> Result<SuggestedResponse, AssistanceError> {
        let raw = self.ask(snapshot, stage, player, AssistanceKind::Response).await?;
        parse_response(&raw).map_err(|e| {
            tracing::warn!(participant = %player, "Unparseable response suggestion");
            e
        })
    }

    async fn ask(
        &self,
        snapshot: &NegotiationSnapshot,
        stage: &StageConfig,
        player: &ParticipantId,
        kind: AssistanceKind,
    ) -> Result<String, AssistanceError> {
        let context = AssistanceContext::build(snapshot, stage, player, kind)?;
        let request = AssistanceRequest {
            prompt: context.prompt(stage),
            context,
        };

        tracing::debug!(participant = %player, kind = ?kind, "Requesting assistance");
        match tokio::time::timeout(self.timeout, self.provider.complete(&request)).await {
            Ok(result) => result,
            Err(_) => {
                let ms = self.timeout.as_millis() as u64;
                tracing::warn!(participant = %player, timeout_ms = ms, "Assistance timed out");
                Err(AssistanceError::Timeout(ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures;
    use crate::ledger::{ChipLedger, ParticipantLedgerEntry};
    use crate::negotiation::types::{NegotiationState, Offer, Transaction};
    use crate::types::{chip_map, ChipId, OfferId};
    use chrono::Utc;
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: Result<String, AssistanceError>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AssistanceProvider for ScriptedProvider {
        async fn complete(&self, request: &AssistanceRequest) -> Result<String, AssistanceError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }
    }

    fn snapshot(with_pending_offer: bool) -> NegotiationSnapshot {
        let mut ledger = ChipLedger::new();
        for name in ["alice", "bob"] {
            ledger.insert_if_absent(
                ParticipantId::from(name),
                ParticipantLedgerEntry::new(
                    chip_map([("red", 10), ("blue", 10), ("green", 10)]),
                    [(ChipId::from("red"), 0.3), (ChipId::from("blue"), 0.8)]
                        .into_iter()
                        .collect(),
                ),
            );
        }

        let mut state = NegotiationState {
            current_turn: Some(ParticipantId::from("bob")),
            ledger,
            ..Default::default()
        };
        if with_pending_offer {
            let offer = Offer {
                id: OfferId::generate(),
                round: 0,
                sender_id: ParticipantId::from("bob"),
                buy: chip_map([("red", 2)]),
                sell: chip_map([("blue", 1)]),
                timestamp: Utc::now(),
            };
            state
                .offers_by_round
                .entry(0)
                .or_default()
                .insert(ParticipantId::from("bob"), Transaction::new(offer));
        }

        NegotiationSnapshot {
            state,
            events: Vec::new(),
            version: 1,
        }
    }

    fn assistant(provider: Arc<ScriptedProvider>, timeout_ms: u64) -> Assistant<ScriptedProvider> {
        Assistant::new(provider, &AssistanceConfig { timeout_ms })
    }

    #[tokio::test]
    async fn test_suggest_offer() {
        let provider = ScriptedProvider::replying(
            r#"{"suggestedBuyType": "blue", "suggestedBuyQuantity": 2, "suggestedSellType": "red", "suggestedSellQuantity": 3, "reasoning": "blue is your best chip"}"#,
        );
        let stage = fixtures::stage(3);

        let offer = assistant(provider.clone(), 1_000)
            .suggest_offer(&snapshot(false), &stage, &ParticipantId::from("alice"))
            .await
            .unwrap();

        assert_eq!(offer.buy_chip, ChipId::from("blue"));
        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("red $0.30"));
        assert!(prompts[0].contains("bob holds"));
    }

    #[tokio::test]
    async fn test_suggest_response_needs_pending_offer() {
        let provider = ScriptedProvider::replying(r#"{"response": true}"#);
        let stage = fixtures::stage(3);
        let assistant = assistant(provider, 1_000);
        let alice = ParticipantId::from("alice");

        assert_eq!(
            assistant.suggest_response(&snapshot(false), &stage, &alice).await,
            Err(AssistanceError::NoPendingOffer)
        );
        // the sender gets no advice on their own offer
        assert_eq!(
            assistant
                .suggest_response(&snapshot(true), &stage, &ParticipantId::from("bob"))
                .await,
            Err(AssistanceError::NoPendingOffer)
        );

        let advice = assistant.suggest_response(&snapshot(true), &stage, &alice).await.unwrap();
        assert!(advice.accept);
    }

    #[tokio::test]
    async fn test_malformed_output_surfaces_raw_text() {
        let provider = ScriptedProvider::replying("Buy low, sell high!");
        let stage = fixtures::stage(3);

        let err = assistant(provider, 1_000)
            .suggest_offer(&snapshot(false), &stage, &ParticipantId::from("alice"))
            .await
            .unwrap_err();

        assert_eq!(err.raw_output(), Some("Buy low, sell high!"));
    }

    #[tokio::test]
    async fn test_provider_timeout() {
        let provider = Arc::new(ScriptedProvider {
            reply: Ok("{}".to_string()),
            delay: Duration::from_secs(5),
            prompts: Mutex::new(Vec::new()),
        });
        let stage = fixtures::stage(3);

        let result = assistant(provider, 20)
            .suggest_offer(&snapshot(false), &stage, &ParticipantId::from("alice"))
            .await;

        assert_eq!(result, Err(AssistanceError::Timeout(20)));
    }

    #[tokio::test]
    async fn test_unknown_player() {
        let provider = ScriptedProvider::replying("{}");
        let stage = fixtures::stage(3);
        let mallory = ParticipantId::from("mallory");

        let result = assistant(provider, 1_000)
            .suggest_offer(&snapshot(false), &stage, &mallory)
            .await;

        assert_eq!(result, Err(AssistanceError::UnknownParticipant(mallory)));
    }
}
