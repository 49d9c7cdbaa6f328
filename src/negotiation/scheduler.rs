//! Turn scheduling: who offers next

use crate::types::{ParticipantId, StageId};
use blake2::{Blake2b512, Digest};

use super::types::{NegotiationState, TurnAdvance};

/// Stable pseudorandom ordering of participants for one stage.
///
/// Each participant is ranked by `Blake2b512(stage_seed || 0x00 || id)`, so
/// the order is reproducible for the same stage and differs across stages.
/// Not meant to be unpredictable.
pub fn compute_turn_order(participants: &[ParticipantId], stage_seed: &StageId) -> Vec<ParticipantId> {
    let mut ranked: Vec<([u8; 16], &ParticipantId)> = participants
        .iter()
        .map(|participant| (rank(stage_seed, participant), participant))
        .collect();
    ranked.sort();
    ranked.dedup_by(|a, b| a.1 == b.1);
    ranked.into_iter().map(|(_, p)| p.clone()).collect()
}

fn rank(stage_seed: &StageId, participant: &ParticipantId) -> [u8; 16] {
    let mut hasher = Blake2b512::new();
    hasher.update(stage_seed.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(participant.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// Move the turn pointer forward.
///
/// `turn_order` is the already-permuted list of active participants. The
/// first participant without an offer in the current round gets the turn;
/// if everyone has offered the round rolls over, and reaching `num_rounds`
/// ends the game.
pub fn advance(state: &mut NegotiationState, turn_order: &[ParticipantId], num_rounds: u32) -> TurnAdvance {
    if turn_order.is_empty() || state.is_game_over {
        return TurnAdvance::Unchanged;
    }

    let round = state.current_round;
    if let Some(next) = turn_order.iter().find(|p| !state.has_offered(round, p)) {
        if state.current_turn.as_ref() == Some(next) {
            return TurnAdvance::Unchanged;
        }
        state.current_turn = Some(next.clone());
        return TurnAdvance::Turn {
            round,
            participant: next.clone(),
        };
    }

    state.current_round += 1;
    if state.current_round >= num_rounds {
        state.is_game_over = true;
        state.current_turn = None;
        return TurnAdvance::GameOver;
    }

    let first = turn_order[0].clone();
    state.current_turn = Some(first.clone());
    TurnAdvance::NewRound {
        round: state.current_round,
        participant: first,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::types::{Offer, Transaction};
    use crate::types::{ChipMap, OfferId};
    use chrono::Utc;

    fn ids(names: &[&str]) -> Vec<ParticipantId> {
        names.iter().map(|n| ParticipantId::from(*n)).collect()
    }

    fn record_offer(state: &mut NegotiationState, round: u32, sender: &ParticipantId) {
        let offer = Offer {
            id: OfferId::generate(),
            round,
            sender_id: sender.clone(),
            buy: ChipMap::new(),
            sell: ChipMap::new(),
            timestamp: Utc::now(),
        };
        state
            .offers_by_round
            .entry(round)
            .or_default()
            .insert(sender.clone(), Transaction::new(offer));
    }

    #[test]
    fn test_turn_order_is_deterministic() {
        let participants = ids(&["alice", "bob", "carol", "dave"]);
        let seed = StageId::from("stage-1");

        let first = compute_turn_order(&participants, &seed);
        let mut reversed = participants.clone();
        reversed.reverse();
        let second = compute_turn_order(&reversed, &seed);

        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_turn_order_differs_across_stages() {
        let participants: Vec<ParticipantId> =
            (0..8).map(|i| ParticipantId::new(format!("p{}", i))).collect();

        let orders: Vec<_> = (0..5)
            .map(|i| compute_turn_order(&participants, &StageId::new(format!("stage-{}", i))))
            .collect();

        assert!(orders.iter().any(|order| order != &orders[0]));
    }

    #[test]
    fn test_turn_order_drops_duplicates() {
        let participants = ids(&["alice", "bob", "alice"]);
        let order = compute_turn_order(&participants, &StageId::from("s"));
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_advance_empty_is_noop() {
        let mut state = NegotiationState::new();
        assert_eq!(advance(&mut state, &[], 3), TurnAdvance::Unchanged);
        assert_eq!(state, NegotiationState::new());
    }

    #[test]
    fn test_advance_assigns_first_without_offer() {
        let order = ids(&["bob", "alice", "carol"]);
        let mut state = NegotiationState::new();

        assert_eq!(
            advance(&mut state, &order, 2),
            TurnAdvance::Turn {
                round: 0,
                participant: order[0].clone()
            }
        );

        record_offer(&mut state, 0, &order[0]);
        advance(&mut state, &order, 2);
        assert_eq!(state.current_turn, Some(order[1].clone()));
    }

    #[test]
    fn test_advance_rolls_round_and_ends_game() {
        let order = ids(&["bob", "alice"]);
        let mut state = NegotiationState::new();

        for participant in &order {
            record_offer(&mut state, 0, participant);
        }
        assert_eq!(
            advance(&mut state, &order, 2),
            TurnAdvance::NewRound {
                round: 1,
                participant: order[0].clone()
            }
        );
        assert_eq!(state.current_round, 1);

        for participant in &order {
            record_offer(&mut state, 1, participant);
        }
        assert_eq!(advance(&mut state, &order, 2), TurnAdvance::GameOver);
        assert!(state.is_game_over);
        assert_eq!(state.current_turn, None);
        assert_eq!(state.current_round, 2);

        // stays over
        assert_eq!(advance(&mut state, &order, 2), TurnAdvance::Unchanged);
        assert!(state.is_game_over);
    }
}
