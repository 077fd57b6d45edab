//! Per-tick step assembly
//!
//! Rare actions queue up in arrival order. Each tick takes at most K of them
//! from the front; anything beyond that stays queued for the next tick, so
//! an action is delayed under load but never lost.

use log::{debug, warn};
use shared::{FormatError, Input, RareAction, StepLayout, StepPacket, Tick};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct StepAggregator {
    layout: StepLayout,
    pending: VecDeque<RareAction>,
}

/// Actions taken for one tick, and how many had to wait for a later one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drained {
    pub actions: Vec<RareAction>,
    pub carried: usize,
}

impl StepAggregator {
    pub fn new(layout: StepLayout) -> Self {
        Self {
            layout,
            pending: VecDeque::new(),
        }
    }

    pub fn layout(&self) -> &StepLayout {
        &self.layout
    }

    /// Queues `action` unless it could not be carried by a step of this layout.
    pub fn queue(&mut self, action: RareAction) -> Result<(), FormatError> {
        if let Err(e) = action.validate(&self.layout) {
            warn!("Dropping rare action {:?}: {}", action, e);
            return Err(e);
        }
        self.pending.push_back(action);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Takes up to K queued actions, oldest first.
    pub fn drain(&mut self) -> Drained {
        let take = self.pending.len().min(self.layout.max_actions);
        let actions: Vec<RareAction> = self.pending.drain(..take).collect();
        let carried = self.pending.len();
        if carried > 0 {
            debug!(
                "Rare action overflow: {} sent, {} carried to the next tick",
                actions.len(),
                carried
            );
        }
        Drained { actions, carried }
    }

    /// Builds the step for `tick` from collected inputs and queued actions.
    ///
    /// On error the queue is left as it was.
    pub fn aggregate(&mut self, tick: Tick, inputs: Vec<Input>) -> Result<StepPacket, FormatError> {
        if inputs.len() != self.layout.slots {
            return Err(FormatError::InputCount {
                expected: self.layout.slots,
                actual: inputs.len(),
            });
        }
        let Drained { actions, .. } = self.drain();
        StepPacket::new(tick, inputs, actions.clone(), &self.layout).inspect_err(|_| {
            for action in actions.into_iter().rev() {
                self.pending.push_front(action);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> StepAggregator {
        StepAggregator::new(StepLayout::new(2, 4))
    }

    #[test]
    fn test_overflow_carries_to_next_tick() {
        let mut agg = aggregator();
        agg.queue(RareAction::PlayerJoin(0)).unwrap();
        agg.queue(RareAction::PlayerJoin(1)).unwrap();
        for payload in 0..3 {
            agg.queue(RareAction::custom(0x10, payload).unwrap()).unwrap();
        }

        let first = agg.aggregate(1, vec![Input::NEUTRAL; 2]).unwrap();
        assert_eq!(first.actions().len(), 4);
        assert_eq!(agg.pending(), 1);

        let second = agg.aggregate(2, vec![Input::NEUTRAL; 2]).unwrap();
        assert_eq!(
            second.actions(),
            &[RareAction::Custom {
                opcode: 0x10,
                payload: 2
            }]
        );
        assert_eq!(agg.pending(), 0);
    }

    #[test]
    fn test_actions_keep_arrival_order() {
        let mut agg = aggregator();
        agg.queue(RareAction::PlayerLeave(1)).unwrap();
        agg.queue(RareAction::PlayerJoin(1)).unwrap();
        agg.queue(RareAction::Custom {
            opcode: 0x10,
            payload: 3,
        })
        .unwrap();

        let drained = agg.drain();
        assert_eq!(
            drained.actions,
            vec![
                RareAction::PlayerLeave(1),
                RareAction::PlayerJoin(1),
                RareAction::Custom {
                    opcode: 0x10,
                    payload: 3
                },
            ]
        );
        assert_eq!(drained.carried, 0);
    }

    #[test]
    fn test_nothing_lost_under_sustained_load() {
        let mut agg = aggregator();
        let mut sent = Vec::new();
        for tick in 1..=10u64 {
            for i in 0..3u8 {
                agg.queue(RareAction::custom(0x10, tick as u8 * 3 + i).unwrap())
                    .unwrap();
            }
            sent.extend_from_slice(agg.aggregate(tick, vec![Input::NEUTRAL; 2]).unwrap().actions());
        }
        while agg.pending() > 0 {
            sent.extend(agg.drain().actions);
        }
        assert_eq!(sent.len(), 30);
    }

    #[test]
    fn test_empty_queue_yields_empty_step() {
        let mut agg = aggregator();
        let step = agg.aggregate(7, vec![Input([1, 1]), Input::NEUTRAL]).unwrap();
        assert_eq!(step.tick(), 7);
        assert!(step.actions().is_empty());
        assert_eq!(step.inputs()[0], Input([1, 1]));
    }

    #[test]
    fn test_failed_aggregate_keeps_queued_actions() {
        let mut agg = aggregator();
        agg.queue(RareAction::PlayerJoin(0)).unwrap();
        agg.queue(RareAction::PlayerJoin(1)).unwrap();

        assert_eq!(
            agg.aggregate(1, vec![Input::NEUTRAL; 1]),
            Err(FormatError::InputCount {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(agg.pending(), 2);

        let step = agg.aggregate(1, vec![Input::NEUTRAL; 2]).unwrap();
        assert_eq!(
            step.actions(),
            &[RareAction::PlayerJoin(0), RareAction::PlayerJoin(1)]
        );
    }

    #[test]
    fn test_unencodable_actions_not_queued() {
        let mut agg = aggregator();
        assert_eq!(
            agg.queue(RareAction::PlayerJoin(2)),
            Err(FormatError::SlotOutOfRange { slot: 2, slots: 2 })
        );
        assert_eq!(
            agg.queue(RareAction::Custom {
                opcode: 0x01,
                payload: 0
            }),
            Err(FormatError::ReservedOpcode(0x01))
        );
        assert_eq!(agg.pending(), 0);
    }
}
