//! Property-based tests for driver arbitration and the delay queue.
//!
//! These use proptest to check that net resolution is a pure function of the
//! set of drives and that queued activations always fire in (tick, insertion)
//! order.

use pinvm::delay_queue::{DelayQueue, Payload};
use pinvm::net::resolve_drives;
use pinvm::types::width_mask;
use pinvm::{ComponentId, Drive, DriveStrength, LogicState, PinIndex};
use proptest::prelude::*;

mod proptest_helpers {
    use super::*;

    pub fn arb_strength() -> impl Strategy<Value = DriveStrength> {
        prop_oneof![
            Just(DriveStrength::HighZ),
            Just(DriveStrength::Weak),
            Just(DriveStrength::Strong),
        ]
    }

    pub fn arb_drive() -> impl Strategy<Value = Drive> {
        (any::<u64>(), arb_strength()).prop_map(|(value, strength)| Drive { value, strength })
    }

    pub fn arb_width() -> impl Strategy<Value = u8> {
        1u8..=64
    }
}

use proptest_helpers::*;

mod resolution_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_resolution_is_deterministic(
            width in arb_width(),
            held in any::<u64>(),
            drives in prop::collection::vec(arb_drive(), 0..6),
        ) {
            let first = resolve_drives(width, held, drives.clone());
            let second = resolve_drives(width, held, drives);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn test_resolution_ignores_driver_order(
            width in arb_width(),
            held in any::<u64>(),
            (drives, shuffled) in prop::collection::vec(arb_drive(), 0..6)
                .prop_flat_map(|d| (Just(d.clone()), Just(d).prop_shuffle())),
        ) {
            prop_assert_eq!(
                resolve_drives(width, held, drives),
                resolve_drives(width, held, shuffled)
            );
        }

        #[test]
        fn test_strong_driver_overrides_weak(
            width in arb_width(),
            strong in any::<u64>(),
            weak in prop::collection::vec(any::<u64>(), 0..4),
        ) {
            let mut drives: Vec<Drive> = weak.into_iter().map(Drive::weak).collect();
            drives.push(Drive::strong(strong));
            let resolved = resolve_drives(width, 0, drives);

            prop_assert_eq!(resolved.value, strong & width_mask(width));
            prop_assert_eq!(resolved.contended, 0);
            prop_assert!(resolved
                .bits
                .iter()
                .all(|bit| bit.strength() == Some(DriveStrength::Strong)));
        }

        #[test]
        fn test_no_drivers_keeps_held_value(
            width in arb_width(),
            held in any::<u64>(),
            released in prop::collection::vec(any::<u64>(), 0..4),
        ) {
            let drives = released.into_iter().map(|value| Drive {
                value,
                strength: DriveStrength::HighZ,
            });
            let resolved = resolve_drives(width, held, drives);

            prop_assert_eq!(resolved.value, held & width_mask(width));
            prop_assert_eq!(resolved.bits.len(), width as usize);
            prop_assert!(resolved.bits.iter().all(|bit| *bit == LogicState::HighZ));
        }

        #[test]
        fn test_disagreeing_peers_contend(
            width in arb_width(),
            a in any::<u64>(),
            b in any::<u64>(),
        ) {
            let mask = width_mask(width);
            prop_assume!(a & mask != b & mask);
            let resolved = resolve_drives(width, 0, [Drive::strong(a), Drive::strong(b)]);

            prop_assert_eq!(resolved.value, mask);
            prop_assert_eq!(resolved.contended, (a ^ b) & mask);
            let contended_bits = resolved
                .bits
                .iter()
                .filter(|bit| **bit == LogicState::Contention)
                .count();
            prop_assert_eq!(contended_bits as u32, ((a ^ b) & mask).count_ones());
        }

        #[test]
        fn test_agreeing_peers_do_not_contend(width in arb_width(), value in any::<u64>()) {
            let resolved = resolve_drives(width, 0, [Drive::weak(value), Drive::weak(value)]);
            prop_assert_eq!(resolved.contended, 0);
            prop_assert_eq!(resolved.value, value & width_mask(width));
        }
    }
}

mod queue_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_pop_order_is_tick_then_insertion(
            entries in prop::collection::vec((0u64..20, 0u32..8), 0..40),
            now in 0u64..25,
        ) {
            let mut queue = DelayQueue::new();
            for (fire_tick, component) in &entries {
                queue.enqueue(ComponentId(*component), *fire_tick, None);
            }

            let ready = queue.pop_ready(now);
            let keys: Vec<(u64, u64)> = ready.iter().map(|e| (e.fire_tick, e.seq)).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(&keys, &sorted);

            let due = entries.iter().filter(|(tick, _)| *tick <= now).count();
            prop_assert_eq!(ready.len(), due);
            prop_assert_eq!(queue.len(), entries.len() - due);
            prop_assert!(queue.peek_next().map_or(true, |next| next > now));
        }

        #[test]
        fn test_same_tick_entries_keep_insertion_order(
            components in prop::collection::vec(0u32..16, 1..20),
            tick in 1u64..10,
        ) {
            let mut queue = DelayQueue::new();
            for (value, component) in components.iter().enumerate() {
                let payload = Payload { pin: PinIndex(0), value: value as u64 };
                queue.enqueue(ComponentId(*component), tick, Some(payload));
            }

            prop_assert!(queue.pop_ready(tick - 1).is_empty());
            let values: Vec<u64> = queue
                .pop_ready(tick)
                .iter()
                .filter_map(|e| e.payload.map(|p| p.value))
                .collect();
            let expected: Vec<u64> = (0..components.len() as u64).collect();
            prop_assert_eq!(values, expected);
        }
    }
}
