//! Property-based test of ReorderList using proptest-state-machine
//!
//! Random sequences of drag, drop, keyboard moves and rollbacks run against
//! a plain `Vec<String>` reference. After every step the list must match the
//! reference order and positions must be dense.

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest};
use studyboard_api::{Ordered, Step};
use studyboard_core::reorder::{is_dense, move_index, ReorderList};

#[derive(Debug, Clone)]
pub struct ReferenceList {
    pub order: Vec<String>,
    /// (from, over) while an item is being dragged
    pub dragging: Option<(usize, usize)>,
    pub before_drop: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub enum ReorderTransition {
    PickUp { id: String },
    DragOver { index: usize },
    Drop,
    CancelDrag,
    MoveItem { id: String, to: usize },
    Rollback,
}

impl ReferenceList {
    fn index_of(&self, id: &str) -> usize {
        self.order.iter().position(|x| x == id).unwrap_or(0)
    }

    fn last(&self) -> usize {
        self.order.len().saturating_sub(1)
    }

    fn move_to(&mut self, from: usize, to: usize) {
        if from != to {
            self.before_drop = Some(self.order.clone());
            move_index(&mut self.order, from, to);
        }
    }
}

impl ReferenceStateMachine for ReferenceList {
    type State = Self;
    type Transition = ReorderTransition;

    fn init_state() -> BoxedStrategy<Self::State> {
        (1usize..8)
            .prop_map(|len| ReferenceList {
                order: (0..len).map(|i| format!("step-{}", i)).collect(),
                dragging: None,
                before_drop: None,
            })
            .boxed()
    }

    fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let ids = prop::sample::select(state.order.clone());
        let slots = 0..state.order.len() + 2;
        if state.dragging.is_some() {
            prop_oneof![
                3 => slots.prop_map(|index| ReorderTransition::DragOver { index }),
                2 => Just(ReorderTransition::Drop),
                1 => Just(ReorderTransition::CancelDrag),
            ]
            .boxed()
        } else {
            prop_oneof![
                3 => ids.clone().prop_map(|id| ReorderTransition::PickUp { id }),
                2 => (ids, slots).prop_map(|(id, to)| ReorderTransition::MoveItem { id, to }),
                1 => Just(ReorderTransition::Rollback),
            ]
            .boxed()
        }
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        let dragging = state.dragging.is_some();
        match transition {
            ReorderTransition::PickUp { id } | ReorderTransition::MoveItem { id, .. } => {
                !dragging && state.order.contains(id)
            }
            ReorderTransition::Rollback => !dragging,
            ReorderTransition::DragOver { .. }
            | ReorderTransition::Drop
            | ReorderTransition::CancelDrag => dragging,
        }
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            ReorderTransition::PickUp { id } => {
                let from = state.index_of(id);
                state.dragging = Some((from, from));
            }
            ReorderTransition::DragOver { index } => {
                let last = state.last();
                if let Some((_, over)) = state.dragging.as_mut() {
                    *over = (*index).min(last);
                }
            }
            ReorderTransition::Drop => {
                if let Some((from, over)) = state.dragging.take() {
                    state.move_to(from, over);
                }
            }
            ReorderTransition::CancelDrag => state.dragging = None,
            ReorderTransition::MoveItem { id, to } => {
                let from = state.index_of(id);
                let to = (*to).min(state.last());
                state.move_to(from, to);
            }
            ReorderTransition::Rollback => {
                if let Some(previous) = state.before_drop.take() {
                    state.order = previous;
                }
            }
        }
        state
    }
}

pub struct ReorderListTest {
    pub list: ReorderList<Step>,
}

impl StateMachineTest for ReorderListTest {
    type SystemUnderTest = Self;
    type Reference = ReferenceList;

    fn init_test(
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        let steps = ref_state
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| Step::new(id.as_str(), id.as_str(), "S1", i as i64 + 1))
            .collect();
        ReorderListTest {
            list: ReorderList::new(steps),
        }
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        let list = &mut state.list;
        match transition {
            ReorderTransition::PickUp { id } => list.pick_up(&id).unwrap(),
            ReorderTransition::DragOver { index } => list.drag_over(index).unwrap(),
            ReorderTransition::Drop => {
                let (from, over) = ref_state.dragging.unwrap();
                let positions = list.drop_item().unwrap();
                assert_eq!(positions.is_none(), from == over);
                if let Some(positions) = positions {
                    assert_eq!(positions.len(), list.items().len());
                }
            }
            ReorderTransition::CancelDrag => list.cancel_drag(),
            ReorderTransition::MoveItem { id, to } => {
                list.move_item(&id, to).unwrap();
            }
            ReorderTransition::Rollback => {
                assert_eq!(list.rollback(), ref_state.before_drop.is_some());
            }
        }
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        let ids: Vec<&str> = state.list.items().iter().map(|s| s.base.id.as_str()).collect();
        let expected: Vec<&str> = ref_state.order.iter().map(String::as_str).collect();
        assert_eq!(ids, expected);
        assert!(is_dense(state.list.items()));
        assert_eq!(state.list.is_dragging(), ref_state.dragging.is_some());
        let positions: Vec<i64> = state.list.items().iter().map(|s| s.order_position()).collect();
        assert_eq!(positions, (1..=ids.len() as i64).collect::<Vec<_>>());
    }
}

proptest_state_machine::prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn test_reorder_list_state_machine(sequential 1..40 => ReorderListTest);
}
