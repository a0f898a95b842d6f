//! Stateful property testing for SchedulePolicy reconciliation.
//!
//! Random sequences of edits run against the in-memory authority, some of
//! them with an injected push failure. A failed edit must leave the local
//! copy deep-equal to what it was before the call; a successful one must
//! leave it equal to the reference model.

mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tokio::runtime::Runtime;

use cadence_policy::{
    AppGroup, Association, NewPolicy, OperationCode, OptionsPatch, PatternSpec, SchedulePolicy,
    ScheduleSelector, PolicyType,
};
use common::FakeAuthority;

const CLIENTS: [&str; 4] = ["fs01", "fs02", "db01", "db02"];
const APP_GROUPS: [&str; 3] = ["Protected Files", "Archived Files", "DB2"];
const SCHEDULES: [&str; 3] = ["hourly", "daily", "weekly"];

/// How the authority treats the next push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Reject,
    Drop,
}

#[derive(Debug, Clone)]
pub enum PolicyOperation {
    Associations {
        names: Vec<String>,
        op: OperationCode,
        fault: Fault,
    },
    AppGroups {
        names: Vec<String>,
        op: OperationCode,
        fault: Fault,
    },
    AddSchedule {
        name: String,
        fault: Fault,
    },
    DeleteSchedule {
        name: String,
        fault: Fault,
    },
}

impl PolicyOperation {
    fn fault(&self) -> Fault {
        match self {
            PolicyOperation::Associations { fault, .. }
            | PolicyOperation::AppGroups { fault, .. }
            | PolicyOperation::AddSchedule { fault, .. }
            | PolicyOperation::DeleteSchedule { fault, .. } => *fault,
        }
    }
}

/// What the policy should look like after the edits so far.
#[derive(Clone, Debug, Default)]
pub struct PolicyModel {
    pub clients: BTreeSet<String>,
    pub app_groups: BTreeSet<String>,
    pub schedules: Vec<String>,
}

fn apply_op(set: &mut BTreeSet<String>, names: &[String], op: OperationCode) {
    match op {
        OperationCode::Overwrite => *set = names.iter().cloned().collect(),
        OperationCode::Update | OperationCode::None => set.extend(names.iter().cloned()),
        OperationCode::Delete => {
            for name in names {
                set.remove(name);
            }
        }
    }
}

fn fault() -> impl Strategy<Value = Fault> {
    prop_oneof![
        4 => Just(Fault::None),
        1 => Just(Fault::Reject),
        1 => Just(Fault::Drop),
    ]
}

fn operation_code() -> impl Strategy<Value = OperationCode> {
    prop_oneof![
        Just(OperationCode::None),
        Just(OperationCode::Overwrite),
        Just(OperationCode::Update),
        Just(OperationCode::Delete),
    ]
}

fn names(pool: &'static [&'static str]) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(proptest::sample::select(pool), 0..4)
        .prop_map(|v| v.into_iter().map(str::to_string).collect())
}

impl ReferenceStateMachine for PolicyModel {
    type State = Self;
    type Transition = PolicyOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let edits = prop_oneof![
            3 => (names(&CLIENTS), operation_code(), fault())
                .prop_map(|(names, op, fault)| PolicyOperation::Associations { names, op, fault }),
            3 => (names(&APP_GROUPS), operation_code(), fault())
                .prop_map(|(names, op, fault)| PolicyOperation::AppGroups { names, op, fault }),
            2 => (proptest::sample::select(SCHEDULES.to_vec()), fault())
                .prop_map(|(name, fault)| PolicyOperation::AddSchedule { name: name.to_string(), fault }),
        ];

        if state.schedules.is_empty() {
            edits.boxed()
        } else {
            let existing = state.schedules.clone();
            prop_oneof![
                8 => edits,
                2 => (proptest::sample::select(existing), fault())
                    .prop_map(|(name, fault)| PolicyOperation::DeleteSchedule { name, fault }),
            ]
            .boxed()
        }
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        match transition {
            PolicyOperation::DeleteSchedule { name, .. } => state.schedules.contains(name),
            _ => true,
        }
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        if transition.fault() != Fault::None {
            return state;
        }
        match transition {
            PolicyOperation::Associations { names, op, .. } => {
                apply_op(&mut state.clients, names, *op)
            }
            PolicyOperation::AppGroups { names, op, .. } => {
                apply_op(&mut state.app_groups, names, *op)
            }
            PolicyOperation::AddSchedule { name, .. } => state.schedules.push(name.clone()),
            PolicyOperation::DeleteSchedule { name, .. } => {
                if let Some(i) = state.schedules.iter().position(|s| s == name) {
                    state.schedules.remove(i);
                }
            }
        }
        state
    }
}

/// Test harness holding a policy on the fake authority.
pub struct PolicyTestHarness {
    runtime: Runtime,
    fake: FakeAuthority,
    policy: SchedulePolicy,
}

impl PolicyTestHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        let fake = FakeAuthority::new();

        let policy = runtime.block_on(async {
            let mut registry = fake.registry().await;
            registry
                .add(NewPolicy::new("state-machine", PolicyType::DataProtection))
                .await
                .expect("Failed to create policy")
        });

        Self {
            runtime,
            fake,
            policy,
        }
    }

    fn apply_operation(&mut self, op: &PolicyOperation) {
        match op.fault() {
            Fault::None => {}
            Fault::Reject => self.fake.reject_next_push(9, "rejected by test"),
            Fault::Drop => self.fake.drop_next_push(),
        }

        let before = self.policy.snapshot().clone();
        let policy = &mut self.policy;
        let result = self.runtime.block_on(async {
            match op {
                PolicyOperation::Associations { names, op, .. } => {
                    let list = names.iter().map(Association::client).collect();
                    policy.update_associations(list, *op).await
                }
                PolicyOperation::AppGroups { names, op, .. } => {
                    let list = names.iter().map(AppGroup::new).collect();
                    policy.update_app_groups(list, *op).await
                }
                PolicyOperation::AddSchedule { name, .. } => {
                    policy
                        .add_schedule(name, PatternSpec::new(), &OptionsPatch::new())
                        .await
                }
                PolicyOperation::DeleteSchedule { name, .. } => {
                    policy
                        .delete_schedule(&ScheduleSelector::by_name(name.clone()))
                        .await
                }
            }
        });

        match op.fault() {
            Fault::None => assert!(result.is_ok(), "edit failed: {:?}", result),
            _ => {
                assert!(result.is_err(), "faulted edit succeeded");
                assert_eq!(self.policy.snapshot(), &before, "failed edit changed local state");
            }
        }
    }
}

impl StateMachineTest for PolicyTestHarness {
    type SystemUnderTest = Self;
    type Reference = PolicyModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        let clients: BTreeSet<String> = state
            .policy
            .associations()
            .iter()
            .filter_map(|a| a.client_name.clone())
            .collect();
        assert_eq!(clients, ref_state.clients);

        let app_groups: BTreeSet<String> = state
            .policy
            .app_groups()
            .iter()
            .map(|g| g.app_group_name.clone())
            .collect();
        assert_eq!(app_groups, ref_state.app_groups);

        let mut schedules: Vec<String> = state
            .policy
            .schedules()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        schedules.sort();
        let mut expected = ref_state.schedules.clone();
        expected.sort();
        assert_eq!(schedules, expected);

        // Every schedule the authority returned has been assigned an id.
        assert!(state.policy.schedules().iter().all(|s| s.id().is_some()));
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn policy_state_machine_test(sequential 1..25 => PolicyTestHarness);
}
