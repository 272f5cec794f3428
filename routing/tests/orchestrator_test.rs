//! Integration tests for the Phase Orchestrator
//!
//! Drives leads through route → cascade → respond/escalate against the
//! in-memory ledger, a scripted lock manager and a manual clock.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{agent_id, event_date, lead, roster, start, Harness, RecordingNotifier};
use lead_routing::{
    Collaborators, ConfigError, InMemoryLockManager, MemoryLedger, Phase, PhaseOrchestrator,
    ResponseStatus, RosterAgent, RoutingConfig, RoutingError, RoutingEvent, RoutingLedger,
    RoutingState, SharedLedger, StaticRoster, TransitionOutcome,
};

fn ids(agents: &[String]) -> Vec<&str> {
    agents.iter().map(String::as_str).collect()
}

/// Test: five eligible agents, exclusive lock succeeds
#[tokio::test]
async fn test_route_enters_exclusive_with_top_agent() {
    let h = Harness::new(5);
    h.add_lead("L1");

    let result = h.orchestrator.route_lead("L1").await.unwrap();

    assert_eq!(result.phase, RoutingState::Exclusive);
    assert_eq!(ids(&result.assigned_agents), vec!["a1"]);
    assert_eq!(result.exclusive_until, Some(start() + Duration::minutes(15)));
    assert_eq!(result.next_phase_at, result.exclusive_until);

    let lead = h.ledger.get_lead("L1").unwrap();
    assert_eq!(lead.routing_state, RoutingState::Exclusive);
    assert_eq!(lead.routed_at, Some(start()));

    let assignments = h.ledger.assignments_for_lead("L1").unwrap();
    assert_eq!(assignments.len(), 1);
    assert!(assignments[0].is_pending_exclusive());
    assert_eq!(assignments[0].routing_score_at_assignment, 99.0);
    assert_eq!(assignments[0].notified_at, Some(start()));
    assert_eq!(h.locks.holder("a1").as_deref(), Some("L1"));
    assert_eq!(h.notifier.sent_to(), vec!["a1"]);
}

/// Test: nobody eligible sends the lead straight to concierge
#[tokio::test]
async fn test_no_eligible_agents_goes_to_concierge() {
    let h = Harness::new(5);
    let mut elsewhere = lead("L2");
    elsewhere.city = "Anchorage".into();
    h.ledger.insert_lead(elsewhere).unwrap();
    let mut events = h.orchestrator.events().subscribe();

    let result = h.orchestrator.route_lead("L2").await.unwrap();

    assert_eq!(result.phase, RoutingState::Concierge);
    assert!(result.assigned_agents.is_empty());
    assert_eq!(h.state_of("L2"), RoutingState::Concierge);
    assert!(h.ledger.assignments_for_lead("L2").unwrap().is_empty());
    assert!(h.locks.lock_calls.lock().unwrap().is_empty());

    match events.try_recv().unwrap() {
        RoutingEvent::ConciergeEscalation { lead_id, from, .. } => {
            assert_eq!(lead_id, "L2");
            assert_eq!(from, RoutingState::Pending);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Test: window elapses with no response, lead moves to tier expansion
#[tokio::test]
async fn test_cascade_from_exclusive_to_tier_expansion() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();

    h.clock.advance(Duration::minutes(15));
    let outcome = h.orchestrator.transition_to_next_phase("L1").await.unwrap();

    let TransitionOutcome::Advanced(result) = outcome else {
        panic!("expected advance, got {outcome:?}");
    };
    let expires = start() + Duration::minutes(45);
    assert_eq!(result.phase, RoutingState::TierExpansion);
    assert_eq!(ids(&result.assigned_agents), vec!["a2", "a3", "a4"]);
    assert_eq!(result.exclusive_until, None);
    assert_eq!(result.next_phase_at, Some(expires));

    assert!(h.locks.holder("a1").is_none(), "exclusive lock released");
    for agent in ["a2", "a3", "a4"] {
        assert_eq!(h.locks.holder(agent).as_deref(), Some("L1"));
    }

    let assignments = h.ledger.assignments_for_lead("L1").unwrap();
    let exclusive: Vec<_> = assignments.iter().filter(|a| a.phase == Phase::Exclusive).collect();
    assert_eq!(exclusive.len(), 1);
    assert_eq!(exclusive[0].response_status, ResponseStatus::Ignored);

    let tier: Vec<_> = assignments
        .iter()
        .filter(|a| a.phase == Phase::TierExpansion)
        .collect();
    assert_eq!(tier.len(), 3);
    assert!(tier.iter().all(|a| !a.is_exclusive));
    assert!(tier.iter().all(|a| a.phase_expires_at == Some(expires)));
    assert_eq!(h.state_of("L1"), RoutingState::TierExpansion);
}

/// Test: only one of three tier locks is granted
#[tokio::test]
async fn test_tier_expansion_keeps_partial_locks() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    h.locks.refuse(&["a3", "a4"]);

    h.clock.advance(Duration::minutes(15));
    let outcome = h.orchestrator.transition_to_next_phase("L1").await.unwrap();

    let TransitionOutcome::Advanced(result) = outcome else {
        panic!("expected advance, got {outcome:?}");
    };
    assert_eq!(result.phase, RoutingState::TierExpansion);
    assert_eq!(ids(&result.assigned_agents), vec!["a2"]);

    let tier = h
        .ledger
        .assignments_for_lead("L1")
        .unwrap()
        .into_iter()
        .filter(|a| a.phase == Phase::TierExpansion)
        .count();
    assert_eq!(tier, 1);
}

/// Test: refused exclusive lock falls through to tier expansion
#[tokio::test]
async fn test_refused_exclusive_falls_through() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.locks.refuse(&["a1"]);

    let result = h.orchestrator.route_lead("L1").await.unwrap();

    assert_eq!(result.phase, RoutingState::TierExpansion);
    assert_eq!(ids(&result.assigned_agents), vec!["a2", "a3"]);
    assert!(h
        .ledger
        .assignments_for_lead("L1")
        .unwrap()
        .iter()
        .all(|a| !a.is_exclusive));
}

/// Test: every lock refused falls through to broadcast
#[tokio::test]
async fn test_all_locks_refused_falls_to_broadcast() {
    let h = Harness::new(2);
    h.add_lead("L1");
    h.locks.refuse(&["a1", "a2"]);

    let result = h.orchestrator.route_lead("L1").await.unwrap();

    assert_eq!(result.phase, RoutingState::Broadcast);
    assert_eq!(ids(&result.assigned_agents), vec!["a1", "a2"]);
    assert_eq!(result.next_phase_at, None);

    let assignments = h.ledger.assignments_for_lead("L1").unwrap();
    assert!(assignments.iter().all(|a| a.phase_expires_at.is_none()));
    assert_eq!(
        h.orchestrator.transition_to_next_phase("L1").await.unwrap(),
        TransitionOutcome::NoFurtherPhase
    );
}

/// Test: broadcast is capped at the configured agent count
#[tokio::test]
async fn test_broadcast_respects_max_agents() {
    let h = Harness::new(14);
    h.add_lead("L1");
    let refused: Vec<String> = (1..=14).map(agent_id).collect();
    let refused: Vec<&str> = refused.iter().map(String::as_str).collect();
    h.locks.refuse(&refused);

    let result = h.orchestrator.route_lead("L1").await.unwrap();

    assert_eq!(result.phase, RoutingState::Broadcast);
    assert_eq!(result.assigned_agents.len(), 10);
    assert_eq!(result.assigned_agents[0], "a1");
}

/// Test: a decline blocks the cascade
#[tokio::test]
async fn test_transition_is_noop_after_decline() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    h.orchestrator
        .record_response("L1", "a1", ResponseStatus::Declined)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(20));
    let outcome = h.orchestrator.transition_to_next_phase("L1").await.unwrap();

    assert!(matches!(outcome, TransitionOutcome::Aborted { .. }));
    assert_eq!(h.state_of("L1"), RoutingState::Exclusive);
    assert_eq!(h.ledger.assignments_for_lead("L1").unwrap().len(), 1);
}

/// Test: acceptance frees the other tier agents' calendars
#[tokio::test]
async fn test_accept_releases_sibling_locks() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    h.clock.advance(Duration::minutes(15));
    h.orchestrator.transition_to_next_phase("L1").await.unwrap();

    let accepted = h
        .orchestrator
        .record_response("L1", "a3", ResponseStatus::Accepted)
        .await
        .unwrap();

    assert_eq!(accepted.response_status, ResponseStatus::Accepted);
    assert_eq!(accepted.responded_at, Some(start() + Duration::minutes(15)));
    assert_eq!(h.locks.holder("a3").as_deref(), Some("L1"));
    assert!(h.locks.holder("a2").is_none());
    assert!(h.locks.holder("a4").is_none());

    h.clock.advance(Duration::minutes(30));
    let outcome = h.orchestrator.transition_to_next_phase("L1").await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Aborted { .. }));
    assert_eq!(h.state_of("L1"), RoutingState::TierExpansion);
}

/// Test: a response to an exited phase is rejected
#[tokio::test]
async fn test_response_on_superseded_phase_rejected() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    h.clock.advance(Duration::minutes(15));
    h.orchestrator.transition_to_next_phase("L1").await.unwrap();

    let err = h
        .orchestrator
        .record_response("L1", "a1", ResponseStatus::Accepted)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RoutingError::PhaseSuperseded {
            phase: Phase::Exclusive,
            ..
        }
    ));
}

/// Test: pending cannot be recorded as a response
#[tokio::test]
async fn test_pending_response_rejected() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();

    let err = h
        .orchestrator
        .record_response("L1", "a1", ResponseStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, RoutingError::InvalidResponse(ResponseStatus::Pending)));
}

/// Test: routing preconditions
#[tokio::test]
async fn test_route_preconditions() {
    let h = Harness::new(5);

    let err = h.orchestrator.route_lead("missing").await.unwrap_err();
    assert!(matches!(err, RoutingError::LeadNotFound(id) if id == "missing"));

    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    let err = h.orchestrator.route_lead("L1").await.unwrap_err();
    assert!(matches!(
        err,
        RoutingError::AlreadyRouted {
            state: RoutingState::Exclusive,
            ..
        }
    ));
}

/// Test: a lead claimed by an upstream router is still routable
#[tokio::test]
async fn test_routing_state_is_routable() {
    let h = Harness::new(5);
    let mut claimed = lead("L1");
    claimed.routing_state = RoutingState::Routing;
    h.ledger.insert_lead(claimed).unwrap();

    let result = h.orchestrator.route_lead("L1").await.unwrap();
    assert_eq!(result.phase, RoutingState::Exclusive);
}

/// Test: unrouted and terminal leads are not cascaded
#[tokio::test]
async fn test_transition_outcomes_for_non_phase_states() {
    let h = Harness::new(5);
    h.add_lead("L1");
    assert_eq!(
        h.orchestrator.transition_to_next_phase("L1").await.unwrap(),
        TransitionOutcome::NotRouted
    );

    h.orchestrator.escalate_to_concierge("L1", "vip").await.unwrap();
    assert_eq!(
        h.orchestrator.transition_to_next_phase("L1").await.unwrap(),
        TransitionOutcome::Terminal
    );
}

/// Test: cascading with nobody left escalates to concierge
#[tokio::test]
async fn test_exhausted_cascade_escalates() {
    let h = Harness::new(1);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    let mut events = h.orchestrator.events().subscribe();

    h.clock.advance(Duration::minutes(15));
    let outcome = h.orchestrator.transition_to_next_phase("L1").await.unwrap();

    assert_eq!(outcome, TransitionOutcome::Escalated);
    assert_eq!(h.state_of("L1"), RoutingState::Concierge);
    assert!(h.locks.holder("a1").is_none());

    let mut saw_escalation = false;
    while let Ok(event) = events.try_recv() {
        if let RoutingEvent::ConciergeEscalation { from, .. } = event {
            assert_eq!(from, RoutingState::Exclusive);
            saw_escalation = true;
        }
    }
    assert!(saw_escalation);
}

/// Test: notification failure never undoes an assignment
#[tokio::test]
async fn test_failed_notification_keeps_assignment() {
    let h = Harness::build(roster(5), RecordingNotifier::failing(), MemoryLedger::new());
    h.add_lead("L1");
    let mut events = h.orchestrator.events().subscribe();

    let result = h.orchestrator.route_lead("L1").await.unwrap();

    assert_eq!(result.phase, RoutingState::Exclusive);
    let assignments = h.ledger.assignments_for_lead("L1").unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].notified_at, None);

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RoutingEvent::NotificationFailed { agent_id, .. } = event {
            failed.push(agent_id);
        }
    }
    assert_eq!(failed, vec!["a1"]);
}

/// Test: concurrent routing of one lead leaves a single exclusive holder
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_route_same_lead() {
    let h = Harness::new(5);
    h.add_lead("L1");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move { orchestrator.route_lead("L1").await }));
    }

    let mut routed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => routed += 1,
            Err(RoutingError::AlreadyRouted { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(routed, 1);
    let pending_exclusive = h
        .ledger
        .assignments_for_lead("L1")
        .unwrap()
        .iter()
        .filter(|a| a.is_pending_exclusive())
        .count();
    assert_eq!(pending_exclusive, 1);
}

/// Test: different leads route in parallel without interfering
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_routes_across_leads() {
    let h = Harness::new(5);
    for i in 0..4 {
        h.add_lead(&format!("L{i}"));
    }

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.route_lead(&format!("L{i}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // All leads share one date, so each agent's slot is held at most once
    let mut holders = std::collections::HashSet::new();
    for i in 0..4 {
        for a in h.ledger.assignments_for_lead(&format!("L{i}")).unwrap() {
            if a.phase != Phase::Broadcast {
                assert!(holders.insert(a.agent_id.clone()), "{} double-booked", a.agent_id);
            }
        }
    }
}

/// Test: a state change written mid-flight aborts the cascade
#[tokio::test]
async fn test_stale_transition_commits_nothing() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    h.locks
        .escalate_on_next_lock(h.ledger.clone(), "L1", RoutingState::Exclusive);

    h.clock.advance(Duration::minutes(15));
    let err = h
        .orchestrator
        .transition_to_next_phase("L1")
        .await
        .unwrap_err();

    assert!(matches!(err, RoutingError::StaleTransition { .. }));
    assert_eq!(h.state_of("L1"), RoutingState::Concierge);
    let assignments = h.ledger.assignments_for_lead("L1").unwrap();
    assert_eq!(assignments.len(), 1, "no tier assignments committed");
    for agent in ["a2", "a3", "a4"] {
        assert!(h.locks.holder(agent).is_none(), "{agent} lock released");
    }
}

/// Test: manual escalation seals the phase and frees its locks
#[tokio::test]
async fn test_escalate_to_concierge() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();

    let result = h
        .orchestrator
        .escalate_to_concierge("L1", "customer called in")
        .await
        .unwrap();

    assert_eq!(result.phase, RoutingState::Concierge);
    assert_eq!(h.state_of("L1"), RoutingState::Concierge);
    assert!(h.locks.holder("a1").is_none());
    let assignments = h.ledger.assignments_for_lead("L1").unwrap();
    assert_eq!(assignments[0].response_status, ResponseStatus::Ignored);

    // Idempotent
    let again = h
        .orchestrator
        .escalate_to_concierge("L1", "again")
        .await
        .unwrap();
    assert_eq!(again.phase, RoutingState::Concierge);

    let err = h
        .orchestrator
        .record_response("L1", "a1", ResponseStatus::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(err, RoutingError::Terminal(_)));
}

/// Test: an accepted lead cannot be escalated
#[tokio::test]
async fn test_escalate_after_accept_rejected() {
    let h = Harness::new(5);
    h.add_lead("L1");
    h.orchestrator.route_lead("L1").await.unwrap();
    h.orchestrator
        .record_response("L1", "a1", ResponseStatus::Accepted)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .escalate_to_concierge("L1", "too late")
        .await
        .unwrap_err();

    assert!(matches!(err, RoutingError::AlreadyAccepted(_)));
    assert_eq!(h.state_of("L1"), RoutingState::Exclusive);
}

/// Test: cascading a lead whose window closed keeps another lead's hold on the slot
#[tokio::test]
async fn test_cascade_keeps_hold_taken_after_expiry() {
    let h = Harness::new(1);
    h.add_lead("L1");
    h.add_lead("L2");
    h.add_lead("L3");
    h.orchestrator.route_lead("L1").await.unwrap();

    // L1's exclusive hold lapses and L2 takes the same calendar slot
    h.clock.advance(Duration::minutes(16));
    let l2 = h.orchestrator.route_lead("L2").await.unwrap();
    assert_eq!(l2.phase, RoutingState::Exclusive);
    assert_eq!(h.locks.holder("a1").as_deref(), Some("L2"));

    let outcome = h.orchestrator.transition_to_next_phase("L1").await.unwrap();
    assert_eq!(outcome, TransitionOutcome::Escalated);
    assert_eq!(h.locks.holder("a1").as_deref(), Some("L2"));

    // L3 cannot get a1 exclusively while L2 holds the date
    let l3 = h.orchestrator.route_lead("L3").await.unwrap();
    assert_eq!(l3.phase, RoutingState::Broadcast);
    let exclusive_holders: Vec<String> = ["L1", "L2", "L3"]
        .iter()
        .flat_map(|id| h.ledger.assignments_for_lead(id).unwrap())
        .filter(|a| a.is_pending_exclusive())
        .map(|a| a.lead_id)
        .collect();
    assert_eq!(exclusive_holders, vec!["L2"]);
}

/// Test: escalating a lead after its window closed leaves the new holder alone
#[tokio::test]
async fn test_escalate_after_expiry_keeps_new_hold() {
    let h = Harness::new(1);
    h.add_lead("L1");
    h.add_lead("L2");
    h.orchestrator.route_lead("L1").await.unwrap();

    h.clock.advance(Duration::minutes(16));
    h.orchestrator.route_lead("L2").await.unwrap();
    h.orchestrator
        .escalate_to_concierge("L1", "customer called in")
        .await
        .unwrap();

    assert_eq!(h.state_of("L1"), RoutingState::Concierge);
    assert_eq!(h.locks.holder("a1").as_deref(), Some("L2"));
}

/// Test: an invalid routing configuration is refused at construction
#[tokio::test]
async fn test_orchestrator_rejects_invalid_config() {
    let collaborators = Collaborators::new(
        Arc::new(roster(3)),
        Arc::new(InMemoryLockManager::default()),
        Arc::new(RecordingNotifier::default()),
    );
    let ledger: SharedLedger = Arc::new(MemoryLedger::new());

    let empty_tier = RoutingConfig {
        max_tier_expansion_agents: 0,
        ..RoutingConfig::default()
    };
    let err = PhaseOrchestrator::new(empty_tier, ledger.clone(), collaborators.clone())
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let short_tier = RoutingConfig {
        exclusive_window_minutes: 20,
        tier_expansion_window_minutes: 10,
        ..RoutingConfig::default()
    };
    assert!(PhaseOrchestrator::new(short_tier, ledger.clone(), collaborators.clone()).is_err());

    assert!(PhaseOrchestrator::new(RoutingConfig::default(), ledger, collaborators).is_ok());
}

/// Test: agents blacked out on the event date are never offered the lead
#[tokio::test]
async fn test_blackout_agents_skipped() {
    let mut agents: Vec<RosterAgent> = roster(3).agents().to_vec();
    agents[0].blackout_dates = vec![event_date()];
    let h = Harness::build(
        StaticRoster::new(agents),
        RecordingNotifier::default(),
        MemoryLedger::new(),
    );
    h.add_lead("L1");

    let result = h.orchestrator.route_lead("L1").await.unwrap();
    assert_eq!(ids(&result.assigned_agents), vec!["a2"]);
}

/// Test: phase entry is published on the event bus
#[tokio::test]
async fn test_phase_entered_event() {
    let h = Harness::new(5);
    h.add_lead("L1");
    let mut events = h.orchestrator.events().subscribe();

    h.orchestrator.route_lead("L1").await.unwrap();

    let entered = std::iter::from_fn(|| events.try_recv().ok())
        .find(|e| e.event_type() == "phase_entered")
        .unwrap();
    match entered {
        RoutingEvent::PhaseEntered {
            phase,
            agents,
            expires_at,
            ..
        } => {
            assert_eq!(phase, Phase::Exclusive);
            assert_eq!(agents, vec!["a1"]);
            assert_eq!(expires_at, Some(start() + Duration::minutes(15)));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
