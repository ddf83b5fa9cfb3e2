//! End-to-end behaviour of the redirect manager against the fake netfilter

use hy2_common::PersistenceBackend;
use hy2_hopnat::{
    AddressFamily, FamilyOutcome, HopNatError, NatContext, PersistOutcome, PortRange, RedirectMgr,
    RedirectRule, SkipReason,
};
use hy2_test::{hopping_spec, unrelated_rules, ChainSnapshot, Family, FakeNetfilter, RuleVerifier};
use pretty_assertions::assert_eq;

const BOTH: [AddressFamily; 2] = AddressFamily::ALL;

fn ctx() -> NatContext {
    NatContext::default().with_persistence(PersistenceBackend::NetfilterPersistent)
}

fn range(start: u16, end: u16) -> PortRange {
    PortRange::new(start, end).unwrap()
}

fn v4_rule(start: u16, end: u16, target: u16) -> RedirectRule {
    RedirectRule::udp(AddressFamily::Ipv4, range(start, end), target).unwrap()
}

#[tokio::test]
async fn test_scenario_install_then_repeat() {
    let mut mgr = RedirectMgr::new(FakeNetfilter::new(), ctx());
    let rule = v4_rule(35000, 36000, 443);

    let first = mgr.ensure_present(&rule).await.unwrap();
    assert_eq!(first.outcome, FamilyOutcome::Inserted);
    assert_eq!(
        mgr.executor().rules(Family::V4),
        vec!["-p udp --dport 35000:36000 -j REDIRECT --to-ports 443".to_string()]
    );

    let second = mgr.ensure_present(&rule).await.unwrap();
    assert_eq!(second.outcome, FamilyOutcome::AlreadyPresent);
    RuleVerifier::new(mgr.executor())
        .assert_action_count("-A", 1)
        .unwrap();
}

#[tokio::test]
async fn test_second_ensure_present_issues_no_insert() {
    let mut mgr = RedirectMgr::new(FakeNetfilter::new(), ctx());
    let rule = v4_rule(20000, 50000, 443);

    mgr.ensure_present(&rule).await.unwrap();
    mgr.executor().clear_commands();
    mgr.ensure_present(&rule).await.unwrap();

    assert_eq!(mgr.executor().insert_count(), 0);
    assert_eq!(mgr.executor().action_count("-S"), 1);
}

#[tokio::test]
async fn test_ensure_absent_on_missing_rule_deletes_nothing() {
    let fake = FakeNetfilter::new().with_rule(Family::V4, unrelated_rules::OTHER_HOPPING);
    let mut mgr = RedirectMgr::new(fake, ctx());

    let change = mgr
        .ensure_absent(&v4_rule(35000, 36000, 443))
        .await
        .unwrap();

    assert_eq!(change.outcome, FamilyOutcome::AlreadyAbsent);
    assert_eq!(mgr.executor().delete_count(), 0);
    assert_eq!(mgr.executor().rules(Family::V4).len(), 1);
}

#[tokio::test]
async fn test_round_trip_leaves_unrelated_rules() {
    let fake = FakeNetfilter::new()
        .with_rule(Family::V4, unrelated_rules::DOCKER_JUMP)
        .with_rule(Family::V4, unrelated_rules::TCP_REDIRECT)
        .with_rule(Family::V4, unrelated_rules::IFACE_REDIRECT)
        .with_rule(Family::V6, unrelated_rules::OTHER_HOPPING);
    let before = ChainSnapshot::take(&fake);
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr.apply(range(35000, 36000), 443, &BOTH).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.outcome(AddressFamily::Ipv4),
        Some(FamilyOutcome::Inserted)
    );
    assert_eq!(
        report.outcome(AddressFamily::Ipv6),
        Some(FamilyOutcome::Inserted)
    );

    let report = mgr.remove(range(35000, 36000), 443, &BOTH).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.outcome(AddressFamily::Ipv4),
        Some(FamilyOutcome::Removed { count: 1 })
    );

    RuleVerifier::new(mgr.executor())
        .assert_unchanged_since(&before)
        .unwrap();
}

#[tokio::test]
async fn test_interface_scoped_rule_is_not_treated_as_present() {
    let fake = FakeNetfilter::new().with_rule(Family::V4, unrelated_rules::IFACE_REDIRECT);
    let mut mgr = RedirectMgr::new(fake, ctx());

    let change = mgr
        .ensure_present(&v4_rule(35000, 36000, 443))
        .await
        .unwrap();

    assert_eq!(change.outcome, FamilyOutcome::Inserted);
    assert_eq!(mgr.executor().rules(Family::V4).len(), 2);
}

#[tokio::test]
async fn test_ipv6_unsupported_falls_back_to_ipv4() {
    let fake = FakeNetfilter::new().without_ipv6_nat();
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr.apply(range(35000, 36000), 443, &BOTH).await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        report.outcome(AddressFamily::Ipv4),
        Some(FamilyOutcome::Inserted)
    );
    assert_eq!(
        report.outcome(AddressFamily::Ipv6),
        Some(FamilyOutcome::Skipped(SkipReason::Ipv6NatUnsupported))
    );
    assert_eq!(
        report.warnings(),
        vec!["IPv6 skipped: IPv6 NAT not supported".to_string()]
    );
    assert!(mgr.executor().rules(Family::V6).is_empty());
    // IPv4 saved once, skipped IPv6 not persisted
    assert_eq!(mgr.executor().save_count(), 1);
}

#[tokio::test]
async fn test_single_port_range() {
    let mut mgr = RedirectMgr::new(FakeNetfilter::new(), ctx());
    let rule = v4_rule(443, 443, 8443);
    assert_eq!(
        rule.spec(),
        "-p udp --dport 443:443 -j REDIRECT --to-ports 8443"
    );

    assert_eq!(
        mgr.ensure_present(&rule).await.unwrap().outcome,
        FamilyOutcome::Inserted
    );
    // Listed back as `--dport 443`, still recognized
    assert_eq!(
        mgr.ensure_present(&rule).await.unwrap().outcome,
        FamilyOutcome::AlreadyPresent
    );
    assert_eq!(
        mgr.executor()
            .rule_count(Family::V4, &hopping_spec(443, 443, 8443)),
        1
    );
}

#[tokio::test]
async fn test_ensure_absent_three_times() {
    let fake = FakeNetfilter::new().with_rule(Family::V4, &hopping_spec(35000, 36000, 443));
    let mut mgr = RedirectMgr::new(fake, ctx());
    let rule = v4_rule(35000, 36000, 443);

    let outcomes = [
        mgr.ensure_absent(&rule).await.unwrap().outcome,
        mgr.ensure_absent(&rule).await.unwrap().outcome,
        mgr.ensure_absent(&rule).await.unwrap().outcome,
    ];

    assert_eq!(
        outcomes,
        [
            FamilyOutcome::Removed { count: 1 },
            FamilyOutcome::AlreadyAbsent,
            FamilyOutcome::AlreadyAbsent,
        ]
    );
    assert_eq!(mgr.executor().delete_count(), 1);
}

#[tokio::test]
async fn test_ensure_absent_removes_duplicates() {
    let spec = hopping_spec(35000, 36000, 443);
    let fake = FakeNetfilter::new()
        .with_rule(Family::V4, &spec)
        .with_rule(Family::V4, unrelated_rules::DOCKER_JUMP)
        .with_rule(Family::V4, &spec)
        .with_rule(Family::V4, &spec);
    let mut mgr = RedirectMgr::new(fake, ctx());

    let change = mgr
        .ensure_absent(&v4_rule(35000, 36000, 443))
        .await
        .unwrap();

    assert_eq!(change.outcome, FamilyOutcome::Removed { count: 3 });
    assert_eq!(
        mgr.executor().rules(Family::V4),
        vec![unrelated_rules::DOCKER_JUMP.to_string()]
    );
}

#[tokio::test]
async fn test_delete_loop_is_bounded() {
    let fake = FakeNetfilter::new()
        .with_sticky_delete()
        .with_rule(Family::V4, &hopping_spec(35000, 36000, 443));
    let mut mgr = RedirectMgr::new(fake, ctx().with_max_delete_iterations(5));

    let err = mgr
        .ensure_absent(&v4_rule(35000, 36000, 443))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HopNatError::ConvergenceExceeded { iterations: 5, .. }
    ));
    assert_eq!(mgr.executor().delete_count(), 5);
    assert_eq!(mgr.executor().save_count(), 0);
}

#[tokio::test]
async fn test_ipv6_insert_failure_is_hard_but_ipv4_stands() {
    let fake = FakeNetfilter::new().with_failing_append(Family::V6);
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr.apply(range(35000, 36000), 443, &BOTH).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(
        report.outcome(AddressFamily::Ipv4),
        Some(FamilyOutcome::Inserted)
    );
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, AddressFamily::Ipv6);
    assert!(matches!(
        failures[0].1,
        HopNatError::InsertFailed { exit_code: 1, .. }
    ));
    assert_eq!(
        mgr.executor()
            .rule_count(Family::V4, &hopping_spec(35000, 36000, 443)),
        1
    );
}

#[tokio::test]
async fn test_persistence_failure_is_only_a_warning() {
    let fake = FakeNetfilter::new().with_failing_persistence();
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr
        .apply(range(35000, 36000), 443, &[AddressFamily::Ipv4])
        .await
        .unwrap();

    assert!(report.is_success());
    let Some(Ok(change)) = report.get(AddressFamily::Ipv4) else {
        panic!("IPv4 result missing");
    };
    assert_eq!(change.outcome, FamilyOutcome::Inserted);
    assert!(matches!(change.persistence, PersistOutcome::Failed { .. }));
    assert_eq!(report.warnings().len(), 1);
    assert_eq!(mgr.executor().rules(Family::V4).len(), 1);
}

#[tokio::test]
async fn test_already_present_still_persists() {
    let fake = FakeNetfilter::new().with_rule(Family::V4, &hopping_spec(35000, 36000, 443));
    let mut mgr = RedirectMgr::new(fake, ctx());

    let change = mgr
        .ensure_present(&v4_rule(35000, 36000, 443))
        .await
        .unwrap();

    assert_eq!(change.outcome, FamilyOutcome::AlreadyPresent);
    assert_eq!(change.persistence, PersistOutcome::Saved);
    assert_eq!(mgr.executor().insert_count(), 0);
}

#[tokio::test]
async fn test_missing_ip6tables_is_skipped() {
    let fake = FakeNetfilter::new().without_binary("ip6tables");
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr.apply(range(35000, 36000), 443, &BOTH).await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        report.outcome(AddressFamily::Ipv6),
        Some(FamilyOutcome::Skipped(SkipReason::ControllerUnavailable))
    );
    assert_eq!(mgr.executor().action_count("-L"), 0);
}

#[tokio::test]
async fn test_list_failure_is_hard() {
    let fake = FakeNetfilter::new().with_failing_list(Family::V4);
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr
        .apply(range(35000, 36000), 443, &[AddressFamily::Ipv4])
        .await
        .unwrap();

    assert!(!report.is_success());
    let failures: Vec<_> = report.failures().collect();
    assert!(matches!(failures[0].1, HopNatError::ListFailed { .. }));
    assert_eq!(mgr.executor().insert_count(), 0);
}

#[tokio::test]
async fn test_apply_rejects_zero_target() {
    let mut mgr = RedirectMgr::new(FakeNetfilter::new(), ctx());

    let err = mgr
        .apply(range(35000, 36000), 0, &BOTH)
        .await
        .unwrap_err();

    assert!(matches!(err, HopNatError::InvalidRule { .. }));
    assert!(mgr.executor().commands().is_empty());
}

#[tokio::test]
async fn test_no_persistence_backend() {
    let mut mgr = RedirectMgr::new(FakeNetfilter::new(), NatContext::default());

    let change = mgr
        .ensure_present(&v4_rule(35000, 36000, 443))
        .await
        .unwrap();

    assert_eq!(change.persistence, PersistOutcome::NotConfigured);
    assert_eq!(mgr.executor().save_count(), 0);
}

#[tokio::test]
async fn test_rule_vanishing_before_delete_is_already_absent() {
    let fake = FakeNetfilter::new()
        .with_racing_delete(Family::V4)
        .with_rule(Family::V4, &hopping_spec(35000, 36000, 443));
    let mut mgr = RedirectMgr::new(fake, ctx());

    let change = mgr
        .ensure_absent(&v4_rule(35000, 36000, 443))
        .await
        .unwrap();

    assert_eq!(change.outcome, FamilyOutcome::AlreadyAbsent);
    assert_eq!(change.persistence, PersistOutcome::Saved);
    assert_eq!(mgr.executor().delete_count(), 1);
    assert_eq!(mgr.executor().action_count("-C"), 2);
    assert!(mgr.executor().rules(Family::V4).is_empty());
}

#[tokio::test]
async fn test_check_error_is_not_treated_as_absent() {
    let fake = FakeNetfilter::new()
        .with_failing_check(Family::V4, 4)
        .with_rule(Family::V4, &hopping_spec(35000, 36000, 443));
    let mut mgr = RedirectMgr::new(fake, ctx());

    let err = mgr
        .ensure_absent(&v4_rule(35000, 36000, 443))
        .await
        .unwrap_err();

    assert!(matches!(err, HopNatError::CheckFailed { exit_code: 4, .. }));
    assert!(!err.is_soft());
    assert_eq!(mgr.executor().delete_count(), 0);
    assert_eq!(mgr.executor().save_count(), 0);
}

#[tokio::test]
async fn test_delete_error_is_hard_but_other_family_proceeds() {
    let spec = hopping_spec(35000, 36000, 443);
    let fake = FakeNetfilter::new()
        .with_failing_delete(Family::V4)
        .with_rule(Family::V4, &spec)
        .with_rule(Family::V6, &spec);
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr.remove(range(35000, 36000), 443, &BOTH).await.unwrap();

    assert!(!report.is_success());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, AddressFamily::Ipv4);
    assert!(matches!(
        failures[0].1,
        HopNatError::DeleteFailed { exit_code: 4, .. }
    ));
    assert_eq!(
        report.outcome(AddressFamily::Ipv6),
        Some(FamilyOutcome::Removed { count: 1 })
    );
    assert_eq!(mgr.executor().rule_count(Family::V4, &spec), 1);
    assert!(mgr.executor().rules(Family::V6).is_empty());
}

#[tokio::test]
async fn test_remove_skips_ipv6_without_nat_support() {
    let fake = FakeNetfilter::new()
        .without_ipv6_nat()
        .with_rule(Family::V4, &hopping_spec(35000, 36000, 443));
    let mut mgr = RedirectMgr::new(fake, ctx());

    let report = mgr.remove(range(35000, 36000), 443, &BOTH).await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        report.outcome(AddressFamily::Ipv4),
        Some(FamilyOutcome::Removed { count: 1 })
    );
    assert_eq!(
        report.outcome(AddressFamily::Ipv6),
        Some(FamilyOutcome::Skipped(SkipReason::Ipv6NatUnsupported))
    );
    // Only the IPv4 check-and-delete round plus its final check
    assert_eq!(mgr.executor().action_count("-C"), 2);
    assert_eq!(mgr.executor().save_count(), 1);
}

#[tokio::test]
async fn test_ensure_absent_skips_missing_ip6tables() {
    let fake = FakeNetfilter::new().without_binary("ip6tables");
    let mut mgr = RedirectMgr::new(fake, ctx());
    let rule = RedirectRule::udp(AddressFamily::Ipv6, range(35000, 36000), 443).unwrap();

    let change = mgr.ensure_absent(&rule).await.unwrap();

    assert_eq!(
        change.outcome,
        FamilyOutcome::Skipped(SkipReason::ControllerUnavailable)
    );
    assert_eq!(change.persistence, PersistOutcome::NotAttempted);
    assert_eq!(mgr.executor().action_count("-C"), 0);
    assert_eq!(mgr.executor().action_count("-L"), 0);
}
