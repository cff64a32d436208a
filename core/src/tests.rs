//! End-to-end scenarios through the orchestrator against the fake backend

use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorKind, SpoofError};
use crate::history::HistoryFilter;
use crate::mac::MacAddress;
use crate::platform::StaticPrivilege;
use crate::spoofer::{MacAddressSpoofer, SpoofOptions};
use crate::testing::{FakeFailure, FakePlatform, PlatformCall};
use crate::transaction::{OperationKind, StepStatus, TransactionStatus};

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

fn three_interfaces() -> FakePlatform {
    FakePlatform::new()
        .with_interface("a", "00:00:00:00:00:0a")
        .with_interface("b", "00:00:00:00:00:0b")
        .with_interface("c", "00:00:00:00:00:0c")
}

fn spoofer(fake: &Arc<FakePlatform>) -> MacAddressSpoofer {
    MacAddressSpoofer::builder()
        .handler(fake.clone())
        .privilege(Arc::new(StaticPrivilege(true)))
        .build()
        .unwrap()
}

fn batch(entries: &[(&str, &str)]) -> Vec<(String, MacAddress)> {
    entries.iter().map(|(i, m)| (i.to_string(), mac(m))).collect()
}

/// Interfaces written to, in order
fn writes(fake: &FakePlatform) -> Vec<String> {
    fake.calls()
        .into_iter()
        .filter_map(|c| match c {
            PlatformCall::SetMac { interface, .. } => Some(interface),
            _ => None,
        })
        .collect()
}

fn no_rollback() -> SpoofOptions {
    SpoofOptions {
        auto_rollback: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_batch_commits_without_unwinding() {
    let fake = Arc::new(three_interfaces());
    let s = spoofer(&fake);

    let tx = s
        .spoof_batch(&batch(&[("a", "02:00:00:00:00:01"), ("b", "02:00:00:00:00:02")]))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Committed);
    assert!(tx.rollback.is_none());
    assert!(tx.steps.iter().all(|s| s.status == StepStatus::Verified));
    assert_eq!(writes(&fake), vec!["a", "b"]);
    assert_eq!(fake.mac_of("a"), Some(mac("02:00:00:00:00:01")));
    assert_eq!(fake.mac_of("b"), Some(mac("02:00:00:00:00:02")));
    assert!(tx.ensure_committed().is_ok());
}

#[tokio::test]
async fn test_last_step_failure_unwinds_in_reverse() {
    let fake = Arc::new(three_interfaces().fail_set("c", FakeFailure::Tool("device busy".into())));
    let s = spoofer(&fake);

    let tx = s
        .spoof_batch(&batch(&[
            ("a", "02:00:00:00:00:01"),
            ("b", "02:00:00:00:00:02"),
            ("c", "02:00:00:00:00:03"),
        ]))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::RolledBack);
    assert_eq!(writes(&fake), vec!["a", "b", "c", "b", "a"]);
    assert_eq!(fake.mac_of("a"), Some(mac("00:00:00:00:00:0a")));
    assert_eq!(fake.mac_of("b"), Some(mac("00:00:00:00:00:0b")));
    assert_eq!(fake.mac_of("c"), Some(mac("00:00:00:00:00:0c")));

    let report = tx.rollback.as_ref().unwrap();
    assert_eq!(report.attempted, vec!["b", "a"]);
    assert!(report.is_complete());
    assert_eq!(tx.error.as_ref().unwrap().kind, ErrorKind::ToolFailure);
    assert_eq!(tx.step("c").unwrap().status, StepStatus::Failed);
    assert!(matches!(
        tx.ensure_committed(),
        Err(SpoofError::TransactionFailed { .. })
    ));
}

#[tokio::test]
async fn test_middle_failure_stops_batch() {
    let fake = Arc::new(three_interfaces().fail_set("b", FakeFailure::PermissionDenied));
    let s = spoofer(&fake);

    let tx = s
        .spoof_batch(&batch(&[
            ("a", "02:00:00:00:00:01"),
            ("b", "02:00:00:00:00:02"),
            ("c", "02:00:00:00:00:03"),
        ]))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::RolledBack);
    assert_eq!(tx.step("a").unwrap().status, StepStatus::RolledBack);
    assert!(tx.step("c").is_none());
    assert!(!fake.calls().iter().any(|c| matches!(
        c,
        PlatformCall::ReadMac { interface } | PlatformCall::SetMac { interface, .. } if interface == "c"
    )));
    assert_eq!(fake.mac_of("a"), Some(mac("00:00:00:00:00:0a")));
}

#[tokio::test]
async fn test_middle_failure_without_auto_rollback_then_recover() {
    let fake = Arc::new(three_interfaces().fail_set("b", FakeFailure::Unsupported));
    let s = spoofer(&fake);

    let failed = s
        .spoof_batch_with(
            &batch(&[
                ("a", "02:00:00:00:00:01"),
                ("b", "02:00:00:00:00:02"),
                ("c", "02:00:00:00:00:03"),
            ]),
            no_rollback(),
        )
        .await
        .unwrap();

    assert_eq!(failed.status, TransactionStatus::Failed);
    assert!(failed.rollback.is_none());
    assert!(failed.step("c").is_none());
    assert_eq!(fake.mac_of("a"), Some(mac("02:00:00:00:00:01")));

    let recovery = s.recover(&failed.id).await.unwrap();
    assert_eq!(recovery.kind, OperationKind::Recover);
    assert_eq!(recovery.status, TransactionStatus::Committed);
    assert_eq!(recovery.recovers.as_deref(), Some(failed.id.as_str()));
    assert_eq!(recovery.interfaces(), vec!["a"]);
    assert_eq!(fake.mac_of("a"), Some(mac("00:00:00:00:00:0a")));

    assert!(matches!(
        s.recover(&failed.id).await,
        Err(SpoofError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_recover_by_short_id_and_refusals() {
    let fake = Arc::new(three_interfaces());
    let s = spoofer(&fake);

    let committed = s.spoof("a", mac("02:00:00:00:00:01")).await.unwrap();
    assert!(matches!(
        s.recover(&committed.id).await,
        Err(SpoofError::InvalidState(_))
    ));
    assert!(matches!(
        s.recover("ffffffff").await,
        Err(SpoofError::InvalidInput(_))
    ));

    fake.fail_set_to("b", mac("02:00:00:00:00:02"), FakeFailure::Tool("boom".into()));
    let failed = s
        .spoof_batch_with(
            &batch(&[("a", "02:00:00:00:00:0f"), ("b", "02:00:00:00:00:02")]),
            no_rollback(),
        )
        .await
        .unwrap();
    let recovery = s.recover(&failed.id[..8]).await.unwrap();
    assert!(recovery.is_committed());
    // back to the address a had before the failed batch, not the original
    assert_eq!(fake.mac_of("a"), Some(mac("02:00:00:00:00:01")));
}

#[tokio::test]
async fn test_failed_restore_leaves_partial() {
    let fake = Arc::new(three_interfaces().fail_set("c", FakeFailure::Tool("boom".into())));
    fake.fail_set_to("b", mac("00:00:00:00:00:0b"), FakeFailure::Tool("stuck".into()));
    let s = spoofer(&fake);

    let tx = s
        .spoof_batch(&batch(&[
            ("a", "02:00:00:00:00:01"),
            ("b", "02:00:00:00:00:02"),
            ("c", "02:00:00:00:00:03"),
        ]))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Partial);
    assert_eq!(tx.step("b").unwrap().status, StepStatus::RolledBackFailed);
    assert!(tx.step("b").unwrap().rollback_error.is_some());
    assert_eq!(fake.mac_of("a"), Some(mac("00:00:00:00:00:0a")));
    assert_eq!(fake.mac_of("b"), Some(mac("02:00:00:00:00:02")));

    match tx.ensure_committed() {
        Err(SpoofError::PartialRollbackFailure { interfaces, .. }) => {
            assert_eq!(interfaces, vec!["b"])
        }
        other => panic!("expected partial rollback failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_write_that_landed_before_error_is_unwound() {
    let fake = Arc::new(three_interfaces());
    fake.fail_after_write("a", mac("02:00:00:00:00:01"), FakeFailure::Tool("link did not come back".into()));
    let s = spoofer(&fake);

    let tx = s.spoof("a", mac("02:00:00:00:00:01")).await.unwrap();

    assert_eq!(tx.status, TransactionStatus::RolledBack);
    assert!(tx.steps[0].changed);
    assert_eq!(fake.mac_of("a"), Some(mac("00:00:00:00:00:0a")));
}

#[tokio::test]
async fn test_unreadable_interface_is_never_written() {
    let fake = Arc::new(three_interfaces());
    fake.fail_read("a", FakeFailure::NotFound);
    let s = spoofer(&fake);

    let tx = s.spoof("a", mac("02:00:00:00:00:01")).await.unwrap();

    assert!(tx.is_failed());
    assert_eq!(tx.steps[0].previous_mac, None);
    assert_eq!(tx.error.as_ref().unwrap().kind, ErrorKind::NotFound);
    assert!(writes(&fake).is_empty());
}

#[tokio::test]
async fn test_verification_disabled_commits_unverified() {
    let fake = Arc::new(three_interfaces());
    let s = spoofer(&fake);
    let options = SpoofOptions {
        verify: false,
        ..Default::default()
    };

    let tx = s.spoof_with("a", mac("02:00:00:00:00:01"), options).await.unwrap();

    assert!(tx.is_committed());
    assert_eq!(tx.steps[0].status, StepStatus::Applied);
    assert!(!tx.steps[0].verified);
}

#[tokio::test]
async fn test_concurrent_spoofs_on_one_interface_serialise() {
    let fake = Arc::new(three_interfaces());
    fake.set_delay(Duration::from_millis(30));
    let s = Arc::new(spoofer(&fake));

    let (first, second) = tokio::join!(
        s.spoof("a", mac("02:00:00:00:00:01")),
        s.spoof("a", mac("02:00:00:00:00:02")),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(first.is_committed() && second.is_committed());

    // whichever ran second saw the first one's address as its previous
    let (earlier, later) = if first.steps[0].previous_mac == Some(mac("00:00:00:00:00:0a")) {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!(earlier.steps[0].previous_mac, Some(mac("00:00:00:00:00:0a")));
    assert_eq!(later.steps[0].previous_mac, Some(earlier.steps[0].requested_mac));
    assert_eq!(fake.mac_of("a"), Some(later.steps[0].requested_mac));

    // read, write, verify for one transaction before the other starts
    let calls = fake.calls();
    assert_eq!(calls.len(), 6);
    assert!(matches!(calls[1], PlatformCall::SetMac { .. }));
    assert!(matches!(calls[4], PlatformCall::SetMac { .. }));
}

#[tokio::test]
async fn test_contention_times_out() {
    let fake = Arc::new(three_interfaces());
    fake.set_delay(Duration::from_millis(200));
    let s = MacAddressSpoofer::builder()
        .handler(fake.clone())
        .privilege(Arc::new(StaticPrivilege(true)))
        .lock_timeout(Some(Duration::from_millis(20)))
        .build()
        .unwrap();

    let (first, second) = tokio::join!(
        s.spoof("a", mac("02:00:00:00:00:01")),
        s.spoof("a", mac("02:00:00:00:00:02")),
    );
    let results = [first, second];
    let contended = results
        .iter()
        .filter(|r| matches!(r, Err(SpoofError::Contention { .. })))
        .count();
    assert_eq!(contended, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(writes(&fake).len(), 1);
}

#[tokio::test]
async fn test_different_interfaces_do_not_block() {
    let fake = Arc::new(three_interfaces());
    fake.set_delay(Duration::from_millis(100));
    let s = MacAddressSpoofer::builder()
        .handler(fake.clone())
        .privilege(Arc::new(StaticPrivilege(true)))
        .lock_timeout(Some(Duration::from_millis(20)))
        .build()
        .unwrap();

    let (a, b) = tokio::join!(
        s.spoof("a", mac("02:00:00:00:00:01")),
        s.spoof("b", mac("02:00:00:00:00:02")),
    );
    assert!(a.unwrap().is_committed());
    assert!(b.unwrap().is_committed());
}

#[tokio::test]
async fn test_spoof_then_restore() {
    let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
    let s = spoofer(&fake);

    let spoofed = s.spoof("eth0", mac("02:00:5e:10:00:00")).await.unwrap();
    assert!(spoofed.is_committed());
    assert_eq!(fake.mac_of("eth0"), Some(mac("02:00:5e:10:00:00")));

    let restored = s.restore("eth0").await.unwrap();
    assert!(restored.is_committed());
    assert_eq!(restored.kind, OperationKind::Restore);
    assert_eq!(restored.steps[0].previous_mac, Some(mac("02:00:5e:10:00:00")));
    assert_eq!(fake.mac_of("eth0"), Some(mac("00:11:22:33:44:55")));

    let history = s.history(&HistoryFilter::for_interface("eth0")).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, restored.id);
    assert_eq!(history[1].id, spoofed.id);
}

#[tokio::test]
async fn test_restore_original_skips_intermediate_addresses() {
    let fake = Arc::new(FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55"));
    let s = spoofer(&fake);

    s.spoof("eth0", mac("02:00:00:00:00:01")).await.unwrap();
    s.spoof("eth0", mac("02:00:00:00:00:02")).await.unwrap();

    let tx = s.restore_original("eth0").await.unwrap();
    assert_eq!(tx.kind, OperationKind::RestoreOriginal);
    assert!(tx.is_committed());
    assert_eq!(fake.mac_of("eth0"), Some(mac("00:11:22:33:44:55")));
}

#[tokio::test]
async fn test_failed_spoof_is_not_a_restore_point() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_interface("eth0", "00:11:22:33:44:55")
            .fail_set("eth0", FakeFailure::Tool("nope".into())),
    );
    let s = spoofer(&fake);

    let tx = s.spoof("eth0", mac("02:00:00:00:00:01")).await.unwrap();
    assert!(!tx.is_committed());
    assert!(matches!(
        s.restore("eth0").await,
        Err(SpoofError::NothingToRestore { .. })
    ));

    let stats = s.history_stats().unwrap();
    assert_eq!(stats.total, 1);
}
