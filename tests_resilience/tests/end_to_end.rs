//! End-to-End Policy Tests
//!
//! Drives the service through complete administrator scenarios and checks
//! what the device would observe: aggregates, wipes, alarms, notifications
//! and enforcement pushes.

use core_types::PolicyCapability::*;
use core_types::UserId;
use policy::{GlobalProxy, PasswordComposition, PasswordQuality};
use services_device_policy::config::DAY_MS;
use services_device_policy::{AdminEvent, Delivery, PolicyError, RemovalOutcome};
use tests_resilience::{admin, caps, memory_harness, START};

const OWNER: UserId = UserId::OWNER;

/// Test: Two administrators, strictest wins, wipe once, revert on removal
///
/// This validates that:
/// 1. Password length aggregates to the stricter of the two values
/// 2. The wipe fires exactly once, on the attempt that crosses the threshold
/// 3. Only watch-login administrators hear about failed attempts
/// 4. A pending removal keeps contributing until acknowledged
/// 5. After removal the aggregates fall back to the remaining administrator
#[test]
fn test_two_admins_wipe_and_removal() {
    let h = memory_harness();
    let a = admin("com.alpha", "Admin");
    let b = admin("com.beta", "Admin");

    h.service
        .set_active_admin(OWNER, a.clone(), caps(&[LimitPassword]), false)
        .expect("Failed to activate A");
    h.service
        .set_active_admin(OWNER, b.clone(), caps(&[LimitPassword, WipeData, WatchLogin]), false)
        .expect("Failed to activate B");

    h.service
        .set_password_minimum_length(OWNER, &a, 6)
        .expect("Failed to set A length");
    h.service
        .set_password_minimum_length(OWNER, &b, 10)
        .expect("Failed to set B length");
    h.service
        .set_maximum_failed_passwords_for_wipe(OWNER, &b, 5)
        .expect("Failed to set wipe threshold");

    assert_eq!(h.service.password_minimum_length(OWNER, None).unwrap(), 10);
    assert_eq!(h.service.maximum_failed_passwords_for_wipe(OWNER, None).unwrap(), 5);

    for attempt in 1..=4 {
        h.service
            .report_failed_password_attempt(OWNER)
            .expect("Failed to report attempt");
        assert!(h.device.wipes().is_empty(), "wiped after {} attempts", attempt);
    }
    h.service
        .report_failed_password_attempt(OWNER)
        .expect("Failed to report attempt");
    assert_eq!(h.device.wipes(), vec![OWNER]);
    assert_eq!(h.service.current_failed_password_attempts(OWNER).unwrap(), 5);

    let failed_to_b = h
        .device
        .events_for(&b)
        .into_iter()
        .filter(|e| *e == AdminEvent::PasswordFailed)
        .count();
    assert_eq!(failed_to_b, 5);
    assert!(!h.device.events_for(&a).contains(&AdminEvent::PasswordFailed));

    let token = match h
        .service
        .remove_active_admin(OWNER, &b)
        .expect("Failed to begin removal")
    {
        RemovalOutcome::Pending(token) => token,
        RemovalOutcome::Removed => panic!("deferred delivery must leave the removal pending"),
    };
    assert_eq!(h.service.password_minimum_length(OWNER, None).unwrap(), 10);
    assert!(h.service.is_removing_admin(OWNER, &b).unwrap());

    h.service
        .acknowledge_removal(token)
        .expect("Failed to acknowledge removal");
    assert_eq!(h.service.password_minimum_length(OWNER, None).unwrap(), 6);
    assert_eq!(h.service.maximum_failed_passwords_for_wipe(OWNER, None).unwrap(), 0);
    assert_eq!(h.service.active_admins(OWNER).unwrap(), vec![a]);

    h.service
        .report_failed_password_attempt(OWNER)
        .expect("Failed to report attempt");
    assert_eq!(h.device.wipes().len(), 1);
}

/// Test: Password limits span the profile group, device toggles do not
#[test]
fn test_profile_group_aggregation() {
    let h = memory_harness();
    let work = UserId::new(10);
    h.device.add_profile(OWNER, work);

    let personal = admin("com.personal", "Admin");
    let managed = admin("com.work", "Admin");
    h.service
        .set_active_admin(OWNER, personal.clone(), caps(&[LimitPassword, ForceLock]), false)
        .expect("Failed to activate personal admin");
    h.service
        .set_active_admin(work, managed.clone(), caps(&[LimitPassword, ForceLock, DisableCamera]), false)
        .expect("Failed to activate work admin");

    h.service
        .set_password_minimum_length(OWNER, &personal, 4)
        .expect("Failed to set length");
    h.service
        .set_password_minimum_length(work, &managed, 9)
        .expect("Failed to set length");
    assert_eq!(h.service.password_minimum_length(OWNER, None).unwrap(), 9);
    assert_eq!(h.service.password_minimum_length(work, None).unwrap(), 9);

    h.service
        .set_maximum_time_to_lock(OWNER, &personal, 60_000)
        .expect("Failed to set lock timeout");
    h.service
        .set_maximum_time_to_lock(work, &managed, 30_000)
        .expect("Failed to set lock timeout");
    assert_eq!(h.service.maximum_time_to_lock(OWNER, None).unwrap(), 30_000);
    assert_eq!(h.device.max_time_to_lock(OWNER), Some(Some(30_000)));
    assert_eq!(h.device.max_time_to_lock(work), Some(Some(30_000)));

    h.service
        .set_camera_disabled(work, &managed, true)
        .expect("Failed to disable camera");
    assert!(h.service.camera_disabled(work, None).unwrap());
    assert!(!h.service.camera_disabled(OWNER, None).unwrap());
    assert_eq!(h.device.camera_disabled(work), Some(true));
}

/// Test: Expiration alarm, warning window, and clock restart on new password
#[test]
fn test_password_expiration_cycle() {
    let h = memory_harness();
    let mdm = admin("com.mdm", "Admin");
    h.service
        .set_active_admin(OWNER, mdm.clone(), caps(&[ExpirePassword]), false)
        .expect("Failed to activate admin");

    h.service
        .set_password_expiration_timeout(OWNER, &mdm, 10 * DAY_MS)
        .expect("Failed to set expiration");
    let expires = START.saturating_add(10 * DAY_MS);
    assert_eq!(h.service.password_expiration(OWNER, None).unwrap(), expires.as_millis());
    assert_eq!(h.device.alarm(OWNER), Some(START.saturating_add(DAY_MS)));

    // Outside the grace period nothing is sent.
    h.clock.set(START.saturating_add(4 * DAY_MS));
    h.service
        .handle_password_expiration(OWNER)
        .expect("Failed to handle alarm");
    assert!(!h.device.events_for(&mdm).contains(&AdminEvent::PasswordExpiring));

    h.clock.set(START.saturating_add(6 * DAY_MS));
    h.service
        .handle_password_expiration(OWNER)
        .expect("Failed to handle alarm");
    let warning = h
        .device
        .notifications()
        .into_iter()
        .find(|n| n.event == AdminEvent::PasswordExpiring)
        .expect("Failed to find expiration warning");
    assert_eq!(warning.admin, mdm);
    assert_eq!(
        warning.extras,
        vec![("expiration".to_string(), expires.as_millis().to_string())]
    );
    assert_eq!(h.device.alarm(OWNER), Some(START.saturating_add(7 * DAY_MS)));

    h.service
        .set_active_password_state(OWNER, PasswordComposition::measure("correct horse"))
        .expect("Failed to record password");
    let restarted = START.saturating_add(16 * DAY_MS);
    assert_eq!(h.service.password_expiration(OWNER, None).unwrap(), restarted.as_millis());

    h.service
        .set_password_expiration_timeout(OWNER, &mdm, 0)
        .expect("Failed to clear expiration");
    assert_eq!(h.device.alarm(OWNER), None);
}

/// Test: Reset password honours complexity and the password owner
#[test]
fn test_reset_password_rules() {
    let h = memory_harness();
    let first = admin("com.first", "Admin");
    let second = admin("com.second", "Admin");
    for who in [&first, &second] {
        h.service
            .set_active_admin(OWNER, who.clone(), caps(&[LimitPassword, ResetPassword]), false)
            .expect("Failed to activate admin");
    }
    h.service
        .set_password_quality(OWNER, &first, PasswordQuality::Complex)
        .expect("Failed to set quality");
    h.service
        .set_password_minimum_symbols(OWNER, &first, 2)
        .expect("Failed to set symbols");

    let err = h
        .service
        .reset_password(OWNER, &first, "abc1!", false)
        .expect_err("One symbol is not enough");
    assert!(matches!(err, PolicyError::PasswordRejected(_)));
    assert!(h.device.passwords().is_empty());

    h.service
        .reset_password(OWNER, &first, "abc1!!", true)
        .expect("Failed to reset password");
    assert_eq!(h.device.passwords(), vec![(OWNER, PasswordQuality::Complex)]);

    let err = h
        .service
        .reset_password(OWNER, &second, "xyz9##", false)
        .expect_err("Password is owned by the first admin");
    assert!(matches!(err, PolicyError::PasswordRejected(_)));

    h.service
        .report_successful_password_attempt(OWNER)
        .expect("Failed to report unlock");
    h.service
        .reset_password(OWNER, &second, "xyz9##", false)
        .expect("Failed to reset password after unlock");
    assert_eq!(h.device.passwords().len(), 2);
}

/// Test: The credential store can refuse a password
#[test]
fn test_credential_store_refusal() {
    let h = memory_harness();
    let mdm = admin("com.mdm", "Admin");
    h.service
        .set_active_admin(OWNER, mdm.clone(), caps(&[ResetPassword]), false)
        .expect("Failed to activate admin");
    h.device.reject_passwords(true);

    let err = h
        .service
        .reset_password(OWNER, &mdm, "whatever1", true)
        .expect_err("Credential store refused");
    assert!(matches!(err, PolicyError::PasswordRejected(_)));
    let record = h
        .service
        .active_admin_record(OWNER, &mdm)
        .expect("Failed to read record");
    assert!(record.is_some());
    assert!(h.service.dump().contains("com.mdm"));
}

/// Test: Releasing the global proxy by removing its holder
#[test]
fn test_global_proxy_released_on_removal() {
    let h = memory_harness();
    h.device.set_delivery(Delivery::Synchronous);
    let holder = admin("com.holder", "Admin");
    let other = admin("com.other", "Admin");
    for who in [&holder, &other] {
        h.service
            .set_active_admin(OWNER, who.clone(), caps(&[SetsGlobalProxy]), false)
            .expect("Failed to activate admin");
    }

    let proxy = GlobalProxy::new("proxy.example:8080").with_exclusion_list("*.internal");
    h.service
        .set_global_proxy(OWNER, &holder, Some(proxy.clone()))
        .expect("Failed to set proxy");
    assert_eq!(h.device.global_proxy(), Some(Some(proxy)));

    let err = h
        .service
        .set_global_proxy(OWNER, &other, Some(GlobalProxy::new("other:3128")))
        .expect_err("Proxy is held");
    assert!(matches!(err, PolicyError::ConflictingGlobalProxy(ref a) if *a == holder));

    assert_eq!(
        h.service
            .remove_active_admin(OWNER, &holder)
            .expect("Failed to remove holder"),
        RemovalOutcome::Removed
    );
    assert_eq!(h.device.global_proxy(), Some(None));
    assert_eq!(h.service.global_proxy_admin(OWNER).unwrap(), None);

    h.service
        .set_global_proxy(OWNER, &other, Some(GlobalProxy::new("other:3128")))
        .expect("Failed to set proxy after release");
    assert_eq!(h.service.global_proxy_admin(OWNER).unwrap(), Some(other));
}

/// Test: Overdue removals are forced once the acknowledgement timeout passes
#[test]
fn test_overdue_removal_is_forced() {
    let h = memory_harness();
    let slow = admin("com.slow", "Admin");
    h.service
        .set_active_admin(OWNER, slow.clone(), caps(&[]), false)
        .expect("Failed to activate admin");
    h.service
        .remove_active_admin(OWNER, &slow)
        .expect("Failed to begin removal");

    h.clock.advance(h.config.removal_ack_timeout_ms - 1);
    assert!(h.service.expire_pending_removals().unwrap().is_empty());

    h.clock.advance(1);
    assert_eq!(h.service.expire_pending_removals().unwrap(), vec![slow.clone()]);
    assert!(!h.service.is_admin_active(OWNER, &slow).unwrap());
}

/// Test: System ready pushes the owner user's persisted policy
#[test]
fn test_system_ready_pushes_enforcement() {
    let mut h = memory_harness();
    let mdm = admin("com.mdm", "Admin");
    h.service
        .set_active_admin(OWNER, mdm.clone(), caps(&[ForceLock, DisableCamera, EncryptedStorage]), false)
        .expect("Failed to activate admin");
    h.service
        .set_maximum_time_to_lock(OWNER, &mdm, 15_000)
        .expect("Failed to set lock timeout");
    h.service
        .set_camera_disabled(OWNER, &mdm, true)
        .expect("Failed to disable camera");
    assert!(h
        .service
        .set_storage_encryption(OWNER, &mdm, true)
        .expect("Failed to request encryption"));

    h.restart();
    h.device.clear_enforcement();
    assert_eq!(h.device.max_time_to_lock(OWNER), None);

    h.service.system_ready().expect("Failed to run system ready");
    assert_eq!(h.device.max_time_to_lock(OWNER), Some(Some(15_000)));
    assert_eq!(h.device.camera_disabled(OWNER), Some(true));
    assert_eq!(h.device.encryption_requested(), Some(true));
    assert_eq!(h.device.global_proxy(), Some(None));
}

/// Test: An unchanged screen lock limit is pushed only once
///
/// This validates that:
/// 1. Setting the same lock timeout twice pushes it once
/// 2. Changes that leave the lock limit alone do not push it
/// 3. A new limit and a restart both push again
#[test]
fn test_unchanged_lock_limit_is_pushed_once() {
    let mut h = memory_harness();
    let mdm = admin("com.mdm", "Admin");
    h.service
        .set_active_admin(OWNER, mdm.clone(), caps(&[ForceLock, DisableCamera]), false)
        .expect("Failed to activate admin");
    let base = h.device.max_time_to_lock_pushes(OWNER);

    for _ in 0..2 {
        h.service
            .set_maximum_time_to_lock(OWNER, &mdm, 20_000)
            .expect("Failed to set lock timeout");
    }
    assert_eq!(h.device.max_time_to_lock_pushes(OWNER), base + 1);
    assert_eq!(h.device.max_time_to_lock(OWNER), Some(Some(20_000)));

    h.service
        .set_camera_disabled(OWNER, &mdm, true)
        .expect("Failed to disable camera");
    assert_eq!(h.device.camera_disabled(OWNER), Some(true));
    assert_eq!(h.device.max_time_to_lock_pushes(OWNER), base + 1);

    h.service
        .set_maximum_time_to_lock(OWNER, &mdm, 25_000)
        .expect("Failed to set lock timeout");
    assert_eq!(h.device.max_time_to_lock_pushes(OWNER), base + 2);
    assert_eq!(h.device.max_time_to_lock(OWNER), Some(Some(25_000)));

    h.restart();
    h.service.system_ready().expect("Failed to run system ready");
    assert_eq!(h.device.max_time_to_lock_pushes(OWNER), base + 3);
}

/// Test: Lock task changes reach only owner administrators
#[test]
fn test_lock_task_notifications() {
    let h = memory_harness();
    let owner_admin = admin("com.mdm", "Admin");
    let plain = admin("com.plain", "Admin");
    for who in [&owner_admin, &plain] {
        h.service
            .set_active_admin(OWNER, who.clone(), caps(&[]), false)
            .expect("Failed to activate admin");
    }
    h.service
        .set_device_owner("com.mdm", "Acme")
        .expect("Failed to set device owner");
    h.service
        .set_lock_task_packages(OWNER, &owner_admin, vec!["com.kiosk".to_string()])
        .expect("Failed to set lock task packages");
    assert!(h.service.is_lock_task_permitted(OWNER, "com.kiosk").unwrap());
    assert!(!h.service.is_lock_task_permitted(OWNER, "com.other").unwrap());

    h.service
        .notify_lock_task_mode_changed(OWNER, true, "com.kiosk")
        .expect("Failed to notify");
    assert!(h.device.events_for(&owner_admin).contains(&AdminEvent::LockTaskChanged));
    assert!(!h.device.events_for(&plain).contains(&AdminEvent::LockTaskChanged));
}
