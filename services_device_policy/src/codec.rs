//! Snapshot and owner-state encoding to the record tree
//!
//! Encoding is sparse: a field equal to its default is left out, and a
//! missing field decodes to its default. Decoding dispatches on the child
//! tag through a lookup table; tags without a decoder are skipped so older
//! builds can read records written by newer ones.

use core_types::{AdminIdentity, PolicyCapabilities, PolicyCapability, UserId};
use policy::{
    ActiveAdminRecord, GlobalProxy, KeyguardFeatures, PasswordComposition, PasswordLimit,
    PasswordQuality,
};
use tracing::{debug, warn};

use crate::persistence::{CodecError, RecordNode};
use crate::snapshot::{OwnerEntry, OwnerState, UserPolicySnapshot};

const POLICIES_ROOT: &str = "policies";
const OWNERS_ROOT: &str = "owners";

type AdminFieldDecoder = fn(&RecordNode, &mut ActiveAdminRecord) -> Result<(), CodecError>;
type SnapshotDecoder = fn(&RecordNode, &mut UserPolicySnapshot) -> Result<(), CodecError>;
type OwnerDecoder = fn(&RecordNode, &mut OwnerState) -> Result<(), CodecError>;

fn limit_tag(limit: PasswordLimit) -> &'static str {
    match limit {
        PasswordLimit::MinimumLength => "min-password-length",
        PasswordLimit::HistoryLength => "password-history-length",
        PasswordLimit::MinimumUpperCase => "min-password-uppercase",
        PasswordLimit::MinimumLowerCase => "min-password-lowercase",
        PasswordLimit::MinimumLetters => "min-password-letters",
        PasswordLimit::MinimumNumeric => "min-password-numeric",
        PasswordLimit::MinimumSymbols => "min-password-symbols",
        PasswordLimit::MinimumNonLetter => "min-password-nonletter",
    }
}

fn parse_identity(node: &RecordNode, attribute: &str) -> Result<AdminIdentity, CodecError> {
    let raw = node.require_attr(attribute)?;
    AdminIdentity::unflatten(raw).map_err(|_| node.invalid(attribute, raw))
}

fn parse_user(node: &RecordNode) -> Result<UserId, CodecError> {
    node.parse_attr::<u32>("user").map(UserId::new)
}

fn parse_quality(node: &RecordNode, attribute: &str) -> Result<PasswordQuality, CodecError> {
    let code: u32 = node.parse_attr(attribute)?;
    PasswordQuality::from_code(code).map_err(|_| node.invalid(attribute, &code.to_string()))
}

// ---------------------------------------------------------------------------
// Admin records
// ---------------------------------------------------------------------------

fn encode_admin(admin: &ActiveAdminRecord) -> RecordNode {
    let defaults = ActiveAdminRecord::new(admin.identity.clone(), PolicyCapabilities::new());
    let mut node = RecordNode::new("admin").with_attr("name", admin.identity.flatten());

    let mut uses = RecordNode::new("policies");
    for tag in admin.capabilities.tags() {
        uses.push(RecordNode::new("uses").with_attr("name", tag));
    }
    node.push(uses);

    if admin.password_quality != defaults.password_quality {
        node.push(RecordNode::value_node(
            "password-quality",
            admin.password_quality.code(),
        ));
    }
    for limit in PasswordLimit::ALL {
        if admin.limit(limit) != defaults.limit(limit) {
            node.push(RecordNode::value_node(limit_tag(limit), admin.limit(limit)));
        }
    }
    if admin.maximum_time_to_lock_ms != 0 {
        node.push(RecordNode::value_node(
            "max-time-to-unlock",
            admin.maximum_time_to_lock_ms,
        ));
    }
    if admin.maximum_failed_passwords_for_wipe != 0 {
        node.push(RecordNode::value_node(
            "max-failed-password-wipe",
            admin.maximum_failed_passwords_for_wipe,
        ));
    }
    if let Some(proxy) = &admin.global_proxy {
        node.push(RecordNode::value_node("global-proxy-spec", &proxy.spec));
        if let Some(list) = &proxy.exclusion_list {
            node.push(RecordNode::value_node("global-proxy-exclusion-list", list));
        }
    }
    if admin.password_expiration_timeout_ms != 0 {
        node.push(RecordNode::value_node(
            "password-expiration-timeout",
            admin.password_expiration_timeout_ms,
        ));
    }
    if admin.password_expiration_date_ms != 0 {
        node.push(RecordNode::value_node(
            "password-expiration-date",
            admin.password_expiration_date_ms,
        ));
    }
    if admin.encryption_requested {
        node.push(RecordNode::value_node("encryption-requested", true));
    }
    if admin.camera_disabled {
        node.push(RecordNode::value_node("disable-camera", true));
    }
    if !admin.disabled_keyguard_features.is_empty() {
        node.push(RecordNode::value_node(
            "disable-keyguard-features",
            admin.disabled_keyguard_features.bits(),
        ));
    }
    if !admin.disabled_account_types.is_empty() {
        let mut accounts = RecordNode::new("disable-account-management");
        for account in &admin.disabled_account_types {
            accounts.push(RecordNode::value_node("account-type", account));
        }
        node.push(accounts);
    }
    node
}

fn decode_uses(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    let mut caps = Vec::new();
    for child in &node.children {
        let tag = child.require_attr("name")?;
        match tag.parse::<PolicyCapability>() {
            Ok(cap) => caps.push(cap),
            Err(e) => warn!(admin = %admin.identity, error = %e, "skipping unknown policy"),
        }
    }
    admin.capabilities = caps.into_iter().collect();
    Ok(())
}

fn decode_quality(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    admin.password_quality = parse_quality(node, "value")?;
    Ok(())
}

fn decode_limit(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    let limit = PasswordLimit::ALL
        .into_iter()
        .find(|l| limit_tag(*l) == node.tag)
        .ok_or_else(|| node.invalid("tag", &node.tag))?;
    admin.set_limit(limit, node.value()?);
    Ok(())
}

fn decode_time_to_lock(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    admin.maximum_time_to_lock_ms = node.value()?;
    Ok(())
}

fn decode_failed_for_wipe(
    node: &RecordNode,
    admin: &mut ActiveAdminRecord,
) -> Result<(), CodecError> {
    admin.maximum_failed_passwords_for_wipe = node.value()?;
    Ok(())
}

fn decode_proxy_spec(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    let spec: String = node.value()?;
    let exclusion_list = admin.global_proxy.take().and_then(|p| p.exclusion_list);
    admin.global_proxy = Some(GlobalProxy {
        spec,
        exclusion_list,
    });
    Ok(())
}

fn decode_proxy_exclusions(
    node: &RecordNode,
    admin: &mut ActiveAdminRecord,
) -> Result<(), CodecError> {
    let list: String = node.value()?;
    match &mut admin.global_proxy {
        Some(proxy) => proxy.exclusion_list = Some(list),
        // The proxy address may follow; hold the list until it does.
        None => {
            admin.global_proxy = Some(GlobalProxy {
                spec: String::new(),
                exclusion_list: Some(list),
            })
        }
    }
    Ok(())
}

fn decode_expiration_timeout(
    node: &RecordNode,
    admin: &mut ActiveAdminRecord,
) -> Result<(), CodecError> {
    admin.password_expiration_timeout_ms = node.value()?;
    Ok(())
}

fn decode_expiration_date(
    node: &RecordNode,
    admin: &mut ActiveAdminRecord,
) -> Result<(), CodecError> {
    admin.password_expiration_date_ms = node.value()?;
    Ok(())
}

fn decode_encryption(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    admin.encryption_requested = node.value()?;
    Ok(())
}

fn decode_camera(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    admin.camera_disabled = node.value()?;
    Ok(())
}

fn decode_keyguard(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    admin.disabled_keyguard_features = KeyguardFeatures::from_bits(node.value()?);
    Ok(())
}

fn decode_accounts(node: &RecordNode, admin: &mut ActiveAdminRecord) -> Result<(), CodecError> {
    for child in node.children.iter().filter(|c| c.tag == "account-type") {
        admin.disabled_account_types.insert(child.value()?);
    }
    Ok(())
}

const ADMIN_FIELD_DECODERS: &[(&str, AdminFieldDecoder)] = &[
    ("policies", decode_uses),
    ("password-quality", decode_quality),
    ("min-password-length", decode_limit),
    ("password-history-length", decode_limit),
    ("min-password-uppercase", decode_limit),
    ("min-password-lowercase", decode_limit),
    ("min-password-letters", decode_limit),
    ("min-password-numeric", decode_limit),
    ("min-password-symbols", decode_limit),
    ("min-password-nonletter", decode_limit),
    ("max-time-to-unlock", decode_time_to_lock),
    ("max-failed-password-wipe", decode_failed_for_wipe),
    ("global-proxy-spec", decode_proxy_spec),
    ("global-proxy-exclusion-list", decode_proxy_exclusions),
    ("password-expiration-timeout", decode_expiration_timeout),
    ("password-expiration-date", decode_expiration_date),
    ("encryption-requested", decode_encryption),
    ("disable-camera", decode_camera),
    ("disable-keyguard-features", decode_keyguard),
    ("disable-account-management", decode_accounts),
];

fn decode_admin_record(node: &RecordNode) -> Result<ActiveAdminRecord, CodecError> {
    let identity = parse_identity(node, "name")?;
    let mut admin = ActiveAdminRecord::new(identity, PolicyCapabilities::new());
    for child in &node.children {
        match ADMIN_FIELD_DECODERS.iter().find(|(tag, _)| *tag == child.tag) {
            Some((_, decode)) => decode(child, &mut admin)?,
            None => debug!(admin = %admin.identity, tag = %child.tag, "skipping unknown admin tag"),
        }
    }
    Ok(admin)
}

// ---------------------------------------------------------------------------
// User snapshots
// ---------------------------------------------------------------------------

/// Encodes a user snapshot with root tag `policies`
pub fn encode_snapshot(snapshot: &UserPolicySnapshot) -> RecordNode {
    let mut root = RecordNode::new(POLICIES_ROOT);
    if let Some(provider) = &snapshot.restrictions_provider {
        root = root.with_attr("permission-provider", provider.flatten());
    }
    for admin in snapshot.admins.records() {
        root.push(encode_admin(admin));
    }
    if let Some(owner) = &snapshot.password_owner {
        root.push(RecordNode::value_node("password-owner", owner.flatten()));
    }
    if snapshot.failed_password_attempts != 0 {
        root.push(RecordNode::value_node(
            "failed-password-attempts",
            snapshot.failed_password_attempts,
        ));
    }
    let active = &snapshot.active_password;
    if *active != PasswordComposition::default() {
        root.push(
            RecordNode::new("active-password")
                .with_attr("quality", active.quality.code())
                .with_attr("length", active.length)
                .with_attr("uppercase", active.upper_case)
                .with_attr("lowercase", active.lower_case)
                .with_attr("letters", active.letters)
                .with_attr("numeric", active.numeric)
                .with_attr("symbols", active.symbols)
                .with_attr("nonletter", active.non_letter),
        );
    }
    for package in &snapshot.lock_task_packages {
        root.push(RecordNode::new("lock-task-component").with_attr("name", package));
    }
    root
}

fn decode_admin(node: &RecordNode, snapshot: &mut UserPolicySnapshot) -> Result<(), CodecError> {
    let admin = decode_admin_record(node)?;
    let identity = admin.identity.clone();
    if !snapshot.admins.restore(admin) {
        warn!(user = %snapshot.user(), admin = %identity, "skipping duplicate admin record");
    }
    Ok(())
}

fn decode_password_owner(
    node: &RecordNode,
    snapshot: &mut UserPolicySnapshot,
) -> Result<(), CodecError> {
    snapshot.password_owner = Some(parse_identity(node, "value")?);
    Ok(())
}

fn decode_failed_attempts(
    node: &RecordNode,
    snapshot: &mut UserPolicySnapshot,
) -> Result<(), CodecError> {
    snapshot.failed_password_attempts = node.value()?;
    Ok(())
}

fn decode_active_password(
    node: &RecordNode,
    snapshot: &mut UserPolicySnapshot,
) -> Result<(), CodecError> {
    snapshot.active_password = PasswordComposition {
        quality: parse_quality(node, "quality")?,
        length: node.parse_attr("length")?,
        upper_case: node.parse_attr("uppercase")?,
        lower_case: node.parse_attr("lowercase")?,
        letters: node.parse_attr("letters")?,
        numeric: node.parse_attr("numeric")?,
        symbols: node.parse_attr("symbols")?,
        non_letter: node.parse_attr("nonletter")?,
    };
    Ok(())
}

fn decode_lock_task(
    node: &RecordNode,
    snapshot: &mut UserPolicySnapshot,
) -> Result<(), CodecError> {
    let package = node.require_attr("name")?.to_string();
    if !snapshot.is_lock_task_permitted(&package) {
        snapshot.lock_task_packages.push(package);
    }
    Ok(())
}

const SNAPSHOT_DECODERS: &[(&str, SnapshotDecoder)] = &[
    ("admin", decode_admin),
    ("password-owner", decode_password_owner),
    ("failed-password-attempts", decode_failed_attempts),
    ("active-password", decode_active_password),
    ("lock-task-component", decode_lock_task),
];

/// Decodes a tree produced by [`encode_snapshot`]
pub fn decode_snapshot(user: UserId, root: &RecordNode) -> Result<UserPolicySnapshot, CodecError> {
    root.expect_tag(POLICIES_ROOT)?;
    let mut snapshot = UserPolicySnapshot::new(user);
    if root.attr("permission-provider").is_some() {
        snapshot.restrictions_provider = Some(parse_identity(root, "permission-provider")?);
    }
    for child in &root.children {
        match SNAPSHOT_DECODERS.iter().find(|(tag, _)| *tag == child.tag) {
            Some((_, decode)) => decode(child, &mut snapshot)?,
            None => warn!(%user, tag = %child.tag, "skipping unknown tag"),
        }
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Owner state
// ---------------------------------------------------------------------------

/// Encodes owner state with root tag `owners`
pub fn encode_owners(state: &OwnerState) -> RecordNode {
    let mut root = RecordNode::new(OWNERS_ROOT);
    if let Some(owner) = &state.device_owner {
        root.push(
            RecordNode::new("device-owner")
                .with_attr("package", &owner.package)
                .with_attr("name", &owner.name),
        );
    }
    for (user, owner) in &state.profile_owners {
        root.push(
            RecordNode::new("profile-owner")
                .with_attr("user", user.as_u32())
                .with_attr("package", &owner.package)
                .with_attr("name", &owner.name),
        );
    }
    if state.provisioned {
        root.push(RecordNode::value_node("provisioned", true));
    }
    for user in &state.setup_complete_users {
        root.push(RecordNode::new("setup-complete").with_attr("user", user.as_u32()));
    }
    root
}

fn owner_entry(node: &RecordNode) -> Result<OwnerEntry, CodecError> {
    Ok(OwnerEntry::new(
        node.require_attr("package")?,
        node.attr("name").unwrap_or_default(),
    ))
}

fn decode_device_owner(node: &RecordNode, state: &mut OwnerState) -> Result<(), CodecError> {
    state.device_owner = Some(owner_entry(node)?);
    Ok(())
}

fn decode_profile_owner(node: &RecordNode, state: &mut OwnerState) -> Result<(), CodecError> {
    state.profile_owners.insert(parse_user(node)?, owner_entry(node)?);
    Ok(())
}

fn decode_provisioned(node: &RecordNode, state: &mut OwnerState) -> Result<(), CodecError> {
    state.provisioned = node.value()?;
    Ok(())
}

fn decode_setup_complete(node: &RecordNode, state: &mut OwnerState) -> Result<(), CodecError> {
    state.setup_complete_users.insert(parse_user(node)?);
    Ok(())
}

const OWNER_DECODERS: &[(&str, OwnerDecoder)] = &[
    ("device-owner", decode_device_owner),
    ("profile-owner", decode_profile_owner),
    ("provisioned", decode_provisioned),
    ("setup-complete", decode_setup_complete),
];

/// Decodes a tree produced by [`encode_owners`]
pub fn decode_owners(root: &RecordNode) -> Result<OwnerState, CodecError> {
    root.expect_tag(OWNERS_ROOT)?;
    let mut state = OwnerState::default();
    for child in &root.children {
        match OWNER_DECODERS.iter().find(|(tag, _)| *tag == child.tag) {
            Some((_, decode)) => decode(child, &mut state)?,
            None => warn!(tag = %child.tag, "skipping unknown owner tag"),
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{parse, render};

    fn full_admin(name: &str) -> ActiveAdminRecord {
        let mut a = ActiveAdminRecord::new(AdminIdentity::new("com.mdm", name), PolicyCapabilities::all());
        a.password_quality = PasswordQuality::Complex;
        a.minimum_password_length = 12;
        a.password_history_length = 5;
        a.minimum_upper_case = 2;
        a.minimum_lower_case = 3;
        a.minimum_letters = 4;
        a.minimum_numeric = 0;
        a.minimum_symbols = 6;
        a.minimum_non_letter = 7;
        a.maximum_failed_passwords_for_wipe = 10;
        a.maximum_time_to_lock_ms = 60_000;
        a.password_expiration_timeout_ms = 86_400_000;
        a.password_expiration_date_ms = 1_700_000_000_000;
        a.encryption_requested = true;
        a.camera_disabled = true;
        a.disabled_keyguard_features = KeyguardFeatures::WIDGETS.union(KeyguardFeatures::TRUST_AGENTS);
        a.disabled_account_types.insert("com.mail".to_string());
        a.disabled_account_types.insert("com.chat".to_string());
        a.global_proxy =
            Some(GlobalProxy::new("proxy.example:3128").with_exclusion_list("*.local"));
        a
    }

    fn full_snapshot() -> UserPolicySnapshot {
        let mut snap = UserPolicySnapshot::new(UserId::new(10));
        snap.admins.restore(full_admin("Full"));
        snap.admins.restore(ActiveAdminRecord::new(
            AdminIdentity::new("com.other", "Plain"),
            PolicyCapabilities::new().with(PolicyCapability::WatchLogin),
        ));
        snap.failed_password_attempts = 3;
        let mut active = PasswordComposition::measure("Abcdef12!");
        active.quality = PasswordQuality::Complex;
        snap.active_password = active;
        snap.password_owner = Some(AdminIdentity::new("com.mdm", "Full"));
        snap.lock_task_packages = vec!["com.kiosk".to_string(), "com.app".to_string()];
        snap.restrictions_provider = Some(AdminIdentity::new("com.mdm", "Provider"));
        snap
    }

    #[test]
    fn test_snapshot_roundtrip_all_fields() {
        let snap = full_snapshot();
        let bytes = render(&encode_snapshot(&snap)).unwrap();
        let back = decode_snapshot(UserId::new(10), &parse(&bytes).unwrap()).unwrap();
        assert_eq!(back, snap);
        assert_eq!(
            back.admins.identities(),
            vec![
                AdminIdentity::new("com.mdm", "Full"),
                AdminIdentity::new("com.other", "Plain")
            ]
        );
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let snap = UserPolicySnapshot::new(UserId::OWNER);
        let node = encode_snapshot(&snap);
        assert!(node.children.is_empty());
        assert_eq!(decode_snapshot(UserId::OWNER, &node).unwrap(), snap);
    }

    #[test]
    fn test_enforcement_cache_is_not_encoded() {
        let mut snap = full_snapshot();
        let plain = render(&encode_snapshot(&snap)).unwrap();
        snap.last_max_time_to_lock = Some(Some(30_000));
        assert_eq!(render(&encode_snapshot(&snap)).unwrap(), plain);
        let back = decode_snapshot(UserId::new(10), &parse(&plain).unwrap()).unwrap();
        assert_eq!(back.last_max_time_to_lock, None);
    }

    #[test]
    fn test_sparse_encoding_omits_defaults() {
        let admin = ActiveAdminRecord::new(AdminIdentity::new("p", "A"), PolicyCapabilities::new());
        let node = encode_admin(&admin);
        let tags: Vec<&str> = node.children.iter().map(|c| c.tag.as_str()).collect();
        assert_eq!(tags, vec!["policies"]);
    }

    #[test]
    fn test_unknown_tags_are_skipped() {
        let root = RecordNode::new("policies")
            .with_child(RecordNode::new("from-the-future").with_attr("value", "1"))
            .with_child(
                RecordNode::new("admin")
                    .with_attr("name", "p/A")
                    .with_child(RecordNode::value_node("hologram-mode", true))
                    .with_child(RecordNode::value_node("min-password-length", 6)),
            );
        let snap = decode_snapshot(UserId::OWNER, &root).unwrap();
        let admin = snap.admins.get(&AdminIdentity::new("p", "A")).unwrap();
        assert_eq!(admin.minimum_password_length, 6);
    }

    #[test]
    fn test_unexpected_root() {
        let err = decode_snapshot(UserId::OWNER, &RecordNode::new("settings")).unwrap_err();
        assert_eq!(
            err,
            CodecError::UnexpectedRoot {
                expected: "policies".to_string(),
                found: "settings".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_attribute() {
        let root = RecordNode::new("policies").with_child(
            RecordNode::new("admin")
                .with_attr("name", "p/A")
                .with_child(RecordNode::value_node("password-quality", 12345)),
        );
        assert!(matches!(
            decode_snapshot(UserId::OWNER, &root),
            Err(CodecError::InvalidAttribute { .. })
        ));

        let bad_name = RecordNode::new("policies")
            .with_child(RecordNode::new("admin").with_attr("name", "no-separator"));
        assert!(matches!(
            decode_snapshot(UserId::OWNER, &bad_name),
            Err(CodecError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_owners_roundtrip() {
        let mut state = OwnerState::default();
        state.device_owner = Some(OwnerEntry::new("com.mdm", "Acme MDM"));
        state
            .profile_owners
            .insert(UserId::new(10), OwnerEntry::new("com.work", "Work"));
        state.provisioned = true;
        state.setup_complete_users.insert(UserId::OWNER);
        state.setup_complete_users.insert(UserId::new(10));

        let bytes = render(&encode_owners(&state)).unwrap();
        assert_eq!(decode_owners(&parse(&bytes).unwrap()).unwrap(), state);
    }
}
