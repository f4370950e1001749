//! Password policy operations

use core_types::{AdminIdentity, PolicyCapability, UserId};
use lifecycle::WallTime;
use policy::{PasswordComposition, PasswordLimit, PasswordQuality};
use tracing::{info, warn};

use super::{Effect, PolicyService, Txn};
use crate::collaborators::AdminEvent;
use crate::error::{PolicyError, PolicyResult};
use crate::snapshot::UserPolicySnapshot;

/// When the next password expiration check should run
///
/// `None` when no expiration is set. Once the password has expired the
/// check repeats every `interval_ms`; before that it lands on the next whole
/// interval before expiry.
pub fn next_expiration_alarm(
    now: WallTime,
    expiration_ms: u64,
    interval_ms: u64,
) -> Option<WallTime> {
    if expiration_ms == 0 {
        return None;
    }
    let interval = interval_ms.max(1);
    let now_ms = now.as_millis();
    let delay = if now_ms >= expiration_ms {
        interval
    } else {
        match (expiration_ms - now_ms) % interval {
            0 => interval,
            rest => rest,
        }
    };
    Some(now.saturating_add(delay))
}

impl PolicyService {
    pub fn set_password_quality(
        &self,
        user: UserId,
        who: &AdminIdentity,
        quality: PasswordQuality,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.commit_admin(user, who, PolicyCapability::LimitPassword, |r| {
                r.password_quality = quality
            })
        })
    }

    /// An administrator's own value, or the group aggregate when `who` is `None`
    pub fn password_quality(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<PasswordQuality> {
        self.run(|txn| match who {
            Some(who) => Ok(txn
                .record(user, who)?
                .map_or(PasswordQuality::Unspecified, |r| r.password_quality)),
            None => Ok(txn.group_aggregate(user)?.password_quality),
        })
    }

    pub fn set_password_limit(
        &self,
        user: UserId,
        who: &AdminIdentity,
        limit: PasswordLimit,
        value: u32,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.commit_admin(user, who, PolicyCapability::LimitPassword, |r| {
                r.set_limit(limit, value)
            })
        })
    }

    pub fn password_limit(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
        limit: PasswordLimit,
    ) -> PolicyResult<u32> {
        self.run(|txn| match who {
            Some(who) => Ok(txn
                .record(user, who)?
                .map_or(limit.default_value(), |r| r.limit(limit))),
            None => Ok(txn.group_aggregate(user)?.limit(limit)),
        })
    }

    pub fn set_password_minimum_length(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::MinimumLength, value)
    }

    pub fn password_minimum_length(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::MinimumLength)
    }

    pub fn set_password_history_length(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::HistoryLength, value)
    }

    pub fn password_history_length(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::HistoryLength)
    }

    pub fn set_password_minimum_upper_case(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::MinimumUpperCase, value)
    }

    pub fn password_minimum_upper_case(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::MinimumUpperCase)
    }

    pub fn set_password_minimum_lower_case(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::MinimumLowerCase, value)
    }

    pub fn password_minimum_lower_case(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::MinimumLowerCase)
    }

    pub fn set_password_minimum_letters(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::MinimumLetters, value)
    }

    pub fn password_minimum_letters(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::MinimumLetters)
    }

    pub fn set_password_minimum_numeric(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::MinimumNumeric, value)
    }

    pub fn password_minimum_numeric(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::MinimumNumeric)
    }

    pub fn set_password_minimum_symbols(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::MinimumSymbols, value)
    }

    pub fn password_minimum_symbols(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::MinimumSymbols)
    }

    pub fn set_password_minimum_non_letter(
        &self,
        user: UserId,
        who: &AdminIdentity,
        value: u32,
    ) -> PolicyResult<()> {
        self.set_password_limit(user, who, PasswordLimit::MinimumNonLetter, value)
    }

    pub fn password_minimum_non_letter(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.password_limit(user, who, PasswordLimit::MinimumNonLetter)
    }

    /// Sets the expiration timeout and restarts the caller's expiration clock
    pub fn set_password_expiration_timeout(
        &self,
        user: UserId,
        who: &AdminIdentity,
        timeout_ms: u64,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            let date = match timeout_ms {
                0 => 0,
                t => txn.now().saturating_add(t).as_millis(),
            };
            txn.commit_admin(user, who, PolicyCapability::ExpirePassword, |r| {
                r.password_expiration_timeout_ms = timeout_ms;
                r.password_expiration_date_ms = date;
            })?;
            if timeout_ms > 0 {
                info!(%user, admin = %who, expires_at = date, "password expiration set");
            }
            txn.schedule_expiration_alarm(user)
        })
    }

    pub fn password_expiration_timeout(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u64> {
        self.run(|txn| match who {
            Some(who) => Ok(txn
                .record(user, who)?
                .map_or(0, |r| r.password_expiration_timeout_ms)),
            None => Ok(txn.group_aggregate(user)?.password_expiration_timeout_ms),
        })
    }

    /// Epoch milliseconds at which the password expires; zero if never
    pub fn password_expiration(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u64> {
        self.run(|txn| match who {
            Some(who) => Ok(txn
                .record(user, who)?
                .map_or(0, |r| r.password_expiration_date_ms)),
            None => Ok(txn.group_aggregate(user)?.password_expiration_date_ms),
        })
    }

    /// Wipe threshold; the caller needs both `wipe-data` and `watch-login`
    pub fn set_maximum_failed_passwords_for_wipe(
        &self,
        user: UserId,
        who: &AdminIdentity,
        max: u32,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::WipeData)?;
            txn.commit_admin(user, who, PolicyCapability::WatchLogin, |r| {
                r.maximum_failed_passwords_for_wipe = max
            })
        })
    }

    pub fn maximum_failed_passwords_for_wipe(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u32> {
        self.run(|txn| match who {
            Some(who) => Ok(txn
                .record(user, who)?
                .map_or(0, |r| r.maximum_failed_passwords_for_wipe)),
            None => Ok(txn.group_aggregate(user)?.maximum_failed_passwords_for_wipe),
        })
    }

    /// Whether the last reported password meets the group's requirements
    pub fn is_active_password_sufficient(&self, user: UserId) -> PolicyResult<bool> {
        let parent = self
            .collaborators
            .profiles
            .profile_parent(user)
            .unwrap_or(user);
        self.run(|txn| {
            let required = txn.group_aggregate(user)?;
            let active = &txn.snapshot(parent)?.active_password;
            Ok(required.check_active(active).is_ok())
        })
    }

    pub fn current_failed_password_attempts(&self, user: UserId) -> PolicyResult<u32> {
        self.run(|txn| Ok(txn.snapshot(user)?.failed_password_attempts))
    }

    /// Sets the user's password on behalf of an administrator
    ///
    /// With `require_entry` the caller becomes the password owner and no other
    /// administrator may reset it until the user next unlocks.
    pub fn reset_password(
        &self,
        user: UserId,
        who: &AdminIdentity,
        password: &str,
        require_entry: bool,
    ) -> PolicyResult<()> {
        let quality = self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::ResetPassword)?;
            let required = txn.group_aggregate(user)?;
            let quality = required
                .check_candidate(&PasswordComposition::measure(password))
                .map_err(|shortfall| {
                    warn!(%user, admin = %who, %shortfall, "reset password rejected");
                    PolicyError::PasswordRejected(shortfall.to_string())
                })?;
            match &txn.snapshot(user)?.password_owner {
                Some(owner) if owner != who => {
                    warn!(%user, admin = %who, %owner, "password is owned by another admin");
                    Err(PolicyError::PasswordRejected(format!(
                        "password is owned by {}",
                        owner
                    )))
                }
                _ => Ok(quality),
            }
        })?;

        self.collaborators
            .credentials
            .set_password(password, quality, user)
            .map_err(PolicyError::PasswordRejected)?;

        let owner = require_entry.then(|| who.clone());
        self.run(|txn| {
            if txn.snapshot(user)?.password_owner == owner {
                return Ok(());
            }
            txn.commit(user, |snap| {
                snap.password_owner = owner;
                Ok(())
            })
        })
    }

    /// Counts a failed unlock; crossing the wipe threshold wipes the user
    pub fn report_failed_password_attempt(&self, user: UserId) -> PolicyResult<()> {
        self.run(|txn| {
            let (before, after) = txn.commit(user, |snap| {
                let before = snap.failed_password_attempts;
                snap.failed_password_attempts = before.saturating_add(1);
                Ok((before, snap.failed_password_attempts))
            })?;
            let threshold = txn.group_aggregate(user)?.maximum_failed_passwords_for_wipe;
            if threshold > 0 && before < threshold && after >= threshold {
                warn!(%user, attempts = after, threshold, "too many failed password attempts, wiping");
                txn.effects.push(Effect::Wipe(user));
            }
            txn.notify_group(user, PolicyCapability::WatchLogin, AdminEvent::PasswordFailed)
        })
    }

    pub fn report_successful_password_attempt(&self, user: UserId) -> PolicyResult<()> {
        self.run(|txn| {
            let snap = txn.snapshot(user)?;
            if snap.failed_password_attempts == 0 && snap.password_owner.is_none() {
                return Ok(());
            }
            txn.commit(user, |snap| {
                snap.failed_password_attempts = 0;
                snap.password_owner = None;
                Ok(())
            })?;
            txn.notify_group(user, PolicyCapability::WatchLogin, AdminEvent::PasswordSucceeded)
        })
    }

    /// Records the composition of a newly set password
    pub fn set_active_password_state(
        &self,
        user: UserId,
        composition: PasswordComposition,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            let now = txn.now();
            txn.commit(user, |snap| {
                snap.active_password = composition;
                snap.failed_password_attempts = 0;
                restart_expiration_clocks(snap, now);
                Ok(())
            })?;
            txn.restart_group_expiration_clocks(user)?;
            txn.schedule_expiration_alarm(user)?;
            txn.notify_group(user, PolicyCapability::LimitPassword, AdminEvent::PasswordChanged)
        })
    }

    /// Warns administrators whose password expiration is near, then re-arms
    /// the alarm
    pub fn handle_password_expiration(&self, user: UserId) -> PolicyResult<()> {
        self.run(|txn| {
            let now = txn.now().as_millis();
            let grace = txn.service.config.expiration_grace_period_ms;
            for member in txn.group(user) {
                let expiring: Vec<(AdminIdentity, u64)> = txn
                    .snapshot(member)?
                    .admins
                    .records()
                    .filter(|r| {
                        r.uses(PolicyCapability::ExpirePassword)
                            && r.password_expiration_timeout_ms > 0
                            && r.password_expiration_date_ms > 0
                            && now >= r.password_expiration_date_ms.saturating_sub(grace)
                    })
                    .map(|r| (r.identity.clone(), r.password_expiration_date_ms))
                    .collect();
                for (admin, expiration) in expiring {
                    txn.effects.push(Effect::Notify {
                        user: member,
                        admin,
                        event: AdminEvent::PasswordExpiring,
                        extras: vec![("expiration".to_string(), expiration.to_string())],
                    });
                }
            }
            txn.schedule_expiration_alarm(user)
        })
    }
}

impl Txn<'_> {
    /// Restarts the expiration clocks held in the other users of the group,
    /// committing each user that has an expire-password administrator
    fn restart_group_expiration_clocks(&mut self, user: UserId) -> PolicyResult<()> {
        let now = self.now();
        for member in self.group(user) {
            if member == user {
                continue;
            }
            let affected = self
                .snapshot(member)?
                .admins
                .records()
                .any(|r| r.uses(PolicyCapability::ExpirePassword));
            if affected {
                self.commit(member, |snap| {
                    restart_expiration_clocks(snap, now);
                    Ok(())
                })?;
            }
        }
        Ok(())
    }
}

fn restart_expiration_clocks(snap: &mut UserPolicySnapshot, now: WallTime) {
    for identity in snap.admins.identities() {
        if let Some(r) = snap.admins.get_mut(&identity) {
            if r.uses(PolicyCapability::ExpirePassword) {
                r.password_expiration_date_ms = match r.password_expiration_timeout_ms {
                    0 => 0,
                    t => now.saturating_add(t).as_millis(),
                };
            }
        }
    }
}
