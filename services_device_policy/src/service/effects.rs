//! Side effects collected under the state lock and run after it is released

use core_types::{AdminIdentity, UserId};
use lifecycle::WallTime;
use policy::GlobalProxy;
use tracing::debug;

use crate::collaborators::{AdminEvent, AlarmId, Collaborators};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    Notify {
        user: UserId,
        admin: AdminIdentity,
        event: AdminEvent,
        extras: Vec<(String, String)>,
    },
    PolicyChanged(UserId),
    MaxTimeToLock(UserId, Option<u64>),
    CameraDisabled(UserId, bool),
    EncryptionRequested(bool),
    GlobalProxy(Option<GlobalProxy>),
    ScheduleAlarm(AlarmId, WallTime),
    CancelAlarm(AlarmId),
    Wipe(UserId),
    LockNow(UserId),
}

#[derive(Debug, Default)]
pub(crate) struct Effects {
    queue: Vec<Effect>,
}

impl Effects {
    pub(crate) fn push(&mut self, effect: Effect) {
        self.queue.push(effect);
    }

    pub(crate) fn notify(&mut self, user: UserId, admin: AdminIdentity, event: AdminEvent) {
        self.push(Effect::Notify {
            user,
            admin,
            event,
            extras: Vec::new(),
        });
    }

    pub(crate) fn dispatch(self, collaborators: &Collaborators) {
        for effect in self.queue {
            debug!(?effect, "dispatching");
            match effect {
                Effect::Notify {
                    user,
                    admin,
                    event,
                    extras,
                } => {
                    collaborators
                        .transport
                        .notify(user, &admin, event, &extras);
                }
                Effect::PolicyChanged(user) => {
                    collaborators.transport.broadcast_policy_changed(user)
                }
                Effect::MaxTimeToLock(user, max) => {
                    collaborators.enforcement.apply_max_time_to_lock(user, max)
                }
                Effect::CameraDisabled(user, disabled) => {
                    collaborators.enforcement.apply_camera_disabled(user, disabled)
                }
                Effect::EncryptionRequested(requested) => {
                    collaborators.enforcement.apply_encryption_requested(requested)
                }
                Effect::GlobalProxy(proxy) => {
                    collaborators.enforcement.apply_global_proxy(proxy.as_ref())
                }
                Effect::ScheduleAlarm(alarm, at) => collaborators.scheduler.schedule_at(alarm, at),
                Effect::CancelAlarm(alarm) => collaborators.scheduler.cancel(alarm),
                Effect::Wipe(user) => collaborators.wiper.wipe(user),
                Effect::LockNow(user) => collaborators.enforcement.lock_now(user),
            }
        }
    }
}
