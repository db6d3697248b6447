// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Delivers PRE/POST apply/remove events to subscribers and translates
//! PRE-phase rejections into aborts.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{OverlayError, OverlayErrorKind};
use crate::live::NodeId;
use crate::primitive::PrimitiveEdit;

/// The phase of an overlay lifecycle a notifier is informed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    PreApply,
    PostApply,
    PreRemove,
    PostRemove,
}

/// A single mutation delivered to subscribers between apply/revert and the
/// matching `POST_*` broadcast. Subscribers must not retain references to
/// this past the call in which it is delivered.
#[derive(Debug, Clone, Copy)]
pub enum EditNotification<'a> {
    NodeAttached { node: NodeId },
    NodeDetached { node: NodeId },
    PropertyChanged { node: NodeId, property: &'a str },
}

/// A registered overlay notifier. Only `PreApply`/`PreRemove` rejections
/// abort the operation; other phases' errors are logged and surfaced but do
/// not stop anything.
pub trait NotifierCallback: Send + Sync {
    /// Called for every lifecycle phase. Returning `Err` only has an effect
    /// during `PreApply`/`PreRemove`; for `PostApply`/`PostRemove` the error
    /// is still surfaced to the caller of `fdt_apply`/`remove`, but the
    /// changeset's topology change is not undone.
    fn notify(&self, action: NotifyAction, changeset_id: u32) -> Result<(), OverlayError>;

    /// Called once for every primitive edit a changeset installs or
    /// reverts, after the edit has already taken effect. The default
    /// implementation ignores it; override to observe individual
    /// attach/detach/property mutations instead of just lifecycle phases.
    fn on_edit(&self, _edit: EditNotification<'_>) {}
}

type BoxedCallback = Box<dyn NotifierCallback>;

/// A handle to a registered notifier, returned by [`NotifierBus::register`]
/// and required by [`NotifierBus::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierHandle(u32);

#[derive(Default)]
pub(crate) struct NotifierBus {
    next_handle: u32,
    subscribers: Vec<(NotifierHandle, BoxedCallback)>,
}

impl NotifierBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, callback: BoxedCallback) -> NotifierHandle {
        let handle = NotifierHandle(self.next_handle);
        self.next_handle += 1;
        self.subscribers.push((handle, callback));
        handle
    }

    pub(crate) fn unregister(&mut self, handle: NotifierHandle) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(h, _)| *h != handle);
        self.subscribers.len() != before
    }

    /// Broadcasts `action`. For `PreApply`/`PreRemove`, the first subscriber
    /// error aborts the broadcast and is returned as `Vetoed`. For other
    /// phases, every subscriber still runs and every error is logged, but
    /// the first one is still returned to the caller once the broadcast
    /// completes -- per-phase errors are surfaced, not silently dropped.
    pub(crate) fn broadcast(
        &self,
        action: NotifyAction,
        changeset_id: u32,
    ) -> Result<(), OverlayError> {
        let vetoable = matches!(action, NotifyAction::PreApply | NotifyAction::PreRemove);
        let mut first_error = None;
        for (_, callback) in &self.subscribers {
            if let Err(err) = callback.notify(action, changeset_id) {
                log::debug!("notifier rejected {action:?} for changeset {changeset_id}: {err}");
                if vetoable {
                    return Err(OverlayError::new(OverlayErrorKind::Vetoed, String::new()));
                }
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Delivers one [`EditNotification`] per primitive edit to every
    /// registered subscriber's [`NotifierCallback::on_edit`].
    pub(crate) fn notify_edits(&self, edits: &[PrimitiveEdit]) {
        for edit in edits {
            let notification = match edit {
                PrimitiveEdit::AttachNode { node, .. } => {
                    EditNotification::NodeAttached { node: *node }
                }
                PrimitiveEdit::DetachNode { node, .. } => {
                    EditNotification::NodeDetached { node: *node }
                }
                PrimitiveEdit::AddProperty { node, property }
                | PrimitiveEdit::UpdateProperty { node, property, .. }
                | PrimitiveEdit::RemoveProperty { node, property } => {
                    EditNotification::PropertyChanged {
                        node: *node,
                        property: property.name(),
                    }
                }
            };
            log::trace!("edit notification: {notification:?}");
            for (_, callback) in &self.subscribers {
                callback.on_edit(notification);
            }
        }
    }
}
