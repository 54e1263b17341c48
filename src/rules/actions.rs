//! Executes rule actions against the mail-action collaborator.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::rules::types::{Action, ActionOutcome, EmailRecord};
use crate::store::traits::MailActions;

/// Applies one action at a time and mirrors successful changes onto the
/// in-memory record, so later actions and rules in the same pass see them.
pub struct ActionExecutor {
    mail: Arc<dyn MailActions>,
}

impl ActionExecutor {
    pub fn new(mail: Arc<dyn MailActions>) -> Self {
        Self { mail }
    }

    /// Attempt `action` on `email`. Never retries; failures are reported in
    /// the returned outcome.
    pub async fn execute(&self, action: &Action, email: &mut EmailRecord) -> ActionOutcome {
        let result = match action {
            Action::MarkRead => self.mail.set_read_state(&email.id, true).await,
            Action::MarkUnread => self.mail.set_read_state(&email.id, false).await,
            Action::Move(label) => self.mail.add_label(&email.id, label).await,
        };

        match result {
            Ok(()) => {
                let detail = match action {
                    Action::MarkRead => {
                        email.is_read = true;
                        format!("Marked as read: {}", email.id)
                    }
                    Action::MarkUnread => {
                        email.is_read = false;
                        format!("Marked as unread: {}", email.id)
                    }
                    Action::Move(label) => {
                        email.add_label(label);
                        format!("Moved to {label}: {}", email.id)
                    }
                };
                debug!(email_id = %email.id, action = action.label(), "Action applied");
                ActionOutcome::succeeded(action.clone(), detail)
            }
            Err(e) => {
                warn!(
                    email_id = %email.id,
                    action = action.label(),
                    error = %e,
                    "Action failed"
                );
                ActionOutcome::failed(action.clone(), format!("Failed to {action}: {e}"))
            }
        }
    }
}
