//! Requester notifications.
//!
//! Message composition lives here; delivery is a log-structured sink that a
//! mail relay tails, so a broken relay can never stall the worker.

use async_trait::async_trait;
use tracing::info;

use coldstage_core::{Notifier, NotifyConfig};

/// Composed outbound message, ready for a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub fn compose_completed(cfg: &NotifyConfig, user_email: &str, file_name: &str, link: &str) -> Message {
    Message {
        to: user_email.to_string(),
        subject: format!("Your requested archive {file_name} is ready to download"),
        body: format!(
            "Your requested archive {file_name} is ready to download.\n\n\
             Download link: {link}\n\n\
             The link is valid for 24 hours and a limited number of downloads.\n\
             If you have any questions, please contact {}.\n",
            cfg.contact
        ),
    }
}

pub fn compose_failed(cfg: &NotifyConfig, user_email: &str, file_name: &str) -> Message {
    Message {
        to: user_email.to_string(),
        subject: format!("Retrieval of archive {file_name} failed"),
        body: format!(
            "We could not retrieve the requested archive {file_name} from the \
             tape store.\n\n\
             The request has been recorded and no further action is needed on \
             your part; you may resubmit it later.\n\
             If the problem persists, please contact {}.\n",
            cfg.contact
        ),
    }
}

pub fn compose_rejected_capacity(cfg: &NotifyConfig, user_email: &str, file_name: &str) -> Message {
    Message {
        to: user_email.to_string(),
        subject: format!("Retrieval of archive {file_name} deferred"),
        body: format!(
            "The staging area is currently at capacity, so your request for \
             {file_name} could not be serviced.\n\n\
             Please resubmit the request later.\n\
             If you have any questions, please contact {}.\n",
            cfg.contact
        ),
    }
}

/// [`Notifier`] that emits each composed message as one structured log event.
pub struct LogNotifier {
    config: NotifyConfig,
}

impl LogNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    fn emit(&self, kind: &str, msg: &Message) {
        info!(
            subsystem = "notify",
            kind,
            smtp_host = %self.config.smtp_host,
            sender = %self.config.sender,
            to = %msg.to,
            subject = %msg.subject,
            body = %msg.body,
            "Outbound notification"
        );
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn job_completed(&self, user_email: &str, file_name: &str, link: &str) {
        let msg = compose_completed(&self.config, user_email, file_name, link);
        self.emit("job_completed", &msg);
    }

    async fn job_failed(&self, user_email: &str, file_name: &str) {
        let msg = compose_failed(&self.config, user_email, file_name);
        self.emit("job_failed", &msg);
    }

    async fn job_rejected_capacity(&self, user_email: &str, file_name: &str) {
        let msg = compose_rejected_capacity(&self.config, user_email, file_name);
        self.emit("job_rejected_capacity", &msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NotifyConfig {
        NotifyConfig {
            smtp_host: "smtp.example.edu".into(),
            sender: "noreply@example.edu".into(),
            contact: "rds@example.edu".into(),
            download_base_url: "https://dl.example.edu".into(),
        }
    }

    #[test]
    fn test_completed_message_carries_link_and_contact() {
        let msg = compose_completed(
            &cfg(),
            "alice@example.edu",
            "coll_a.tar",
            "https://dl.example.edu/download/abc",
        );
        assert_eq!(msg.to, "alice@example.edu");
        assert!(msg.subject.contains("ready to download"));
        assert!(msg.body.contains("https://dl.example.edu/download/abc"));
        assert!(msg.body.contains("rds@example.edu"));
    }

    #[test]
    fn test_failed_message_names_the_archive() {
        let msg = compose_failed(&cfg(), "alice@example.edu", "coll_a.tar");
        assert!(msg.subject.contains("coll_a.tar"));
        assert!(msg.subject.contains("failed"));
        assert!(msg.body.contains("resubmit"));
    }

    #[test]
    fn test_capacity_message_asks_for_resubmission() {
        let msg = compose_rejected_capacity(&cfg(), "alice@example.edu", "coll_a.tar");
        assert!(msg.body.contains("at capacity"));
        assert!(msg.body.contains("resubmit"));
    }
}
