//! SMTP notification delivery (spec §4.8): success/failure emails, sent
//! through a lazily-kept-alive session (`LazySmtpSession`) with an
//! explicit NOOP-before-send health check and reconnect-on-failure,
//! matching the "long-lived backend with explicit reconnect logic" shape
//! spec §9 calls for.

use async_trait::async_trait;
use lettre::transport::smtp::SmtpTransport;
use lettre::{Message, Transport};
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::lifecycle::BundleType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Failure,
}

/// One outgoing bundle-ready/bundle-failed email.
pub struct Notification {
    pub to: String,
    pub kind: NotificationKind,
    pub bundle_type: BundleType,
    pub object_id: ObjectId,
    /// Only populated for `Failure`; shown in the body (spec §4.4 step 4:
    /// "the message is safe for display").
    pub failure_message: Option<String>,
}

fn subject(notification: &Notification) -> String {
    let verb = match notification.kind {
        NotificationKind::Success => "ready",
        NotificationKind::Failure => "failed",
    };
    format!(
        "Bundle {verb}: {} {}",
        notification.bundle_type.as_str(),
        notification.object_id.short_hex()
    )
}

fn body(notification: &Notification) -> String {
    match notification.kind {
        NotificationKind::Success => format!(
            "Good news!\n\
             The {} bundle you requested for {} is now available for download.\n\
             \n\
             You can retrieve it at the following URL:\n\
             \n\
             https://archive.softwareheritage.org/api/1/vault/{}/{}/raw/\n\
             \n\
             --\x20\n\
             The Software Heritage Vault\n",
            notification.bundle_type.as_str(),
            notification.object_id.as_hex(),
            notification.bundle_type.as_str(),
            notification.object_id.as_hex(),
        ),
        NotificationKind::Failure => format!(
            "We are sorry to inform you that we could not prepare the {} bundle\n\
             you requested for {}.\n\
             \n\
             {}\n\
             \n\
             --\x20\n\
             The Software Heritage Vault\n",
            notification.bundle_type.as_str(),
            notification.object_id.as_hex(),
            notification
                .failure_message
                .as_deref()
                .unwrap_or("An unknown error occurred."),
        ),
    }
}

/// Sink for success/failure emails (spec §4.8, §6).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), VaultError>;
}

/// A single SMTP connection, kept alive lazily (spec §4.8): built once,
/// then health-checked with a NOOP ahead of every send rather than
/// trusting `lettre`'s internal pooling alone. A non-250 NOOP reply, or
/// a send that fails outright, rebuilds the transport via `connect()`
/// and retries exactly once.
struct LazySmtpSession {
    relay_host: String,
    relay_port: u16,
    transport: SmtpTransport,
}

impl LazySmtpSession {
    fn connect(relay_host: &str, relay_port: u16) -> Self {
        LazySmtpSession {
            relay_host: relay_host.to_string(),
            relay_port,
            transport: Self::build_transport(relay_host, relay_port),
        }
    }

    fn build_transport(relay_host: &str, relay_port: u16) -> SmtpTransport {
        SmtpTransport::builder_dangerous(relay_host).port(relay_port).build()
    }

    fn reconnect(&mut self) {
        self.transport = Self::build_transport(&self.relay_host, self.relay_port);
    }

    /// NOOP before every send (spec §4.8); a non-live session reconnects
    /// up front instead of discovering the dead connection mid-send.
    fn send(&mut self, message: &Message) -> Result<(), lettre::transport::smtp::Error> {
        if !self.transport.test_connection().unwrap_or(false) {
            self.reconnect();
        }
        match self.transport.send(message) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "smtp send failed after a live NOOP, reconnecting and retrying once");
                self.reconnect();
                self.transport.send(message).map(|_| ())
            }
        }
    }
}

/// Sends mail through an SMTP relay, reusing one `LazySmtpSession` across
/// sends.
pub struct SmtpNotifier {
    session: Mutex<LazySmtpSession>,
    from_address: String,
}

impl SmtpNotifier {
    pub fn new(relay_host: &str, relay_port: u16, from_address: String) -> Result<Self, VaultError> {
        Ok(SmtpNotifier {
            session: Mutex::new(LazySmtpSession::connect(relay_host, relay_port)),
            from_address,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: Notification) -> Result<(), VaultError> {
        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|e| VaultError::NotifierFailed(format!("invalid from address: {e}")))?,
            )
            .to(notification
                .to
                .parse()
                .map_err(|e| VaultError::NotifierFailed(format!("invalid recipient: {e}")))?)
            .subject(subject(&notification))
            .body(body(&notification))
            .map_err(|e| VaultError::NotifierFailed(e.to_string()))?;

        let mut session = self.session.lock().await;
        tokio::task::block_in_place(|| session.send(&message)).map_err(|e| {
            warn!(error = %e, "smtp delivery failed");
            VaultError::NotifierFailed(e.to_string())
        })?;
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex as TokioMutex;

    /// Captures every notification instead of sending mail, for S6-style
    /// delivery-count assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: TokioMutex<Vec<(String, String)>>, // (to, subject)
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: Notification) -> Result<(), VaultError> {
            let subj = subject(&notification);
            self.sent.lock().await.push((notification.to, subj));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_subject_contains_type_and_short_id() {
        let notification = Notification {
            to: "user@example.org".to_string(),
            kind: NotificationKind::Success,
            bundle_type: BundleType::GitBare,
            object_id: "da39a3ee5e6b4b0d3255bfef95601890afd80709".parse().unwrap(),
            failure_message: None,
        };
        assert_eq!(subject(&notification), "Bundle ready: git_bare da39a");
    }

    #[test]
    fn failure_subject_contains_type_and_short_id() {
        let notification = Notification {
            to: "user@example.org".to_string(),
            kind: NotificationKind::Failure,
            bundle_type: BundleType::Directory,
            object_id: "da39a3ee5e6b4b0d3255bfef95601890afd80709".parse().unwrap(),
            failure_message: Some("exceeds the configured size limit".to_string()),
        };
        assert_eq!(subject(&notification), "Bundle failed: directory da39a");
    }

    #[test]
    fn body_contains_signature_separator() {
        let notification = Notification {
            to: "user@example.org".to_string(),
            kind: NotificationKind::Success,
            bundle_type: BundleType::Directory,
            object_id: "da39a3ee5e6b4b0d3255bfef95601890afd80709".parse().unwrap(),
            failure_message: None,
        };
        assert!(body(&notification).contains("--\x20\n"));
    }
}
