//! Post-commit notifications.
//!
//! Authorities hand events to [`EventDispatcher::emit_after_commit`] once
//! their transaction has committed. Delivery runs on a spawned task; its
//! failures are logged and never reach the caller.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use service_core::error::AppError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SmtpConfig;
use crate::models::InvitationRole;

#[derive(Clone)]
pub enum AuthorityEvent {
    InvitationCreated {
        invitation_id: Uuid,
        organization_name: String,
        inviter_name: String,
        email: String,
        role: InvitationRole,
        /// Plaintext token for the accept link. Never logged.
        token: String,
        expiry_utc: chrono::DateTime<chrono::Utc>,
    },
    InvitationAccepted {
        invitation_id: Uuid,
        organization_name: String,
        inviter_email: String,
        member_name: String,
    },
    InvitationDeclined {
        invitation_id: Uuid,
        organization_name: String,
        inviter_email: String,
        email: String,
    },
}

impl AuthorityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthorityEvent::InvitationCreated { .. } => "invitation_created",
            AuthorityEvent::InvitationAccepted { .. } => "invitation_accepted",
            AuthorityEvent::InvitationDeclined { .. } => "invitation_declined",
        }
    }

    pub fn invitation_id(&self) -> Uuid {
        match self {
            AuthorityEvent::InvitationCreated { invitation_id, .. }
            | AuthorityEvent::InvitationAccepted { invitation_id, .. }
            | AuthorityEvent::InvitationDeclined { invitation_id, .. } => *invitation_id,
        }
    }
}

impl std::fmt::Debug for AuthorityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityEvent")
            .field("name", &self.name())
            .field("invitation_id", &self.invitation_id())
            .finish()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &AuthorityEvent) -> Result<(), AppError>;
}

/// Spawns notifier delivery outside of any transaction.
#[derive(Clone)]
pub struct EventDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl EventDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Deliver `event` in the background. The handle is only awaited by tests.
    pub fn emit_after_commit(&self, event: AuthorityEvent) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                tracing::warn!(
                    error = %e,
                    event = event.name(),
                    invitation_id = %event.invitation_id(),
                    "Notification delivery failed"
                );
            }
        })
    }
}

/// An email ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Render the email for `event`. Links point at `base_url`.
pub fn render_email(event: &AuthorityEvent, base_url: &str) -> RenderedEmail {
    match event {
        AuthorityEvent::InvitationCreated {
            organization_name,
            inviter_name,
            email,
            role,
            token,
            expiry_utc,
            ..
        } => {
            let link = format!("{}/invitations/{}", base_url.trim_end_matches('/'), token);
            RenderedEmail {
                to: email.clone(),
                subject: format!("You've been invited to join {}", organization_name),
                body: format!(
                    "{} invited you to join {} as {}.\n\nAccept the invitation here:\n{}\n\nThis invitation expires on {}.",
                    inviter_name,
                    organization_name,
                    role,
                    link,
                    expiry_utc.format("%Y-%m-%d %H:%M UTC")
                ),
            }
        }
        AuthorityEvent::InvitationAccepted {
            organization_name,
            inviter_email,
            member_name,
            ..
        } => RenderedEmail {
            to: inviter_email.clone(),
            subject: format!("{} joined {}", member_name, organization_name),
            body: format!(
                "{} accepted your invitation and is now a member of {}.",
                member_name, organization_name
            ),
        },
        AuthorityEvent::InvitationDeclined {
            organization_name,
            inviter_email,
            email,
            ..
        } => RenderedEmail {
            to: inviter_email.clone(),
            subject: format!("Invitation to {} declined", organization_name),
            body: format!(
                "{} declined your invitation to join {}.",
                email, organization_name
            ),
        },
    }
}

#[derive(Clone)]
pub struct EmailNotifier {
    mailer: SmtpTransport,
    from_email: String,
    base_url: String,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig, base_url: &str) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, event: &AuthorityEvent) -> Result<(), AppError> {
        let rendered = render_email(event, &self.base_url);

        let email = Message::builder()
            .from(self.from_email.parse().map_err(|e: lettre::address::AddressError| AppError::EmailError(e.to_string()))?)
            .to(rendered.to.parse().map_err(|e: lettre::address::AddressError| AppError::EmailError(e.to_string()))?)
            .subject(rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        // SmtpTransport blocks
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        tracing::info!(
            event = event.name(),
            invitation_id = %event.invitation_id(),
            "Notification email sent"
        );
        Ok(())
    }
}

/// Used when SMTP is not configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &AuthorityEvent) -> Result<(), AppError> {
        tracing::info!(
            event = event.name(),
            invitation_id = %event.invitation_id(),
            "Notification not delivered: SMTP is not configured"
        );
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<AuthorityEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuthorityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &AuthorityEvent) -> Result<(), AppError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
