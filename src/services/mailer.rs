// src/services/mailer.rs

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::{config::SmtpSettings, error::AppError, models::otp::OtpPurpose};

/// Outbound email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, to: &str, code: &str, purpose: OtpPurpose) -> Result<(), AppError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, AppError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| AppError::internal("Invalid SMTP_FROM address", e))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|e| AppError::internal("SMTP relay error", e))?;

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_otp(&self, to: &str, code: &str, purpose: OtpPurpose) -> Result<(), AppError> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid email address".to_string()))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(purpose.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(otp_body(code, purpose))
            .map_err(|e| AppError::internal("Failed to build email", e))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| AppError::internal("Failed to send email", e))?;

        tracing::info!(purpose = purpose.as_str(), "OTP email sent");
        Ok(())
    }
}

/// Writes codes to the log instead of sending them. Local development only.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_otp(&self, to: &str, code: &str, purpose: OtpPurpose) -> Result<(), AppError> {
        tracing::warn!(to, code, purpose = purpose.as_str(), "SMTP not configured, OTP logged instead of sent");
        Ok(())
    }
}

fn otp_body(code: &str, purpose: OtpPurpose) -> String {
    let action = match purpose {
        OtpPurpose::Registration => "verify your email address",
        OtpPurpose::PasswordReset => "reset your password",
    };
    format!(
        "Your one-time code is {}.\n\nUse it to {}. The code expires shortly and can only be used once.\n\nIf you did not request this code you can ignore this email.",
        code, action
    )
}
