// src/mailer.rs
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// SMTP 未配置时只记录日志，不视为错误
pub struct Mailer {
    smtp: Option<SmtpSender>,
}

impl Mailer {
    pub fn disabled() -> Self {
        Self { smtp: None }
    }

    pub fn from_config(config: Option<&SmtpConfig>) -> Result<Self, MailError> {
        let Some(config) = config else {
            return Ok(Self::disabled());
        };

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            smtp: Some(SmtpSender {
                transport: builder.build(),
                from: config.from.parse()?,
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.smtp.is_some()
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let Some(smtp) = &self.smtp else {
            tracing::info!("SMTP 未配置，跳过发送邮件 to={} subject={:?}\n{}", to, subject, body);
            return Ok(());
        };

        let email = build_message(&smtp.from, to, subject, body)?;
        smtp.transport.send(email).await?;
        tracing::info!("邮件已发送 to={} subject={:?}", to, subject);
        Ok(())
    }
}

pub fn build_message(from: &Mailbox, to: &str, subject: &str, body: &str) -> Result<Message, MailError> {
    let message = Message::builder()
        .from(from.clone())
        .to(to.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())?;
    Ok(message)
}

pub fn password_reset_body(name: &str, link: &str) -> String {
    format!(
        "Hi {name},\n\n\
         We received a request to reset your password. Open the link below within one hour to choose a new one:\n\n\
         {link}\n\n\
         If you did not request this, you can ignore this email."
    )
}
