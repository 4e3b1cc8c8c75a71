use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, error, info};

use super::{MailError, Mailer, OutgoingMail};
use crate::config::SmtpConfig;
use crate::users::mask_email;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?.port(config.port)
        } else {
            // Plain SMTP for local catchers like Mailpit
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            host: config.host.clone(),
        })
    }

    fn build_message(mail: &OutgoingMail) -> Result<Message, MailError> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| MailError::Build(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(&mail.subject);
        for to in &mail.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| MailError::Build(format!("invalid to address: {e}")))?;
            builder = builder.to(mailbox);
        }

        let text = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone());
        let message = match &mail.html_body {
            Some(html) => builder.multipart(
                MultiPart::alternative().singlepart(text).singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
            ),
            None => builder.singlepart(text),
        };
        message.map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let recipients: Vec<String> = mail.to.iter().map(|to| mask_email(to)).collect();
        debug!(to = ?recipients, host = %self.host, "sending mail via smtp");

        let message = Self::build_message(mail)?;
        let response = self.transport.send(message).await.map_err(|e| {
            error!(to = ?recipients, error = %e, "smtp send failed");
            MailError::Transport(e.to_string())
        })?;

        if !response.is_positive() {
            let reply = response.message().collect::<Vec<_>>().join(" ");
            error!(to = ?recipients, code = %response.code(), "smtp server rejected mail");
            return Err(MailError::Rejected(reply));
        }

        info!(to = ?recipients, "mail sent");
        Ok(())
    }
}
