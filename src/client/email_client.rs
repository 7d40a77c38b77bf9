use std::time::Duration;

use anyhow::Context;

use reqwest::Client;

use serde::Serialize;

use secrecy::Secret;

use url::Url;

use crate::domain::EmailAddress;
use crate::error::Result;

const POSTMARK_TOKEN_HEADER: &str = "X-Postmark-Server-Token";

/// A rendered message ready for the provider
#[derive(Debug, Clone)]
pub struct Email {
    pub recipient: EmailAddress,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    /// Provider-side tag, used to group sends per campaign step
    pub tag: Option<String>,
}

/// Client for the transactional email provider's REST API
#[derive(Debug)]
pub struct EmailClient {
    client: Client,
    sender: EmailAddress,

    api_send_email_url: Url,
    api_auth_token: Secret<String>,
}

impl EmailClient {
    pub fn new(
        sender: EmailAddress,
        api_timeout: Duration,
        api_base_url: Url,
        api_auth_token: Secret<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(api_timeout)
            .build()
            .context("Failed to build http client")?;

        let api_send_email_url = api_base_url
            .join("email")
            .context("Failed to create send email endpoint URL")?;

        Ok(Self {
            client,
            sender,
            api_send_email_url,
            api_auth_token,
        })
    }

    #[tracing::instrument(name = "Send email", skip(self, email), fields(recipient = %email.recipient))]
    pub async fn send(&self, email: &Email) -> Result<()> {
        use secrecy::ExposeSecret;

        let body = SendEmailRequest {
            to: email.recipient.as_ref(),
            from: self.sender.as_ref(),
            subject: &email.subject,
            html_body: &email.html_body,
            text_body: &email.text_body,
            tag: email.tag.as_deref(),
        };

        self.client
            .post(self.api_send_email_url.clone())
            .header(POSTMARK_TOKEN_HEADER, self.api_auth_token.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    to: &'a str,
    from: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}
