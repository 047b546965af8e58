use courier_common::{Mail, MailAddress, MailId, Recipients, incoming};
use serde::{Deserialize, Serialize};

use crate::{context::SpoolContext, error::Rejection};

const fn default_max_message_size() -> usize {
    25 * 1024 * 1024
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Largest accepted message, in bytes
    ///
    /// Default: 25 MiB
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

/// Entry point for protocol front-ends handing over accepted mail
#[derive(Debug, Clone)]
pub struct Ingest {
    context: SpoolContext,
    config: IngestConfig,
}

impl Ingest {
    pub const fn new(context: SpoolContext, config: IngestConfig) -> Self {
        Self { context, config }
    }

    ///
    /// Create a mail at the initial state and queue it
    ///
    /// An absent, empty or `<>` sender is the null sender. Duplicate
    /// recipients are collapsed.
    ///
    /// # Errors
    /// See [`Rejection`]
    ///
    pub async fn accept(
        &self,
        sender: Option<&str>,
        recipients: &[&str],
        raw: Vec<u8>,
    ) -> Result<MailId, Rejection> {
        if raw.len() > self.config.max_message_size {
            return Err(Rejection::TooLarge {
                size: raw.len(),
                limit: self.config.max_message_size,
            });
        }

        let sender = match sender.map(str::trim) {
            None | Some("" | "<>") => None,
            Some(address) => Some(MailAddress::parse(address).map_err(|source| {
                Rejection::InvalidSender {
                    address: address.to_string(),
                    source,
                }
            })?),
        };

        let recipients = recipients
            .iter()
            .map(|address| {
                MailAddress::parse(address).map_err(|source| Rejection::InvalidRecipient {
                    address: (*address).to_string(),
                    source,
                })
            })
            .collect::<Result<Recipients, _>>()?;

        if recipients.is_empty() {
            return Err(Rejection::NoRecipients);
        }

        let mail = Mail::new(
            sender,
            recipients,
            raw,
            self.context.processors().initial_state().clone(),
        );
        let id = *mail.id();

        self.context
            .queue()
            .enqueue(&mail, std::time::Duration::ZERO)
            .await?;

        incoming!(
            level = INFO,
            "Accepted {id} from {} for [{}] ({} bytes)",
            mail.sender_display(),
            mail.recipients(),
            mail.content().len()
        );
        Ok(id)
    }
}
