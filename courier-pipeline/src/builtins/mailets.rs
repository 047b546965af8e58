use std::time::Duration;

use async_trait::async_trait;
use courier_common::{AttributeValue, Mail, MailAddress, State, internal, outgoing};

use crate::{
    error::{ConfigurationError, MailetError},
    mailet::{Mailet, MailetContext, MailetOutcome},
    registry::Arguments,
};

/// Sends the mail to another processor, optionally recording a notice as its
/// error message
#[derive(Debug)]
pub struct ToProcessor {
    processor: State,
    notice: Option<String>,
}

impl ToProcessor {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        let processor =
            State::new(args.required("processor")?).map_err(|err| args.invalid(err.to_string()))?;

        Ok(Self {
            processor,
            notice: args.optional("notice").map(str::to_string),
        })
    }
}

#[async_trait]
impl Mailet for ToProcessor {
    async fn service(
        &self,
        mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        if let Some(notice) = &self.notice {
            mail.set_error_message(notice.clone());
        }

        Ok(MailetOutcome::Route(self.processor.clone()))
    }

    fn target(&self) -> Option<&State> {
        Some(&self.processor)
    }
}

/// Discards the mail
#[derive(Debug, Default)]
pub struct Ghost;

#[async_trait]
impl Mailet for Ghost {
    async fn service(
        &self,
        mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        internal!(level = DEBUG, "Discarding {}", mail.id());
        Ok(MailetOutcome::Route(State::ghost()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    String,
    Bool,
    Integer,
    Float,
}

/// Sets an attribute. `type` is one of `string` (default), `bool`,
/// `integer` or `float`.
#[derive(Debug)]
pub struct SetAttribute {
    name: String,
    value: AttributeValue,
}

impl SetAttribute {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        let name = args.required("name")?.to_string();
        let raw = args.required("value")?;

        let kind = match args.optional("type").unwrap_or("string") {
            "string" => ValueKind::String,
            "bool" => ValueKind::Bool,
            "integer" => ValueKind::Integer,
            "float" => ValueKind::Float,
            other => return Err(args.invalid(format!("unknown attribute type '{other}'"))),
        };

        let value = match kind {
            ValueKind::String => AttributeValue::String(raw.to_string()),
            ValueKind::Bool => AttributeValue::Bool(args.parse_or("value", false)?),
            ValueKind::Integer => AttributeValue::Integer(args.parse_or("value", 0)?),
            ValueKind::Float => AttributeValue::Float(args.parse_or("value", 0.0)?),
        };

        Ok(Self { name, value })
    }
}

#[async_trait]
impl Mailet for SetAttribute {
    async fn service(
        &self,
        mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        mail.set_attribute(self.name.clone(), self.value.clone());
        Ok(MailetOutcome::Continue)
    }
}

#[derive(Debug)]
pub struct RemoveAttribute {
    name: String,
}

impl RemoveAttribute {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            name: args.required("name")?.to_string(),
        })
    }
}

#[async_trait]
impl Mailet for RemoveAttribute {
    async fn service(
        &self,
        mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        mail.remove_attribute(&self.name);
        Ok(MailetOutcome::Continue)
    }
}

/// Prepends a header line to the content
#[derive(Debug)]
pub struct AddHeader {
    name: String,
    value: String,
}

impl AddHeader {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        let name = args.required("name")?;
        if name.is_empty() || name.contains([':', '\r', '\n', ' ']) {
            return Err(args.invalid(format!("'{name}' is not a valid header name")));
        }

        let value = args.required("value")?;
        if value.contains(['\r', '\n']) {
            return Err(args.invalid("header values cannot span lines"));
        }

        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

#[async_trait]
impl Mailet for AddHeader {
    async fn service(
        &self,
        mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        mail.content_mut().prepend_header(&self.name, &self.value);
        Ok(MailetOutcome::Continue)
    }
}

/// Stores a copy of the mail into a named repository, then discards it
/// unless `pass_through` is set
#[derive(Debug)]
pub struct ToRepository {
    repository: String,
    pass_through: bool,
}

impl ToRepository {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            repository: args.required("repository")?.to_string(),
            pass_through: args.parse_or("pass_through", false)?,
        })
    }
}

#[async_trait]
impl Mailet for ToRepository {
    async fn service(
        &self,
        mail: &mut Mail,
        context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        context.store(&self.repository, mail).await?;
        outgoing!(
            level = INFO,
            "Stored {} in repository '{}'",
            mail.id(),
            self.repository
        );

        if self.pass_through {
            Ok(MailetOutcome::Continue)
        } else {
            Ok(MailetOutcome::Route(State::ghost()))
        }
    }

    fn repository(&self) -> Option<&str> {
        Some(&self.repository)
    }
}

/// Marks recipients as handled by removing them: the configured
/// `recipients`, or all of them when none are configured
#[derive(Debug)]
pub struct RemoveRecipients {
    recipients: Option<Vec<MailAddress>>,
}

impl RemoveRecipients {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        let recipients = args
            .optional("recipients")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| {
                        MailAddress::parse(item)
                            .map_err(|err| args.invalid(format!("'{item}': {err}")))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(Self { recipients })
    }
}

#[async_trait]
impl Mailet for RemoveRecipients {
    async fn service(
        &self,
        mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        match &self.recipients {
            Some(remove) => mail.recipients_mut().retain(|rcpt| !remove.contains(rcpt)),
            None => mail.recipients_mut().retain(|_| false),
        }

        Ok(MailetOutcome::Continue)
    }
}

/// Holds the mail for `millis` before continuing
#[derive(Debug)]
pub struct Delay {
    delay: Duration,
}

impl Delay {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        let millis: u64 = args.parse_or("millis", 0)?;
        Ok(Self {
            delay: Duration::from_millis(millis),
        })
    }
}

#[async_trait]
impl Mailet for Delay {
    async fn service(
        &self,
        _mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        tokio::time::sleep(self.delay).await;
        Ok(MailetOutcome::Continue)
    }
}

/// Logs a line about the mail at INFO
#[derive(Debug)]
pub struct Log {
    message: String,
}

impl Log {
    pub fn from_arguments(args: &Arguments<'_>) -> Self {
        Self {
            message: args.optional("message").unwrap_or("processing").to_string(),
        }
    }
}

#[async_trait]
impl Mailet for Log {
    async fn service(
        &self,
        mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        internal!(
            level = INFO,
            "{}: {} from {} to [{}] in '{}'",
            self.message,
            mail.id(),
            mail.sender_display(),
            mail.recipients(),
            mail.state()
        );
        Ok(MailetOutcome::Continue)
    }
}

/// Returns a delivery failure notice to the sender, then discards the mail
/// unless `pass_through` is set. Mail from the null sender is never bounced.
#[derive(Debug)]
pub struct Bounce {
    postmaster: MailAddress,
    pass_through: bool,
}

impl Bounce {
    pub fn from_arguments(args: &Arguments<'_>) -> Result<Self, ConfigurationError> {
        let postmaster = args.optional("postmaster").unwrap_or("postmaster@localhost");

        Ok(Self {
            postmaster: MailAddress::parse(postmaster)
                .map_err(|err| args.invalid(format!("'{postmaster}': {err}")))?,
            pass_through: args.parse_or("pass_through", false)?,
        })
    }

    fn notice(&self, mail: &Mail, sender: &MailAddress) -> Vec<u8> {
        // Keep the reason on its own line
        let reason = mail
            .error_message()
            .unwrap_or("delivery failed")
            .replace(['\r', '\n'], " ");
        format!(
            "From: <{postmaster}>\r\n\
             To: <{sender}>\r\n\
             Subject: Undelivered Mail Returned to Sender\r\n\
             Auto-Submitted: auto-replied\r\n\
             \r\n\
             Your message {id} could not be delivered to: {recipients}\r\n\
             \r\n\
             Reason: {reason}\r\n",
            postmaster = self.postmaster,
            id = mail.id(),
            recipients = mail.recipients(),
        )
        .into_bytes()
    }
}

#[async_trait]
impl Mailet for Bounce {
    async fn service(
        &self,
        mail: &mut Mail,
        context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        if let Some(sender) = mail.sender().cloned() {
            let notice = Mail::new(
                None,
                vec![sender.clone()],
                self.notice(mail, &sender),
                State::root(),
            );
            let id = context.submit(notice).await?;
            outgoing!(level = INFO, "Bounced {} to {sender} as {id}", mail.id());
        } else {
            internal!(
                level = WARN,
                "Not bouncing {}: it has the null sender",
                mail.id()
            );
        }

        if self.pass_through {
            Ok(MailetOutcome::Continue)
        } else {
            Ok(MailetOutcome::Route(State::ghost()))
        }
    }
}
