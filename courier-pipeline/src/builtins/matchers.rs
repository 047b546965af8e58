use courier_common::{Mail, MailAddress};

use crate::{
    error::{ConfigurationError, MatchError},
    matcher::{MatchOutcome, Matcher},
    registry::Condition,
};

/// Every recipient
#[derive(Debug, Default)]
pub struct All;

impl Matcher for All {
    fn match_mail(&self, _mail: &Mail) -> Result<MatchOutcome, MatchError> {
        Ok(MatchOutcome::All)
    }
}

fn addresses(condition: &Condition<'_>) -> Result<Vec<MailAddress>, ConfigurationError> {
    condition
        .list()?
        .into_iter()
        .map(|item| {
            MailAddress::parse(item).map_err(|err| condition.invalid(format!("'{item}': {err}")))
        })
        .collect()
}

fn domains(condition: &Condition<'_>) -> Result<Vec<String>, ConfigurationError> {
    Ok(condition
        .list()?
        .into_iter()
        .map(str::to_ascii_lowercase)
        .collect())
}

/// Recipients equal to one of the configured addresses
#[derive(Debug)]
pub struct RecipientIs {
    addresses: Vec<MailAddress>,
}

impl RecipientIs {
    pub fn from_condition(condition: &Condition<'_>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            addresses: addresses(condition)?,
        })
    }
}

impl Matcher for RecipientIs {
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError> {
        Ok(MatchOutcome::from_recipients(mail, |rcpt| {
            self.addresses.contains(rcpt)
        }))
    }
}

/// Recipients whose domain is one of the configured domains
#[derive(Debug)]
pub struct HostIs {
    domains: Vec<String>,
}

impl HostIs {
    pub fn from_condition(condition: &Condition<'_>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            domains: domains(condition)?,
        })
    }
}

impl Matcher for HostIs {
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError> {
        Ok(MatchOutcome::from_recipients(mail, |rcpt| {
            self.domains.iter().any(|domain| domain == rcpt.domain())
        }))
    }
}

/// The whole mail, when its sender is one of the configured addresses.
/// `<>` in the list selects the null sender.
#[derive(Debug)]
pub struct SenderIs {
    null_sender: bool,
    addresses: Vec<MailAddress>,
}

impl SenderIs {
    pub fn from_condition(condition: &Condition<'_>) -> Result<Self, ConfigurationError> {
        let mut null_sender = false;
        let mut addresses = Vec::new();

        for item in condition.list()? {
            if item == "<>" {
                null_sender = true;
            } else {
                addresses.push(
                    MailAddress::parse(item)
                        .map_err(|err| condition.invalid(format!("'{item}': {err}")))?,
                );
            }
        }

        Ok(Self {
            null_sender,
            addresses,
        })
    }
}

impl Matcher for SenderIs {
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError> {
        Ok(MatchOutcome::whole(match mail.sender() {
            None => self.null_sender,
            Some(sender) => self.addresses.contains(sender),
        }))
    }
}

/// The whole mail, when the sender's domain is one of the configured domains
#[derive(Debug)]
pub struct SenderHostIs {
    domains: Vec<String>,
}

impl SenderHostIs {
    pub fn from_condition(condition: &Condition<'_>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            domains: domains(condition)?,
        })
    }
}

impl Matcher for SenderHostIs {
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError> {
        Ok(MatchOutcome::whole(mail.sender().is_some_and(|sender| {
            self.domains.iter().any(|domain| domain == sender.domain())
        })))
    }
}

/// The whole mail, when it carries the attribute (`name`), optionally with a
/// given value rendered as text (`name=value`)
#[derive(Debug)]
pub struct HasAttribute {
    name: String,
    value: Option<String>,
}

impl HasAttribute {
    pub fn from_condition(condition: &Condition<'_>) -> Result<Self, ConfigurationError> {
        let raw = condition.required()?;
        let (name, value) = match raw.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().to_string())),
            None => (raw, None),
        };

        if name.is_empty() {
            return Err(condition.invalid("attribute name is empty"));
        }

        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

impl Matcher for HasAttribute {
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError> {
        let matched = mail.attribute(&self.name).is_some_and(|attribute| {
            self.value
                .as_deref()
                .is_none_or(|expected| attribute.to_string() == expected)
        });

        Ok(MatchOutcome::whole(matched))
    }
}

/// The whole mail, when it has the header (`Name`), optionally with a value
/// compared case-insensitively (`Name:value`)
#[derive(Debug)]
pub struct HasHeader {
    name: String,
    value: Option<String>,
}

impl HasHeader {
    pub fn from_condition(condition: &Condition<'_>) -> Result<Self, ConfigurationError> {
        let raw = condition.required()?;
        let (name, value) = match raw.split_once(':') {
            Some((name, value)) => (name.trim(), Some(value.trim().to_string())),
            None => (raw, None),
        };

        if name.is_empty() {
            return Err(condition.invalid("header name is empty"));
        }

        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

impl Matcher for HasHeader {
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError> {
        let header = mail.content().header(&self.name)?;

        let matched = header.is_some_and(|actual| {
            self.value
                .as_deref()
                .is_none_or(|expected| actual.trim().eq_ignore_ascii_case(expected))
        });

        Ok(MatchOutcome::whole(matched))
    }
}

/// The whole mail, when its raw size exceeds the limit.
/// The limit accepts `k` and `m` suffixes (`SizeGreaterThan=10k`).
#[derive(Debug)]
pub struct SizeGreaterThan {
    limit: usize,
}

impl SizeGreaterThan {
    pub fn from_condition(condition: &Condition<'_>) -> Result<Self, ConfigurationError> {
        let raw = condition.required()?.to_ascii_lowercase();
        let (digits, multiplier) = match raw.strip_suffix('k') {
            Some(digits) => (digits, 1024),
            None => raw
                .strip_suffix('m')
                .map_or((raw.as_str(), 1), |digits| (digits, 1024 * 1024)),
        };

        let limit = digits
            .trim()
            .parse::<usize>()
            .map_err(|err| condition.invalid(format!("'{raw}' is not a size: {err}")))?
            .checked_mul(multiplier)
            .ok_or_else(|| condition.invalid(format!("'{raw}' is too large")))?;

        Ok(Self { limit })
    }
}

impl Matcher for SizeGreaterThan {
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError> {
        Ok(MatchOutcome::whole(mail.content().len() > self.limit))
    }
}
