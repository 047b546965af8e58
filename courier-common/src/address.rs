use std::{
    fmt::{self, Display},
    str::FromStr,
};

use mailparse::MailAddr;
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A single envelope mailbox, `local@domain`.
///
/// The domain is case-insensitive and stored lowercased; the local part is kept
/// exactly as given.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MailAddress {
    local_part: String,
    domain: String,
}

impl MailAddress {
    /// Parses an address, accepting either `user@example.com` or
    /// `<user@example.com>` (with or without a display name).
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "<>" {
            return Err(AddressError::Empty);
        }

        let list = mailparse::addrparse(trimmed)
            .map_err(|err| AddressError::Invalid(trimmed.to_string(), err.to_string()))?;

        let addr = match list.first() {
            Some(MailAddr::Single(info)) if list.len() == 1 => info.addr.clone(),
            Some(MailAddr::Group(group)) => return Err(AddressError::Group(group.group_name.clone())),
            _ => {
                return Err(AddressError::Invalid(
                    trimmed.to_string(),
                    String::from("expected exactly one mailbox"),
                ));
            }
        };

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(AddressError::Invalid(
                trimmed.to_string(),
                String::from("missing '@'"),
            ));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(AddressError::Invalid(
                trimmed.to_string(),
                String::from("empty local part or domain"),
            ));
        }

        Ok(Self {
            local_part: local.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    #[inline]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Case-insensitive comparison against a textual address, as used by the
    /// queue management operations
    pub fn matches(&self, other: &str) -> bool {
        let other = other.trim().trim_start_matches('<').trim_end_matches('>');
        other
            .rsplit_once('@')
            .is_some_and(|(local, domain)| {
                local.eq_ignore_ascii_case(&self.local_part)
                    && domain.eq_ignore_ascii_case(&self.domain)
            })
    }
}

impl Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for MailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MailAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MailAddress> for String {
    fn from(value: MailAddress) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_bracketed() {
        let plain = MailAddress::parse("Alice@Example.COM").unwrap();
        assert_eq!(plain.local_part(), "Alice");
        assert_eq!(plain.domain(), "example.com");
        assert_eq!(plain.to_string(), "Alice@example.com");

        let bracketed = MailAddress::parse("<Alice@example.com>").unwrap();
        assert_eq!(plain, bracketed);

        let named = MailAddress::parse("Alice Smith <alice@example.com>").unwrap();
        assert_eq!(named.to_string(), "alice@example.com");
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(MailAddress::parse(""), Err(AddressError::Empty));
        assert_eq!(MailAddress::parse("<>"), Err(AddressError::Empty));
        assert!(matches!(
            MailAddress::parse("no-at-sign"),
            Err(AddressError::Invalid(..))
        ));
        assert!(MailAddress::parse("a@b.com, c@d.com").is_err());
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let addr = MailAddress::parse("spam@test").unwrap();
        assert!(addr.matches("SPAM@Test"));
        assert!(addr.matches("<spam@test>"));
        assert!(!addr.matches("ham@test"));
        assert!(!addr.matches("<>"));
    }

    #[test]
    fn test_serde_as_string() {
        let addr = MailAddress::parse("bob@example.org").unwrap();
        let config = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&addr, config).unwrap();
        let (decoded, _): (MailAddress, usize) =
            bincode::serde::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(addr, decoded);
    }
}
