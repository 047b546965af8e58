use std::{
    fmt::{self, Display},
    str::FromStr,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::{
    address::MailAddress,
    attribute::{AttributeValue, Attributes},
    content::Content,
    state::State,
};

/// Identifier of a mail: the lineage root assigned at ingestion, and a branch
/// assigned every time the pipeline forks it.
///
/// Branches are derived rather than random, so splitting the same mail at the
/// same point twice names the same record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MailId {
    root: Ulid,
    branch: Option<Ulid>,
}

impl MailId {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Ulid::new(),
            branch: None,
        }
    }

    /// The id of the branch split off this one at `point`
    #[must_use]
    pub fn fork(&self, point: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.root.to_bytes());
        match self.branch {
            Some(branch) => {
                hasher.update([1u8]);
                hasher.update(branch.to_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(point);

        let digest = hasher.finalize();
        let mut random = [0u8; 16];
        random.copy_from_slice(&digest[..16]);

        Self {
            root: self.root,
            branch: Some(Ulid::from_parts(
                self.root.timestamp_ms(),
                u128::from_be_bytes(random),
            )),
        }
    }

    #[inline]
    pub const fn root(&self) -> Ulid {
        self.root
    }

    #[inline]
    pub const fn branch(&self) -> Option<Ulid> {
        self.branch
    }

    #[inline]
    pub const fn is_branch(&self) -> bool {
        self.branch.is_some()
    }

    /// Whether `name` refers to this id, either in full or by its lineage root.
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.trim();
        self.to_string().eq_ignore_ascii_case(name)
            || self.root.to_string().eq_ignore_ascii_case(name)
    }
}

impl Default for MailId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch {
            Some(branch) => write!(f, "{}.{branch}", self.root),
            None => write!(f, "{}", self.root),
        }
    }
}

impl FromStr for MailId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((root, branch)) => Ok(Self {
                root: Ulid::from_string(root)?,
                branch: Some(Ulid::from_string(branch)?),
            }),
            None => Ok(Self {
                root: Ulid::from_string(s)?,
                branch: None,
            }),
        }
    }
}

/// The envelope recipients of a mail: ordered and free of duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients(Vec<MailAddress>);

impl Recipients {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends `address` unless already present. Returns whether it was added.
    pub fn push(&mut self, address: MailAddress) -> bool {
        if self.0.contains(&address) {
            false
        } else {
            self.0.push(address);
            true
        }
    }

    pub fn contains(&self, address: &MailAddress) -> bool {
        self.0.contains(address)
    }

    pub fn remove(&mut self, address: &MailAddress) -> bool {
        let before = self.0.len();
        self.0.retain(|existing| existing != address);
        before != self.0.len()
    }

    pub fn retain(&mut self, keep: impl FnMut(&MailAddress) -> bool) {
        self.0.retain(keep);
    }

    /// The members of `self` that also appear in `other`, in `self`'s order
    #[must_use]
    pub fn intersect(&self, other: &[MailAddress]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|address| other.contains(address))
                .cloned()
                .collect(),
        )
    }

    /// The members of `self` that do not appear in `other`
    #[must_use]
    pub fn without(&self, other: &Self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|address| !other.contains(address))
                .cloned()
                .collect(),
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MailAddress> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[MailAddress] {
        &self.0
    }
}

impl FromIterator<MailAddress> for Recipients {
    fn from_iter<T: IntoIterator<Item = MailAddress>>(iter: T) -> Self {
        let mut recipients = Self::new();
        for address in iter {
            recipients.push(address);
        }
        recipients
    }
}

impl From<Vec<MailAddress>> for Recipients {
    fn from(value: Vec<MailAddress>) -> Self {
        value.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a Recipients {
    type Item = &'a MailAddress;
    type IntoIter = std::slice::Iter<'a, MailAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for Recipients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            Display::fmt(addr, f)?;
        }
        Ok(())
    }
}

/// A message in transit through the processing core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    id: MailId,
    sender: Option<MailAddress>,
    recipients: Recipients,
    content: Content,
    state: State,
    attributes: Attributes,
    error_message: Option<String>,
    last_updated: SystemTime,
    hop_count: u32,
}

impl Mail {
    pub fn new(
        sender: Option<MailAddress>,
        recipients: impl Into<Recipients>,
        content: impl Into<Content>,
        state: State,
    ) -> Self {
        Self {
            id: MailId::new(),
            sender,
            recipients: recipients.into(),
            content: content.into(),
            state,
            attributes: Attributes::default(),
            error_message: None,
            last_updated: SystemTime::now(),
            hop_count: 0,
        }
    }

    /// A copy of this mail restricted to `recipients`, split off by rule
    /// number `rule` of the current state.
    ///
    /// The branch id depends only on this id, the state, the hop count and
    /// `rule`, so rerunning a pass over the same stored mail reproduces it.
    #[must_use]
    pub fn fork(&self, recipients: Recipients, rule: usize) -> Self {
        let point = format!("{}:{}:{rule}", self.state, self.hop_count);
        let mut forked = self.clone();
        forked.id = self.id.fork(point.as_bytes());
        forked.recipients = recipients;
        forked.touch();
        forked
    }

    fn touch(&mut self) {
        self.last_updated = SystemTime::now();
    }

    #[inline]
    pub const fn id(&self) -> &MailId {
        &self.id
    }

    #[inline]
    pub const fn sender(&self) -> Option<&MailAddress> {
        self.sender.as_ref()
    }

    /// The sender as shown in logs, `<>` for the null sender
    pub fn sender_display(&self) -> String {
        self.sender
            .as_ref()
            .map_or_else(|| String::from("<>"), ToString::to_string)
    }

    pub fn set_sender(&mut self, sender: Option<MailAddress>) {
        self.sender = sender;
        self.touch();
    }

    #[inline]
    pub const fn recipients(&self) -> &Recipients {
        &self.recipients
    }

    pub fn recipients_mut(&mut self) -> &mut Recipients {
        self.touch();
        &mut self.recipients
    }

    pub fn set_recipients(&mut self, recipients: Recipients) {
        self.recipients = recipients;
        self.touch();
    }

    #[inline]
    pub const fn content(&self) -> &Content {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut Content {
        self.touch();
        &mut self.content
    }

    #[inline]
    pub const fn state(&self) -> &State {
        &self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
        self.touch();
    }

    #[inline]
    pub fn is_ghost(&self) -> bool {
        self.state.is_ghost()
    }

    #[inline]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.touch();
        self.attributes.insert(name.into(), value.into())
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.touch();
        self.attributes.remove(name)
    }

    #[inline]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.touch();
    }

    /// Adds `reason` to any existing error message rather than replacing it
    pub fn append_error_message(&mut self, reason: &str) {
        let message = match self.error_message.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}; {reason}"),
            _ => reason.to_string(),
        };
        self.set_error_message(message);
    }

    pub fn clear_error_message(&mut self) {
        self.error_message = None;
        self.touch();
    }

    #[inline]
    pub const fn last_updated(&self) -> SystemTime {
        self.last_updated
    }

    #[inline]
    pub const fn hop_count(&self) -> u32 {
        self.hop_count
    }

    /// Counts one more processor resolution, returning the new hop count
    pub fn record_hop(&mut self) -> u32 {
        self.hop_count = self.hop_count.saturating_add(1);
        self.touch();
        self.hop_count
    }

    pub fn reset_hops(&mut self) {
        self.hop_count = 0;
        self.touch();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn addr(s: &str) -> MailAddress {
        MailAddress::parse(s).unwrap()
    }

    fn mail() -> Mail {
        Mail::new(
            Some(addr("sender@example.com")),
            vec![addr("a@example.com"), addr("b@example.com"), addr("a@example.com")],
            b"Subject: test\r\n\r\nbody".to_vec(),
            State::root(),
        )
    }

    #[test]
    fn test_recipients_are_unique_and_ordered() {
        let mail = mail();
        assert_eq!(mail.recipients().to_string(), "a@example.com, b@example.com");
    }

    #[test]
    fn test_id_display_and_parse() {
        let id = MailId::new();
        assert!(!id.to_string().contains('.'));
        assert_eq!(id.to_string().parse::<MailId>().unwrap(), id);

        let branch = id.fork(b"0");
        assert_eq!(branch.root(), id.root());
        assert!(branch.is_branch());
        assert_eq!(branch.to_string().parse::<MailId>().unwrap(), branch);
        assert!(branch.to_string().starts_with(&id.to_string()));

        assert!(branch.matches_name(&id.to_string()));
        assert!(branch.matches_name(&branch.to_string().to_lowercase()));
        assert!(!id.matches_name(&branch.to_string()));
        assert!("not-an-id".parse::<MailId>().is_err());
    }

    #[test]
    fn test_fork_keeps_lineage() {
        let original = mail();
        let matched = original.recipients().intersect(&[addr("b@example.com")]);
        let forked = original.fork(matched, 0);

        assert_eq!(forked.id().root(), original.id().root());
        assert_ne!(forked.id(), original.id());
        assert_eq!(forked.recipients().len(), 1);
        assert_eq!(forked.content(), original.content());

        let remainder = original.recipients().without(forked.recipients());
        assert_eq!(remainder.to_string(), "a@example.com");
    }

    #[test]
    fn test_fork_ids_are_reproducible() {
        let original = mail();
        let first = original.fork(original.recipients().clone(), 1);
        let again = original.fork(original.recipients().clone(), 1);
        assert_eq!(first.id(), again.id());
        assert_eq!(
            first.id().branch().map(|branch| branch.timestamp_ms()),
            Some(original.id().root().timestamp_ms())
        );

        assert_ne!(original.fork(original.recipients().clone(), 2).id(), first.id());

        let mut later = original.clone();
        assert_eq!(later.record_hop(), 1);
        assert_ne!(later.fork(later.recipients().clone(), 1).id(), first.id());

        let mut elsewhere = original.clone();
        elsewhere.set_state(State::error());
        assert_ne!(elsewhere.fork(elsewhere.recipients().clone(), 1).id(), first.id());

        let nested = first.fork(first.recipients().clone(), 1);
        assert_ne!(nested.id(), first.id());
        assert_eq!(nested.id().root(), original.id().root());
    }

    #[test]
    fn test_mutations_touch_last_updated() {
        let mut mail = mail();
        let before = mail.last_updated();
        std::thread::sleep(std::time::Duration::from_millis(2));

        mail.set_attribute("courier.test", true);
        assert!(mail.last_updated() > before);
        assert_eq!(mail.attribute("courier.test"), Some(&AttributeValue::Bool(true)));
    }

    #[test]
    fn test_error_message_append() {
        let mut mail = mail();
        mail.append_error_message("first");
        mail.append_error_message("second");
        assert_eq!(mail.error_message(), Some("first; second"));
    }

    #[test]
    fn test_hops_and_null_sender() {
        let mut mail = Mail::new(None, Recipients::new(), Vec::<u8>::new(), State::root());
        assert_eq!(mail.sender_display(), "<>");
        assert_eq!(mail.record_hop(), 1);
        assert_eq!(mail.record_hop(), 2);
        mail.reset_hops();
        assert_eq!(mail.hop_count(), 0);
    }

    #[test]
    fn test_bincode_round_trip() {
        let mut mail = mail();
        mail.set_attribute("count", 3_i64);
        mail.set_error_message("oops");

        let config = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&mail, config).unwrap();
        let (decoded, _): (Mail, usize) = bincode::serde::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(decoded, mail);
    }
}
