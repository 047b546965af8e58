use std::fmt::Debug;

use courier_common::{Mail, MailAddress};

use crate::error::MatchError;

/// Which recipients of a mail a [`Matcher`] selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    NoMatch,
    /// Every recipient
    All,
    /// Only these; anything not among the mail's recipients is ignored
    Recipients(Vec<MailAddress>),
}

impl MatchOutcome {
    /// `All` when every recipient passes `predicate`, `NoMatch` when none do
    pub fn from_recipients(mail: &Mail, predicate: impl Fn(&MailAddress) -> bool) -> Self {
        let matched: Vec<MailAddress> = mail
            .recipients()
            .iter()
            .filter(|rcpt| predicate(rcpt))
            .cloned()
            .collect();

        if matched.is_empty() {
            Self::NoMatch
        } else if matched.len() == mail.recipients().len() {
            Self::All
        } else {
            Self::Recipients(matched)
        }
    }

    /// `All` or `NoMatch`, for conditions on the mail as a whole
    #[must_use]
    pub const fn whole(matched: bool) -> Self {
        if matched { Self::All } else { Self::NoMatch }
    }
}

/// Predicate selecting the recipients a rule applies to.
///
/// Implementations are shared between workers and must not mutate the mail.
pub trait Matcher: Send + Sync + Debug {
    ///
    /// Decide which recipients of `mail` this rule applies to
    ///
    /// # Errors
    /// If the decision cannot be made, e.g. the content cannot be parsed. The
    /// pipeline routes the mail to the error processor.
    ///
    fn match_mail(&self, mail: &Mail) -> Result<MatchOutcome, MatchError>;
}
