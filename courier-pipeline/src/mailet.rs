use std::fmt::Debug;

use async_trait::async_trait;
use courier_common::{Mail, MailId, State};

use crate::error::MailetError;

/// What the pipeline should do with a mail after a mailet ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailetOutcome {
    /// Carry on with the next mailet of the rule
    Continue,
    /// Stop processing here and send the mail to this state
    Route(State),
}

/// Services the running core offers to mailets.
#[async_trait]
pub trait MailetContext: Send + Sync {
    /// Store a copy of `mail` into the named repository
    async fn store(&self, repository: &str, mail: &Mail) -> Result<(), MailetError>;

    /// Queue a brand new mail (a bounce, a notification) for processing from
    /// the initial state
    async fn submit(&self, mail: Mail) -> Result<MailId, MailetError>;
}

/// An action over a mail.
///
/// A mailet may change recipients (removing one means it has been handled),
/// attributes, content and state. Like matchers, mailets are shared between
/// workers.
#[async_trait]
pub trait Mailet: Send + Sync + Debug {
    ///
    /// Act on `mail`
    ///
    /// # Errors
    /// Any failure routes the mail to the error processor with the error
    /// recorded in its error message.
    ///
    async fn service(
        &self,
        mail: &mut Mail,
        context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError>;

    /// The state this mailet sends mail to, if it is fixed by configuration
    fn target(&self) -> Option<&State> {
        None
    }

    /// The repository this mailet stores mail into, if it is fixed by
    /// configuration
    fn repository(&self) -> Option<&str> {
        None
    }
}
