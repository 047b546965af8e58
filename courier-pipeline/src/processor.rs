//! The rule engine.
//!
//! A [`Processor`] owns the rules for one state. Running a mail through it may
//! split the mail into several streams: whenever a matcher selects only some
//! recipients, the selected ones continue as a fork with a derived branch id and
//! the rest keep the original id, untouched by that rule. Recipients never end
//! up in two streams.

use std::sync::Arc;

use courier_common::{Mail, Recipients, State, internal};
use courier_tracing::traced;

use crate::{
    mailet::{Mailet, MailetContext, MailetOutcome},
    matcher::{MatchOutcome, Matcher},
};

/// A named mailet inside a [`Rule`]
#[derive(Debug, Clone)]
pub struct MailetStep {
    pub(crate) name: String,
    pub(crate) mailet: Arc<dyn Mailet>,
}

impl MailetStep {
    pub fn new(name: impl Into<String>, mailet: Arc<dyn Mailet>) -> Self {
        Self {
            name: name.into(),
            mailet,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One matcher and the mailets applied to what it selects
#[derive(Debug, Clone)]
pub struct Rule {
    matcher_name: String,
    matcher: Arc<dyn Matcher>,
    mailets: Vec<MailetStep>,
}

impl Rule {
    pub fn new(
        matcher_name: impl Into<String>,
        matcher: Arc<dyn Matcher>,
        mailets: Vec<MailetStep>,
    ) -> Self {
        Self {
            matcher_name: matcher_name.into(),
            matcher,
            mailets,
        }
    }

    #[inline]
    pub fn matcher_name(&self) -> &str {
        &self.matcher_name
    }

    #[inline]
    pub fn mailets(&self) -> &[MailetStep] {
        &self.mailets
    }
}

/// The outcome of applying one rule to one stream
enum Applied {
    /// Still in the processor's state, go on to the next rule
    Continue(Mail),
    /// Routed elsewhere (or ghosted), no more rules
    Finished(Mail),
}

/// Named, ordered list of rules responsible for one state
#[derive(Debug, Clone)]
pub struct Processor {
    state: State,
    rules: Vec<Rule>,
    fallthrough: Option<State>,
}

impl Processor {
    pub const fn new(state: State, rules: Vec<Rule>, fallthrough: Option<State>) -> Self {
        Self {
            state,
            rules,
            fallthrough,
        }
    }

    #[inline]
    pub const fn state(&self) -> &State {
        &self.state
    }

    #[inline]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Where mail goes when no rule routes it: the declared fallthrough, or
    /// `ghost`
    #[must_use]
    pub fn fallthrough(&self) -> State {
        self.fallthrough.clone().unwrap_or_else(State::ghost)
    }

    ///
    /// Run `mail` through every rule, returning the resulting streams
    ///
    /// Each returned mail has left this processor's state: it was routed by a
    /// mailet, ghosted because its recipients were consumed, sent to `error`
    /// by a failing matcher or mailet, or given the fallthrough state. The
    /// stream carrying the original id is always among them.
    ///
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(processor = %self.state, id = %mail.id())), timing(precision = "us"))]
    pub async fn process(&self, mail: Mail, context: &dyn MailetContext) -> Vec<Mail> {
        let mut active = vec![mail];
        let mut finished = Vec::new();

        for (index, rule) in self.rules.iter().enumerate() {
            let mut next = Vec::with_capacity(active.len());

            for stream in active {
                if stream.recipients().is_empty() {
                    next.push(stream);
                    continue;
                }

                for applied in self.apply(rule, index, stream, context).await {
                    match applied {
                        Applied::Continue(mail) => next.push(mail),
                        Applied::Finished(mail) => finished.push(mail),
                    }
                }
            }

            active = next;
            if active.is_empty() {
                break;
            }
        }

        let fallthrough = self.fallthrough();
        for mut stream in active {
            internal!(
                "{} fell through processor '{}' to '{fallthrough}'",
                stream.id(),
                self.state
            );
            stream.set_state(fallthrough.clone());
            finished.push(stream);
        }

        finished
    }

    /// Match one stream against `rule`, forking when only some recipients are
    /// selected, and run the mailets over the selected part
    async fn apply(
        &self,
        rule: &Rule,
        index: usize,
        mut stream: Mail,
        context: &dyn MailetContext,
    ) -> Vec<Applied> {
        let selected = match rule.matcher.match_mail(&stream) {
            Ok(MatchOutcome::NoMatch) => return vec![Applied::Continue(stream)],
            Ok(MatchOutcome::All) => stream.recipients().clone(),
            Ok(MatchOutcome::Recipients(subset)) => stream.recipients().intersect(&subset),
            Err(err) => {
                internal!(
                    level = WARN,
                    "Matcher {} failed on {}: {err}",
                    rule.matcher_name,
                    stream.id()
                );
                stream.set_error_message(format!("matcher {} failed: {err}", rule.matcher_name));
                stream.set_state(State::error());
                return vec![Applied::Finished(stream)];
            }
        };

        if selected.is_empty() {
            return vec![Applied::Continue(stream)];
        }

        let mut applied = Vec::with_capacity(2);
        let matched = if selected.len() == stream.recipients().len() {
            stream
        } else {
            let remainder: Recipients = stream.recipients().without(&selected);
            let fork = stream.fork(selected, index);
            internal!(
                level = DEBUG,
                "{} forked as {} by matcher {}",
                stream.id(),
                fork.id(),
                rule.matcher_name
            );
            stream.set_recipients(remainder);
            applied.push(Applied::Continue(stream));
            fork
        };

        applied.push(self.run_mailets(rule, matched, context).await);
        applied
    }

    async fn run_mailets(&self, rule: &Rule, mut mail: Mail, context: &dyn MailetContext) -> Applied {
        for step in &rule.mailets {
            match step.mailet.service(&mut mail, context).await {
                Ok(MailetOutcome::Continue) => {
                    if mail.state() != &self.state {
                        return Applied::Finished(mail);
                    }
                }
                Ok(MailetOutcome::Route(state)) => {
                    internal!(
                        level = DEBUG,
                        "{} routed from '{}' to '{state}' by mailet {}",
                        mail.id(),
                        self.state,
                        step.name
                    );
                    mail.set_state(state);
                    return Applied::Finished(mail);
                }
                Err(err) => {
                    internal!(
                        level = WARN,
                        "Mailet {} failed on {}: {err}",
                        step.name,
                        mail.id()
                    );
                    mail.set_error_message(format!("mailet {} failed: {err}", step.name));
                    mail.set_state(State::error());
                    return Applied::Finished(mail);
                }
            }
        }

        if mail.recipients().is_empty() {
            internal!(
                level = DEBUG,
                "All recipients of {} were consumed in '{}'",
                mail.id(),
                self.state
            );
            mail.set_state(State::ghost());
            return Applied::Finished(mail);
        }

        Applied::Continue(mail)
    }
}
