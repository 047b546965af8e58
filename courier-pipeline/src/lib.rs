//! Matcher/mailet rule engine.
//!
//! A mail's [`State`](courier_common::State) names the [`Processor`] that
//! handles it next. Each processor runs an ordered list of rules; a rule's
//! [`Matcher`] selects recipients and its [`Mailet`]s act on them, possibly
//! forking the mail and routing the pieces to other states.
//!
//! Processors are built once from a [`PipelineConfig`] with a
//! [`ComponentRegistry`] of named factories, giving an immutable
//! [`ProcessorRegistry`].

pub mod builtins;
pub mod config;
pub mod error;
pub mod mailet;
pub mod matcher;
pub mod processor;
pub mod registry;

pub use config::{MailetConfig, PipelineConfig, ProcessorConfig, ProcessorRegistry, RuleConfig};
pub use error::{ConfigurationError, MailetError, MatchError, ProcessingError};
pub use mailet::{Mailet, MailetContext, MailetOutcome};
pub use matcher::{MatchOutcome, Matcher};
pub use processor::{MailetStep, Processor, Rule};
pub use registry::{Arguments, ComponentRegistry, Condition};
