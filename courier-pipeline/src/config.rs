use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use courier_common::{State, internal};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigurationError,
    processor::{MailetStep, Processor, Rule},
    registry::ComponentRegistry,
};

/// A mailet as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailetConfig {
    pub name: String,
    #[serde(default)]
    pub config: AHashMap<String, String>,
}

/// A rule as written in configuration
///
/// The matcher condition may be given inline (`matcher: "RecipientIs=a@b"`)
/// or separately (`condition: Some("a@b")`), not both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub matcher: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub mailets: Vec<MailetConfig>,
}

impl RuleConfig {
    /// The matcher name and its condition, with an inline `Name=condition`
    /// split apart
    ///
    /// # Errors
    /// If a condition is given both inline and separately
    pub fn matcher_parts(&self) -> Result<(&str, Option<&str>), ConfigurationError> {
        match (self.matcher.split_once('='), self.condition.as_deref()) {
            (Some(_), Some(_)) => Err(ConfigurationError::ConflictingCondition(
                self.matcher.clone(),
            )),
            (Some((name, condition)), None) => Ok((name.trim(), Some(condition))),
            (None, condition) => Ok((self.matcher.trim(), condition)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// State given to mail no rule routed. Defaults to `ghost`.
    #[serde(default)]
    pub fallthrough: Option<String>,
}

/// The whole rule engine, as configured
///
/// ```ron
/// pipeline: (
///     initial_state: "root",
///     max_hops: 20,
///     processors: [
///         (
///             name: "root",
///             rules: [
///                 (matcher: "HostIs=example.com", mailets: [
///                     (name: "ToProcessor", config: { "processor": "local" }),
///                 ]),
///             ],
///             fallthrough: Some("relay"),
///         ),
///         ...
///     ],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// State given to newly accepted mail
    ///
    /// Default: `root`
    #[serde(default = "defaults::initial_state")]
    pub initial_state: String,

    /// Processor resolutions a mail may go through before it is treated as
    /// looping
    ///
    /// Default: 20
    #[serde(default = "defaults::max_hops")]
    pub max_hops: u32,

    #[serde(default = "defaults::processors")]
    pub processors: Vec<ProcessorConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_state: defaults::initial_state(),
            max_hops: defaults::max_hops(),
            processors: defaults::processors(),
        }
    }
}

mod defaults {
    use ahash::AHashMap;
    use courier_common::State;
    use courier_spool::DEAD_LETTER;

    use super::{MailetConfig, ProcessorConfig, RuleConfig};

    pub fn initial_state() -> String {
        State::ROOT.to_string()
    }

    pub const fn max_hops() -> u32 {
        20
    }

    /// An empty `root` that discards everything and an `error` processor
    /// that keeps failed mail in the dead-letter repository
    pub fn processors() -> Vec<ProcessorConfig> {
        vec![
            ProcessorConfig {
                name: State::ROOT.to_string(),
                rules: Vec::new(),
                fallthrough: None,
            },
            ProcessorConfig {
                name: State::ERROR.to_string(),
                rules: vec![RuleConfig {
                    matcher: String::from("All"),
                    condition: None,
                    mailets: vec![MailetConfig {
                        name: String::from("ToRepository"),
                        config: AHashMap::from_iter([(
                            String::from("repository"),
                            DEAD_LETTER.to_string(),
                        )]),
                    }],
                }],
                fallthrough: None,
            },
        ]
    }
}

impl PipelineConfig {
    ///
    /// Build every processor, resolving component names through `components`
    ///
    /// # Errors
    /// - an unknown matcher or mailet, or one rejecting its arguments
    /// - a processor named twice, or named after a reserved state
    /// - no `error` processor, or none for the initial state
    /// - a fallthrough or a mailet route naming no processor
    ///
    pub fn build(&self, components: &ComponentRegistry) -> Result<ProcessorRegistry, ConfigurationError> {
        if self.max_hops == 0 {
            return Err(ConfigurationError::InvalidMaxHops);
        }

        let mut names = AHashSet::with_capacity(self.processors.len());
        for processor in &self.processors {
            let name = processor.name.trim();
            if State::is_reserved(name) {
                return Err(ConfigurationError::ReservedName(name.to_string()));
            }
            if !names.insert(name) {
                return Err(ConfigurationError::DuplicateProcessor(name.to_string()));
            }
        }

        let initial_state = State::new(&self.initial_state)?;
        for required in [State::ERROR, initial_state.as_str()] {
            if !names.contains(required) {
                return Err(ConfigurationError::MissingProcessor(required.to_string()));
            }
        }

        let routable = |processor: &str, target: &State| {
            if target.is_ghost() || names.contains(target.as_str()) {
                Ok(())
            } else {
                Err(ConfigurationError::UnknownTarget {
                    processor: processor.to_string(),
                    target: target.to_string(),
                })
            }
        };

        let mut processors = AHashMap::with_capacity(self.processors.len());
        for config in &self.processors {
            let state = State::new(&config.name)?;

            let fallthrough = config.fallthrough.as_deref().map(State::new).transpose()?;
            if let Some(target) = &fallthrough {
                if target == &state {
                    return Err(ConfigurationError::SelfFallthrough(state.to_string()));
                }
                routable(state.as_str(), target)?;
            }

            let mut rules = Vec::with_capacity(config.rules.len());
            for rule in &config.rules {
                let (matcher_name, condition) = rule.matcher_parts()?;
                let matcher = components.build_matcher(matcher_name, condition)?;

                let mut mailets = Vec::with_capacity(rule.mailets.len());
                for mailet in &rule.mailets {
                    let built = components.build_mailet(&mailet.name, &mailet.config)?;
                    if let Some(target) = built.target() {
                        routable(state.as_str(), target)?;
                    }
                    mailets.push(MailetStep::new(mailet.name.clone(), built));
                }

                rules.push(Rule::new(rule.matcher.clone(), matcher, mailets));
            }

            internal!(
                level = DEBUG,
                "Built processor '{state}' with {} rules",
                rules.len()
            );
            processors.insert(
                state.clone(),
                Arc::new(Processor::new(state, rules, fallthrough)),
            );
        }

        Ok(ProcessorRegistry {
            processors,
            initial_state,
            max_hops: self.max_hops,
        })
    }
}

/// Maps a mail's state to the processor responsible for it
#[derive(Debug, Clone)]
pub struct ProcessorRegistry {
    processors: AHashMap<State, Arc<Processor>>,
    initial_state: State,
    max_hops: u32,
}

impl ProcessorRegistry {
    #[must_use]
    pub fn resolve(&self, state: &State) -> Option<&Arc<Processor>> {
        self.processors.get(state)
    }

    #[inline]
    pub const fn initial_state(&self) -> &State {
        &self.initial_state
    }

    #[inline]
    pub const fn max_hops(&self) -> u32 {
        self.max_hops
    }

    /// Configured states, sorted
    #[must_use]
    pub fn states(&self) -> Vec<&State> {
        let mut states: Vec<&State> = self.processors.keys().collect();
        states.sort_unstable();
        states
    }

    /// Check that every repository a mailet stores into is among `known`
    ///
    /// # Errors
    /// [`ConfigurationError::UnknownRepository`] for the first one that is not
    pub fn check_repositories(&self, known: &[&str]) -> Result<(), ConfigurationError> {
        for state in self.states() {
            let Some(processor) = self.processors.get(state) else {
                continue;
            };

            let stored = processor
                .rules()
                .iter()
                .flat_map(Rule::mailets)
                .filter_map(|step| step.mailet.repository());
            for repository in stored {
                if !known.contains(&repository) {
                    return Err(ConfigurationError::UnknownRepository {
                        processor: state.to_string(),
                        repository: repository.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
