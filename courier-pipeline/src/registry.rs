//! Name → factory lookup for matchers and mailets.
//!
//! Configuration only ever names components; the [`ComponentRegistry`] turns
//! those names into instances, so an unknown name is caught when the pipeline
//! is loaded rather than when the first mail reaches it.

use std::{fmt, str::FromStr, sync::Arc};

use ahash::AHashMap;

use crate::{builtins, error::ConfigurationError, mailet::Mailet, matcher::Matcher};

pub type MatcherFactory =
    Arc<dyn Fn(&Condition<'_>) -> Result<Arc<dyn Matcher>, ConfigurationError> + Send + Sync>;
pub type MailetFactory =
    Arc<dyn Fn(&Arguments<'_>) -> Result<Arc<dyn Mailet>, ConfigurationError> + Send + Sync>;

/// The condition written after `=` in a matcher name, e.g. `RecipientIs=a@b`
#[derive(Debug, Clone, Copy)]
pub struct Condition<'a> {
    matcher: &'a str,
    value: Option<&'a str>,
}

impl<'a> Condition<'a> {
    #[must_use]
    pub const fn new(matcher: &'a str, value: Option<&'a str>) -> Self {
        Self { matcher, value }
    }

    #[must_use]
    pub const fn value(&self) -> Option<&'a str> {
        self.value
    }

    /// # Errors
    /// If the matcher was configured without a condition
    pub fn required(&self) -> Result<&'a str, ConfigurationError> {
        self.value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigurationError::invalid(self.matcher, "a condition is required"))
    }

    /// The condition as a comma separated list
    ///
    /// # Errors
    /// If the matcher was configured without a condition
    pub fn list(&self) -> Result<Vec<&'a str>, ConfigurationError> {
        Ok(self
            .required()?
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect())
    }

    pub fn invalid(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::invalid(self.matcher, reason)
    }
}

/// The `config` map given to a mailet
#[derive(Debug, Clone, Copy)]
pub struct Arguments<'a> {
    mailet: &'a str,
    values: &'a AHashMap<String, String>,
}

impl<'a> Arguments<'a> {
    #[must_use]
    pub const fn new(mailet: &'a str, values: &'a AHashMap<String, String>) -> Self {
        Self { mailet, values }
    }

    #[must_use]
    pub fn optional(&self, key: &str) -> Option<&'a str> {
        self.values.get(key).map(String::as_str)
    }

    /// # Errors
    /// If `key` is missing
    pub fn required(&self, key: &str) -> Result<&'a str, ConfigurationError> {
        self.optional(key)
            .ok_or_else(|| self.invalid(format!("missing required argument '{key}'")))
    }

    /// Parse `key`, falling back to `default` when it is absent
    ///
    /// # Errors
    /// If the value is present but does not parse
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigurationError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |value| {
            value
                .trim()
                .parse()
                .map_err(|err| self.invalid(format!("'{key}' is invalid: {err}")))
        })
    }

    pub fn invalid(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::invalid(self.mailet, reason)
    }
}

/// Factories for every matcher and mailet a configuration may name
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    matchers: AHashMap<String, MatcherFactory>,
    mailets: AHashMap<String, MailetFactory>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut matchers: Vec<&str> = self.matchers.keys().map(String::as_str).collect();
        let mut mailets: Vec<&str> = self.mailets.keys().map(String::as_str).collect();
        matchers.sort_unstable();
        mailets.sort_unstable();

        f.debug_struct("ComponentRegistry")
            .field("matchers", &matchers)
            .field("mailets", &mailets)
            .finish()
    }
}

impl ComponentRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in matchers and mailets
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register(&mut registry);
        registry
    }

    /// Register (or replace) a matcher factory
    pub fn register_matcher<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Condition<'_>) -> Result<Arc<dyn Matcher>, ConfigurationError> + Send + Sync + 'static,
    {
        self.matchers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register (or replace) a mailet factory
    pub fn register_mailet<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Arguments<'_>) -> Result<Arc<dyn Mailet>, ConfigurationError> + Send + Sync + 'static,
    {
        self.mailets.insert(name.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn has_matcher(&self, name: &str) -> bool {
        self.matchers.contains_key(name)
    }

    #[must_use]
    pub fn has_mailet(&self, name: &str) -> bool {
        self.mailets.contains_key(name)
    }

    /// # Errors
    /// If `name` is not registered or the factory rejects the condition
    pub fn build_matcher(
        &self,
        name: &str,
        condition: Option<&str>,
    ) -> Result<Arc<dyn Matcher>, ConfigurationError> {
        let factory = self
            .matchers
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownMatcher(name.to_string()))?;

        factory(&Condition::new(name, condition))
    }

    /// # Errors
    /// If `name` is not registered or the factory rejects the arguments
    pub fn build_mailet(
        &self,
        name: &str,
        config: &AHashMap<String, String>,
    ) -> Result<Arc<dyn Mailet>, ConfigurationError> {
        let factory = self
            .mailets
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownMailet(name.to_string()))?;

        factory(&Arguments::new(name, config))
    }
}
