use std::{
    borrow::Borrow,
    fmt::{self, Display},
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// The name of the processor a [`crate::Mail`] should visit next.
///
/// Never empty. `ghost` and `error` are reserved: the former means the mail is
/// finished and should be discarded, the latter routes to the error processor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct State(Arc<str>);

impl State {
    pub const GHOST: &'static str = "ghost";
    pub const ERROR: &'static str = "error";
    pub const ROOT: &'static str = "root";

    pub fn new(name: impl AsRef<str>) -> Result<Self, StateError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(StateError::Empty);
        }

        Ok(Self(Arc::from(name)))
    }

    #[must_use]
    pub fn ghost() -> Self {
        Self(Arc::from(Self::GHOST))
    }

    #[must_use]
    pub fn error() -> Self {
        Self(Arc::from(Self::ERROR))
    }

    #[must_use]
    pub fn root() -> Self {
        Self(Arc::from(Self::ROOT))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_ghost(&self) -> bool {
        &*self.0 == Self::GHOST
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        &*self.0 == Self::ERROR
    }

    /// Names that may not be used for a configured processor
    pub fn is_reserved(name: &str) -> bool {
        name == Self::GHOST
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for State {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for State {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for State {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for State {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<State> for String {
    fn from(value: State) -> Self {
        value.0.to_string()
    }
}

impl PartialEq<str> for State {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for State {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}
