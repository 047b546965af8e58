//! Matchers and mailets available to every configuration.
//!
//! | Matcher           | Condition                          |
//! |-------------------|------------------------------------|
//! | `All`             |                                    |
//! | `RecipientIs`     | comma separated addresses          |
//! | `HostIs`          | comma separated recipient domains  |
//! | `SenderIs`        | comma separated addresses, or `<>` |
//! | `SenderHostIs`    | comma separated sender domains     |
//! | `HasAttribute`    | `name` or `name=value`             |
//! | `HasHeader`       | `Name` or `Name:value`             |
//! | `SizeGreaterThan` | bytes, with optional `k`/`m`       |
//!
//! Mailets: `ToProcessor`, `Ghost` (alias `Null`), `SetAttribute`,
//! `RemoveAttribute`, `AddHeader`, `ToRepository`, `RemoveRecipients`,
//! `Delay`, `Log` and `Bounce`.

use std::sync::Arc;

use crate::{mailet::Mailet, matcher::Matcher, registry::ComponentRegistry};

pub mod mailets;
pub mod matchers;

macro_rules! matcher {
    ($registry:expr, $name:literal, $ty:ty) => {
        $registry.register_matcher($name, |condition| {
            Ok(Arc::new(<$ty>::from_condition(condition)?) as Arc<dyn Matcher>)
        });
    };
}

macro_rules! mailet {
    ($registry:expr, $name:literal, $ty:ty) => {
        $registry.register_mailet($name, |args| {
            Ok(Arc::new(<$ty>::from_arguments(args)?) as Arc<dyn Mailet>)
        });
    };
}

pub(crate) fn register(registry: &mut ComponentRegistry) {
    registry.register_matcher("All", |_| Ok(Arc::new(matchers::All) as Arc<dyn Matcher>));
    matcher!(registry, "RecipientIs", matchers::RecipientIs);
    matcher!(registry, "HostIs", matchers::HostIs);
    matcher!(registry, "SenderIs", matchers::SenderIs);
    matcher!(registry, "SenderHostIs", matchers::SenderHostIs);
    matcher!(registry, "HasAttribute", matchers::HasAttribute);
    matcher!(registry, "HasHeader", matchers::HasHeader);
    matcher!(registry, "SizeGreaterThan", matchers::SizeGreaterThan);

    for name in ["Ghost", "Null"] {
        registry.register_mailet(name, |_| Ok(Arc::new(mailets::Ghost) as Arc<dyn Mailet>));
    }
    registry.register_mailet("Log", |args| {
        Ok(Arc::new(mailets::Log::from_arguments(args)) as Arc<dyn Mailet>)
    });
    mailet!(registry, "ToProcessor", mailets::ToProcessor);
    mailet!(registry, "SetAttribute", mailets::SetAttribute);
    mailet!(registry, "RemoveAttribute", mailets::RemoveAttribute);
    mailet!(registry, "AddHeader", mailets::AddHeader);
    mailet!(registry, "ToRepository", mailets::ToRepository);
    mailet!(registry, "RemoveRecipients", mailets::RemoveRecipients);
    mailet!(registry, "Delay", mailets::Delay);
    mailet!(registry, "Bounce", mailets::Bounce);
}
