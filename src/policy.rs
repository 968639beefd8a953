//! Cleaning options and the unknown-member policy.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// What a container cleaner does with a member no cleaner recognizes.
///
/// The default is `Abort`: an unrecognized member could carry anything, so
/// the safe answer is to refuse to produce an output at all.
///
/// # Examples
///
/// ```rust
/// use metastrip::UnknownMemberPolicy;
///
/// let policy: UnknownMemberPolicy = "omit".parse().unwrap();
/// assert_eq!(policy, UnknownMemberPolicy::Omit);
///
/// // Anything else is rejected rather than silently defaulted.
/// assert!("whatever".parse::<UnknownMemberPolicy>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnknownMemberPolicy {
    /// Fail the whole container.
    #[default]
    Abort,
    /// Drop the member with a warning.
    Omit,
    /// Copy the member unmodified with a warning.
    Keep,
}

impl UnknownMemberPolicy {
    /// Returns the policy name as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Omit => "omit",
            Self::Keep => "keep",
        }
    }
}

impl FromStr for UnknownMemberPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "omit" => Ok(Self::Omit),
            "keep" => Ok(Self::Keep),
            other => Err(Error::InvalidPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for UnknownMemberPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options shared by every cleaner built through the dispatcher.
///
/// # Example
///
/// ```rust
/// use metastrip::{CleanOptions, UnknownMemberPolicy};
///
/// let options = CleanOptions::new().unknown_members(UnknownMemberPolicy::Keep);
/// assert_eq!(options.unknown_member_policy(), UnknownMemberPolicy::Keep);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanOptions {
    unknown_members: UnknownMemberPolicy,
}

impl CleanOptions {
    /// Creates options with the default (abort) policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy applied to unrecognized container members.
    pub fn unknown_members(mut self, policy: UnknownMemberPolicy) -> Self {
        self.unknown_members = policy;
        self
    }

    /// Returns the unknown-member policy.
    pub fn unknown_member_policy(&self) -> UnknownMemberPolicy {
        self.unknown_members
    }
}
