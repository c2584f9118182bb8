use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sl_utils::{GroupCode, IdError, UserId};

const OWNER_PREFIX: &str = "users/";
const GROUP_PREFIX: &str = "groups/";
const REGISTRY_PATH: &str = "registry";

#[derive(thiserror::Error, Debug)]
pub enum ScopeError {
	#[error("unknown scope path <path='{0}'>")]
	UnknownPath(String),
	#[error(transparent)]
	Id(#[from] IdError),
}

/// Remote namespace a record is replicated into
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
	/// Private data of one user, `users/{uid}`
	Owner(UserId),
	/// Data shared by a group's participants, `groups/{code}`
	Group(GroupCode),
	/// Global index of shared groups
	Registry,
}

impl Scope {
	pub fn parse(path: &str) -> Result<Self, ScopeError> {
		if let Some(uid) = path.strip_prefix(OWNER_PREFIX) {
			Ok(Self::Owner(UserId::parse(uid)?))
		} else if let Some(code) = path.strip_prefix(GROUP_PREFIX) {
			Ok(Self::Group(GroupCode::parse(code)?))
		} else if path == REGISTRY_PATH {
			Ok(Self::Registry)
		} else {
			Err(ScopeError::UnknownPath(path.to_string()))
		}
	}

	#[must_use]
	pub fn path(&self) -> String {
		self.to_string()
	}

	#[must_use]
	pub const fn group_code(&self) -> Option<&GroupCode> {
		match self {
			Self::Group(code) => Some(code),
			_ => None,
		}
	}
}

impl fmt::Display for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Owner(uid) => write!(f, "{OWNER_PREFIX}{uid}"),
			Self::Group(code) => write!(f, "{GROUP_PREFIX}{code}"),
			Self::Registry => f.write_str(REGISTRY_PATH),
		}
	}
}

impl FromStr for Scope {
	type Err = ScopeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<String> for Scope {
	type Error = ScopeError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(&value)
	}
}

impl From<Scope> for String {
	fn from(scope: Scope) -> Self {
		scope.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scope_paths() {
		let owner = Scope::Owner(UserId::parse("uid_1").unwrap());
		let group = Scope::Group(GroupCode::parse("QWER23").unwrap());

		assert_eq!(owner.path(), "users/uid_1");
		assert_eq!(group.path(), "groups/QWER23");
		assert_eq!(Scope::Registry.path(), "registry");

		for scope in [owner, group, Scope::Registry] {
			assert_eq!(scope.path().parse::<Scope>().unwrap(), scope);
		}

		assert!(matches!(
			Scope::parse("devices/abc"),
			Err(ScopeError::UnknownPath(_))
		));
		assert!(matches!(Scope::parse("users/"), Err(ScopeError::Id(_))));
	}
}
