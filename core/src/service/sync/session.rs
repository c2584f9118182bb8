use parking_lot::RwLock;
use sl_utils::UserId;
use tracing::info;

use super::Error;

/// Identity of the signed-in user, handed in by the host's auth layer
#[derive(Debug, Default)]
pub struct Session {
	user: RwLock<Option<UserId>>,
}

impl Session {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn signed_in(user: UserId) -> Self {
		Self {
			user: RwLock::new(Some(user)),
		}
	}

	pub fn sign_in(&self, user: UserId) {
		info!(%user, "User signed in");
		*self.user.write() = Some(user);
	}

	pub fn sign_out(&self) {
		if let Some(user) = self.user.write().take() {
			info!(%user, "User signed out");
		}
	}

	#[must_use]
	pub fn current(&self) -> Option<UserId> {
		self.user.read().clone()
	}

	pub fn require(&self) -> Result<UserId, Error> {
		self.current().ok_or(Error::NotAuthenticated)
	}
}
