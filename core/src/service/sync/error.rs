use std::fmt;

use sl_utils::GroupCode;

use super::queue::QueueError;
use crate::{
	domain::{RecordError, RecordKind},
	infra::store::{LocalStoreError, RemoteError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotJoinableReason {
	/// No group with that code exists
	Missing,
	/// The group already has `cap` participants
	Full { cap: usize },
}

impl fmt::Display for NotJoinableReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Missing => f.write_str("no such group"),
			Self::Full { cap } => write!(f, "group already has {cap} participants"),
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("no authenticated user")]
	NotAuthenticated,
	#[error("mutations for scope <scope='{scope}'> could not be delivered, {pending} still queued: {source}")]
	ScopeUnreachable {
		scope: String,
		pending: usize,
		#[source]
		source: RemoteError,
	},
	#[error("group <code='{code}'> is not joinable: {reason}")]
	NotJoinable {
		code: GroupCode,
		reason: NotJoinableReason,
	},
	#[error("malformed {kind} record <id='{id}'>: {source}")]
	MalformedRecord {
		kind: RecordKind,
		id: String,
		#[source]
		source: RecordError,
	},
	#[error("{0} records are managed by the group operations")]
	NotShareable(RecordKind),
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error(transparent)]
	LocalStore(#[from] LocalStoreError),
	#[error(transparent)]
	Remote(#[from] RemoteError),
}

impl Error {
	/// Whether repeating the same call later may succeed
	#[must_use]
	pub const fn is_retryable(&self) -> bool {
		match self {
			Self::ScopeUnreachable { .. } => true,
			Self::Remote(e) => e.is_transient(),
			_ => false,
		}
	}
}
