use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Fields, RecordKind, Scope};

/// Monotonic marker the remote store assigns to every document write
pub type Revision = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
	Added,
	Modified,
	Removed,
}

/// One event of a collection subscription
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
	pub id: String,
	/// Empty for removals
	pub fields: Fields,
	pub change_type: ChangeType,
	pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
	pub id: String,
	pub fields: Fields,
	pub revision: Revision,
}

/// Server-side filter for one-shot queries
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
	All,
	/// Array field `field` contains `value`
	ArrayContains { field: String, value: Value },
	Equals { field: String, value: Value },
}

impl Filter {
	pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::ArrayContains {
			field: field.into(),
			value: value.into(),
		}
	}

	pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::Equals {
			field: field.into(),
			value: value.into(),
		}
	}

	#[must_use]
	pub fn matches(&self, fields: &Fields) -> bool {
		match self {
			Self::All => true,
			Self::ArrayContains { field, value } => fields
				.get(field)
				.and_then(Value::as_array)
				.is_some_and(|items| items.contains(value)),
			Self::Equals { field, value } => fields.get(field) == Some(value),
		}
	}
}

/// What a transaction does with the document it read
#[derive(Debug, Clone, PartialEq)]
pub enum TransactDecision {
	Write(Fields),
	Delete,
	Abort,
}

/// Read-modify-write step run atomically by [`RemoteStore::transact`]
pub type Transaction = Box<dyn FnOnce(Option<&Fields>) -> TransactDecision + Send>;

#[derive(Debug, Clone, PartialEq)]
pub struct TransactOutcome {
	/// Document as the transaction saw it
	pub before: Option<Fields>,
	/// Document after commit, `None` when deleted or missing
	pub after: Option<Fields>,
	/// Whether the transaction wrote or deleted anything
	pub committed: bool,
	pub revision: Option<Revision>,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum RemoteError {
	#[error("scope <scope='{scope}'> is unreachable: {reason}")]
	Unreachable { scope: Scope, reason: String },
	#[error("permission denied on scope <scope='{0}'>")]
	PermissionDenied(Scope),
	#[error("subscription to <scope='{scope}', kind='{kind}'> was disconnected")]
	Disconnected { scope: Scope, kind: RecordKind },
	#[error("remote store error: {0}")]
	Other(String),
}

impl RemoteError {
	/// Scope the failed call targeted, when known
	#[must_use]
	pub const fn scope(&self) -> Option<&Scope> {
		match self {
			Self::Unreachable { scope, .. }
			| Self::PermissionDenied(scope)
			| Self::Disconnected { scope, .. } => Some(scope),
			Self::Other(_) => None,
		}
	}

	/// Network and permission failures clear up on their own (reconnects, membership propagation)
	#[must_use]
	pub const fn is_transient(&self) -> bool {
		!matches!(self, Self::Other(_))
	}
}

/// Multi-tenant remote document store, addressed by (scope, kind, id)
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
	/// Creates or replaces the document
	async fn write(
		&self,
		scope: &Scope,
		kind: RecordKind,
		id: &str,
		fields: Fields,
	) -> Result<Revision, RemoteError>;

	/// Deleting a missing document succeeds
	async fn delete(&self, scope: &Scope, kind: RecordKind, id: &str)
		-> Result<Revision, RemoteError>;

	/// Live feed of a collection; starts with every existing document as a `Modified` event
	async fn subscribe(
		&self,
		scope: &Scope,
		kind: RecordKind,
	) -> Result<BoxStream<'static, RemoteChange>, RemoteError>;

	async fn query_once(
		&self,
		scope: &Scope,
		kind: RecordKind,
		filter: &Filter,
	) -> Result<Vec<Document>, RemoteError>;

	/// Atomically reads the document and applies `transaction`'s decision
	async fn transact(
		&self,
		scope: &Scope,
		kind: RecordKind,
		id: &str,
		transaction: Transaction,
	) -> Result<TransactOutcome, RemoteError>;
}
