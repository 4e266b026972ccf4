//! Strongly-typed identifiers for warden entities.
//!
//! Every entity with an id in the data model is a UUID newtype built with
//! [`domain-key`](https://crates.io/crates/domain-key)'s `Uuid<D>` wrapper, the
//! same pattern the rest of this workspace uses for its own identifiers.
//! Distinct domains prevent mixing, say, a [`SandboxId`] where a
//! [`TrajectoryId`] is expected — the compiler rejects it.
//!
//! All types are `Copy` (16 bytes), support `v4()`, `nil()`, `parse(&str)`,
//! full serde support (as a UUID string), `Display`, `FromStr`, `Eq`, `Ord`,
//! `Hash`.

use domain_key::define_uuid;

pub use domain_key::UuidParseError;

define_uuid!(SandboxIdDomain => SandboxId);
define_uuid!(TrajectoryIdDomain => TrajectoryId);
define_uuid!(AuditLogIdDomain => AuditLogId);
define_uuid!(BuildSnapshotIdDomain => BuildSnapshotId);
define_uuid!(SyncQueueEntryIdDomain => SyncQueueEntryId);
define_uuid!(NetworkRuleIdDomain => NetworkRuleId);
define_uuid!(ClassifiedErrorIdDomain => ClassifiedErrorId);
