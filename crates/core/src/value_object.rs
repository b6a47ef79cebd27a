//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. Item snapshots
/// captured at issue time are value objects: they are copied out of the
/// armory entry and never refer back to it, so later edits to the master
/// item leave the history untouched.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
