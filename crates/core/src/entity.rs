//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Inventory entries are entities inside an armory: their quantities and
/// condition change in place while the item id stays fixed.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
