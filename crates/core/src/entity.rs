//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Products and chain nodes are both entities: two records with the same id
/// are the same record, whatever their field values.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
