//! Reference-designator parsing and identifier allocation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::ManagedId;

/// A reference designator split into prefix and number, e.g. `R10` -> `R`, 10.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRef {
    pub prefix: String,
    pub number: u32,
}

/// Parse a designator of the form uppercase letters followed by digits,
/// no leading zeros (`R1`, `IC10`, `LED12`). Anything else is not a
/// designator this engine will allocate around.
pub fn parse_reference(s: &str) -> Option<ParsedRef> {
    if s.len() < 2 {
        return None;
    }
    let first_digit = s.find(|c: char| c.is_ascii_digit())?;
    let (prefix, digits) = s.split_at(first_digit);
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    let number: u32 = digits.parse().ok()?;
    if number == 0 {
        return None;
    }
    Some(ParsedRef {
        prefix: prefix.to_owned(),
        number,
    })
}

/// Allocator for reference designators and managed ids.
///
/// One allocator serves a whole sync invocation and is passed by reference
/// into every scope that mints identifiers. Per-prefix counters plus a
/// uniqueness set guarantee every minted reference and id is globally unique
/// even if sibling scopes are matched concurrently.
#[derive(Debug, Default)]
pub struct IdentifierAllocator {
    state: Mutex<AllocState>,
}

#[derive(Debug, Default)]
struct AllocState {
    used_refs: HashSet<String>,
    next_by_prefix: BTreeMap<String, u32>,
    minted_ids: HashSet<ManagedId>,
}

impl IdentifierAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an existing reference so it is never minted again.
    /// Returns `false` if the reference was already reserved.
    pub fn reserve(&self, reference: &str) -> bool {
        let mut state = self.state.lock().expect("allocator poisoned");
        state.used_refs.insert(reference.to_owned())
    }

    /// Check whether a reference is already in use.
    pub fn is_reserved(&self, reference: &str) -> bool {
        let state = self.state.lock().expect("allocator poisoned");
        state.used_refs.contains(reference)
    }

    /// Mint the lowest free designator for a prefix.
    pub fn mint_reference(&self, prefix: &str) -> String {
        let mut state = self.state.lock().expect("allocator poisoned");
        let mut next = state.next_by_prefix.get(prefix).copied().unwrap_or(1);
        loop {
            let candidate = format!("{prefix}{next}");
            if !state.used_refs.contains(&candidate) {
                state.used_refs.insert(candidate.clone());
                state.next_by_prefix.insert(prefix.to_owned(), next + 1);
                return candidate;
            }
            next += 1;
        }
    }

    /// Reserve an existing managed id so minting can never return it again.
    /// Ids once assigned are immutable and never reused, even after the
    /// element they marked is removed.
    pub fn reserve_id(&self, id: ManagedId) {
        let mut state = self.state.lock().expect("allocator poisoned");
        state.minted_ids.insert(id);
    }

    /// Mint a fresh managed id, unique against everything reserved or
    /// minted so far.
    pub fn mint_id(&self) -> ManagedId {
        let mut state = self.state.lock().expect("allocator poisoned");
        loop {
            let id = ManagedId::new();
            if state.minted_ids.insert(id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_designators() {
        assert_eq!(
            parse_reference("R10"),
            Some(ParsedRef {
                prefix: "R".to_owned(),
                number: 10
            })
        );
        assert_eq!(
            parse_reference("LED3"),
            Some(ParsedRef {
                prefix: "LED".to_owned(),
                number: 3
            })
        );
    }

    #[test]
    fn rejects_malformed_designators() {
        assert_eq!(parse_reference("R0"), None);
        assert_eq!(parse_reference("R01"), None);
        assert_eq!(parse_reference("r1"), None);
        assert_eq!(parse_reference("R"), None);
        assert_eq!(parse_reference("1R"), None);
        assert_eq!(parse_reference("R1A"), None);
    }

    #[test]
    fn mints_around_reserved_numbers() {
        let alloc = IdentifierAllocator::new();
        assert!(alloc.reserve("R1"));
        assert!(alloc.reserve("R3"));
        assert!(!alloc.reserve("R1"), "double reserve is reported");

        assert_eq!(alloc.mint_reference("R"), "R2");
        assert_eq!(alloc.mint_reference("R"), "R4");
        assert_eq!(alloc.mint_reference("C"), "C1");
    }

    #[test]
    fn minted_ids_are_unique() {
        let alloc = IdentifierAllocator::new();
        let a = alloc.mint_id();
        let b = alloc.mint_id();
        assert_ne!(a, b);
    }

    #[test]
    fn reserved_ids_are_never_minted() {
        let alloc = IdentifierAllocator::new();
        let existing = ManagedId::new();
        alloc.reserve_id(existing);
        for _ in 0..32 {
            assert_ne!(alloc.mint_id(), existing);
        }
    }
}
