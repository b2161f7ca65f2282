//! Process-wide interning of on-screen text.
//!
//! Messages such as block summaries are rebuilt every frame by the session;
//! interning them gives the renderer a stable id to key rasterised text on.

use lazy_static::lazy_static;
use std::sync::{PoisonError, RwLock};
pub use string_cache::DefaultAtom as Atom;

lazy_static! {
    static ref TEXT_INTERNER: RwLock<Vec<Atom>> = RwLock::new(Vec::new());
}

/// Stable handle to an interned line of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextId(pub usize);

/// Intern a string and return its id. Interning the same text twice yields
/// the same id.
pub fn intern(text: &str) -> TextId {
    let atom = Atom::from(text);
    if let Some(idx) = lookup(&atom) {
        return TextId(idx);
    }
    let mut table = TEXT_INTERNER
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    // Another writer may have raced us between the read and write locks.
    match table.iter().position(|a| *a == atom) {
        Some(idx) => TextId(idx),
        None => {
            table.push(atom);
            TextId(table.len() - 1)
        }
    }
}

fn lookup(atom: &Atom) -> Option<usize> {
    TEXT_INTERNER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .position(|a| a == atom)
}

/// Atom for a previously interned id.
pub fn resolve(id: TextId) -> Option<Atom> {
    TEXT_INTERNER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(id.0)
        .cloned()
}
