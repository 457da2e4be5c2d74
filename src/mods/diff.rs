//! Detect mods whose Nexus identity changed between two mod table snapshots

use super::{GameMods, ModTable};
use std::collections::hash_map;
use std::sync::Arc;

/// Lazily yields ids of mods in the new game whose `(mod_id, download_game)`
/// pair differs from the same key in the old game.
///
/// Removed mods are not reported.
pub struct ChangedMods<'a> {
    old: Option<&'a GameMods>,
    new: Option<hash_map::Iter<'a, String, super::ModRecord>>,
}

impl<'a> Iterator for ChangedMods<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let old = self.old?;
        let iter = self.new.as_mut()?;

        for (id, record) in iter.by_ref() {
            let before = old.get(id).map(|r| r.remote_key());
            if before != Some(record.remote_key()) {
                return Some(id.as_str());
            }
        }

        None
    }
}

/// Diff `old_table[old_game]` against `new_table[new_game]`.
///
/// Nothing is reported when `old_game` is unknown, when either side has no
/// entry for its game, or when both sides are the same table.
pub fn changed_mods<'a>(
    old_table: &'a ModTable,
    old_game: Option<&str>,
    new_table: &'a ModTable,
    new_game: Option<&str>,
) -> ChangedMods<'a> {
    let empty = ChangedMods {
        old: None,
        new: None,
    };

    let (Some(old_game), Some(new_game)) = (old_game, new_game) else {
        return empty;
    };

    let (Some(old), Some(new)) = (old_table.get(old_game), new_table.get(new_game)) else {
        return empty;
    };

    if Arc::ptr_eq(old, new) || old == new {
        return empty;
    }

    ChangedMods {
        old: Some(old.as_ref()),
        new: Some(new.iter()),
    }
}
