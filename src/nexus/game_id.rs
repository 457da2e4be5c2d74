//! Game id conversion between internal ids, Nexus catalog domains and nxm link ids
//!
//! Three namespaces are involved:
//! - internal ids (`skyrimse`, `falloutnv`, ...)
//! - Nexus catalog domains used by the API and the website (`skyrimspecialedition`)
//! - ids embedded in `nxm://` links (`SkyrimSE`)
//!
//! All lookups are case-insensitive; ids without a mapping pass through unchanged.

use crate::games::GameDescriptor;

/// Internal id -> Nexus catalog domain
const CATALOG_IDS: &[(&str, &str)] = &[
    ("skyrimse", "skyrimspecialedition"),
    ("skyrimvr", "skyrimspecialedition"),
    ("falloutnv", "newvegas"),
    ("fallout4vr", "fallout4"),
    ("teso", "elderscrollsonline"),
];

/// Nexus catalog domain -> internal id
const CATALOG_IDS_REVERSE: &[(&str, &str)] = &[
    ("skyrimspecialedition", "skyrimse"),
    ("newvegas", "falloutnv"),
    ("elderscrollsonline", "teso"),
];

/// Internal id -> nxm link id
const NXM_IDS: &[(&str, &str)] = &[
    ("skyrimse", "SkyrimSE"),
    ("skyrimvr", "SkyrimVR"),
    ("fallout4vr", "fallout4"),
];

fn lookup(table: &[(&'static str, &'static str)], input: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(from, _)| from.eq_ignore_ascii_case(input))
        .map(|(_, to)| *to)
}

/// Nexus catalog domain for a game.
///
/// An explicit `nexus_page_id` on the descriptor wins. Returns `None` only when
/// no game was given.
pub fn nexus_game_id(game: Option<&GameDescriptor>) -> Option<String> {
    let game = game?;

    if let Some(page_id) = &game.nexus_page_id {
        return Some(page_id.clone());
    }

    Some(catalog_id_for(&game.id))
}

/// Nexus catalog domain for a bare internal id, ignoring descriptor overrides
pub fn catalog_id_for(game_id: &str) -> String {
    lookup(CATALOG_IDS, game_id)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| game_id.to_string())
}

/// Result of mapping a catalog domain back to an internal id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseGameId {
    pub id: String,

    /// False when more than one internal id maps onto the catalog domain, in
    /// which case `id` is only one of the candidates.
    pub reliable: bool,
}

/// Map a Nexus catalog domain back to an internal id.
///
/// This is lossy: `skyrimspecialedition` is shared by `skyrimse` and `skyrimvr`,
/// `fallout4` by `fallout4` and `fallout4vr`. Such results are flagged unreliable.
pub fn convert_game_id_reverse(input: Option<&str>) -> Option<ReverseGameId> {
    let input = input?;

    let id = lookup(CATALOG_IDS_REVERSE, input)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| input.to_string());

    let sources: Vec<&str> = CATALOG_IDS
        .iter()
        .filter(|(_, to)| to.eq_ignore_ascii_case(input))
        .map(|(from, _)| *from)
        .collect();

    let reliable = match sources.as_slice() {
        [] => true,
        [only] => only.eq_ignore_ascii_case(&id),
        _ => false,
    };

    Some(ReverseGameId { id, reliable })
}

/// Id used in `nxm://` links for an internal game id
pub fn to_nxm_id(input: &str) -> String {
    lookup(NXM_IDS, input)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| input.to_string())
}
