//! `nxm://` link addresses

use super::NexusError;
use std::fmt;
use url::Url;

pub const NXM_SCHEME: &str = "nxm";

/// A parsed or constructed `nxm://{game}/mods/{mod}/files/{file}` link.
///
/// Links clicked on the website carry `key`/`expires`/`user_id` query
/// parameters that let non-premium accounts request a download link. Links built
/// locally never have them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NxmUrl {
    /// Game id as it appears in the link (see [`super::to_nxm_id`])
    pub game: String,
    pub mod_id: i64,
    pub file_id: i64,
    pub key: Option<String>,
    pub expires: Option<i64>,
    pub user_id: Option<i64>,
}

impl NxmUrl {
    /// Link for a file, without query parameters
    pub fn for_file(game: impl Into<String>, mod_id: i64, file_id: i64) -> Self {
        Self {
            game: game.into(),
            mod_id,
            file_id,
            key: None,
            expires: None,
            user_id: None,
        }
    }

    /// Parse a link as handed over by the browser
    pub fn parse(input: &str) -> Result<Self, NexusError> {
        let invalid = |reason: &str| NexusError::InvalidUrl(format!("{}: {}", input, reason));

        let url = Url::parse(input.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !url.scheme().eq_ignore_ascii_case(NXM_SCHEME) {
            return Err(invalid("not an nxm link"));
        }

        let game = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing game"))?
            .to_string();

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (mod_id, file_id) = match segments.as_slice() {
            ["mods", mod_id, "files", file_id] => (
                mod_id.parse::<i64>().map_err(|_| invalid("bad mod id"))?,
                file_id.parse::<i64>().map_err(|_| invalid("bad file id"))?,
            ),
            _ => return Err(invalid("expected /mods/<id>/files/<id>")),
        };

        let mut link = Self::for_file(game, mod_id, file_id);
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "key" => link.key = Some(value.into_owned()),
                "expires" => link.expires = value.parse().ok(),
                "user_id" => link.user_id = value.parse().ok(),
                _ => {}
            }
        }

        Ok(link)
    }
}

impl fmt::Display for NxmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/mods/{}/files/{}",
            NXM_SCHEME, self.game, self.mod_id, self.file_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_is_exact() {
        let link = NxmUrl::for_file("SkyrimSE", 266, 1000172397);
        assert_eq!(link.to_string(), "nxm://SkyrimSE/mods/266/files/1000172397");
    }

    #[test]
    fn test_parse_with_query() {
        let link = NxmUrl::parse(
            "nxm://skyrimspecialedition/mods/12604/files/35407?key=abc&expires=1700000000&user_id=42",
        )
        .unwrap();
        assert_eq!(link.game, "skyrimspecialedition");
        assert_eq!(link.mod_id, 12604);
        assert_eq!(link.file_id, 35407);
        assert_eq!(link.key.as_deref(), Some("abc"));
        assert_eq!(link.expires, Some(1700000000));
        assert_eq!(link.user_id, Some(42));
        assert_eq!(
            link.to_string(),
            "nxm://skyrimspecialedition/mods/12604/files/35407"
        );
    }

    #[test]
    fn test_parse_rejects_other_links() {
        assert!(NxmUrl::parse("https://www.nexusmods.com/skyrim/mods/1").is_err());
        assert!(NxmUrl::parse("nxm://skyrim/mods/1").is_err());
        assert!(NxmUrl::parse("nxm://skyrim/mods/abc/files/2").is_err());
        assert!(NxmUrl::parse("not a url").is_err());
    }
}
