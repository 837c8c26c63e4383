//! Artwork selection.
//!
//! Kodi hands over an art map with the item, so the URL is picked from it
//! directly. Jellyfin only has image endpoints, so an ordered list of
//! candidates is probed and the first reachable one wins.

use std::future::Future;

use crate::media::{ItemKind, MediaItem};

const EPISODE_ART: &[&str] = &["tvshow.poster", "tvshow.logo", "poster", "thumb"];
const MOVIE_ART: &[&str] = &["poster", "movie.poster", "thumb"];
const AUDIO_ART: &[&str] = &["album.thumb", "thumb"];
const DEFAULT_ART: &[&str] = &["poster", "thumb"];

pub fn art_keys(kind: &ItemKind) -> &'static [&'static str] {
    match kind {
        ItemKind::Episode => EPISODE_ART,
        ItemKind::Movie => MOVIE_ART,
        kind if kind.is_audio() => AUDIO_ART,
        _ => DEFAULT_ART,
    }
}

/// Picks artwork from the item's own art map. Relative art paths are
/// served through the server's `/image/` endpoint under `web_base`.
pub fn resolve_direct(item: &MediaItem, web_base: &str) -> Option<String> {
    let art = item.art.as_ref()?;
    let raw = art_keys(&item.kind)
        .iter()
        .filter_map(|key| art.get(*key))
        .find(|value| !value.is_empty())?;
    if raw.starts_with("http") {
        Some(raw.clone())
    } else {
        Some(format!(
            "{}/image/{}",
            web_base.trim_end_matches('/'),
            urlencoding::encode(raw)
        ))
    }
}

/// Image endpoints to try for `item`, best first, ending in `placeholder`.
pub fn probe_candidates(item: &MediaItem, base_url: &str, api_key: &str, placeholder: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut add = |id: Option<&String>, image: &str| {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            urls.push(format!("{base_url}/Items/{id}/Images/{image}?api_key={api_key}"));
        }
    };

    match &item.kind {
        ItemKind::Episode => {
            add(item.series_id.as_ref(), "Primary");
            add(item.series_id.as_ref(), "Logo");
            add(item.id.as_ref(), "Primary");
            add(item.id.as_ref(), "Thumb");
        }
        ItemKind::Movie => {
            add(item.id.as_ref(), "Primary");
            add(item.id.as_ref(), "Thumb");
        }
        kind if kind.is_audio() => {
            add(item.album_id.as_ref().or(item.parent_id.as_ref()), "Primary");
            add(item.id.as_ref(), "Primary");
        }
        _ => {
            add(item.id.as_ref(), "Primary");
            add(item.id.as_ref(), "Thumb");
        }
    }

    urls.push(placeholder.to_string());
    urls
}

/// Local assets are served by the dashboard itself.
fn is_local(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//")
}

/// Returns the first candidate `probe` accepts. Local paths are taken
/// without probing; if nothing answers the placeholder is used.
pub async fn first_reachable<F, Fut>(candidates: Vec<String>, placeholder: &str, probe: F) -> String
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = bool>,
{
    for url in candidates {
        if is_local(&url) || probe(url.clone()).await {
            return url;
        }
    }
    placeholder.to_string()
}
