use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use url::Url;

use super::youtube;
use super::{Collection, LoadResult, ProviderKind, SearchBackend, Track};
use crate::error::{PlayerError, PlayerResult};

static CATALOG_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://open\.spotify\.com/(?:intl-[a-zA-Z-]+/)?|spotify:)(track|album|playlist|artist|show|episode)[/:]([A-Za-z0-9]+)",
    )
    .expect("regex de Spotify válida")
});

/// Tipo de enlace de catálogo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Track,
    Album,
    Playlist,
    /// Artistas, podcasts: no se pueden encolar
    Unusable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLink {
    pub kind: CatalogKind,
    pub id: String,
}

/// Decodifica `https://open.spotify.com/...` o `spotify:...`
pub fn decode_catalog_link(uri: &str) -> Option<CatalogLink> {
    let caps = CATALOG_LINK.captures(uri)?;
    let kind = match &caps[1] {
        "track" => CatalogKind::Track,
        "album" => CatalogKind::Album,
        "playlist" => CatalogKind::Playlist,
        _ => CatalogKind::Unusable,
    };
    Some(CatalogLink {
        kind,
        id: caps[2].to_string(),
    })
}

pub fn is_url(query: &str) -> bool {
    query.starts_with("http://") || query.starts_with("https://") || query.starts_with("spotify:")
}

/// Clasifica una URL según su dominio. Las búsquedas libres no tienen proveedor propio.
pub fn classify(uri_or_query: &str) -> Option<ProviderKind> {
    if uri_or_query.starts_with("spotify:") {
        return Some(ProviderKind::Spotify);
    }

    let parsed = Url::parse(uri_or_query).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    if host.ends_with("spotify.com") {
        Some(ProviderKind::Spotify)
    } else if host == "music.youtube.com" {
        Some(ProviderKind::YouTubeMusic)
    } else if host.ends_with("youtube.com") || host == "youtu.be" {
        Some(ProviderKind::YouTube)
    } else if host.ends_with("soundcloud.com") {
        Some(ProviderKind::SoundCloud)
    } else {
        None
    }
}

/// La URL apunta a una playlist, álbum o set
pub fn is_collection(uri: &str) -> bool {
    if let Some(link) = decode_catalog_link(uri) {
        return matches!(link.kind, CatalogKind::Album | CatalogKind::Playlist);
    }

    let Ok(parsed) = Url::parse(uri) else {
        return false;
    };

    if parsed.query_pairs().any(|(key, _)| key == "list") {
        return true;
    }

    parsed
        .path_segments()
        .map(|mut segments| segments.any(|s| matches!(s, "sets" | "playlist" | "album")))
        .unwrap_or(false)
}

/// Posición (1-based) pedida con `index` o `start_radio`
pub fn start_index(uri: &str) -> Option<usize> {
    let parsed = Url::parse(uri).ok()?;
    let lookup = |name: &str| {
        parsed
            .query_pairs()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .filter(|index| *index > 0)
    };
    lookup("index").or_else(|| lookup("start_radio"))
}

/// Resultado de resolver una consulta
#[derive(Debug, Clone)]
pub enum Resolved {
    Single(Track),
    Collection(Collection),
    /// Modo búsqueda: lista para que el usuario elija
    Results(Vec<Track>),
}

/// Convierte consultas y URLs en tracks usando el backend de búsqueda
pub struct TrackSourceResolver {
    backend: Arc<dyn SearchBackend>,
    default_provider: ProviderKind,
    search_limit: usize,
}

impl TrackSourceResolver {
    pub fn new(backend: Arc<dyn SearchBackend>, default_provider: ProviderKind, search_limit: usize) -> Self {
        Self {
            backend,
            default_provider,
            search_limit,
        }
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
    }

    /// Proveedor efectivo: el dominio de la URL manda sobre la preferencia
    pub fn provider_for(&self, query: &str, preference: Option<ProviderKind>) -> ProviderKind {
        if is_url(query) {
            if let Some(provider) = classify(query) {
                return provider;
            }
        }
        preference.unwrap_or(self.default_provider)
    }

    pub async fn resolve(
        &self,
        query: &str,
        preference: Option<ProviderKind>,
        search: bool,
    ) -> PlayerResult<Resolved> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayerError::NotFound(String::new()));
        }

        let provider = self.provider_for(query, preference);
        debug!("🔎 Resolviendo '{}' con proveedor {}", query, provider);

        if search {
            let mut tracks = self.search_tracks(query, provider).await?;
            tracks.truncate(self.search_limit);
            return Ok(Resolved::Results(tracks));
        }

        if !is_url(query) {
            let track = self
                .keyword_search(query, provider)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| PlayerError::NotFound(query.to_string()))?;
            return Ok(Resolved::Single(track));
        }

        if provider == ProviderKind::Spotify {
            if let Some(link) = decode_catalog_link(query) {
                if link.kind == CatalogKind::Unusable {
                    info!("🚫 Enlace de catálogo no reproducible: {}", query);
                    return Err(PlayerError::NotFound(query.to_string()));
                }
            }
        }

        match self.backend.load_tracks(query).await? {
            LoadResult::Track(track) => Ok(Resolved::Single(normalize(track, provider))),
            LoadResult::Collection(collection) => self.resolve_collection(query, collection, provider),
            LoadResult::Search(tracks) => tracks
                .into_iter()
                .next()
                .map(|t| Resolved::Single(normalize(t, provider)))
                .ok_or_else(|| PlayerError::NotFound(query.to_string())),
            LoadResult::Empty => Err(PlayerError::NotFound(query.to_string())),
        }
    }

    fn resolve_collection(
        &self,
        query: &str,
        collection: Collection,
        provider: ProviderKind,
    ) -> PlayerResult<Resolved> {
        let reference = collection.reference();
        let tracks: Vec<Track> = collection
            .tracks
            .into_iter()
            .map(|t| normalize(t, provider).with_collection(Some(reference.clone())))
            .collect();

        if let Some(index) = start_index(query) {
            debug!("🎯 Seleccionando posición {} de '{}'", index, reference.name);
            return tracks
                .into_iter()
                .nth(index - 1)
                .map(Resolved::Single)
                .ok_or(PlayerError::IndexOutOfRange(index));
        }

        if tracks.is_empty() {
            return Err(PlayerError::NotFound(query.to_string()));
        }

        info!("📋 Colección '{}' con {} tracks", reference.name, tracks.len());
        Ok(Resolved::Collection(Collection {
            name: reference.name,
            uri: reference.uri.or_else(|| Some(query.to_string())),
            tracks,
        }))
    }

    /// Búsqueda para mostrar resultados (máximo `search_limit`)
    async fn search_tracks(&self, query: &str, provider: ProviderKind) -> PlayerResult<Vec<Track>> {
        if is_url(query) {
            let tracks: Vec<Track> = self
                .backend
                .load_tracks(query)
                .await?
                .into_tracks()
                .into_iter()
                .map(|t| normalize(t, provider))
                .collect();
            if tracks.is_empty() {
                return Err(PlayerError::NotFound(query.to_string()));
            }
            return Ok(tracks);
        }
        self.keyword_search(query, provider).await
    }

    /// Búsqueda por texto con fallback al proveedor de video
    async fn keyword_search(&self, query: &str, provider: ProviderKind) -> PlayerResult<Vec<Track>> {
        let mut chain = vec![provider];
        if provider != ProviderKind::YouTube {
            chain.push(ProviderKind::YouTube);
        }

        for candidate in chain {
            let identifier = format!("{}{}", candidate.search_prefix(), query);
            match self.backend.load_tracks(&identifier).await {
                Ok(result) => {
                    let tracks = result.into_tracks();
                    if !tracks.is_empty() {
                        return Ok(tracks.into_iter().map(|t| normalize(t, candidate)).collect());
                    }
                    debug!("🔍 Sin resultados en {} para '{}'", candidate, query);
                }
                Err(e) => warn!("⚠️ Búsqueda en {} falló para '{}': {}", candidate, query, e),
            }
        }

        Err(PlayerError::NotFound(query.to_string()))
    }
}

/// Ajusta proveedor y URI de los resultados del nodo
fn normalize(track: Track, provider: ProviderKind) -> Track {
    if provider == ProviderKind::YouTubeMusic && track.provider() == ProviderKind::YouTube {
        let uri = youtube::to_music_uri(track.uri());
        return track.with_provider(ProviderKind::YouTubeMusic).with_uri(uri);
    }
    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{video, FakeBackend};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_by_domain() {
        assert_eq!(classify("https://open.spotify.com/track/abc"), Some(ProviderKind::Spotify));
        assert_eq!(classify("spotify:album:abc"), Some(ProviderKind::Spotify));
        assert_eq!(classify("https://music.youtube.com/watch?v=x"), Some(ProviderKind::YouTubeMusic));
        assert_eq!(classify("https://youtu.be/x"), Some(ProviderKind::YouTube));
        assert_eq!(classify("https://soundcloud.com/a/b"), Some(ProviderKind::SoundCloud));
        assert_eq!(classify("never gonna give you up"), None);
    }

    #[test]
    fn test_collection_detection() {
        assert!(is_collection("https://www.youtube.com/watch?v=abc&list=PL1"));
        assert!(is_collection("https://soundcloud.com/artist/sets/mix"));
        assert!(is_collection("https://open.spotify.com/album/123"));
        assert!(is_collection("https://open.spotify.com/intl-es/playlist/123"));
        assert!(!is_collection("https://open.spotify.com/track/123"));
        assert!(!is_collection("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn test_start_index_prefers_index() {
        assert_eq!(start_index("https://youtube.com/watch?v=a&list=L&index=3"), Some(3));
        assert_eq!(start_index("https://youtube.com/watch?v=a&list=L&start_radio=2&index=5"), Some(5));
        assert_eq!(start_index("https://youtube.com/watch?v=a&list=L&start_radio=2"), Some(2));
        assert_eq!(start_index("https://youtube.com/watch?v=a&list=L&index=0"), None);
        assert_eq!(start_index("https://youtube.com/watch?v=a"), None);
    }

    #[tokio::test]
    async fn test_playlist_index_returns_single_track() {
        let url = "https://www.youtube.com/watch?v=a&list=PL1&index=3";
        let backend = Arc::new(FakeBackend::default());
        backend.respond(
            url,
            LoadResult::Collection(Collection {
                name: "Mix".into(),
                uri: None,
                tracks: vec![video("t1"), video("t2"), video("t3"), video("t4")],
            }),
        );
        let resolver = TrackSourceResolver::new(backend, ProviderKind::YouTube, 30);

        let resolved = resolver.resolve(url, None, false).await.unwrap();

        match resolved {
            Resolved::Single(track) => {
                assert_eq!(track.identifier(), "t3");
                assert_eq!(track.collection().map(|c| c.name.as_str()), Some("Mix"));
            }
            other => panic!("se esperaba un track, se obtuvo {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_artist_link_is_not_found() {
        let backend = Arc::new(FakeBackend::default());
        let resolver = TrackSourceResolver::new(backend.clone(), ProviderKind::YouTube, 30);

        let result = resolver
            .resolve("https://open.spotify.com/artist/xyz", None, false)
            .await;

        assert!(matches!(result, Err(PlayerError::NotFound(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_falls_back_to_video() {
        let backend = Arc::new(FakeBackend::default());
        backend.respond("ytsearch:song", LoadResult::Search(vec![video("found")]));
        let resolver = TrackSourceResolver::new(backend.clone(), ProviderKind::SoundCloud, 30);

        let resolved = resolver.resolve("song", None, false).await.unwrap();

        assert!(matches!(resolved, Resolved::Single(ref t) if t.identifier() == "found"));
        assert_eq!(backend.calls(), vec!["scsearch:song".to_string(), "ytsearch:song".to_string()]);
    }

    #[tokio::test]
    async fn test_music_results_are_rewritten() {
        let backend = Arc::new(FakeBackend::default());
        backend.respond("ytmsearch:song", LoadResult::Search(vec![video("m1")]));
        let resolver = TrackSourceResolver::new(backend, ProviderKind::YouTubeMusic, 30);

        let Resolved::Single(track) = resolver.resolve("song", None, false).await.unwrap() else {
            panic!("se esperaba un track");
        };

        assert_eq!(track.provider(), ProviderKind::YouTubeMusic);
        assert!(track.uri().starts_with("https://music.youtube.com/"));
    }

    #[tokio::test]
    async fn test_search_mode_is_capped() {
        let backend = Arc::new(FakeBackend::default());
        let many = (0..40).map(|i| video(&format!("v{i}"))).collect();
        backend.respond("ytsearch:lofi", LoadResult::Search(many));
        let resolver = TrackSourceResolver::new(backend, ProviderKind::YouTube, 30);

        let Resolved::Results(tracks) = resolver.resolve("lofi", None, true).await.unwrap() else {
            panic!("se esperaban resultados");
        };

        assert_eq!(tracks.len(), 30);
    }
}
