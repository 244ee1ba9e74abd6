//! Cross-provider track fulfillment.
//!
//! Catalog tracks carry metadata but no audio. Before they can be sent to the
//! audio node they are matched against the video providers: ISRC search first,
//! then a cleaned "title artist" query, then ranking by artist containment and
//! title similarity. The reverse direction (`enrich`) fills ISRC and artwork
//! on playable tracks from the catalog.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::cache::FulfillmentCache;
use crate::error::{PlayerError, PlayerResult};
use crate::sources::{youtube, AlbumRef, CatalogClient, ProviderKind, SearchBackend, Track, TrackRef};

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[\{【「『（][^\)\]\}】」』）]*[\)\]\}】」』）]").expect("regex de corchetes válida")
});
static FEATURING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(feat|ft)\.?\s.*$").expect("regex de featuring válida"));
static ARTIST_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\s*-\s*topic|vevo|\s+official)$").expect("regex de sufijo válida"));
static NOISE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("regex de ruido válida"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("regex de espacios válida"));

fn collapse(text: &str) -> String {
    let text = NOISE.replace_all(text, " ");
    SPACES.replace_all(text.trim(), " ").into_owned()
}

/// Quita calificadores entre corchetes, `feat.` y signos
pub fn clean_title(title: &str) -> String {
    let without_brackets = BRACKETED.replace_all(title, " ");
    let without_feat = FEATURING.replace(&without_brackets, "");
    collapse(&without_feat)
}

/// Igual que `clean_title` y además quita sufijos de canal (`- Topic`, `VEVO`)
pub fn clean_artist(artist: &str) -> String {
    let trimmed = ARTIST_SUFFIX.replace(artist.trim(), "");
    clean_title(&trimmed)
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{3040}'..='\u{309F}'
            | '\u{30A0}'..='\u{30FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{FF66}'..='\u{FF9F}')
    })
}

/// Kanji/kana a romaji; el resto se devuelve igual
pub fn transliterate(text: &str) -> String {
    if contains_cjk(text) {
        kakasi::convert(text).romaji
    } else {
        text.to_string()
    }
}

/// Clave de comparación: transliterada, limpia y en minúsculas
fn match_key(text: &str) -> String {
    clean_artist(&transliterate(text)).to_lowercase()
}

/// Variante del proveedor de video a buscar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentTarget {
    Video,
    VideoMusic,
}

impl FulfillmentTarget {
    pub fn provider(&self) -> ProviderKind {
        match self {
            FulfillmentTarget::Video => ProviderKind::YouTube,
            FulfillmentTarget::VideoMusic => ProviderKind::YouTubeMusic,
        }
    }
}

/// Coincidencia encontrada para un track de catálogo
#[derive(Debug, Clone)]
pub struct FulfillmentResult {
    pub matched: Track,
    pub source: TrackRef,
}

impl FulfillmentResult {
    /// Track reproducible con los campos permitidos copiados del original
    pub fn merge(&self) -> Track {
        let source_extras = self.source.extras();
        let mut merged = self
            .matched
            .clone()
            .with_requested_by(self.source.requested_by())
            .with_collection(self.source.collection().cloned());
        if self.source.is_recommended() {
            merged = merged.mark_recommended();
        }

        merged.update_extras(|extras| {
            extras.fulfilled = None;
            if source_extras.isrc.is_some() {
                extras.isrc = source_extras.isrc.clone();
            }
            if source_extras.artwork_url.is_some() {
                extras.artwork_url = source_extras.artwork_url.clone();
            }
            if source_extras.album.is_some() {
                extras.album = source_extras.album.clone();
            }
        });
        merged
    }

    /// Guarda el resultado en el track original. Si otro proceso ya lo hizo,
    /// devuelve ese equivalente.
    pub fn apply(&self) -> TrackRef {
        let merged = self.merge().into_ref();
        let matched_extras = self.matched.extras();
        let mut applied = Arc::clone(&merged);

        self.source.update_extras(|extras| {
            if let Some(existing) = &extras.fulfilled {
                applied = Arc::clone(existing);
                return;
            }
            extras.fulfilled = Some(Arc::clone(&merged));
            if extras.isrc.is_none() {
                extras.isrc = matched_extras.isrc.clone();
            }
            if extras.artwork_url.is_none() {
                extras.artwork_url = matched_extras.artwork_url.clone();
            }
            if extras.album.is_none() {
                extras.album = matched_extras.album.clone();
            }
        });
        applied
    }
}

/// Metadatos de catálogo para completar un track reproducible
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogMatch {
    pub isrc: Option<String>,
    pub artwork_url: Option<String>,
    pub album: Option<AlbumRef>,
}

impl CatalogMatch {
    /// Solo completa campos vacíos
    pub fn apply_to(&self, track: &Track) -> bool {
        let mut changed = false;
        track.update_extras(|extras| {
            if extras.isrc.is_none() && self.isrc.is_some() {
                extras.isrc = self.isrc.clone();
                changed = true;
            }
            if extras.artwork_url.is_none() && self.artwork_url.is_some() {
                extras.artwork_url = self.artwork_url.clone();
                changed = true;
            }
            if extras.album.is_none() && self.album.is_some() {
                extras.album = self.album.clone();
                changed = true;
            }
        });
        changed
    }
}

struct Ranked {
    index: usize,
    score: f64,
}

/// Mejor candidato cuyo autor contiene al artista y cuyo título coincide
fn rank(candidates: &[Track], title_key: &str, artist_key: &str) -> Option<Ranked> {
    if artist_key.is_empty() {
        return None;
    }

    candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            let author = match_key(candidate.author());
            let title = clean_title(&transliterate(candidate.title())).to_lowercase();
            let author_ok = author.contains(artist_key) || (!author.is_empty() && artist_key.contains(&author));
            let title_ok = !title.is_empty() && (title.contains(title_key) || title_key.contains(&title));
            (author_ok && title_ok).then(|| Ranked {
                index,
                score: strsim::jaro_winkler(title_key, &title),
            })
        })
        .fold(None, |best: Option<Ranked>, next| match best {
            Some(current) if current.score >= next.score => Some(current),
            _ => Some(next),
        })
}

/// Un resultado de video que en realidad es música pasa a la variante musical
fn promote(track: Track) -> Track {
    if track.provider() != ProviderKind::YouTube {
        return track;
    }
    let is_music = track.author().to_lowercase().ends_with("- topic") || track.title().to_lowercase().contains("music");
    if is_music {
        let uri = youtube::to_music_uri(track.uri());
        track.with_provider(ProviderKind::YouTubeMusic).with_uri(uri)
    } else {
        track
    }
}

/// Busca equivalentes reproducibles y metadatos de catálogo
pub struct FulfillmentService {
    backend: Arc<dyn SearchBackend>,
    catalog: Option<Arc<dyn CatalogClient>>,
    cache: FulfillmentCache,
}

impl FulfillmentService {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        catalog: Option<Arc<dyn CatalogClient>>,
        cache: FulfillmentCache,
    ) -> Self {
        Self { backend, catalog, cache }
    }

    pub fn cache(&self) -> &FulfillmentCache {
        &self.cache
    }

    /// Devuelve un track reproducible para `track`. Idempotente.
    pub async fn fulfill(&self, track: &TrackRef) -> PlayerResult<TrackRef> {
        if let Some(fulfilled) = track.fulfilled() {
            debug!("♻️ Equivalente ya resuelto para {}", track);
            return Ok(fulfilled);
        }
        if track.is_playable() {
            return Ok(Arc::clone(track));
        }

        Ok(self.lookup(track).await?.apply())
    }

    /// Caché compartida primero, búsqueda después. No modifica el track.
    pub async fn lookup(&self, track: &TrackRef) -> PlayerResult<FulfillmentResult> {
        if let Some(cached) = self.cache.get(&track.identifier().to_string()) {
            debug!("💾 Equivalente en caché para {}", track);
            return Ok(FulfillmentResult {
                matched: cached,
                source: Arc::clone(track),
            });
        }

        let result = self.find_match(track).await?;
        self.remember(&result);
        Ok(result)
    }

    /// Búsqueda en los proveedores de video
    pub async fn find_match(&self, track: &TrackRef) -> PlayerResult<FulfillmentResult> {
        let (plain, music) = tokio::join!(
            self.search_target(track, FulfillmentTarget::Video),
            self.search_target(track, FulfillmentTarget::VideoMusic)
        );

        let title_key = clean_title(&transliterate(track.title())).to_lowercase();
        let artist_key = match_key(track.primary_artist());

        let matched = if let Some(best) = rank(&music, &title_key, &artist_key) {
            music.into_iter().nth(best.index)
        } else if let Some(best) = rank(&plain, &title_key, &artist_key) {
            plain.into_iter().nth(best.index).map(promote)
        } else {
            plain.into_iter().next().map(promote).or_else(|| music.into_iter().next())
        };

        match matched.filter(|m| m.encoded().is_some()) {
            Some(matched) => {
                info!("🎯 {} → {} ({})", track, matched, matched.provider());
                Ok(FulfillmentResult {
                    matched,
                    source: Arc::clone(track),
                })
            }
            None => {
                warn!("❌ Sin equivalente reproducible para {}", track);
                Err(PlayerError::Fulfillment(track.to_string()))
            }
        }
    }

    pub fn remember(&self, result: &FulfillmentResult) {
        self.cache
            .insert(result.source.identifier().to_string(), result.matched.clone());
    }

    async fn search_target(&self, track: &Track, target: FulfillmentTarget) -> Vec<Track> {
        let prefix = target.provider().search_prefix();

        if let Some(isrc) = track.isrc() {
            let found = self.search(&format!("{prefix}\"{isrc}\""), target).await;
            if !found.is_empty() {
                return found;
            }
        }

        let query = format!("{} {}", clean_title(track.title()), clean_artist(track.primary_artist()));
        self.search(&format!("{prefix}{}", query.trim()), target).await
    }

    async fn search(&self, identifier: &str, target: FulfillmentTarget) -> Vec<Track> {
        match self.backend.load_tracks(identifier).await {
            Ok(result) => result
                .into_tracks()
                .into_iter()
                .map(|t| match target {
                    FulfillmentTarget::VideoMusic if t.provider() == ProviderKind::YouTube => {
                        let uri = youtube::to_music_uri(t.uri());
                        t.with_provider(ProviderKind::YouTubeMusic).with_uri(uri)
                    }
                    _ => t,
                })
                .collect(),
            Err(e) => {
                debug!("🔍 Búsqueda '{}' falló: {}", identifier, e);
                Vec::new()
            }
        }
    }

    /// Busca ISRC, portada y álbum en el catálogo
    pub async fn lookup_catalog(&self, track: &Track) -> PlayerResult<Option<CatalogMatch>> {
        let Some(catalog) = &self.catalog else {
            return Ok(None);
        };
        if !track.provider().is_streamable() {
            return Ok(None);
        }

        let artist_key = match_key(track.author());
        if artist_key.is_empty() {
            return Ok(None);
        }

        let query = format!("{} {}", clean_title(track.title()), clean_artist(track.author()));
        let results = catalog.search_tracks(query.trim(), 5).await?;

        let found = results.into_iter().find(|candidate| {
            let artist = match_key(candidate.primary_artist());
            !artist.is_empty() && (artist_key.contains(&artist) || artist.contains(&artist_key))
        });

        Ok(found.map(|candidate| {
            let extras = candidate.extras();
            CatalogMatch {
                isrc: extras.isrc,
                artwork_url: extras.artwork_url,
                album: extras.album,
            }
        }))
    }

    /// Completa metadatos de catálogo en un track reproducible
    pub async fn enrich(&self, track: &TrackRef) -> PlayerResult<bool> {
        if !track.needs_enrichment() {
            return Ok(false);
        }
        Ok(self
            .lookup_catalog(track)
            .await?
            .is_some_and(|found| found.apply_to(track)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::LoadResult;
    use crate::testing::{catalog_track, video_by, FakeBackend, FakeCatalog};
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn service(backend: Arc<FakeBackend>, catalog: Option<Arc<FakeCatalog>>) -> FulfillmentService {
        FulfillmentService::new(
            backend,
            catalog.map(|c| c as Arc<dyn CatalogClient>),
            FulfillmentCache::new(100, None),
        )
    }

    #[test]
    fn test_clean_title_and_artist() {
        assert_eq!(clean_title("Song Name (Official Video) [HD]"), "Song Name");
        assert_eq!(clean_title("Song feat. Someone"), "Song");
        assert_eq!(clean_artist("Rick Astley - Topic"), "Rick Astley");
        assert_eq!(clean_artist("RickAstleyVEVO"), "RickAstley");
    }

    #[test]
    fn test_transliteration() {
        assert!(contains_cjk("米津玄師"));
        assert!(!contains_cjk("Kenshi Yonezu"));

        let romaji = transliterate("米津玄師");
        assert!(!romaji.is_empty());
        assert!(!contains_cjk(&romaji));
        assert_eq!(transliterate("Daft Punk"), "Daft Punk");
    }

    #[tokio::test]
    async fn test_isrc_search_is_preferred() {
        let backend = Arc::new(FakeBackend::default());
        backend.respond(
            "ytsearch:\"GBARL9300135\"",
            LoadResult::Search(vec![video_by("isrc-hit", "Never Gonna Give You Up", "Rick Astley")]),
        );
        let source = catalog_track("sp1", "Never Gonna Give You Up", "Rick Astley")
            .with_isrc("GBARL9300135")
            .into_ref();

        let result = service(backend.clone(), None).find_match(&source).await.unwrap();

        assert_eq!(result.matched.identifier(), "isrc-hit");
        assert!(!backend
            .calls()
            .iter()
            .any(|c| c == "ytsearch:Never Gonna Give You Up Rick Astley"));
    }

    #[tokio::test]
    async fn test_artist_match_beats_first_result() {
        let backend = Arc::new(FakeBackend::default());
        backend.respond(
            "ytsearch:Blinding Lights The Weeknd",
            LoadResult::Search(vec![
                video_by("cover", "Blinding Lights (cover)", "Random Covers"),
                video_by("real", "Blinding Lights", "TheWeekndVEVO"),
            ]),
        );
        let source = catalog_track("sp2", "Blinding Lights", "The Weeknd").into_ref();

        let result = service(backend, None).find_match(&source).await;

        // "theweeknd" no contiene "the weeknd": gana el primer resultado
        assert_eq!(result.unwrap().matched.identifier(), "cover");

        let backend = Arc::new(FakeBackend::default());
        backend.respond(
            "ytsearch:Blinding Lights The Weeknd",
            LoadResult::Search(vec![
                video_by("cover", "Blinding Lights (cover)", "Random Covers"),
                video_by("real", "Blinding Lights", "The Weeknd - Topic"),
            ]),
        );
        let result = service(backend, None).find_match(&source).await.unwrap();

        assert_eq!(result.matched.identifier(), "real");
        assert_eq!(result.matched.provider(), ProviderKind::YouTubeMusic);
    }

    #[tokio::test]
    async fn test_music_variant_wins_when_author_matches() {
        let backend = Arc::new(FakeBackend::default());
        backend.respond(
            "ytsearch:Song Artist",
            LoadResult::Search(vec![video_by("plain", "Song", "Artist")]),
        );
        backend.respond(
            "ytmsearch:Song Artist",
            LoadResult::Search(vec![video_by("music", "Song", "Artist")]),
        );
        let source = catalog_track("sp3", "Song", "Artist").into_ref();

        let result = service(backend, None).find_match(&source).await.unwrap();

        assert_eq!(result.matched.identifier(), "music");
        assert_eq!(result.matched.provider(), ProviderKind::YouTubeMusic);
    }

    #[tokio::test]
    async fn test_fulfill_is_idempotent_and_merges_allowlist() {
        let backend = Arc::new(FakeBackend::default());
        backend.respond(
            "ytsearch:Song Artist",
            LoadResult::Search(vec![video_by("yt", "Song (Official)", "Artist")]),
        );
        let source = catalog_track("sp4", "Song", "Artist")
            .with_requested_by(Some(UserId::new(7)))
            .with_artwork("https://img/cover.jpg")
            .mark_recommended()
            .into_ref();
        let service = service(backend.clone(), None);

        let first = service.fulfill(&source).await.unwrap();
        let calls_after_first = backend.calls().len();
        let second = service.fulfill(&source).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.calls().len(), calls_after_first);
        assert_eq!(first.identifier(), "yt");
        assert_eq!(first.title(), "Song (Official)");
        assert_eq!(first.requested_by(), Some(UserId::new(7)));
        assert!(first.is_recommended());
        assert_eq!(first.artwork_url().as_deref(), Some("https://img/cover.jpg"));
        assert!(source.is_fulfilled());
    }

    #[tokio::test]
    async fn test_cache_is_shared_between_sources() {
        let backend = Arc::new(FakeBackend::default());
        backend.respond("ytsearch:Song Artist", LoadResult::Search(vec![video_by("yt", "Song", "Artist")]));
        let service = service(backend.clone(), None);

        service.fulfill(&catalog_track("same-id", "Song", "Artist").into_ref()).await.unwrap();
        let calls = backend.calls().len();
        let other = service
            .fulfill(&catalog_track("same-id", "Song", "Artist").into_ref())
            .await
            .unwrap();

        assert_eq!(backend.calls().len(), calls);
        assert_eq!(other.identifier(), "yt");
    }

    #[tokio::test]
    async fn test_no_results_is_an_error() {
        let backend = Arc::new(FakeBackend::default());
        let source = catalog_track("sp5", "Nothing", "Nobody").into_ref();

        let result = service(backend, None).fulfill(&source).await;

        assert!(matches!(result, Err(PlayerError::Fulfillment(_))));
        assert!(!source.is_fulfilled());
    }

    #[tokio::test]
    async fn test_enrich_from_catalog() {
        let backend = Arc::new(FakeBackend::default());
        let catalog = Arc::new(FakeCatalog::default());
        catalog.set_search(vec![
            catalog_track("wrong", "Song", "Somebody Else").with_isrc("BAD"),
            catalog_track("right", "Song", "Artist").with_isrc("GOOD").with_artwork("https://img/a.jpg"),
        ]);
        let track = video_by("yt", "Song (Official Video)", "Artist - Topic").into_ref();

        let changed = service(backend, Some(catalog)).enrich(&track).await.unwrap();

        assert!(changed);
        assert_eq!(track.isrc().as_deref(), Some("GOOD"));
        assert_eq!(track.artwork_url().as_deref(), Some("https://img/a.jpg"));
    }
}
