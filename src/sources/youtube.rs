use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?|embed/|v/|playlist\?|shorts/)|youtu\.be/|music\.youtube\.com/)",
    )
    .expect("regex de YouTube válida")
});

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("regex de id válida"));

/// Verifica si una URL es de YouTube (incluye YouTube Music)
pub fn is_youtube_url(url: &str) -> bool {
    YOUTUBE_URL.is_match(url)
}

pub fn is_youtube_music_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "music.youtube.com"))
        .unwrap_or(false)
}

/// Extrae el id de video de una URL de YouTube
pub fn extract_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    let candidate = if host.ends_with("youtu.be") {
        parsed.path_segments()?.next().map(str::to_owned)
    } else if parsed.path().starts_with("/shorts/") || parsed.path().starts_with("/embed/") {
        parsed.path_segments()?.nth(1).map(str::to_owned)
    } else {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    }?;

    VIDEO_ID.is_match(&candidate).then_some(candidate)
}

/// Mix automático ("radio") generado a partir de un video
pub fn radio_url(video_id: &str, music: bool) -> String {
    let host = if music { "music" } else { "www" };
    format!("https://{host}.youtube.com/watch?v={video_id}&list=RD{video_id}")
}

/// Reescribe una URL de video para que apunte a YouTube Music
pub fn to_music_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut parsed) if parsed.host_str().is_some_and(|h| h.ends_with("youtube.com")) => {
            if parsed.set_host(Some("music.youtube.com")).is_ok() {
                parsed.to_string()
            } else {
                uri.to_string()
            }
        }
        _ => uri.to_string(),
    }
}
