//! Station source selection.
//!
//! Sources are tried in order and the first one that yields a valid,
//! non-empty catalog wins:
//!
//! 1. the configured `stations_toml` path
//! 2. `stations.toml` in the working directory
//! 3. the configured m3u source (http(s) URL or local path)
//! 4. the built-in table

use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};
use ugstream_proto::catalog::{
    load_stations_from_m3u, load_stations_from_toml, parse_m3u_from_str, Catalog,
};
use ugstream_proto::config::StationsConfig;
use ugstream_proto::station::Station;

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Toml(PathBuf),
    M3uUrl(String),
    M3uFile(PathBuf),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Toml(path) => write!(f, "TOML {}", path.display()),
            Source::M3uUrl(url) => write!(f, "m3u {}", url),
            Source::M3uFile(path) => write!(f, "m3u {}", path.display()),
        }
    }
}

fn sources(config: &StationsConfig) -> Vec<Source> {
    let mut out = Vec::new();

    if config.stations_toml.exists() {
        out.push(Source::Toml(config.stations_toml.clone()));
    }

    let local = PathBuf::from("stations.toml");
    if local.exists() && local != config.stations_toml {
        out.push(Source::Toml(local));
    }

    let m3u = config.m3u_url.trim();
    if m3u.starts_with("http://") || m3u.starts_with("https://") {
        out.push(Source::M3uUrl(m3u.to_string()));
    } else if !m3u.is_empty() {
        out.push(Source::M3uFile(PathBuf::from(m3u)));
    }

    out
}

async fn load_source(source: &Source) -> anyhow::Result<Vec<Station>> {
    match source {
        Source::Toml(path) => load_stations_from_toml(path),
        Source::M3uUrl(url) => fetch_m3u_url(url).await,
        Source::M3uFile(path) => load_stations_from_m3u(path),
    }
}

async fn fetch_m3u_url(url: &str) -> anyhow::Result<Vec<Station>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    parse_m3u_from_str(&text)
}

pub async fn load_catalog(config: &StationsConfig) -> anyhow::Result<Catalog> {
    for source in sources(config) {
        match load_source(&source).await {
            Ok(stations) if stations.is_empty() => {
                warn!("No stations in {}", source);
            }
            Ok(stations) => match Catalog::new(stations) {
                Ok(catalog) => {
                    info!("Loaded {} stations from {}", catalog.len(), source);
                    return Ok(catalog);
                }
                Err(e) => warn!("Rejected stations from {}: {}", source, e),
            },
            Err(e) => warn!("Failed to load stations from {}: {}", source, e),
        }
    }

    let catalog = Catalog::builtin()?;
    info!("Using the built-in list of {} stations", catalog.len());
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugstream_proto::station::StationId;

    fn config(dir: &std::path::Path) -> StationsConfig {
        StationsConfig {
            stations_toml: dir.join("stations.toml"),
            m3u_url: String::new(),
        }
    }

    #[tokio::test]
    async fn test_configured_toml_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::write(
            &cfg.stations_toml,
            "[[station]]\nname = \"Test FM\"\nurl = \"http://stream.test/fm\"\n",
        )
        .unwrap();

        let catalog = load_catalog(&cfg).await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains(&StationId::from("Test FM")));
    }

    #[tokio::test]
    async fn test_bad_toml_falls_through_to_m3u() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        std::fs::write(&cfg.stations_toml, "[[station]]\nname = 3\n").unwrap();
        let m3u = dir.path().join("list.m3u");
        std::fs::write(&m3u, "#EXTM3U\n#EXTINF:-1,Playlist FM\nhttp://stream.test/pl\n").unwrap();
        cfg.m3u_url = m3u.display().to_string();

        let catalog = load_catalog(&cfg).await.unwrap();
        assert_eq!(catalog.stations()[0].name, "Playlist FM");
    }

    #[tokio::test]
    async fn test_duplicate_ids_fall_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::write(
            &cfg.stations_toml,
            "[[station]]\nname = \"Dup FM\"\nurl = \"http://a\"\n\n\
             [[station]]\nname = \"dup fm\"\nurl = \"http://b\"\n",
        )
        .unwrap();

        let catalog = load_catalog(&cfg).await.unwrap();
        assert!(catalog.contains(&StationId::from("Sanyu FM")));
    }

    #[test]
    fn test_source_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        std::fs::write(&cfg.stations_toml, "").unwrap();
        cfg.m3u_url = " https://lists.test/ug.m3u ".into();

        let found = sources(&cfg);
        assert_eq!(found.first(), Some(&Source::Toml(cfg.stations_toml.clone())));
        assert_eq!(
            found.last(),
            Some(&Source::M3uUrl("https://lists.test/ug.m3u".into()))
        );
    }
}
