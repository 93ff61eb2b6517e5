//! User preferences persisted as a small JSON file.
//!
//! Every setter re-reads the stored record under an exclusive lock, applies
//! its change and swaps in a complete new file with a rename. Readers take a
//! shared lock. Two processes sharing a data directory therefore neither see
//! half-written files nor overwrite each other's fields.
//! Location lookup is a collaborator ([`LocationProvider`]); this module only
//! stores the label it resolves.

use async_trait::async_trait;
use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::models::now_ms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub username: String,
    pub dark_theme: bool,
    pub preferred_language: String,
    pub notification_volume: f32,
    pub last_access_ms: i64,
    pub last_location: String,
    pub total_usage_ms: i64,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            username: String::new(),
            dark_theme: false,
            preferred_language: "es".to_string(),
            notification_volume: 1.0,
            last_access_ms: 0,
            last_location: String::new(),
            total_usage_ms: 0,
        }
    }
}

impl UserPreferences {
    /// `dd/mm/YYYY HH:MM` in local time, or "never"
    pub fn format_last_access(&self) -> String {
        if self.last_access_ms == 0 {
            return "never".to_string();
        }
        match chrono::DateTime::from_timestamp_millis(self.last_access_ms) {
            Some(ts) => ts.with_timezone(&chrono::Local).format("%d/%m/%Y %H:%M").to_string(),
            None => "never".to_string(),
        }
    }

    pub fn format_usage_time(&self) -> String {
        format_duration_ms(self.total_usage_ms)
    }
}

/// `{h}h {m}m {s}s`
pub fn format_duration_ms(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{}h {}m {}s", hours, minutes, seconds)
}

pub struct PreferencesFile {
    path: PathBuf,
    prefs: UserPreferences,
}

impl PreferencesFile {
    /// Load preferences from `path`, falling back to defaults when the file
    /// is missing or unreadable
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let prefs = if path.exists() {
            let lock = open_lock(&path)?;
            lock.lock_shared().context("Failed to acquire shared file lock")?;
            read_prefs(&path)?
        } else {
            UserPreferences::default()
        };

        Ok(Self { path, prefs })
    }

    pub fn get(&self) -> &UserPreferences {
        &self.prefs
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the stored record under the exclusive lock, apply `f`, then
    /// replace the file. Changes made by other handles since `open` survive.
    fn modify<R>(&mut self, f: impl FnOnce(&mut UserPreferences) -> R) -> Result<R> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create preferences directory")?;
        }

        let lock = open_lock(&self.path)?;
        lock.lock_exclusive().context("Failed to acquire file lock")?;

        let mut prefs = if self.path.exists() {
            read_prefs(&self.path)?
        } else {
            UserPreferences::default()
        };
        let out = f(&mut prefs);
        write_replace(&self.path, &prefs)?;
        self.prefs = prefs;

        debug!(file = ?self.path, "Saved preferences");
        Ok(out)
    }

    pub fn set_username(&mut self, username: &str) -> Result<()> {
        self.modify(|p| p.username = username.to_string())
    }

    pub fn set_dark_theme(&mut self, enabled: bool) -> Result<()> {
        self.modify(|p| p.dark_theme = enabled)
    }

    /// Flip the theme and return the new value
    pub fn toggle_dark_theme(&mut self) -> Result<bool> {
        self.modify(|p| {
            p.dark_theme = !p.dark_theme;
            p.dark_theme
        })
    }

    pub fn set_preferred_language(&mut self, language: &str) -> Result<()> {
        self.modify(|p| p.preferred_language = language.to_string())
    }

    /// Volume is clamped to `0.0..=1.0`
    pub fn set_notification_volume(&mut self, volume: f32) -> Result<()> {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.modify(|p| p.notification_volume = volume)
    }

    pub fn set_last_location(&mut self, location: &str) -> Result<()> {
        self.modify(|p| p.last_location = location.to_string())
    }

    pub fn touch_last_access(&mut self) -> Result<()> {
        self.modify(|p| p.last_access_ms = now_ms())
    }

    pub fn add_usage_time(&mut self, elapsed: Duration) -> Result<()> {
        let ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        self.modify(|p| p.total_usage_ms = p.total_usage_ms.saturating_add(ms))
    }

    /// Reset everything to defaults
    pub fn clear_all(&mut self) -> Result<()> {
        self.modify(|p| *p = UserPreferences::default())
    }

    /// Ask `provider` for the current position and store its label.
    /// Returns the stored label.
    pub async fn refresh_location(&mut self, provider: &dyn LocationProvider) -> Result<String> {
        let location = provider.current_location().await?;
        let label = location.label();
        self.set_last_location(&label)?;
        Ok(label)
    }
}

/// `prefs.json` -> `prefs.json.<suffix>`, in the same directory
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// The data file is replaced by rename, so locks live on a sidecar that
/// keeps its inode
fn open_lock(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(sibling(path, "lock"))
        .context("Failed to open preferences lock file")
}

fn read_prefs(path: &Path) -> Result<UserPreferences> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(UserPreferences::default()),
        Err(e) => return Err(e).context("Failed to read preferences file"),
    };

    match serde_json::from_str(&content) {
        Ok(p) => Ok(p),
        Err(e) => {
            warn!(file = ?path, error = ?e, "Failed to parse preferences, using defaults");
            Ok(UserPreferences::default())
        }
    }
}

/// Write to a temp file next to `path`, then rename it over `path`.
/// Caller holds the exclusive lock.
fn write_replace(path: &Path, prefs: &UserPreferences) -> Result<()> {
    let tmp = sibling(path, "tmp");
    let json = serde_json::to_string_pretty(prefs)?;

    let mut file = File::create(&tmp).context("Failed to create temp preferences file")?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).context("Failed to replace preferences file");
    }
    Ok(())
}

/// Measures one session of use
pub struct UsageTimer {
    started: Instant,
}

impl UsageTimer {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    /// Add the elapsed time to the stored total
    pub fn stop(self, prefs: &mut PreferencesFile) -> Result<()> {
        prefs.add_usage_time(self.started.elapsed())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub locality: Option<String>,
    pub admin_area: Option<String>,
}

impl Location {
    /// "Locality, Area" when known, raw coordinates otherwise
    pub fn label(&self) -> String {
        let parts: Vec<&str> = [self.locality.as_deref(), self.admin_area.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();

        if parts.is_empty() {
            format!("{}, {}", self.latitude, self.longitude)
        } else {
            parts.join(", ")
        }
    }
}

/// Source of the device position
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<Location>;
}

/// Provider that always reports the same position
pub struct FixedLocation(pub Location);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<Location> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_prefs() -> (TempDir, PreferencesFile) {
        let temp = TempDir::new().unwrap();
        let prefs = PreferencesFile::open(temp.path().join("prefs.json")).unwrap();
        (temp, prefs)
    }

    #[test]
    fn test_defaults_when_missing() {
        let (_temp, prefs) = temp_prefs();
        let p = prefs.get();
        assert_eq!(p.preferred_language, "es");
        assert_eq!(p.notification_volume, 1.0);
        assert!(!p.dark_theme);
        assert_eq!(p.format_last_access(), "never");
        assert_eq!(p.format_usage_time(), "0h 0m 0s");
        assert!(!prefs.path().exists());
    }

    #[test]
    fn test_setters_persist() {
        let (temp, mut prefs) = temp_prefs();
        prefs.set_username("ana").unwrap();
        assert!(prefs.toggle_dark_theme().unwrap());
        prefs.set_preferred_language("en").unwrap();
        prefs.set_notification_volume(3.5).unwrap();
        prefs.add_usage_time(Duration::from_millis(3_723_000)).unwrap();
        prefs.touch_last_access().unwrap();

        let reopened = PreferencesFile::open(temp.path().join("prefs.json")).unwrap();
        let p = reopened.get();
        assert_eq!(p.username, "ana");
        assert!(p.dark_theme);
        assert_eq!(p.preferred_language, "en");
        assert_eq!(p.notification_volume, 1.0);
        assert_eq!(p.format_usage_time(), "1h 2m 3s");
        assert_ne!(p.format_last_access(), "never");
        assert_eq!(p.format_last_access().len(), "18/10/2026 09:30".len());
    }

    #[test]
    fn test_shorter_rewrite_leaves_valid_json() {
        let (temp, mut prefs) = temp_prefs();
        prefs.set_username(&"x".repeat(200)).unwrap();
        prefs.set_username("y").unwrap();

        let reopened = PreferencesFile::open(temp.path().join("prefs.json")).unwrap();
        assert_eq!(reopened.get().username, "y");
    }

    #[test]
    fn test_stale_handle_keeps_other_handles_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("prefs.json");
        let mut a = PreferencesFile::open(&path).unwrap();
        let mut b = PreferencesFile::open(&path).unwrap();

        b.set_username("bob").unwrap();
        a.touch_last_access().unwrap();
        assert_eq!(a.get().username, "bob");

        let reopened = PreferencesFile::open(&path).unwrap();
        assert_eq!(reopened.get().username, "bob");
        assert_ne!(reopened.get().last_access_ms, 0);
    }

    #[test]
    fn test_toggle_uses_stored_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("prefs.json");
        let mut a = PreferencesFile::open(&path).unwrap();
        let mut b = PreferencesFile::open(&path).unwrap();

        assert!(b.toggle_dark_theme().unwrap());
        assert!(!a.toggle_dark_theme().unwrap());
    }

    #[test]
    fn test_reader_never_sees_partial_write() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("prefs.json");
        let long_a = "a".repeat(50_000);
        let long_b = "b".repeat(50_000);
        PreferencesFile::open(&path).unwrap().set_username(&long_a).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let path = path.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut prefs = PreferencesFile::open(&path).unwrap();
                let mut i = 0usize;
                while !done.load(Ordering::Relaxed) {
                    let name = if i % 2 == 0 { &long_b } else { &long_a };
                    prefs.set_username(name).unwrap();
                    i += 1;
                }
            })
        };

        for _ in 0..500 {
            let prefs = PreferencesFile::open(&path).unwrap();
            assert_eq!(prefs.get().username.len(), 50_000);
        }

        done.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    #[test]
    fn test_clear_all_restores_defaults() {
        let (_temp, mut prefs) = temp_prefs();
        prefs.set_username("ana").unwrap();
        prefs.set_dark_theme(true).unwrap();
        prefs.clear_all().unwrap();
        assert_eq!(prefs.get(), &UserPreferences::default());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("prefs.json");
        fs::write(&path, "{not json").unwrap();

        let prefs = PreferencesFile::open(&path).unwrap();
        assert_eq!(prefs.get(), &UserPreferences::default());
    }

    #[test]
    fn test_location_label() {
        let mut loc = Location {
            latitude: 40.4,
            longitude: -3.7,
            locality: Some("Madrid".to_string()),
            admin_area: Some("Comunidad de Madrid".to_string()),
        };
        assert_eq!(loc.label(), "Madrid, Comunidad de Madrid");

        loc.admin_area = None;
        assert_eq!(loc.label(), "Madrid");

        loc.locality = None;
        assert_eq!(loc.label(), "40.4, -3.7");
    }

    #[tokio::test]
    async fn test_refresh_location_stores_label() {
        let (_temp, mut prefs) = temp_prefs();
        let provider = FixedLocation(Location {
            latitude: 1.5,
            longitude: 2.5,
            locality: None,
            admin_area: None,
        });

        let label = prefs.refresh_location(&provider).await.unwrap();
        assert_eq!(label, "1.5, 2.5");
        assert_eq!(prefs.get().last_location, "1.5, 2.5");
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(59_999), "0h 0m 59s");
        assert_eq!(format_duration_ms(-5), "0h 0m 0s");
        assert_eq!(format_duration_ms(90 * 60_000), "1h 30m 0s");
    }
}
