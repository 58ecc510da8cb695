//! Colour themes and the persisted preference that selects one.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Key the preference has always been stored under.
pub const SETTINGS_KEY: &str = "systemSettings";
const FALLBACK_COLOR: &str = "#000000";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Blue,
    Green,
    Purple,
    Orange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub primary: &'static str,
    pub secondary: &'static str,
    pub primary_dark: &'static str,
    pub secondary_dark: &'static str,
    pub accent: &'static str,
    pub background: &'static str,
}

impl Palette {
    /// `(camelCase key, value)` pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, &'static str); 6] {
        [
            ("primary", self.primary),
            ("secondary", self.secondary),
            ("primaryDark", self.primary_dark),
            ("secondaryDark", self.secondary_dark),
            ("accent", self.accent),
            ("background", self.background),
        ]
    }

    pub fn get(&self, key: &str) -> Option<&'static str> {
        self.entries()
            .into_iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }
}

impl Theme {
    pub const ALL: [Theme; 4] = [Theme::Blue, Theme::Green, Theme::Purple, Theme::Orange];

    pub fn name(self) -> &'static str {
        match self {
            Theme::Blue => "blue",
            Theme::Green => "green",
            Theme::Purple => "purple",
            Theme::Orange => "orange",
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            Theme::Blue => Palette {
                primary: "#667eea",
                secondary: "#764ba2",
                primary_dark: "#1e3c72",
                secondary_dark: "#2a5298",
                accent: "#3498db",
                background: "linear-gradient(135deg, #667eea 0%, #764ba2 100%)",
            },
            Theme::Green => Palette {
                primary: "#2ecc71",
                secondary: "#27ae60",
                primary_dark: "#27ae60",
                secondary_dark: "#229954",
                accent: "#27ae60",
                background: "linear-gradient(135deg, #2ecc71 0%, #27ae60 100%)",
            },
            Theme::Purple => Palette {
                primary: "#9b59b6",
                secondary: "#8e44ad",
                primary_dark: "#8e44ad",
                secondary_dark: "#7d3c98",
                accent: "#9b59b6",
                background: "linear-gradient(135deg, #9b59b6 0%, #8e44ad 100%)",
            },
            Theme::Orange => Palette {
                primary: "#f39c12",
                secondary: "#e67e22",
                primary_dark: "#e67e22",
                secondary_dark: "#d35400",
                accent: "#f39c12",
                background: "linear-gradient(135deg, #f39c12 0%, #e67e22 100%)",
            },
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Theme::ALL
            .into_iter()
            .find(|theme| theme.name() == s)
            .ok_or_else(|| format!("theme `{s}` not found"))
    }
}

/// `primaryDark` -> `primary-dark`
pub fn camel_to_kebab(name: &str) -> String {
    let mut kebab = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                kebab.push('-');
            }
            kebab.push(c.to_ascii_lowercase());
        } else {
            kebab.push(c);
        }
    }
    kebab
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub theme: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Settings>, SettingsError>;

    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// JSON file holding `{ "systemSettings": { "theme": ... } }`.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/food-dashboard/settings.json`, or the working directory
    /// when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("food-dashboard"))
            .unwrap_or_default()
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<Option<Settings>, SettingsError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_err(err)),
        };

        let mut document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)?;
        match document.remove(SETTINGS_KEY) {
            Some(settings) => Ok(Some(serde_json::from_value(settings)?)),
            None => Ok(None),
        }
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| self.io_err(err))?;
        }

        let document = serde_json::json!({ SETTINGS_KEY: settings });
        let text = serde_json::to_string_pretty(&document)?;
        std::fs::write(&self.path, text).map_err(|err| self.io_err(err))
    }
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<Settings>>,
}

impl MemorySettingsStore {
    pub fn new(settings: Option<Settings>) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn snapshot(&self) -> Option<Settings> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Option<Settings>, SettingsError> {
        Ok(self.snapshot())
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let mut stored = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        *stored = Some(settings.clone());
        Ok(())
    }
}

/// The active theme plus the store it is persisted to. Built once at
/// startup and passed to whatever renders.
pub struct ThemeContext<S> {
    store: S,
    current: Theme,
}

impl<S: SettingsStore> ThemeContext<S> {
    /// Reads the saved preference. Missing or unreadable settings fall back
    /// to the default theme.
    pub fn load(store: S) -> Self {
        let current = match store.load() {
            Ok(Some(Settings { theme: Some(name) })) => resolve(&name),
            Ok(_) => Theme::default(),
            Err(err) => {
                tracing::warn!("failed to load theme settings: {err}");
                Theme::default()
            }
        };
        Self { store, current }
    }

    pub fn current(&self) -> Theme {
        self.current
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Switches theme and persists the choice. Unknown names select the
    /// default theme.
    pub fn apply(&mut self, name: &str) -> Result<Theme, SettingsError> {
        let theme = resolve(name);
        self.store.save(&Settings {
            theme: Some(theme.name().to_string()),
        })?;
        self.current = theme;
        tracing::info!(theme = theme.name(), "theme applied");
        Ok(theme)
    }

    /// `--theme-<kebab key>` custom properties for the current theme.
    pub fn css_variables(&self) -> Vec<(String, &'static str)> {
        self.current
            .palette()
            .entries()
            .into_iter()
            .map(|(key, value)| (format!("--theme-{}", camel_to_kebab(key)), value))
            .collect()
    }
}

fn resolve(name: &str) -> Theme {
    name.parse().unwrap_or_else(|err: String| {
        tracing::warn!("{err}, using default theme");
        Theme::default()
    })
}

/// Colour lookup by theme name and camelCase key. Unknown themes fall back
/// to blue; unknown keys to black.
pub fn theme_color(theme: &str, key: &str) -> &'static str {
    theme
        .parse::<Theme>()
        .ok()
        .and_then(|theme| theme.palette().get(key))
        .or_else(|| Theme::Blue.palette().get(key))
        .unwrap_or(FALLBACK_COLOR)
}
