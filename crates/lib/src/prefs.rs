//! Persisted UI preferences: the last chat window size.
//!
//! One small JSON file next to the config. Writes are last-writer-wins; the
//! file is rewritten whole on every save and a missing file just means no
//! saved preference yet.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest allowed window edge, in px.
pub const MIN_DIM: u32 = 320;

/// Margin kept between the window and the viewport edge, in px.
pub const VIEWPORT_MARGIN: u32 = 40;

/// Saved chat window size in px.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub w: u32,
    pub h: u32,
}

impl WindowSize {
    /// Clamp to the legal range: at least [`MIN_DIM`] per edge, at most the
    /// viewport minus [`VIEWPORT_MARGIN`].
    pub fn clamped(self, viewport_w: u32, viewport_h: u32) -> Self {
        let max_w = viewport_w.saturating_sub(VIEWPORT_MARGIN).max(MIN_DIM);
        let max_h = viewport_h.saturating_sub(VIEWPORT_MARGIN).max(MIN_DIM);
        Self {
            w: self.w.clamp(MIN_DIM, max_w),
            h: self.h.clamp(MIN_DIM, max_h),
        }
    }
}

/// Preference file path: `window.json` next to the config file.
pub fn prefs_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("window.json")
}

/// Load the saved size. Missing file => None.
pub fn load(path: &Path) -> Result<Option<WindowSize>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading window prefs from {}", path.display()))?;
    let size = serde_json::from_str(&s)
        .with_context(|| format!("parsing window prefs from {}", path.display()))?;
    Ok(Some(size))
}

/// Persist the size, creating the parent directory if needed.
pub fn store(path: &Path, size: &WindowSize) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let s = serde_json::to_string(size).context("encoding window prefs")?;
    std::fs::write(path, s).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_raises_to_minimum() {
        let size = WindowSize { w: 100, h: 200 }.clamped(1920, 1080);
        assert_eq!(size, WindowSize { w: MIN_DIM, h: MIN_DIM });
    }

    #[test]
    fn clamp_caps_at_viewport_minus_margin() {
        let size = WindowSize { w: 5000, h: 5000 }.clamped(1920, 1080);
        assert_eq!(size, WindowSize { w: 1880, h: 1040 });
    }

    #[test]
    fn clamp_keeps_sizes_in_range() {
        let size = WindowSize { w: 800, h: 600 }.clamped(1920, 1080);
        assert_eq!(size, WindowSize { w: 800, h: 600 });
    }

    #[test]
    fn prefs_path_sits_next_to_config() {
        let p = prefs_path(Path::new("/home/user/.pulsar/config.json"));
        assert_eq!(p, PathBuf::from("/home/user/.pulsar/window.json"));
    }

    #[test]
    fn store_then_load_roundtrip_and_overwrite() {
        let dir = std::env::temp_dir().join(format!("pulsar-prefs-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("window.json");
        assert_eq!(load(&path).unwrap(), None);

        let first = WindowSize { w: 640, h: 480 };
        store(&path, &first).unwrap();
        assert_eq!(load(&path).unwrap(), Some(first));

        // Last writer wins.
        let second = WindowSize { w: 800, h: 600 };
        store(&path, &second).unwrap();
        assert_eq!(load(&path).unwrap(), Some(second));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
