//! fontconfig integration
//!
//! Search and select system fonts

use anyhow::{anyhow, Result};
use fontconfig::Fontconfig;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Font search result
#[derive(Debug, Clone)]
pub struct FontMatch {
    /// Font file path
    pub path: PathBuf,
    /// Font name
    pub family: String,
}

/// fontconfig aliases that resolve to whatever the system prefers
fn is_generic_family(family: &str) -> bool {
    matches!(
        family.to_ascii_lowercase().as_str(),
        "monospace" | "mono" | "sans-serif" | "sans" | "serif"
    )
}

/// Search fonts using fontconfig
pub struct FontFinder {
    fc: Fontconfig,
}

impl FontFinder {
    /// Initialize FontFinder
    pub fn new() -> Result<Self> {
        let fc = Fontconfig::new().ok_or_else(|| anyhow!("fontconfig initialization failed"))?;
        Ok(Self { fc })
    }

    /// Search by family name, bold style if requested.
    /// fontconfig always returns the "closest" match, even a completely
    /// unrelated one; those are rejected unless `family` is an alias.
    pub fn find_font(&self, family: &str, bold: bool) -> Option<FontMatch> {
        let style = if bold { Some("Bold") } else { None };
        let font = self.fc.find(family, style)?;
        if is_generic_family(family) {
            return Some(FontMatch {
                path: font.path,
                family: font.name,
            });
        }

        let req = family.to_ascii_lowercase();
        let got = font.name.to_ascii_lowercase();
        if got.contains(&req) || req.contains(&got) {
            return Some(FontMatch {
                path: font.path,
                family: font.name,
            });
        }
        warn!(
            "fontconfig: rejected false match for \"{}\": got \"{}\"",
            family, font.name
        );
        None
    }

    /// Search for a monospace font
    pub fn find_monospace(&self, bold: bool) -> Option<FontMatch> {
        let fallbacks = [
            "DejaVu Sans Mono",
            "Liberation Mono",
            "Noto Sans Mono",
            "Source Code Pro",
            "monospace",
        ];

        for name in fallbacks {
            if let Some(m) = self.find_font(name, bold) {
                return Some(m);
            }
        }

        warn!("Monospace font not found");
        None
    }
}

/// Resolve a font specifier: an absolute path is used as is, anything
/// else is a family name looked up via fontconfig, falling back to the
/// usual monospace fonts.
pub fn resolve_font(specifier: &str, bold: bool) -> Result<FontMatch> {
    let path = Path::new(specifier);
    if path.is_absolute() && path.exists() {
        return Ok(FontMatch {
            path: path.to_path_buf(),
            family: specifier.to_string(),
        });
    }

    let finder = FontFinder::new()?;
    if let Some(font_match) = finder.find_font(specifier, bold) {
        info!(
            "Font resolved by name: \"{}\" → {} ({})",
            specifier,
            font_match.family,
            font_match.path.display()
        );
        return Ok(font_match);
    }

    finder
        .find_monospace(bold)
        .ok_or_else(|| anyhow!("Font not found: \"{}\"", specifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_family() {
        assert!(is_generic_family("monospace"));
        assert!(is_generic_family("Sans-Serif"));
        assert!(!is_generic_family("DejaVu Sans Mono"));
    }

    #[test]
    #[ignore]
    fn test_resolve_system_monospace() {
        // Requires fontconfig and at least one installed font
        let m = resolve_font("monospace", false).unwrap();
        assert!(m.path.exists());
    }
}
