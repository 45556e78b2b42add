use std::{path::PathBuf, sync::Arc};

use ab_glyph::FontVec;
use tokio::sync::OnceCell;

use crate::{core::settings::FontPaths, error::ExportError};

use super::layout::FontStyle;

/// Tried in order when no regular font is configured
const SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
];

/// Loaded faces. Missing bold/italic faces fall back to the regular one.
#[derive(Default)]
pub struct Fonts {
    regular: Option<FontVec>,
    bold: Option<FontVec>,
    italic: Option<FontVec>,
}

impl Fonts {
    pub fn get(&self, style: FontStyle) -> Option<&FontVec> {
        let face = match style {
            FontStyle::Regular => None,
            FontStyle::Bold => self.bold.as_ref(),
            FontStyle::Italic => self.italic.as_ref(),
        };
        face.or(self.regular.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.regular.is_none() && self.bold.is_none() && self.italic.is_none()
    }
}

async fn load_face(path: &PathBuf) -> Result<FontVec, ExportError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ExportError::Fonts(format!("{}: {}", path.display(), e)))?;
    FontVec::try_from_vec(data).map_err(|e| ExportError::Fonts(format!("{}: {}", path.display(), e)))
}

async fn load_optional(path: Option<&PathBuf>) -> Result<Option<FontVec>, ExportError> {
    match path {
        Some(path) => Ok(Some(load_face(path).await?)),
        None => Ok(None),
    }
}

/// Font faces used by the rasterizer, loaded once on first use.
///
/// `ready` is the synchronization point before any text is drawn; every
/// export awaits it.
pub struct FontRegistry {
    paths: FontPaths,
    search_system: bool,
    loaded: OnceCell<Arc<Fonts>>,
}

impl FontRegistry {
    pub fn new(paths: FontPaths) -> Self {
        Self {
            paths,
            search_system: true,
            loaded: OnceCell::new(),
        }
    }

    /// A registry with no faces; text elements are skipped when drawing.
    pub fn empty() -> Self {
        Self {
            paths: FontPaths::default(),
            search_system: false,
            loaded: OnceCell::new(),
        }
    }

    pub async fn ready(&self) -> Result<Arc<Fonts>, ExportError> {
        self.loaded
            .get_or_try_init(|| async {
                let mut fonts = Fonts {
                    regular: load_optional(self.paths.regular.as_ref()).await?,
                    bold: load_optional(self.paths.bold.as_ref()).await?,
                    italic: load_optional(self.paths.italic.as_ref()).await?,
                };

                if fonts.regular.is_none() && self.search_system {
                    for candidate in SYSTEM_FONTS {
                        if let Ok(face) = load_face(&PathBuf::from(candidate)).await {
                            log::info!("Using system font {}", candidate);
                            fonts.regular = Some(face);
                            break;
                        }
                    }
                }

                if fonts.is_empty() {
                    log::warn!("No fonts available, exported text will be missing");
                }
                Ok(Arc::new(fonts))
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = FontRegistry::empty();
        let fonts = registry.ready().await.unwrap();
        assert!(fonts.is_empty());
        assert!(fonts.get(FontStyle::Bold).is_none());
    }

    #[tokio::test]
    async fn test_bad_font_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();

        let registry = FontRegistry::new(FontPaths {
            regular: Some(path),
            ..Default::default()
        });
        assert!(matches!(registry.ready().await, Err(ExportError::Fonts(_))));

        let missing = FontRegistry::new(FontPaths {
            bold: Some(dir.path().join("missing.ttf")),
            ..Default::default()
        });
        assert!(matches!(missing.ready().await, Err(ExportError::Fonts(_))));
    }
}
