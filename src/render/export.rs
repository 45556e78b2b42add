use std::{
    collections::HashSet,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use flate2::{write::ZlibEncoder, Compression};
use image::RgbaImage;
use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, Stream,
};

use crate::{core::participant::Participant, error::ExportError, util::download_file_name};

use super::{
    assets::ImageLoader,
    fonts::FontRegistry,
    layout::{layout, CardLayout, Template},
    raster::rasterize,
};

/// CSS pixels (96 per inch) to PDF points (72 per inch)
pub const PX_TO_PT: f32 = 72.0 / 96.0;

/// A finished single-page document, ready to be saved or served.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Page size in PDF points
    pub page_width: f32,
    pub page_height: f32,
}

impl ExportArtifact {
    pub async fn save_in(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.bytes).await?;
        Ok(path)
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, ExportError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Builds a PDF with one `page_width`×`page_height` point page showing
/// `surface` full bleed. The alpha channel becomes a soft mask.
pub fn write_pdf(surface: &RgbaImage, page_width: f32, page_height: f32) -> Result<Vec<u8>, ExportError> {
    let (w, h) = surface.dimensions();
    let mut rgb = Vec::with_capacity((w * h * 3) as usize);
    let mut alpha = Vec::with_capacity((w * h) as usize);
    for pixel in surface.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let smask_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => w as i64,
            "Height" => h as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8_i64,
            "Filter" => "FlateDecode",
        },
        deflate(&alpha)?,
    ));
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => w as i64,
            "Height" => h as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8_i64,
            "Filter" => "FlateDecode",
            "SMask" => smask_id,
        },
        deflate(&rgb)?,
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(page_width as _),
                    Object::Real(0.0),
                    Object::Real(0.0),
                    Object::Real(page_height as _),
                    Object::Real(0.0),
                    Object::Real(0.0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let encoded = content.encode().map_err(|e| ExportError::Pdf(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(page_width as _),
            Object::Real(page_height as _),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1_i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;
    Ok(bytes)
}

/// Layout → bitmap → PDF pipeline for cards and certificates.
#[derive(Clone)]
pub struct RasterExporter {
    fonts: Arc<FontRegistry>,
    images: ImageLoader,
    scale: u32,
}

impl RasterExporter {
    pub fn new(fonts: Arc<FontRegistry>, images: ImageLoader, scale: u32) -> Self {
        Self {
            fonts,
            images,
            scale: scale.max(1),
        }
    }

    /// Renders `layout` at `width_px`×`height_px` CSS pixels onto a single
    /// page sized to match. Waits for fonts before drawing anything.
    pub async fn export_surface(
        &self,
        layout: &CardLayout,
        width_px: f32,
        height_px: f32,
    ) -> Result<(Vec<u8>, f32, f32), ExportError> {
        let fonts = self.fonts.ready().await?;
        let images = self.images.load_all(layout.images()).await;

        let surface = rasterize(layout, width_px, height_px, self.scale, &fonts, &images)?;
        let (page_width, page_height) = (width_px * PX_TO_PT, height_px * PX_TO_PT);
        let bytes = write_pdf(&surface, page_width, page_height)?;

        log::debug!(
            "Rendered {}x{} px surface onto {}x{} pt page",
            surface.width(),
            surface.height(),
            page_width,
            page_height
        );
        Ok((bytes, page_width, page_height))
    }

    /// Exports the selected participant. Nothing is produced, and no error
    /// raised, when there is no selection.
    pub async fn export(
        &self,
        participant: Option<&Participant>,
        template: Template,
    ) -> Result<Option<ExportArtifact>, ExportError> {
        let Some(participant) = participant else {
            log::debug!("Export skipped, no participant selected");
            return Ok(None);
        };

        let card = layout(participant, template);
        let (width, height) = template.size();
        let (bytes, page_width, page_height) = self.export_surface(&card, width, height).await?;

        Ok(Some(ExportArtifact {
            file_name: download_file_name(
                participant.display_name(),
                template.fallback_name(),
                "pdf",
            ),
            bytes,
            page_width,
            page_height,
        }))
    }

    /// Exports every participant into `dir`, one file each. Duplicate names
    /// get a numeric suffix.
    pub async fn export_all<'a>(
        &self,
        participants: impl Iterator<Item = &'a Participant>,
        template: Template,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, ExportError> {
        let mut written = Vec::new();
        let mut used = HashSet::new();

        for participant in participants {
            let Some(mut artifact) = self.export(Some(participant), template).await? else {
                continue;
            };
            artifact.file_name = unique_name(&artifact.file_name, &mut used);
            let path = artifact.save_in(dir).await?;
            log::info!("Exported {}", path.display());
            written.push(path);
        }

        Ok(written)
    }
}

fn unique_name(file_name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(file_name.to_owned()) {
        return file_name.to_owned();
    }

    let (stem, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    (2..)
        .map(|n| {
            if ext.is_empty() {
                format!("{}-{}", stem, n)
            } else {
                format!("{}-{}.{}", stem, n, ext)
            }
        })
        .find(|candidate| used.insert(candidate.clone()))
        .unwrap_or_else(|| file_name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::Settings;

    fn exporter(assets: &Path) -> RasterExporter {
        RasterExporter::new(
            Arc::new(FontRegistry::empty()),
            ImageLoader::new(&Settings {
                assets_dir: assets.to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
            3,
        )
    }

    fn number(obj: &Object) -> f64 {
        match obj {
            Object::Integer(i) => *i as f64,
            Object::Real(r) => *r as f64,
            other => panic!("not a number: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_id_card_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let participant = Participant {
            id: Some("17".to_owned()),
            name: Some("  Juan  Dela Cruz ".to_owned()),
            ..Default::default()
        };

        let artifact = exporter(dir.path())
            .export(Some(&participant), Template::IdCard)
            .await
            .unwrap()
            .unwrap();

        assert_eq!((artifact.page_width, artifact.page_height), (262.5, 390.0));
        assert_eq!(artifact.file_name, "Juan_Dela_Cruz.pdf");

        let doc = Document::load_mem(&artifact.bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);

        let page_id = *pages.values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let media_box: Vec<f64> = page
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(number)
            .collect();
        assert_eq!(media_box, vec![0.0, 0.0, 262.5, 390.0]);
    }

    #[tokio::test]
    async fn test_certificate_fallback_name() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = exporter(dir.path())
            .export(Some(&Participant::default()), Template::Certificate)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(artifact.file_name, "certificate.pdf");
        assert_eq!((artifact.page_width, artifact.page_height), (468.75, 378.75));
    }

    #[tokio::test]
    async fn test_no_selection_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let result = exporter(dir.path()).export(None, Template::IdCard).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_export_all() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let roster = vec![
            Participant {
                name: Some("Ana Reyes".to_owned()),
                ..Default::default()
            },
            Participant {
                name: Some("Ana  Reyes".to_owned()),
                ..Default::default()
            },
            Participant::default(),
        ];

        let written = exporter(dir.path())
            .export_all(roster.iter(), Template::IdCard, &out)
            .await
            .unwrap();

        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Ana_Reyes.pdf", "Ana_Reyes-2.pdf", "participant.pdf"]);
        assert!(written.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_write_pdf_keeps_alpha() {
        let surface = RgbaImage::from_pixel(4, 2, image::Rgba([255, 0, 0, 0]));
        let bytes = write_pdf(&surface, 3.0, 1.5).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }
}
