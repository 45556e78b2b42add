use std::{collections::HashMap, path::PathBuf};

use futures::future::join_all;
use image::RgbaImage;

use crate::core::settings::Settings;

use super::layout::{is_asset_path, ImageRef};

pub type ImageSet = HashMap<ImageRef, RgbaImage>;

/// Fetches the images a layout references.
///
/// An image that cannot be fetched or decoded is left out of the set and
/// simply not drawn.
#[derive(Clone)]
pub struct ImageLoader {
    assets_dir: PathBuf,
    client: reqwest::Client,
}

impl ImageLoader {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            assets_dir: settings.assets_dir.clone(),
            client,
        })
    }

    async fn fetch(&self, source: &ImageRef) -> anyhow::Result<RgbaImage> {
        let bytes = match source {
            ImageRef::Remote(url) => self
                .client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec(),
            ImageRef::Asset(name) if is_asset_path(name) => {
                tokio::fs::read(self.assets_dir.join(name)).await?
            }
            ImageRef::Asset(name) => anyhow::bail!("{} is outside the assets directory", name),
        };

        Ok(image::load_from_memory(&bytes)?.to_rgba8())
    }

    /// Fetches every distinct source concurrently.
    pub async fn load_all<'a>(&self, sources: impl Iterator<Item = &'a ImageRef>) -> ImageSet {
        let mut unique: Vec<&ImageRef> = Vec::new();
        for source in sources {
            if !unique.contains(&source) {
                unique.push(source);
            }
        }

        let fetched = join_all(unique.iter().map(|source| self.fetch(source))).await;

        let mut images = ImageSet::new();
        for (source, result) in unique.into_iter().zip(fetched) {
            match result {
                Ok(image) => {
                    images.insert(source.clone(), image);
                }
                Err(e) => log::warn!("Skipping image {:?}: {:#}", source, e),
            }
        }
        images
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use warp::Filter;

    use super::*;

    fn loader(assets_dir: PathBuf, request_timeout_ms: u64) -> ImageLoader {
        ImageLoader::new(&Settings {
            assets_dir,
            request_timeout_ms,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_assets_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]))
            .save(dir.path().join("LeftLogo.png"))
            .unwrap();

        let loader = loader(dir.path().to_path_buf(), 15_000);
        let sources = vec![
            ImageRef::Asset("LeftLogo.png".to_owned()),
            ImageRef::Asset("RightLogo.png".to_owned()),
            ImageRef::Asset("LeftLogo.png".to_owned()),
        ];
        let images = loader.load_all(sources.iter()).await;

        assert_eq!(images.len(), 1);
        assert_eq!(
            images[&ImageRef::Asset("LeftLogo.png".to_owned())].dimensions(),
            (3, 2)
        );
    }

    #[tokio::test]
    async fn test_asset_outside_dir_is_not_read() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        std::fs::create_dir(&assets).unwrap();
        RgbaImage::from_pixel(7, 5, image::Rgba([0, 0, 0, 255]))
            .save(dir.path().join("private.png"))
            .unwrap();

        let source = ImageRef::Asset("../private.png".to_owned());
        let images = loader(assets, 15_000).load_all(std::iter::once(&source)).await;
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_image_times_out() {
        let stall = warp::path!("slow.png").and_then(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, std::convert::Infallible>(Vec::<u8>::new())
        });
        let (addr, server) = warp::serve(stall).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let dir = tempfile::tempdir().unwrap();
        let source = ImageRef::Remote(format!("http://{}/slow.png", addr));
        let started = Instant::now();
        let images = loader(dir.path().to_path_buf(), 200)
            .load_all(std::iter::once(&source))
            .await;

        assert!(images.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
