use std::sync::Arc;

use checkin_console::{
    core::{gallery::GalleryNavigator, participant::Participant, settings::Settings},
    integrations::decoder::decode_frame,
    render::{
        assets::ImageLoader,
        export::RasterExporter,
        fonts::{FontRegistry, Fonts},
        layout::{layout, Template, MISSING_ID_PAYLOAD},
        raster::rasterize,
    },
};

fn roster() -> Vec<Participant> {
    ["Ana Reyes", "Ben Cruz", "Ana Lopez"]
        .iter()
        .enumerate()
        .map(|(i, name)| Participant {
            id: Some(format!("{}", i + 1)),
            name: Some(name.to_string()),
            division: Some(if i == 1 { "South" } else { "North" }.to_owned()),
            ..Default::default()
        })
        .collect()
}

#[test]
fn test_missing_id_card_still_scans() {
    let participant = Participant {
        name: Some("No Badge".to_owned()),
        ..Default::default()
    };
    let card = layout(&participant, Template::IdCard);
    assert_eq!(card.qr_payload(), Some(MISSING_ID_PAYLOAD));

    let (width, height) = Template::IdCard.size();
    let surface = rasterize(
        &card,
        width,
        height,
        3,
        &Fonts::default(),
        &Default::default(),
    )
    .unwrap();

    // Printed on white
    let gray = image::GrayImage::from_fn(surface.width(), surface.height(), |x, y| {
        let [r, g, b, a] = surface.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let luma = (r as f32 * 0.299 + g as f32 * 0.587 + b as f32 * 0.114) * alpha
            + 255.0 * (1.0 - alpha);
        image::Luma([luma.round() as u8])
    });
    assert_eq!(decode_frame(&gray), vec![MISSING_ID_PAYLOAD.to_owned()]);
}

#[tokio::test]
async fn test_export_filtered_gallery() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = RasterExporter::new(
        Arc::new(FontRegistry::empty()),
        ImageLoader::new(&Settings {
            assets_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap(),
        1,
    );

    let mut gallery = GalleryNavigator::new(roster());
    gallery.set_division(Some("North".to_owned()));
    gallery.set_search("ana");
    assert_eq!(gallery.len(), 2);

    let out = dir.path().join("cards");
    let written = exporter
        .export_all(gallery.filtered(), Template::IdCard, &out)
        .await
        .unwrap();

    let mut names: Vec<_> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Ana_Lopez.pdf", "Ana_Reyes.pdf"]);

    let bytes = std::fs::read(&written[0]).unwrap();
    let doc = lopdf::Document::load_mem(&bytes).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
}
