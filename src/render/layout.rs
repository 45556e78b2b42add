use std::path::{Component, Path};

use serde::Serialize;

use crate::{
    core::participant::{Participant, ParticipantType},
    util::format_date,
};

/// Encoded in place of the participant id when a record has none
pub const MISSING_ID_PAYLOAD: &str = "No ID";

pub const PLACEHOLDER_AVATAR: &str = "avatar-placeholder.png";
pub const QR_LOGO: &str = "qrlogo.png";

const ACCENT: [u8; 4] = [0x30, 0x2e, 0xa6, 0xff];
const BLACK: [u8; 4] = [0x00, 0x00, 0x00, 0xff];
const NAVY: [u8; 4] = [0x00, 0x0f, 0x30, 0xff];
const WHITE: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

/// Card templates with their canonical size in CSS pixels (96 per inch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Template {
    IdCard,
    Certificate,
}

impl Template {
    pub fn size(&self) -> (f32, f32) {
        match self {
            Template::IdCard => (350.0, 520.0),
            Template::Certificate => (625.0, 505.0),
        }
    }

    /// Download name used when the participant has no usable name
    pub fn fallback_name(&self) -> &'static str {
        match self {
            Template::IdCard => "participant",
            Template::Certificate => "certificate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// A `width`×`height` rect centered inside `self`
    pub fn centered(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.x + (self.width - width) / 2.0,
            self.y + (self.height - height) / 2.0,
            width,
            height,
        )
    }
}

/// Where an image comes from: fetched over HTTP, or a file under the assets
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ImageRef {
    Remote(String),
    Asset(String),
}

/// True when `name` only walks down into the assets directory.
pub fn is_asset_path(name: &str) -> bool {
    let path = Path::new(name);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

impl ImageRef {
    fn from_field(field: Option<&str>, fallback: &str) -> Self {
        match field.map(str::trim).filter(|f| !f.is_empty()) {
            Some(f) if f.starts_with("http://") || f.starts_with("https://") => {
                ImageRef::Remote(f.to_owned())
            }
            Some(f) => {
                let name = f.trim_start_matches('/');
                if is_asset_path(name) {
                    ImageRef::Asset(name.to_owned())
                } else {
                    log::warn!("Ignoring image path outside the assets directory: {}", f);
                    ImageRef::Asset(fallback.to_owned())
                }
            }
            None => ImageRef::Asset(fallback.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Fit {
    /// Fill the rect, cropping the overflow
    Cover,
    /// Fit inside the rect, keeping the aspect ratio
    Contain,
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FontStyle {
    Regular,
    Bold,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextAlign {
    Left,
    Center,
}

/// One absolutely positioned visual element. Later elements paint over
/// earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Element {
    Fill {
        rect: Rect,
        color: [u8; 4],
    },
    Image {
        rect: Rect,
        source: ImageRef,
        fit: Fit,
        opacity: f32,
    },
    Border {
        rect: Rect,
        color: [u8; 4],
        width: f32,
    },
    Qr {
        rect: Rect,
        payload: String,
    },
    /// Text wrapped to `rect.width`; `rect.y` is the top of the first line
    Text {
        rect: Rect,
        text: String,
        size: f32,
        style: FontStyle,
        color: [u8; 4],
        align: TextAlign,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardLayout {
    pub template: Template,
    pub width: f32,
    pub height: f32,
    pub elements: Vec<Element>,
}

impl CardLayout {
    pub fn qr_payload(&self) -> Option<&str> {
        self.elements.iter().find_map(|e| match e {
            Element::Qr { payload, .. } => Some(payload.as_str()),
            _ => None,
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            Element::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Every image the layout references, in paint order
    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.elements.iter().filter_map(|e| match e {
            Element::Image { source, .. } => Some(source),
            _ => None,
        })
    }
}

/// Header and footer art of an ID card, chosen per attendee category.
struct ShapeAssets {
    header: &'static str,
    footer: &'static str,
}

fn shape_assets(kind: ParticipantType) -> ShapeAssets {
    match kind {
        ParticipantType::Participant => ShapeAssets {
            header: "Shape 1 (4).png",
            footer: "Shape 2 (3).png",
        },
        ParticipantType::Facilitator
        | ParticipantType::Speaker
        | ParticipantType::Organizer
        | ParticipantType::Guest
        | ParticipantType::Other => ShapeAssets {
            header: "Shape 1 (5).png",
            footer: "Shape 2 (4).png",
        },
    }
}

pub fn layout(participant: &Participant, template: Template) -> CardLayout {
    match template {
        Template::IdCard => id_card(participant, participant.participant_type),
        Template::Certificate => certificate(participant),
    }
}

/// ID card: fixed template filled with the participant's data.
pub fn id_card(participant: &Participant, variant: ParticipantType) -> CardLayout {
    let (w, h) = Template::IdCard.size();
    let shapes = shape_assets(variant);
    let mut elements = Vec::new();

    elements.push(Element::Image {
        rect: Rect::new(0.0, 40.0, w, h),
        source: ImageRef::from_field(participant.left_logo_url.as_deref(), "cam-norte.png"),
        fit: Fit::Cover,
        opacity: 0.3,
    });
    elements.push(Element::Image {
        rect: Rect::new(0.0, -40.0, w, 196.0 * (w / 322.0)),
        source: ImageRef::Asset(shapes.header.to_owned()),
        fit: Fit::Stretch,
        opacity: 1.0,
    });
    elements.push(Element::Image {
        rect: Rect::new(0.0, h - 140.0, w, 196.0),
        source: ImageRef::Asset(shapes.footer.to_owned()),
        fit: Fit::Stretch,
        opacity: 1.0,
    });

    let photo = Rect::new((w - 260.0) / 2.0, 200.0, 120.0, 120.0);
    elements.push(Element::Fill {
        rect: photo,
        color: WHITE,
    });
    elements.push(Element::Image {
        rect: photo,
        source: ImageRef::from_field(participant.image_url.as_deref(), PLACEHOLDER_AVATAR),
        fit: Fit::Cover,
        opacity: 1.0,
    });
    elements.push(Element::Border {
        rect: photo,
        color: ACCENT,
        width: 1.0,
    });

    let qr_box = Rect::new(w / 2.0, 200.0, 120.0, 120.0);
    let payload = participant
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(MISSING_ID_PAYLOAD);
    elements.push(Element::Fill {
        rect: qr_box,
        color: WHITE,
    });
    elements.push(Element::Border {
        rect: qr_box,
        color: ACCENT,
        width: 1.0,
    });
    elements.push(Element::Qr {
        rect: qr_box.centered(100.0, 100.0),
        payload: payload.to_owned(),
    });
    elements.push(Element::Image {
        rect: qr_box.centered(28.0, 28.0),
        source: ImageRef::Asset(QR_LOGO.to_owned()),
        fit: Fit::Contain,
        opacity: 1.0,
    });

    elements.push(Element::Image {
        rect: Rect::new(18.0, 18.0, 80.0, 80.0),
        source: ImageRef::from_field(participant.left_logo_url.as_deref(), "LeftLogo.png"),
        fit: Fit::Contain,
        opacity: 1.0,
    });
    elements.push(Element::Image {
        rect: Rect::new(w - 18.0 - 80.0, 18.0, 80.0, 80.0),
        source: ImageRef::from_field(participant.right_logo_url.as_deref(), "RightLogo.png"),
        fit: Fit::Contain,
        opacity: 1.0,
    });

    if let Some(name) = participant.display_name() {
        elements.push(Element::Text {
            rect: Rect::new(0.0, 350.0, w, 34.0),
            text: name.to_uppercase(),
            size: 28.0,
            style: FontStyle::Bold,
            color: NAVY,
            align: TextAlign::Center,
        });
    }

    let header = Rect::new(60.0, 50.0, w - 120.0, 70.0);
    if let Some(title) = participant.title.as_deref().filter(|t| !t.is_empty()) {
        elements.push(Element::Text {
            rect: Rect::new(header.x, header.y + 15.0, header.width, 22.0),
            text: title.to_owned(),
            size: 18.0,
            style: FontStyle::Bold,
            color: BLACK,
            align: TextAlign::Center,
        });
    }
    if let Some(subtitle) = participant.subtitle.as_deref().filter(|t| !t.is_empty()) {
        elements.push(Element::Text {
            rect: Rect::new(header.x, header.y + 50.0, header.width, 18.0),
            text: subtitle.to_owned(),
            size: 14.0,
            style: FontStyle::Italic,
            color: BLACK,
            align: TextAlign::Center,
        });
    }

    CardLayout {
        template: Template::IdCard,
        width: w,
        height: h,
        elements,
    }
}

fn or_placeholder(value: Option<&str>, placeholder: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(placeholder)
        .to_owned()
}

/// Certificate of appearance, with literal placeholders for missing fields.
pub fn certificate(participant: &Participant) -> CardLayout {
    let (w, h) = Template::Certificate.size();
    let centered_line = |y: f32, text: &str, size: f32, style: FontStyle| Element::Text {
        rect: Rect::new(0.0, y, w, size * 1.3),
        text: text.to_owned(),
        size,
        style,
        color: BLACK,
        align: TextAlign::Center,
    };

    let name = or_placeholder(participant.display_name(), "Name");
    let school = or_placeholder(participant.school.as_deref(), "School");
    let venue = or_placeholder(participant.venue.as_deref(), "Venue");
    let start = participant
        .start_date
        .map(|d| format_date(&d))
        .unwrap_or_else(|| "Start Date".to_owned());
    let end = participant
        .end_date
        .map(|d| format_date(&d))
        .unwrap_or_else(|| "End Date".to_owned());

    let body = format!(
        "This is to certify that Mr./Ms. {} of {} attended the Regional Assembly of \
         Educational Leaders (RAEL) held at {} on {} to {}.",
        name, school, venue, start, end
    );

    let elements = vec![
        Element::Fill {
            rect: Rect::new(0.0, 0.0, w, h),
            color: WHITE,
        },
        Element::Image {
            rect: Rect::new(0.0, 0.0, w, h),
            source: ImageRef::Asset("image.png".to_owned()),
            fit: Fit::Stretch,
            opacity: 1.0,
        },
        Element::Image {
            rect: Rect::new(0.0, 0.0, w, 18.0),
            source: ImageRef::Asset("rectangle2.png".to_owned()),
            fit: Fit::Stretch,
            opacity: 1.0,
        },
        Element::Image {
            rect: Rect::new((w - 72.0) / 2.0, 28.0, 72.0, 72.0),
            source: ImageRef::Asset("Vector.png".to_owned()),
            fit: Fit::Contain,
            opacity: 1.0,
        },
        centered_line(106.0, "Republic of the Philippines", 12.0, FontStyle::Regular),
        centered_line(122.0, "Department of Education", 14.0, FontStyle::Bold),
        centered_line(141.0, "Region V - Bicol", 11.0, FontStyle::Regular),
        centered_line(
            156.0,
            "SCHOOLS DIVISION OFFICE OF CAMARINES NORTE",
            11.0,
            FontStyle::Bold,
        ),
        centered_line(190.0, "Certificate of Appearance", 30.0, FontStyle::Bold),
        Element::Text {
            rect: Rect::new(70.0, 255.0, w - 140.0, 110.0),
            text: body,
            size: 15.0,
            style: FontStyle::Regular,
            color: BLACK,
            align: TextAlign::Center,
        },
        centered_line(410.0, "CRESTITO M. MORCILLA, CESO V", 14.0, FontStyle::Bold),
        centered_line(430.0, "Schools Division Superintendent", 12.0, FontStyle::Regular),
    ];

    CardLayout {
        template: Template::Certificate,
        width: w,
        height: h,
        elements,
    }
}
