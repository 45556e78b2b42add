use std::convert::Infallible;

use serde::{Deserialize, Serialize};
use warp::{http::StatusCode, Reply};

use crate::{
    core::{
        checkin::CheckInRequest,
        gallery::GalleryNavigator,
        participant::Participant,
        token::Permission,
    },
    error::{ApiError, Error},
    render::layout::Template,
    send_message, Directory,
};

/// A Json struct for a manually entered badge id
#[derive(Serialize, Deserialize, Debug)]
pub struct ManualScan {
    pub participant_id: String,
}

/// Whether a scan started a check-in cycle
#[derive(Serialize, Deserialize, Debug)]
pub struct ScanAccepted {
    pub accepted: bool,
}

/// Query for the export routes
#[derive(Serialize, Deserialize, Debug)]
pub struct ExportQuery {
    pub participant_id: Option<String>,
}

/// Query for the gallery route
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct GalleryQuery {
    pub search: String,
    pub division: Option<String>,
    pub district: Option<String>,
    pub school: Option<String>,
    pub page: usize,
}

/// One page of the filtered gallery with the facet choices that apply to it
#[derive(Serialize, Debug)]
pub struct GalleryPage {
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
    pub participants: Vec<Participant>,
    pub divisions: Vec<String>,
    pub districts: Vec<String>,
    pub schools: Vec<String>,
}

fn error_reply(code: StatusCode, message: String) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&message), code).into_response()
}

pub fn to_http_output<T: Serialize>(
    result: anyhow::Result<T>,
) -> Result<warp::reply::Response, Infallible> {
    match result {
        Ok(data) => Ok(warp::reply::with_status(warp::reply::json(&data), StatusCode::OK).into_response()),
        Err(e) => {
            log::warn!("{}", e);
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::Session(_) => StatusCode::FORBIDDEN,
        Error::Api(ApiError::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::Api(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn to_http_error(error: Error) -> warp::reply::Response {
    let code = status_of(&error);
    log::warn!("{}", error);
    error_reply(code, error.to_string())
}

fn required_permission(template: Template) -> Option<Permission> {
    match template {
        Template::IdCard => None,
        Template::Certificate => Some(Permission::GenerateCertificates),
    }
}

async fn render_document(
    template: Template,
    participant_id: Option<String>,
    directory: &Directory,
) -> Result<Option<(String, Vec<u8>)>, Error> {
    match required_permission(template) {
        Some(permission) => directory.session.require(permission)?,
        None => directory.session.check()?,
    }

    let participant = match participant_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Some(directory.api.participant(id).await?),
        _ => None,
    };

    let artifact = directory
        .exporter
        .export(participant.as_ref(), template)
        .await?;
    Ok(artifact.map(|a| (a.file_name, a.bytes)))
}

/// `attachment` disposition with a quoted ASCII name and the exact UTF-8
/// name in `filename*`.
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    let encoded: String = url::form_urlencoded::byte_serialize(file_name.as_bytes()).collect();

    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", ascii, encoded)
}

/// Serves a card or certificate as a PDF attachment. With no participant
/// selected there is nothing to download and the reply is empty.
pub async fn export_document(
    template: Template,
    query: ExportQuery,
    directory: Directory,
) -> Result<warp::reply::Response, Infallible> {
    match render_document(template, query.participant_id, &directory).await {
        Ok(Some((file_name, bytes))) => {
            let reply = warp::reply::with_header(bytes, "Content-Type", "application/pdf");
            let reply = warp::reply::with_header(
                reply,
                "Content-Disposition",
                content_disposition(&file_name),
            );
            Ok(reply.into_response())
        }
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Ok(to_http_error(e)),
    }
}

pub async fn get_gallery(
    query: GalleryQuery,
    directory: Directory,
) -> Result<warp::reply::Response, Infallible> {
    if let Err(e) = directory.session.check() {
        return Ok(to_http_error(e.into()));
    }

    let participants = match directory.api.participants().await {
        Ok(participants) => participants,
        Err(e) => return Ok(to_http_error(e.into())),
    };

    let mut gallery = GalleryNavigator::new(participants);
    gallery.set_search(&query.search);
    gallery.set_division(query.division);
    gallery.set_district(query.district);
    gallery.set_school(query.school);
    let pages = gallery.pager().total_pages(gallery.len());
    for _ in 0..query.page.min(pages) {
        gallery.next_page();
    }

    let page = GalleryPage {
        total: gallery.len(),
        page: gallery.pager().page(),
        total_pages: gallery.pager().total_pages(gallery.len()),
        participants: gallery.print_page().into_iter().cloned().collect(),
        divisions: gallery.division_options(),
        districts: gallery.district_options(),
        schools: gallery.school_options(),
    };
    Ok(warp::reply::json(&page).into_response())
}

/// Manual check-in through the same debounced pipeline as the camera.
pub async fn submit_scan(
    scan: ManualScan,
    directory: Directory,
) -> Result<warp::reply::Response, Infallible> {
    if let Err(e) = directory.session.check() {
        return Ok(to_http_error(e.into()));
    }

    match directory.scanner.and_then(|s| s.checkin_actor) {
        Some(actor) => to_http_output(
            send_message!(actor, CheckInRequest, Scan, scan.participant_id)
                .map(|accepted| ScanAccepted { accepted }),
        ),
        None => scanner_unavailable(),
    }
}

pub fn scanner_unavailable() -> Result<warp::reply::Response, Infallible> {
    Ok(error_reply(
        StatusCode::SERVICE_UNAVAILABLE,
        "Scanner is not running".to_owned(),
    ))
}
