use std::convert::Infallible;

use tokio_stream::{wrappers::WatchStream, StreamExt};
use warp::{reject::Rejection, Filter, Reply};

use crate::{
    core::checkin::{CheckInRequest, DisplayState},
    render::layout::Template,
    send_message, Directory, Scanner,
};

use super::handlers::{
    export_document, get_gallery, scanner_unavailable, submit_scan, to_http_output, ExportQuery,
    GalleryQuery,
};

pub fn with_directory(
    directory: Directory,
) -> impl Filter<Extract = (Directory,), Error = Infallible> + Clone {
    warp::any().map(move || directory.clone())
}

pub fn with_template(
    template: Template,
) -> impl Filter<Extract = (Template,), Error = Infallible> + Clone {
    warp::any().map(move || template)
}

fn scanner_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let get_state = warp::path!("scanner" / "state")
        .and(warp::get())
        .and(with_directory(directory.clone()))
        .and_then(async |directory: Directory| match directory.scanner {
            Some(Scanner {
                checkin_actor: Some(actor),
                ..
            }) => to_http_output(send_message!(actor, CheckInRequest, GetDisplay)),
            Some(scanner) => to_http_output(Ok(scanner.display.snapshot())),
            None => scanner_unavailable(),
        });

    let submit_scan = warp::path!("scanner" / "scan")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_directory(directory.clone()))
        .and_then(submit_scan);

    let state_stream = warp::path!("scanner" / "stream")
        .and(warp::get())
        .and(with_directory(directory))
        .and_then(async |directory: Directory| {
            let Some(scanner) = directory.scanner else {
                return scanner_unavailable();
            };

            let updates = WatchStream::new(scanner.display.subscribe())
                .map(|state: DisplayState| warp::sse::Event::default().json_data(&state));
            Ok(warp::sse::reply(warp::sse::keep_alive().stream(updates)).into_response())
        });

    get_state.or(submit_scan).or(state_stream)
}

fn export_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let card = warp::path!("export" / "card")
        .and(warp::get())
        .and(with_template(Template::IdCard))
        .and(warp::query::<ExportQuery>())
        .and(with_directory(directory.clone()))
        .and_then(export_document);

    let certificate = warp::path!("export" / "certificate")
        .and(warp::get())
        .and(with_template(Template::Certificate))
        .and(warp::query::<ExportQuery>())
        .and(with_directory(directory.clone()))
        .and_then(export_document);

    let gallery = warp::path!("gallery")
        .and(warp::get())
        .and(warp::query::<GalleryQuery>())
        .and(with_directory(directory))
        .and_then(get_gallery);

    card.or(certificate).or(gallery)
}

pub fn api_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    scanner_filters(directory.clone()).or(export_filters(directory))
}
