use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;

use checkin_console::{
    core::{
        checkin::{ScanOptions, ScanSession},
        gallery::GalleryNavigator,
        session::{Session, TokenStore},
        settings::Settings,
        token::{self, Permission},
    },
    integrations::{
        api::{ConsoleApi, HttpApi},
        camera::SpoolCamera,
        feedback::{FeedbackSink, SilentFeedback, SpeakerFeedback},
    },
    render::{assets::ImageLoader, export::RasterExporter, fonts::FontRegistry, layout::Template},
    util, web, Directory,
};

#[derive(Parser, Debug)]
#[command(name = "checkin-console")]
#[command(version = "0.1")]
#[command(about = "Attendance kiosk and badge exporter for event check-in.", long_about = None)]
struct Args {
    /// Settings file
    #[arg(short, long, env = "CHECKIN_SETTINGS")]
    settings: Option<PathBuf>,

    /// Overrides the API base url from the settings file
    #[arg(long, env = "CHECKIN_API_URL")]
    api_url: Option<String>,

    /// Overrides the shared-secret header value
    #[arg(long, env = "CHECKIN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: RunType,
}

#[derive(Subcommand, Debug)]
enum RunType {
    /// Scan badges and serve the kiosk display
    Scan {
        /// Directory the camera drops frames into
        #[arg(short, long)]
        spool: PathBuf,

        #[arg(short, long)]
        port: Option<u16>,

        /// Disable tone and speech
        #[arg(long)]
        quiet: bool,
    },

    /// Serve exports and the gallery without a scanner
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    Export {
        #[command(subcommand)]
        target: ExportTarget,
    },

    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand, Debug)]
enum ExportTarget {
    Card {
        participant_id: String,

        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    Certificate {
        participant_id: String,

        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Every participant matching the filters, one file each
    All {
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, default_value = "")]
        search: String,

        #[arg(long)]
        division: Option<String>,

        #[arg(long)]
        district: Option<String>,

        #[arg(long)]
        school: Option<String>,

        /// Export certificates instead of ID cards
        #[arg(long)]
        certificates: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    Store { token: String },
    Show,
    Clear,
}

fn token_store(settings: &Settings) -> TokenStore {
    match &settings.token_file {
        Some(path) => TokenStore::new(path.clone()),
        None => TokenStore::disabled(),
    }
}

fn open_api(settings: &Settings, session: &Session) -> anyhow::Result<Arc<dyn ConsoleApi>> {
    let api = HttpApi::new(settings)?.with_token(session.token().map(str::to_owned));
    Ok(Arc::new(api))
}

fn exporter(settings: &Settings) -> anyhow::Result<RasterExporter> {
    Ok(RasterExporter::new(
        Arc::new(FontRegistry::new(settings.fonts.clone())),
        ImageLoader::new(settings)?,
        settings.export_scale,
    ))
}

async fn serve_until_shutdown(directory: Directory, port: u16) -> anyhow::Result<()> {
    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
    tasks.spawn(web::run_http_server(directory, port));

    tokio::select! {
        Some(res) = tasks.join_next() => {
            res.context("Web server task failed")??;
            log::error!("Web server stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received shutdown signal");
        }
    }

    tasks.shutdown().await;
    Ok(())
}

async fn run_scan(settings: Settings, spool: PathBuf, port: Option<u16>, quiet: bool) -> anyhow::Result<()> {
    let feedback: Arc<dyn FeedbackSink> = if quiet {
        Arc::new(SilentFeedback)
    } else {
        Arc::new(SpeakerFeedback::new(&settings))
    };

    // A bad token still serves the blocked display
    let opened = Session::open(&token_store(&settings));
    let session = opened.clone().unwrap_or_else(|_| Session::denied());
    let api = open_api(&settings, &session)?;

    let mut scan = match opened {
        Ok(_) => {
            ScanSession::start(
                &session,
                api.clone(),
                feedback,
                SpoolCamera::new(spool),
                ScanOptions {
                    cooldown: settings.scan_cooldown(),
                    frame_interval: settings.frame_interval(),
                    today: util::today(),
                },
            )
            .await
        }
        Err(e) => ScanSession::blocked(e, feedback),
    };

    let mut transitions = scan.display().transitions();
    tokio::spawn(async move {
        while let Ok(phase) = transitions.recv().await {
            log::info!("Scanner: {:?}", phase);
        }
    });

    let directory = Directory {
        api,
        exporter: exporter(&settings)?,
        session: Arc::new(session),
        scanner: Some(scan.scanner()),
    };
    let res = serve_until_shutdown(directory, port.unwrap_or(settings.web_port)).await;

    scan.shutdown();
    res
}

async fn run_export(settings: Settings, target: ExportTarget) -> anyhow::Result<()> {
    let session = Session::open(&token_store(&settings))?;
    let api = open_api(&settings, &session)?;
    let exporter = exporter(&settings)?;

    match target {
        ExportTarget::Card { participant_id, out } => {
            session.check()?;
            let participant = api.participant(&participant_id).await?;
            if let Some(artifact) = exporter.export(Some(&participant), Template::IdCard).await? {
                let path = artifact.save_in(&out).await?;
                log::info!("Saved {}", path.display());
            }
        }
        ExportTarget::Certificate { participant_id, out } => {
            session.require(Permission::GenerateCertificates)?;
            let participant = api.participant(&participant_id).await?;
            if let Some(artifact) = exporter.export(Some(&participant), Template::Certificate).await? {
                let path = artifact.save_in(&out).await?;
                log::info!("Saved {}", path.display());
            }
        }
        ExportTarget::All {
            out,
            search,
            division,
            district,
            school,
            certificates,
        } => {
            let template = if certificates {
                session.require(Permission::GenerateCertificates)?;
                Template::Certificate
            } else {
                session.require(Permission::BulkOperations)?;
                Template::IdCard
            };

            let mut gallery = GalleryNavigator::new(api.participants().await?);
            gallery.set_search(&search);
            gallery.set_division(division);
            gallery.set_district(district);
            gallery.set_school(school);

            let written = exporter.export_all(gallery.filtered(), template, &out).await?;
            log::info!("Exported {} of {} participants", written.len(), gallery.len());
        }
    }

    Ok(())
}

fn run_token(settings: &Settings, action: TokenAction) -> anyhow::Result<()> {
    let store = token_store(settings);
    if !store.is_enabled() {
        anyhow::bail!("No token_file configured in settings");
    }

    match action {
        TokenAction::Store { token: value } => {
            if !token::is_valid(Some(value.as_str())) {
                log::warn!("Stored token is malformed or already expired");
            }
            store.store(&value)?;
            println!("Token saved.");
        }
        TokenAction::Show => match store.load()?.as_deref().and_then(token::decode_claims) {
            Some(claims) => {
                println!("{}", serde_json::to_string_pretty(&claims)?);
                println!("valid: {}", token::is_valid(store.load()?.as_deref()));
            }
            None => println!("No usable token stored."),
        },
        TokenAction::Clear => {
            store.clear()?;
            println!("Token cleared.");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut settings = Settings::load(args.settings.as_ref())?;
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(api_key) = args.api_key {
        settings.api_header_value = api_key;
    }

    match args.command {
        RunType::Scan { spool, port, quiet } => run_scan(settings, spool, port, quiet).await,
        RunType::Serve { port } => {
            let session = Session::open(&token_store(&settings))?;
            let directory = Directory {
                api: open_api(&settings, &session)?,
                exporter: exporter(&settings)?,
                session: Arc::new(session),
                scanner: None,
            };
            serve_until_shutdown(directory, port.unwrap_or(settings.web_port)).await
        }
        RunType::Export { target } => run_export(settings, target).await,
        RunType::Token { action } => run_token(&settings, action),
    }
}
