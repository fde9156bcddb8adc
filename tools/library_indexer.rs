mod config;

use std::env;
use std::path::PathBuf;

use config::{config_path_from_env, load_or_create_config, resolve_music_root};
use library::Library;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut json = false;
    let mut root_arg = None;
    for arg in env::args().skip(1) {
        if arg == "--json" {
            json = true;
        } else if root_arg.is_none() {
            root_arg = Some(arg);
        }
    }

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let music_root = match root_arg.or_else(|| env::var("MUSIC_ROOT").ok()) {
        Some(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => resolve_music_root(&config_path, &config.music_root)
            .ok_or("MUSIC_ROOT not set, no path argument and no music_root in config")?,
    };

    let library = Library::with_lofty(config.to_options());
    library.on_scanning_changed(|scanning| {
        if scanning {
            info!("Scanning music folder...");
        }
    });
    {
        let observer = library.clone();
        library.on_library_changed(move || {
            info!(
                "Library updated: {} tracks, {} albums (version {})",
                observer.song_count(),
                observer.album_count(),
                observer.version()
            );
        });
    }

    let scanner = library.clone();
    let stats = tokio::task::spawn_blocking(move || scanner.select_folder(music_root)).await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&*library.snapshot())?);
    } else if let Some(stats) = stats {
        println!(
            "Indexed: {} tracks, {} albums ({} unreadable, {} duplicates)",
            stats.tracks, stats.albums, stats.skipped, stats.duplicates
        );
        for item in library.display_items() {
            println!("  {} - {}", item.name(), item.subtitle());
        }
    }

    if !library.is_watching() {
        return Ok(());
    }

    shutdown_signal().await;
    let watcher = library.clone();
    tokio::task::spawn_blocking(move || watcher.stop_watching()).await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
