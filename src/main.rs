// Numus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use numus::{
    config::Config,
    dispatcher::Dispatcher,
    dna::{self, DocumentError},
    engine::{Engine, LogTransport, Transport},
    library::{Category, Library, SearchQuery, SubType},
    player::{self, PlayError, PlayOptions, Player},
    render::{self, Renderer},
    scheduler::{Handle, Resume, ScheduleError},
};
use std::{
    fs,
    path::PathBuf,
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

#[derive(Parser)]
#[command(name = "numus", version, about = "Plays music DNA documents on a live synthesis engine")]
struct Cli {
    /// Configuration file (defaults to ./numus.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a track or album document
    Play(PlayArgs),

    /// Render ornament triggers to WAV files
    Render(RenderArgs),

    /// Inspect a segment library
    Library {
        /// Segment directory (defaults to the configured library path)
        #[arg(long)]
        path: Option<PathBuf>,

        #[command(subcommand)]
        command: LibraryCommand,
    },
}

#[derive(Args)]
struct PlayArgs {
    /// Track or album document
    #[arg(long)]
    dna: PathBuf,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Playback speed multiplier
    #[arg(long)]
    time_scale: Option<f64>,

    /// Chapter to start from
    #[arg(long)]
    start_chapter: Option<String>,

    /// Section to start from, within the start chapter
    #[arg(long)]
    start_section: Option<String>,

    /// Log messages instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Do not send debug lines to the engine
    #[arg(long)]
    no_debug: bool,

    /// Print the section table before playing
    #[arg(long)]
    show_sections: bool,

    /// Seconds between pad sweep updates
    #[arg(long)]
    pad_sweep_interval: Option<f64>,

    /// Segment directory for section segment cues
    #[arg(long)]
    library: Option<PathBuf>,
}

#[derive(Args)]
struct RenderArgs {
    /// JSON file listing ornament triggers
    #[arg(long)]
    triggers: PathBuf,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    soundfont: Option<PathBuf>,

    /// Synthesizer binary
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Seconds before a render is abandoned
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum LibraryCommand {
    /// Print library statistics as JSON
    Stats,

    /// Search segments
    Search {
        #[arg(long)]
        category: Option<Category>,

        #[arg(long)]
        sub_type: Option<SubType>,

        /// Suitable section type, e.g. intro or drop
        #[arg(long)]
        section: Option<String>,

        /// Tag to match (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Require every tag instead of any
        #[arg(long)]
        all: bool,

        #[arg(long)]
        min_energy: Option<f64>,

        #[arg(long)]
        max_energy: Option<f64>,
    },

    /// Report segments with missing or inconsistent metadata
    Validate,

    /// Fill in missing metadata
    Enrich {
        /// Write the enriched segments to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Play(args) => play(&config, args),
        Commands::Render(args) => render(&config, args),
        Commands::Library { path, command } => {
            let path = path.unwrap_or_else(|| config.library.path.clone());
            library(path, command)
        }
    }
}

fn play(config: &Config, args: PlayArgs) -> Result<()> {
    let tracks = match dna::load_tracks(&args.dna) {
        Ok(tracks) => tracks,
        Err(DocumentError::NotFound(path)) => {
            log::error!("DNA file not found: {}", path.display());
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("Failed to load {}", args.dna.display())),
    };

    let options = PlayOptions {
        resume: Resume::new(args.start_chapter, args.start_section),
        time_scale: args.time_scale.unwrap_or(config.playback.time_scale),
        debug: config.dispatch.debug && !args.no_debug,
        pad_sweep_interval: args.pad_sweep_interval.unwrap_or(config.playback.pad_sweep_interval),
    };

    if args.show_sections {
        for doc in &tracks {
            println!("{}", doc.track_id);
            println!("{}", player::section_table(&options.resume.filter(&doc.sections)));
        }
        if args.dry_run {
            return Ok(());
        }
    }

    let transport: Box<dyn Transport> = if args.dry_run {
        Box::new(LogTransport)
    } else {
        let host = args.host.unwrap_or_else(|| config.engine.host.clone());
        let port = args.port.unwrap_or(config.engine.port);
        let engine = Engine::connect((host.as_str(), port))
            .with_context(|| format!("Failed to connect to engine at {}:{}", host, port))?;
        Box::new(engine)
    };
    let dispatcher = Arc::new(Dispatcher::new(transport, config.rules()));

    let library_path = args
        .library
        .or_else(|| Some(config.library.path.clone()).filter(|p| p.is_dir()));
    let library = match library_path {
        Some(path) => match Library::load_dir(&path) {
            Ok(library) => Some(Arc::new(library)),
            Err(err) => {
                log::warn!("segment library unavailable: {}", err);
                None
            }
        },
        None => None,
    };

    // Ctrl-C cancels the playing track, which still sends the final stop. A second one exits.
    let playing: Arc<Mutex<Option<Handle>>> = Arc::default();
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let playing = playing.clone();
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            if interrupted.swap(true, Ordering::SeqCst) {
                process::exit(130);
            }
            log::warn!("interrupted, stopping playback");
            if let Some(handle) = playing.lock().ok().and_then(|mut slot| slot.take()) {
                handle.cancel();
            }
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    for doc in &tracks {
        let mut player = Player::new(dispatcher.clone()).options(options.clone());
        if let Some(library) = &library {
            player = player.library(library.clone());
        }
        if let Ok(mut slot) = playing.lock() {
            *slot = Some(player.handle());
        }
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        match player.play(doc) {
            Ok(summary) if summary.cancelled => {
                log::warn!("{}: stopped after {} sections", doc.track_id, summary.sections);
                break;
            }
            Ok(summary) => log::info!(
                "{}: {} sections, {} segments, {} transitions, max lateness {:?}",
                doc.track_id,
                summary.sections,
                summary.segments_started,
                summary.transitions,
                summary.max_lateness
            ),
            Err(PlayError::Schedule(ScheduleError::Empty)) => {
                log::error!("{}: no sections to play", doc.track_id);
            }
            Err(err) => return Err(err).with_context(|| format!("Failed to play {}", doc.track_id)),
        }
    }
    Ok(())
}

fn render(config: &Config, args: RenderArgs) -> Result<()> {
    let mut options = config.render_options();
    if let Some(output_dir) = args.output_dir {
        options.output_dir = output_dir;
    }
    if let Some(soundfont) = args.soundfont {
        options.soundfont = soundfont;
    }
    if let Some(binary) = args.binary {
        options.binary = binary;
    }
    if let Some(timeout) = args.timeout {
        options.timeout = Duration::from_secs(timeout);
    }

    let triggers = render::load_triggers(&args.triggers)
        .with_context(|| format!("Failed to read triggers from {}", args.triggers.display()))?;
    let tally = Renderer::new(options).render_batch(&triggers);
    for path in &tally.rendered {
        println!("{}", path.display());
    }
    for (trigger, err) in &tally.failed {
        eprintln!("failed: {}: {}", trigger, err);
    }
    println!("{}/{} rendered", tally.rendered.len(), tally.total());
    Ok(())
}

fn library(path: PathBuf, command: LibraryCommand) -> Result<()> {
    let mut library =
        Library::load_dir(&path).with_context(|| format!("Failed to load segments from {}", path.display()))?;

    match command {
        LibraryCommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&library.stats())?);
        }
        LibraryCommand::Search {
            category,
            sub_type,
            section,
            tags,
            all,
            min_energy,
            max_energy,
        } => {
            let mut query = SearchQuery::default().energy(min_energy, max_energy);
            if let Some(category) = category {
                query = query.category(category);
            }
            if let Some(sub_type) = sub_type {
                query = query.sub_type(sub_type);
            }
            if let Some(section) = section {
                query = query.section_type(section);
            }
            if !tags.is_empty() {
                query = query.tags(&tags, all);
            }
            for segment in library.search(&query) {
                println!(
                    "{}\t{}\t{:.2}\t{}",
                    segment.id,
                    segment.sub_type,
                    segment.energy(),
                    segment.name
                );
            }
        }
        LibraryCommand::Validate => {
            let issues = library.validate();
            for issue in &issues {
                println!("{}", issue);
            }
            println!("{} issues in {} segments", issues.len(), library.len());
        }
        LibraryCommand::Enrich { output } => {
            let changed = library.enrich();
            println!("enriched {} of {} segments", changed, library.len());
            if let Some(output) = output {
                let segments: Vec<_> = library.iter().collect();
                let json = serde_json::to_string_pretty(&serde_json::json!({ "segments": segments }))?;
                fs::write(&output, json).with_context(|| format!("Failed to write {}", output.display()))?;
            }
        }
    }
    Ok(())
}
