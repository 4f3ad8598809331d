//! VisionScript command line studio.
//!
//! Usage:
//!   visionscript [--data-dir DIR] [-v] <COMMAND>
//!
//! Projects are kept in `{data-dir}/visionscript_projects_v2.automerge`,
//! where the data dir defaults to the per-user local data directory.

mod legacy;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use visionscript::generation::{
    GeminiClient, GeminiConfig, PanelOutcome, PipelineEvent, Studio, Submission,
};
use visionscript::sequence::{
    gif_filename, panel_images, render_gif, shot_list, shot_list_filename, write_artifact,
    ExportProfile, Slideshow,
};
use visionscript::storyboard::{
    AspectRatio, FileStorage, PanelStatus, Project, ProjectStore, StylePreset,
};

#[derive(Parser, Debug)]
#[command(
    name = "visionscript",
    about = "Turn screenplay excerpts into continuity-consistent storyboards",
    version
)]
struct Args {
    /// Directory holding the project collection [default: local data dir]
    #[arg(long, env = "VISIONSCRIPT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty project
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// List projects, newest first
    List,
    /// Show a project's scene and panels
    Show { id: String },
    /// Rename a project
    Rename { id: String, title: String },
    /// Delete a project
    Delete { id: String },
    /// Segment a script and generate all four panels
    Generate {
        id: String,
        /// Screenplay excerpt file
        #[arg(long)]
        script: PathBuf,
        /// Subject that must stay consistent across panels
        #[arg(long)]
        hero: String,
        #[arg(long, default_value_t = StylePreset::Cinematic)]
        style: StylePreset,
        #[arg(long, default_value_t = AspectRatio::Widescreen)]
        ratio: AspectRatio,
        /// Gemini API key (falls back to API_KEY)
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Export the complete panels as a GIF
    ExportGif {
        id: String,
        #[arg(long, default_value_t = ExportProfile::Smooth)]
        profile: ExportProfile,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Export the shot list as text
    ExportShots {
        id: String,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Export each complete panel's image
    ExportPanels {
        id: String,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Play the slideshow in the terminal
    Preview {
        id: String,
        /// Milliseconds per panel (500-5000, step 500)
        #[arg(long, default_value_t = 2000)]
        interval: u64,
        /// How many times to go through the panels
        #[arg(long, default_value_t = 1)]
        cycles: usize,
    },
    /// Import the browser app's localStorage JSON
    Import { input: PathBuf },
}

/// Per-user data directory, or `./.visionscript` if the platform has none.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("visionscript"))
        .unwrap_or_else(|| PathBuf::from(".visionscript"))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let storage = FileStorage::new(&data_dir);
    let mut store = ProjectStore::open(storage).context("Failed to open project store")?;

    match args.command {
        Command::New { title } => {
            let project = store.create_project()?;
            if let Some(title) = title {
                store.set_project_title(&project.id, &title)?;
            }
            println!("{}", project.id);
        }
        Command::List => {
            let projects = store.projects()?;
            if projects.is_empty() {
                println!("No projects yet. Create one with `visionscript new`.");
            }
            for p in projects {
                let done = p.complete_panels().len();
                println!("{}  {:<32} {}/{} panels", p.id, p.title, done, p.panels.len());
            }
        }
        Command::Show { id } => {
            let project = find_project(&mut store, &id)?;
            print_project(&project);
        }
        Command::Rename { id, title } => {
            let project = find_project(&mut store, &id)?;
            store.set_project_title(&project.id, &title)?;
            println!("Renamed {} to \"{}\"", project.id, title);
        }
        Command::Delete { id } => {
            let project = find_project(&mut store, &id)?;
            store.delete_project(&project.id)?;
            println!("Deleted {} ({})", project.id, project.title);
        }
        Command::Generate {
            id,
            script,
            hero,
            style,
            ratio,
            api_key,
        } => {
            let project = find_project(&mut store, &id)?;
            let script = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read script {}", script.display()))?;
            let config = match api_key {
                Some(key) => GeminiConfig::new(key),
                None => GeminiConfig::from_env()?,
            };
            let submission = Submission::new(script, hero)
                .with_style(style)
                .with_aspect_ratio(ratio);
            return generate(store, project.id, config, submission).await;
        }
        Command::ExportGif { id, profile, out } => {
            let project = find_project(&mut store, &id)?;
            let export = render_gif(&project.panels, profile)?;
            let path = write_artifact(&out, &gif_filename(&project.title, profile), &export.bytes)?;
            println!(
                "Wrote {} ({} frames, {}x{}, {})",
                path.display(),
                export.frame_count,
                export.width,
                export.height,
                profile
            );
        }
        Command::ExportShots { id, out } => {
            let project = find_project(&mut store, &id)?;
            let text = shot_list(&project.panels);
            let path = write_artifact(&out, &shot_list_filename(&project.title), text.as_bytes())?;
            println!("Wrote {}", path.display());
        }
        Command::ExportPanels { id, out } => {
            let project = find_project(&mut store, &id)?;
            let artifacts = panel_images(&project)?;
            if artifacts.is_empty() {
                println!("No generated panels to export.");
            }
            for artifact in artifacts {
                let path = write_artifact(&out, &artifact.filename, &artifact.bytes)?;
                println!("Wrote {}", path.display());
            }
        }
        Command::Preview {
            id,
            interval,
            cycles,
        } => {
            let project = find_project(&mut store, &id)?;
            preview(&project, interval, cycles).await;
        }
        Command::Import { input } => {
            let imported = import(&mut store, &input)?;
            println!("Imported {} projects from {}", imported, input.display());
        }
    }

    store.flush().context("Failed to save projects")?;
    Ok(())
}

/// Resolves a full id or a unique id prefix.
fn find_project(store: &mut ProjectStore, id: &str) -> Result<Project> {
    if let Some(project) = store.project(id)? {
        return Ok(project);
    }
    let mut matches: Vec<Project> = store
        .projects()?
        .into_iter()
        .filter(|p| p.id.starts_with(id))
        .collect();
    match matches.len() {
        0 => bail!("No project matches '{}'", id),
        1 => Ok(matches.remove(0)),
        n => bail!("'{}' is ambiguous ({} projects match)", id, n),
    }
}

fn print_project(project: &Project) {
    println!("{} - {}", project.id, project.title);
    println!("  Style: {}  Ratio: {}", project.style, project.aspect_ratio);
    if !project.hero_asset.is_empty() {
        println!("  Hero:  {}", project.hero_asset);
    }
    if let Some(meta) = &project.metadata {
        println!("  Scene: {} / {} ({})", meta.location, meta.time, meta.global_style);
    }
    for panel in &project.panels {
        let status = match panel.status {
            PanelStatus::Complete => "done".to_string(),
            PanelStatus::Failed => format!("failed: {}", panel.error.as_deref().unwrap_or("unknown")),
            other => other.to_string(),
        };
        println!(
            "  [{}] {:<12} {} ({})",
            panel.panel_id, panel.shot_type, panel.image_prompt, status
        );
    }
}

async fn generate(
    store: ProjectStore,
    project_id: String,
    config: GeminiConfig,
    submission: Submission,
) -> Result<()> {
    let client = Arc::new(GeminiClient::new(config)?);
    let shared = store.into_shared();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let studio = Studio::new(client.clone(), client, shared.clone()).with_events(tx);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("Segmenting script...");

    // The studio owns the event sender; once the task ends the channel closes.
    let task = tokio::spawn(async move { studio.submit(&project_id, submission).await });

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::PanelStarted {
                panel_id,
                index,
                total,
            } => {
                pb.set_length(total as u64);
                pb.set_position(index as u64);
                pb.set_message(format!("Rendering panel {}", panel_id));
            }
            PipelineEvent::PanelCompleted { panel_id } => {
                pb.inc(1);
                pb.println(format!("OK: panel {}", panel_id));
            }
            PipelineEvent::PanelFailed { panel_id, error } => {
                pb.inc(1);
                pb.println(format!("FAIL: panel {} - {}", panel_id, error));
            }
            PipelineEvent::PanelDiscarded { panel_id } => {
                pb.println(format!("SKIP: panel {} - project changed", panel_id));
            }
            PipelineEvent::Finished(_) => break,
        }
    }

    let report = match task.await.context("Generation task panicked")? {
        Ok(report) => report,
        Err(e) => {
            pb.finish_with_message("Failed");
            return Err(e.into());
        }
    };
    pb.finish_with_message("Done");

    println!("\n========================================");
    println!("Generation Summary:");
    println!("========================================");
    println!("  Completed: {}", report.completed());
    println!("  Failed:    {}", report.failed());
    println!("  Discarded: {}", report.discarded());

    let failed: Vec<_> = report
        .results
        .iter()
        .filter_map(|r| match &r.outcome {
            PanelOutcome::Failed(e) => Some((r.panel_id, e)),
            _ => None,
        })
        .collect();
    if !failed.is_empty() {
        println!("\nFailed panels:");
        for (panel_id, e) in failed {
            println!("  {} - {}", panel_id, e);
        }
    }
    info!(project_id = %report.project_id, "generation finished");
    shared
        .lock()
        .await
        .flush()
        .context("Failed to save generated panels")?;
    Ok(())
}

async fn preview(project: &Project, interval: u64, cycles: usize) {
    let mut slideshow = Slideshow::from_project(project);
    if slideshow.is_empty() {
        println!("No generated panels to preview.");
        return;
    }
    slideshow.set_interval(interval);
    let tick = slideshow.interval();
    let steps = slideshow.len() * cycles.max(1);

    for step in 0..steps {
        if let Some(panel) = slideshow.current() {
            println!(
                "[{}/{}] PANEL {} - {}: {}",
                slideshow.index() + 1,
                slideshow.len(),
                panel.panel_id,
                panel.shot_type,
                panel.image_prompt
            );
        }
        if step + 1 < steps {
            tokio::time::sleep(tick).await;
            slideshow.tick(tick);
        }
    }
}

fn import(store: &mut ProjectStore, input: &Path) -> Result<usize> {
    let json = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let projects = legacy::transform(legacy::parse(&json)?)?;
    let count = projects.len();
    // Inserting prepends, so walk backwards to keep the stored order.
    for project in projects.into_iter().rev() {
        store.insert_project(project)?;
    }
    Ok(count)
}
