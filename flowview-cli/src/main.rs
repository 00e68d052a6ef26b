use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use flowview_core::{
    DocumentEngine, DocumentSource, LoadRequest, NullSurface, SearchOptions, TextEngine, Viewer,
    ViewerConfig, ViewerEvent,
};
use flowview_pdfium::PdfiumEngine;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "flowview",
    version,
    about = "Headless document viewer with reload coalescing and incremental search"
)]
struct Args {
    /// Path, file:// or http(s):// URI, or asset name of the document
    source: String,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    /// Page to open the document on (0-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Search to run once the document has loaded
    #[arg(short = 'q', long = "query")]
    query: Option<String>,

    #[arg(long)]
    match_case: bool,

    #[arg(long)]
    whole_word: bool,

    #[arg(long)]
    max_results: Option<usize>,

    /// Stop at the first page that has a match
    #[arg(long)]
    first_page_only: bool,

    /// Reload the document whenever the file changes
    #[arg(long)]
    watch: bool,

    /// Config file (defaults to config.toml in the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Open the document as plain text with form-feed page breaks
    #[arg(long)]
    text: bool,

    /// Directory asset names are resolved against
    #[arg(long)]
    assets: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
enum Command {
    Search(String),
    Next,
    Previous,
    GotoResult(usize),
    Page(usize),
    Reload,
    Unlock(String),
    Clear,
    Close,
    Highlight(bool),
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "search" | "/" => Command::Search(rest.to_owned()),
        "next" | "n" => Command::Next,
        "prev" | "previous" | "N" => Command::Previous,
        "goto" => Command::GotoResult(parse_index(rest)?),
        "page" => Command::Page(parse_index(rest)?),
        "reload" => Command::Reload,
        "unlock" if !rest.is_empty() => Command::Unlock(rest.to_owned()),
        "unlock" => bail!("usage: unlock <password>"),
        "clear" => Command::Clear,
        "close" => Command::Close,
        "highlight" => match rest {
            "on" => Command::Highlight(true),
            "off" => Command::Highlight(false),
            _ => bail!("usage: highlight on|off"),
        },
        "quit" | "q" | "exit" => Command::Quit,
        other => bail!("unknown command {:?}", other),
    };
    Ok(Some(command))
}

fn parse_index(raw: &str) -> Result<usize> {
    raw.parse()
        .with_context(|| format!("expected a non-negative index, got {:?}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "flowview", "flowview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs.data_local_dir().join("logs"))?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load(&config_path)?;
    let options = search_options(&args, &config);

    let source = parse_source(&args.source)?;
    let engine: Arc<dyn DocumentEngine> = if args.text {
        Arc::new(TextEngine::new())
    } else {
        let mut engine = PdfiumEngine::new()?;
        if let Some(root) = &args.assets {
            engine = engine.with_asset_root(root);
        }
        Arc::new(engine)
    };

    let viewer = Viewer::new(engine, Arc::new(NullSurface), config)?;
    let mut events = viewer.subscribe();

    let mut request = LoadRequest::new(source.clone());
    request.password = args.password.clone();
    request.restore_page = args.page;
    info!(source = %source, id = %source.id(), "opening document");
    viewer.request_load(request);

    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
    let _watcher = if args.watch {
        Some(watch_source(&source, watch_tx)?)
    } else {
        None
    };

    let mut stdout = io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut pending_query = args.query.clone();
    let mut searches = JoinSet::new();

    loop {
        if !stdin_open && !args.watch {
            if !viewer.is_loading() && viewer.page_count() == 0 {
                pending_query = None;
            }
            if pending_query.is_none() && searches.is_empty() && !viewer.is_loading() {
                break;
            }
        }

        tokio::select! {
            Some(event) = events.recv() => {
                print_event(&mut stdout, &event)?;
                if matches!(event, ViewerEvent::DocumentLoaded { .. }) {
                    if let Some(query) = pending_query.take() {
                        let viewer = viewer.clone();
                        searches.spawn(async move {
                            viewer.search(&query, options).await;
                        });
                    }
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run_command(&viewer, command, options, &mut searches),
                    Ok(None) => {}
                    Err(err) => warn!("{err:#}"),
                }
            }
            Some(()) = watch_rx.recv(), if args.watch => {
                info!("document changed on disk; reloading");
                viewer.reload();
            }
            Some(joined) = searches.join_next(), if !searches.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "search task failed");
                }
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        print_event(&mut stdout, &event)?;
    }

    Ok(())
}

fn run_command(
    viewer: &Viewer,
    command: Command,
    options: SearchOptions,
    searches: &mut JoinSet<()>,
) {
    match command {
        Command::Search(query) => {
            let viewer = viewer.clone();
            searches.spawn(async move {
                viewer.search(&query, options).await;
            });
        }
        Command::Next => {
            viewer.next_search_result();
        }
        Command::Previous => {
            viewer.previous_search_result();
        }
        Command::GotoResult(index) => {
            if !viewer.go_to_search_result(index) {
                warn!(index, "no such search result");
            }
        }
        Command::Page(page) => {
            if !viewer.go_to_page(page) {
                warn!(page, "page out of range");
            }
        }
        Command::Reload => {
            if !viewer.reload() {
                warn!("nothing to reload");
            }
        }
        Command::Unlock(password) => {
            viewer.unlock(password);
        }
        Command::Clear => viewer.clear_search(),
        Command::Close => viewer.clear_source(),
        Command::Highlight(enable) => viewer.highlight_search_results(enable),
        Command::Quit => {}
    }
}

fn print_event(out: &mut impl Write, event: &ViewerEvent) -> Result<()> {
    let line = serde_json::to_string(event)?;
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

/// Existing paths win over URI and asset parsing.
fn parse_source(raw: &str) -> Result<DocumentSource> {
    if Path::new(raw).exists() {
        return Ok(DocumentSource::file(raw));
    }
    raw.parse()
        .with_context(|| format!("invalid document source {:?}", raw))
}

fn search_options(args: &Args, config: &ViewerConfig) -> SearchOptions {
    let mut options = config.search;
    options.match_case |= args.match_case;
    options.whole_word |= args.whole_word;
    if let Some(max_results) = args.max_results {
        options.max_results = max_results.max(1);
    }
    if args.first_page_only {
        options.search_all_pages = false;
    }
    options
}

fn watch_source(source: &DocumentSource, tx: UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let DocumentSource::File(path) = source else {
        bail!("--watch needs a local file, got {}", source);
    };
    let target = path
        .canonicalize()
        .with_context(|| format!("failed to resolve {:?}", path))?;
    let root = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = target.file_name().map(|name| name.to_os_string());

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
            if event
                .paths
                .iter()
                .any(|path| path.file_name() == name.as_deref())
            {
                let _ = tx.send(());
            }
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "file watcher error"),
    })?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// File logs roll daily under `log_dir`; the console copy goes to stderr so
/// stdout carries only events.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "flowview.log"));

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(file_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_viewer_commands() {
        assert_eq!(
            parse_command("search  grand total ").unwrap(),
            Some(Command::Search("grand total".into()))
        );
        assert_eq!(parse_command("n").unwrap(), Some(Command::Next));
        assert_eq!(parse_command("goto 3").unwrap(), Some(Command::GotoResult(3)));
        assert_eq!(parse_command("page 0").unwrap(), Some(Command::Page(0)));
        assert_eq!(
            parse_command("highlight off").unwrap(),
            Some(Command::Highlight(false))
        );
        assert_eq!(
            parse_command("unlock hunter2").unwrap(),
            Some(Command::Unlock("hunter2".into()))
        );
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("goto -1").is_err());
        assert!(parse_command("highlight maybe").is_err());
        assert!(parse_command("unlock").is_err());
        assert!(parse_command("rotate").is_err());
    }

    #[test]
    fn flags_override_configured_search_options() {
        let args = Args::parse_from([
            "flowview",
            "doc.pdf",
            "--whole-word",
            "--max-results",
            "0",
            "--first-page-only",
        ]);
        let options = search_options(&args, &ViewerConfig::default());
        assert!(options.whole_word);
        assert!(!options.match_case);
        assert_eq!(options.max_results, 1);
        assert!(!options.search_all_pages);
    }

    #[test]
    fn existing_paths_are_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report");
        fs::write(&path, "x").unwrap();
        let source = parse_source(path.to_str().unwrap()).unwrap();
        assert_eq!(source, DocumentSource::file(&path));

        assert_eq!(
            parse_source("manual.pdf").unwrap(),
            DocumentSource::asset("manual.pdf")
        );
    }

    #[test]
    fn logging_creates_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("data").join("logs");
        let guard = init_logging(&log_dir).unwrap();
        tracing::info!("logging ready");
        drop(guard);
        assert!(log_dir.is_dir());
    }
}
