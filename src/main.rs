use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use serde_json::json;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tailfollow::config::{self, ConfigError, RawConfig, TailConfig};
use tailfollow::encoding::Encoding;
use tailfollow::event::{ChunkData, TailEvent};
use tailfollow::signal;
use tailfollow::splitter::RecordEvent;
use tailfollow::Tailer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TAILFOLLOW_LOG";
const DEFAULT_DELIMITER: &str = "\\n";

#[derive(Parser, Debug)]
#[command(name = "tailfollow")]
#[command(version)]
#[command(about = "Follow a growing file, surviving log rotation", long_about = None)]
struct Args {
    /// File to follow
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Bytes requested per read
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Print what is in the file now and exit
    #[arg(long = "no-follow")]
    no_follow: bool,

    /// Reopen the path when the file is rotated instead of following the old file
    #[arg(short = 'F', long)]
    survive_rotation: bool,

    /// Also check for growth and renames every MS milliseconds
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: Option<u64>,

    /// Do not register change notifications (rely on --poll-interval)
    #[arg(long = "no-watch")]
    no_watch: bool,

    /// Decode output as utf8, ascii, latin1, utf16le or hex
    #[arg(long, value_name = "NAME")]
    encoding: Option<Encoding>,

    /// Split the stream into delimiter-terminated records
    #[arg(long)]
    records: bool,

    /// Record delimiter; accepts \n \r \t \0 and \\ escapes [default: \n]
    #[arg(short = 'd', long, value_name = "DELIM")]
    delimiter: Option<String>,

    /// Print one JSON object per chunk, record or event
    #[arg(long)]
    json: bool,

    /// Use this config file instead of discovering one
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::from(1),
        Ok(false) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ConfigError>() {
                Some(config_err) => eprint!("{}", config_err.format_cargo_style()),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Run the tail session. Returns whether any error event was seen.
fn run(args: Args) -> Result<bool> {
    let raw = load_config(&args)?;
    let delimiter = args
        .delimiter
        .clone()
        .or_else(|| raw.delimiter.clone())
        .unwrap_or_else(|| DEFAULT_DELIMITER.to_string());
    let config = resolve_config(&args, &raw)?;

    let tailer = Tailer::start(&args.file, config)
        .with_context(|| format!("Failed to start tailing {}", args.file.display()))?;

    let unfollow = tailer.unfollow_handle();
    signal::setup_shutdown_handlers(move || unfollow.unfollow())
        .context("Failed to install signal handlers")?;

    let mut out = Output::new(args.json);
    if args.records {
        let delimiter = unescape(&delimiter)?;
        let records = tailer.records(&delimiter)?;
        for event in records {
            if let Err(e) = out.record_event(event) {
                return broken_pipe(e, &out);
            }
        }
    } else {
        for event in tailer.iter() {
            if let Err(e) = out.tail_event(event) {
                tailer.unfollow();
                return broken_pipe(e, &out);
            }
        }
    }
    Ok(out.saw_error)
}

fn broken_pipe(err: io::Error, out: &Output) -> Result<bool> {
    if err.kind() == io::ErrorKind::BrokenPipe {
        return Ok(out.saw_error);
    }
    Err(err).context("Failed to write output")
}

fn load_config(args: &Args) -> Result<RawConfig> {
    let raw = match &args.config {
        Some(path) => config::load_file(&config::expand_path(path))?,
        None => {
            let discovery = config::discover();
            if let Some(path) = &discovery.project_config {
                info!(path = %path.display(), "using project config");
            }
            config::load(&discovery)?
        }
    };
    Ok(raw)
}

/// Layer command line flags over the file config.
fn resolve_config(args: &Args, raw: &RawConfig) -> Result<TailConfig> {
    let mut config = raw.to_tail_config();
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if args.no_follow {
        config.follow = false;
    }
    if args.survive_rotation {
        config.survive_rotation = true;
    }
    if let Some(ms) = args.poll_interval {
        config.poll_interval = Some(Duration::from_millis(ms));
    }
    if args.no_watch {
        config.register_watches = false;
        if config.poll_interval.is_none() {
            warn!("--no-watch without --poll-interval will not notice changes after the first read");
        }
    }
    if args.encoding.is_some() {
        config.encoding = args.encoding;
    }
    if args.records || args.json {
        config.tag_offsets = true;
    }
    if args.records && config.encoding.is_some() {
        bail!("--records works on raw bytes and cannot be combined with an encoding");
    }
    config.validate()?;
    Ok(config)
}

/// Turn `\n`, `\r`, `\t`, `\0` and `\\` into the bytes they name.
fn unescape(delimiter: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(delimiter.len());
    let mut chars = delimiter.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some(other) => bail!("unsupported escape '\\{}' in delimiter", other),
            None => bail!("delimiter ends with a lone backslash"),
        }
    }
    if out.is_empty() {
        bail!("delimiter must not be empty");
    }
    Ok(out)
}

struct Output {
    json: bool,
    stdout: io::Stdout,
    saw_error: bool,
}

impl Output {
    fn new(json: bool) -> Self {
        Self {
            json,
            stdout: io::stdout(),
            saw_error: false,
        }
    }

    fn line(&mut self, value: serde_json::Value) -> io::Result<()> {
        let mut out = self.stdout.lock();
        writeln!(out, "{}", value)?;
        out.flush()
    }

    fn raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut out = self.stdout.lock();
        out.write_all(bytes)?;
        out.flush()
    }

    fn error(&mut self, message: String) -> io::Result<()> {
        self.saw_error = true;
        if self.json {
            self.line(json!({ "type": "error", "message": message }))
        } else {
            eprintln!("tailfollow: {}", message);
            Ok(())
        }
    }

    fn notice(&mut self, value: serde_json::Value, message: String) -> io::Result<()> {
        if self.json {
            self.line(value)
        } else {
            info!("{}", message);
            Ok(())
        }
    }

    fn tail_event(&mut self, event: TailEvent) -> io::Result<()> {
        match event {
            TailEvent::Data(chunk) => {
                if !self.json {
                    return self.raw(chunk.as_bytes());
                }
                let value = match &chunk.data {
                    ChunkData::Text(text) => {
                        json!({ "type": "data", "offset": chunk.offset, "text": text })
                    }
                    ChunkData::Bytes(bytes) => json!({
                        "type": "data",
                        "offset": chunk.offset,
                        "text": String::from_utf8_lossy(bytes),
                    }),
                };
                self.line(value)
            }
            TailEvent::Opened { path, id } => self.notice(
                json!({ "type": "opened", "path": path.display().to_string(), "id": id.to_string() }),
                format!("opened {} ({})", path.display(), id),
            ),
            TailEvent::Rename { from, to } => self.notice(
                json!({
                    "type": "rename",
                    "from": from.display().to_string(),
                    "to": to.display().to_string(),
                }),
                format!("{} renamed to {}", from.display(), to.display()),
            ),
            TailEvent::Deleted { path } => self.notice(
                json!({ "type": "deleted", "path": path.display().to_string() }),
                format!("{} was deleted", path.display()),
            ),
            TailEvent::End => {
                if self.json {
                    self.line(json!({ "type": "end" }))
                } else {
                    Ok(())
                }
            }
            TailEvent::Error(error) => self.error(error.to_string()),
        }
    }

    fn record_event(&mut self, event: RecordEvent) -> io::Result<()> {
        match event {
            RecordEvent::Record(record) => {
                if self.json {
                    self.line(json!({
                        "type": "record",
                        "offset": record.offset,
                        "data": String::from_utf8_lossy(record.body()),
                    }))
                } else {
                    self.raw(&record.data)
                }
            }
            RecordEvent::Opened { path, id } => self.tail_event(TailEvent::Opened { path, id }),
            RecordEvent::Rename { from, to } => self.tail_event(TailEvent::Rename { from, to }),
            RecordEvent::Deleted { path } => self.tail_event(TailEvent::Deleted { path }),
            RecordEvent::Error(error) => self.tail_event(TailEvent::Error(error)),
            RecordEvent::End => self.tail_event(TailEvent::End),
        }
    }
}
