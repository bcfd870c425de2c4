//! CLI entry point: `clap`-derived dispatch over the five subcommands
//! (`detect`, `index`, `serve`, `decode`, `check`), each a thin wrapper
//! around `nimoch_media`/`nimoch_core`. Exit codes follow `main.c`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ffmpeg_the_third::media::Type as MediaType;

use nimoch_core::check::check_stream;
use nimoch_media::demux::{self, OpenOptions, ResolveError};
use nimoch_media::serve::ServeContext;
use nimoch_media::{decode_cmd, detect_cmd, index_cmd, seekidx};

#[derive(Parser)]
#[command(name = "nimoch", about = "Random-access frame server for transport-stream video")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump a JSON inventory of every stream in the container.
    Detect {
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        #[arg(short = 'l', long = "analyze-duration")]
        analyze_duration: Option<i64>,
        file: PathBuf,
    },
    /// Emit the IDR-aligned PTS/byte-offset index for one video stream.
    Index {
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        #[arg(short = 's', long)]
        stream: Option<usize>,
        #[arg(short = 'l', long = "analyze-duration")]
        analyze_duration: Option<i64>,
        file: PathBuf,
    },
    /// Run the interactive frame server over stdin/stdout.
    Serve {
        #[arg(short = 's', long)]
        stream: Option<usize>,
        #[arg(short = 'l', long = "analyze-duration")]
        analyze_duration: Option<i64>,
        #[arg(short = 'b', long = "seek-by-byte")]
        seek_by_byte: bool,
        file: PathBuf,
    },
    /// Export video or audio over one or more `start end` PTS ranges.
    Decode {
        #[arg(short = 'v', long)]
        video: bool,
        #[arg(short = 'a', long)]
        audio: bool,
        #[arg(short = 's', long)]
        stream: Option<usize>,
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        #[arg(short = 'g', long = "segment-info")]
        segment_info: Option<PathBuf>,
        #[arg(short = 'l', long = "analyze-duration")]
        analyze_duration: Option<i64>,
        #[arg(short = 'b', long = "seek-by-byte")]
        seek_by_byte: bool,
        file: PathBuf,
        points: Vec<i64>,
    },
    /// Scan per-PID continuity/scrambling counters over a raw transport stream.
    Check {
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        file: Option<PathBuf>,
    },
}

/// Exit codes from `main.c`, preserved verbatim (`SPEC_FULL.md` §6).
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("could not open container: {0}")]
    OpenContainer(anyhow::Error),
    #[error("{0}")]
    StreamInfoOrOutput(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Processing(anyhow::Error),
    #[error("could not open segment-info file: {0}")]
    SegmentInfoOpen(anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) => 1,
            CliError::OpenContainer(_) => 10,
            CliError::StreamInfoOrOutput(_) => 11,
            CliError::Resolve(ResolveError::WrongMediaType(_)) => 12,
            CliError::Resolve(ResolveError::OutOfBound(_)) => 13,
            CliError::Resolve(ResolveError::NotFound) => 14,
            CliError::Processing(_) => 15,
            CliError::SegmentInfoOpen(_) => 20,
        }
    }
}

fn main() -> ExitCode {
    ffmpeg_the_third::init().expect("FFmpeg init failed");

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[nimoch] error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Detect { output, analyze_duration, file } => run_detect(output, analyze_duration, file),
        Command::Index { output, stream, analyze_duration, file } => {
            run_index(output, stream, analyze_duration, file)
        }
        Command::Serve { stream, analyze_duration, seek_by_byte, file } => {
            run_serve(stream, analyze_duration, seek_by_byte, file)
        }
        Command::Decode {
            video,
            audio,
            stream,
            output,
            segment_info,
            analyze_duration,
            seek_by_byte,
            file,
            points,
        } => run_decode(video, audio, stream, output, segment_info, analyze_duration, seek_by_byte, file, points),
        Command::Check { output, file } => run_check(output, file),
    }
}

fn open_options(analyze_duration_secs: Option<i64>) -> OpenOptions {
    let mut opts = OpenOptions::default();
    if let Some(secs) = analyze_duration_secs {
        opts.analyze_duration = secs * 1_000_000;
    }
    opts
}

fn open_output(path: &Option<PathBuf>) -> Result<Box<dyn Write>, CliError> {
    match path {
        Some(p) => File::create(p)
            .map(|f| Box::new(BufWriter::new(f)) as Box<dyn Write>)
            .map_err(|e| CliError::StreamInfoOrOutput(format!("open output {}: {e}", p.display()))),
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

fn write_json<T: serde::Serialize>(out: &mut dyn Write, value: &T) -> Result<(), CliError> {
    serde_json::to_writer(&mut *out, value)
        .and_then(|_| {
            writeln!(out).ok();
            Ok(())
        })
        .map_err(|e| CliError::StreamInfoOrOutput(format!("write json: {e}")))
}

fn run_detect(output: Option<PathBuf>, analyze_duration: Option<i64>, file: PathBuf) -> Result<(), CliError> {
    let opts = open_options(analyze_duration);
    let ictx = demux::open_with_opts(&file, &opts).map_err(CliError::OpenContainer)?;
    let result = detect_cmd::run(&ictx);
    let mut out = open_output(&output)?;
    write_json(&mut *out, &result)
}

fn run_index(
    output: Option<PathBuf>,
    stream: Option<usize>,
    analyze_duration: Option<i64>,
    file: PathBuf,
) -> Result<(), CliError> {
    let opts = open_options(analyze_duration);
    let mut ictx = demux::open_with_opts(&file, &opts).map_err(CliError::OpenContainer)?;
    let resolved = demux::resolve_stream(&ictx, stream, MediaType::Video)?;
    let result = index_cmd::run(&mut ictx, resolved).map_err(CliError::Processing)?;
    let mut out = open_output(&output)?;
    write_json(&mut *out, &result)
}

fn run_serve(
    stream: Option<usize>,
    analyze_duration: Option<i64>,
    seek_by_byte: bool,
    file: PathBuf,
) -> Result<(), CliError> {
    let opts = open_options(analyze_duration);
    // Resolved once up front purely so a bad `-s` surfaces its own exit
    // code (12/13/14); `ServeContext::open` reopens the container itself,
    // the same multiple-open pattern its own construction already uses.
    let probe = demux::open_with_opts(&file, &opts).map_err(CliError::OpenContainer)?;
    demux::resolve_stream(&probe, stream, MediaType::Video)?;
    drop(probe);

    let mut ctx = ServeContext::open(&file, &opts, stream, seek_by_byte).map_err(CliError::Processing)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();
    ctx.serve(&mut input, &mut output).map_err(CliError::Processing)
}

#[allow(clippy::too_many_arguments)]
fn run_decode(
    video: bool,
    audio: bool,
    stream: Option<usize>,
    output: Option<PathBuf>,
    segment_info: Option<PathBuf>,
    analyze_duration: Option<i64>,
    seek_by_byte: bool,
    file: PathBuf,
    points: Vec<i64>,
) -> Result<(), CliError> {
    let selected = [video, audio, stream.is_some()].iter().filter(|b| **b).count();
    if selected != 1 {
        return Err(CliError::Usage("exactly one of -v, -a, or -s STREAM is required".to_string()));
    }
    if points.is_empty() || points.len() % 2 != 0 {
        return Err(CliError::Usage("pts arguments must be given in (start, end) pairs".to_string()));
    }
    let cuts: Vec<(i64, i64)> = points.chunks_exact(2).map(|c| (c[0], c[1])).collect();

    let opts = open_options(analyze_duration);
    let mut ictx = demux::open_with_opts(&file, &opts).map_err(CliError::OpenContainer)?;

    let (resolved, is_video) = if video {
        (demux::resolve_stream(&ictx, None, MediaType::Video)?, true)
    } else if audio {
        (demux::resolve_stream(&ictx, None, MediaType::Audio)?, false)
    } else {
        let idx = stream.expect("exactly one of video/audio/stream validated above");
        let medium = ictx
            .stream(idx)
            .ok_or(ResolveError::OutOfBound(idx))?
            .parameters()
            .medium();
        match medium {
            MediaType::Video => (idx, true),
            MediaType::Audio => (idx, false),
            _ => return Err(ResolveError::WrongMediaType(idx).into()),
        }
    };

    let descriptor = demux::describe_stream(&ictx, resolved).map_err(CliError::Processing)?;
    let seek_index = if seek_by_byte {
        Some(seekidx::build_index(&mut ictx, resolved).map_err(CliError::Processing)?)
    } else {
        None
    };

    let mut out = open_output(&output)?;
    if is_video {
        decode_cmd::decode_video(&mut ictx, &descriptor, seek_index.as_ref(), &cuts, &mut *out)
            .map_err(CliError::Processing)
    } else {
        let segments = decode_cmd::decode_audio(&mut ictx, &descriptor, seek_index.as_ref(), &cuts, &mut *out)
            .map_err(CliError::Processing)?;
        write_segment_info(&segment_info, &segments)
    }
}

fn write_segment_info(path: &Option<PathBuf>, segments: &[nimoch_core::schema::SegmentInfo]) -> Result<(), CliError> {
    match path {
        Some(p) => {
            let file = File::create(p).map_err(|e| CliError::SegmentInfoOpen(anyhow::anyhow!(e)))?;
            let mut out = BufWriter::new(file);
            serde_json::to_writer(&mut out, segments).map_err(|e| CliError::SegmentInfoOpen(anyhow::anyhow!(e)))?;
            writeln!(out).ok();
            Ok(())
        }
        None => {
            serde_json::to_writer(io::stderr(), segments).ok();
            eprintln!();
            Ok(())
        }
    }
}

fn run_check(output: Option<PathBuf>, file: Option<PathBuf>) -> Result<(), CliError> {
    let result = match &file {
        Some(p) => {
            let mut f = File::open(p).map_err(|e| CliError::StreamInfoOrOutput(format!("open {}: {e}", p.display())))?;
            check_stream(&mut f)
        }
        None => check_stream(&mut io::stdin().lock()),
    }
    .map_err(|e| CliError::Processing(anyhow::anyhow!(e)))?;

    let mut out = open_output(&output)?;
    write_json(&mut *out, &result)
}
