//! Thin CLI front-end: owns process argv, environment variables, diagnostic
//! logging, and exit-status mapping — the only component aware of the
//! process boundary. Everything else lives in `voxmath_engine`'s pipeline
//! driver and `voxmath_voxio`'s I/O boundary; this binary just wires them
//! together and reports the driver's `Result` back to the OS.

use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use voxmath_engine::pipeline::{self, OutputDatatype};
use voxmath_engine::volume::WorkingType;
use voxmath_engine::Volume;
use voxmath_voxio::{FlatFileIo, VolumeIo};

fn init_logging() {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// `NIIMATH_THREADS` sizes the global rayon pool before any work starts;
/// unset leaves rayon's own default (available parallelism) in place.
fn configure_thread_pool() {
    let Ok(raw) = std::env::var("NIIMATH_THREADS") else { return };
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => {
            if rayon::ThreadPoolBuilder::new().num_threads(n).build_global().is_err() {
                tracing::warn!("global thread pool was already initialised; NIIMATH_THREADS ignored");
            }
        }
        _ => tracing::warn!(value = %raw, "NIIMATH_THREADS is not a positive integer, ignoring"),
    }
}

/// `FSLOUTPUTTYPE`/`AFNI_COMPRESSOR` are read here only to decide what to
/// warn about: the reference container writer never compresses, so a
/// request for a `_GZ` variant or PIGZ multithreading is a silent no-op
/// without this.
fn warn_on_unsupported_output_container() {
    if let Ok(kind) = std::env::var("FSLOUTPUTTYPE") {
        if kind.contains("GZ") {
            tracing::warn!(kind = %kind, "the reference container writer does not compress output; writing uncompressed");
        }
    }
    if std::env::var("AFNI_COMPRESSOR").as_deref() == Ok("PIGZ") {
        tracing::info!("AFNI_COMPRESSOR=PIGZ has no effect on the reference writer's single-threaded output path");
    }
}

/// Loads a second-volume operand (mask, `-kernel file`, permutation-test
/// null distribution). Always read at double precision: these buffers
/// never go through the working-type round-trip the primary volume does.
fn load_operand(io: &FlatFileIo, path: &str) -> voxmath_engine::Result<Volume> {
    io.read(path, WorkingType::Double).map(|r| r.volume).map_err(|e| voxmath_engine::Error::internal("voxio", e.to_string()))
}

/// Distinguishes "the input volume could not be read" (exit 2) from every
/// other failure (exit 1): bad arguments, an operation error, or a write
/// failure, per §6's exit-status mapping.
enum RunError {
    Read(anyhow::Error),
    Other(anyhow::Error),
}

impl RunError {
    fn exit_code(&self) -> u8 {
        match self {
            RunError::Read(_) => 2,
            RunError::Other(_) => 1,
        }
    }

    fn inner(&self) -> &anyhow::Error {
        match self {
            RunError::Read(e) | RunError::Other(e) => e,
        }
    }
}

fn run(args: Vec<String>) -> Result<(), RunError> {
    let io = FlatFileIo::new();
    let mut loader = |path: &str| load_operand(&io, path);

    let parsed = pipeline::parse(&args, &mut loader).context("parsing operation pipeline").map_err(RunError::Other)?;
    let read = io
        .read(&parsed.input_path, parsed.working_type)
        .with_context(|| format!("reading input volume `{}`", parsed.input_path))
        .map_err(RunError::Read)?;

    if parsed.is_passthrough() {
        io.write(&read.volume, &parsed.output_path, None, read.datatype, Some((read.scale, read.intercept)))
            .with_context(|| format!("writing output volume `{}`", parsed.output_path))
            .map_err(RunError::Other)?;
        return Ok(());
    }

    // `-p N` outranks `NIIMATH_THREADS` and the pool's default (§5/§6): run
    // this pipeline on its own scoped pool rather than touching the global
    // one, since the global pool may already be built and is one-shot.
    let run_pipeline = || pipeline::execute(read.volume, &parsed.ops);
    let output = match parsed.threads {
        Some(n) if n > 0 => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .context("building scoped thread pool for -p")
            .map_err(RunError::Other)?
            .install(run_pipeline),
        _ => run_pipeline(),
    }
    .context("running operation pipeline")
    .map_err(RunError::Other)?;

    let out_datatype = match parsed.output_dtype {
        Some(OutputDatatype::Explicit(dt)) => dt,
        Some(OutputDatatype::Input) | None => read.datatype,
    };
    let restore_original = matches!(parsed.output_dtype, Some(OutputDatatype::Input) | None).then_some((read.scale, read.intercept));

    io.write(&output.volume, &parsed.output_path, None, out_datatype, restore_original)
        .with_context(|| format!("writing output volume `{}`", parsed.output_path))
        .map_err(RunError::Other)?;
    for (postfix, vol) in &output.derived {
        io.write(vol, &parsed.output_path, Some(*postfix), out_datatype, None)
            .with_context(|| format!("writing derived volume `{postfix}`"))
            .map_err(RunError::Other)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    configure_thread_pool();
    warn_on_unsupported_output_container();

    let args: Vec<String> = std::env::args_os().skip(1).map(|a| a.to_string_lossy().into_owned()).collect();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err.inner(), "voxmath run failed");
            eprintln!("error: {:#}", err.inner());
            ExitCode::from(err.exit_code())
        }
    }
}
