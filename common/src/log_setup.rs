use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

/// Starts file logging under `log_dir` with size-based rotation.
///
/// Records at `Info` and above are mirrored to stderr so stdout stays free for
/// reports. The returned handle must be kept alive for the duration of the
/// program.
pub fn setup_logging(base_level: &str, log_dir: &str) -> anyhow::Result<LoggerHandle> {
    let handle = Logger::try_with_env_or_str(base_level)?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename("bareland"),
        )
        .duplicate_to_stderr(Duplicate::Info)
        .rotate(
            Criterion::Size(1024 * 1024), //1MB
            Naming::Timestamps,
            Cleanup::KeepLogFiles(5),
        )
        .start()?;

    Ok(handle)
}
