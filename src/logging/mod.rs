/**
 * Initializes the logger
 *
 * https://docs.rs/slog/latest/slog/
 *
 */
use crate::config::Settings;
use slog::{Drain, LevelFilter, Logger};
use slog_async::{Async, AsyncGuard};
use slog_term::FullFormat;

/**
 * Initializes the logger.
 *
 * Records go to stderr so the report printed on stdout can be piped on its own. The level
 * comes from the configuration settings.
 *
 * @param cfg The configuration settings containing the log level.
 * @return The root `Logger` and the guard that flushes pending records when dropped.
 */
pub(crate) fn init_logger(cfg: &Settings) -> (Logger, AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = LevelFilter::new(drain, cfg.log_level).fuse();
    let (drain, guard) = Async::new(drain).build_with_guard();

    (Logger::root(drain.fuse(), slog::o!()), guard)
}
