use std::io::Write;

use chrono::Local;
use log::LevelFilter;

use crate::core::bluetooth::event_log::EVENT_LOG_TARGET;

/// Initializes the process logger.
///
/// `RUST_LOG` overrides `level`. Event log entries are printed without the
/// module path so they read like the log the display shows.
pub fn setup_logging(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            if record.target() == EVENT_LOG_TARGET {
                writeln!(buf, "{} [{}] {}", timestamp, record.level(), record.args())
            } else {
                writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    timestamp,
                    record.level(),
                    record.target(),
                    record.args()
                )
            }
        })
        .try_init();

    match result {
        Ok(()) => log::info!("Logging initialized"),
        Err(e) => eprintln!("Logger already initialized: {}", e),
    }
}
