// Logging initialization

use std::io::Write;

/// Initializes the env_logger backend at the configured level. The
/// `RUST_LOG` environment variable still wins when set.
pub fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder
        .parse_filters(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        });

    if let Ok(from_env) = std::env::var("RUST_LOG") {
        builder.parse_filters(&from_env);
    }

    // keep tests and repeated init calls quiet
    let _ = builder.try_init();
}
