use std::io::Write;

/// Sets up `env_logger` with `RUST_LOG` (default `info`). Calling it more than
/// once is harmless, later calls are ignored.
pub fn initialize_env_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}
