use mailpulse_config::Config;

/// Get a config for local test
///
/// # Panics
///
/// * config cannot be built
#[must_use]
pub fn local_test() -> Config {
    let mut config = Config::default();
    config.server.domain = "testserver.com".to_string();
    config.server.addr = "127.0.0.1:0".parse().expect("valid address");
    config.server.logs.filepath = "./tmp/tests.log".into();
    config.server.smtp.error.delay = std::time::Duration::from_millis(1);
    config.finalize()
}
