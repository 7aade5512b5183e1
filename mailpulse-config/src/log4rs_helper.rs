/*
 * MailPulse SMTP relay
 * Copyright (C) 2024 MailPulse
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use anyhow::Context;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::Config;

/// Build the log4rs runtime configuration from the relay configuration.
///
/// With `no_daemon` the log stream is duplicated to the console.
///
/// # Errors
///
/// * the log file cannot be created
/// * the assembled configuration is rejected by log4rs
pub fn get_log4rs_config(config: &Config, no_daemon: bool) -> anyhow::Result<log4rs::Config> {
    let logs = &config.server.logs;

    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(&logs.format)))
        .build(&logs.filepath)
        .with_context(|| format!("cannot create log file '{}'", logs.filepath.display()))?;

    let mut builder =
        log4rs::Config::builder().appender(Appender::builder().build("file", Box::new(file)));
    let mut root = Root::builder().appender("file");

    if no_daemon {
        builder = builder.appender(
            Appender::builder().build(
                "stdout",
                Box::new(
                    ConsoleAppender::builder()
                        .encoder(Box::new(PatternEncoder::new(&logs.format)))
                        .build(),
                ),
            ),
        );
        root = root.appender("stdout");
    }

    let default_level = logs
        .level
        .get("default")
        .copied()
        .unwrap_or(log::LevelFilter::Warn);

    for (target, level) in logs.level.iter().filter(|(target, _)| *target != "default") {
        builder = builder.logger(Logger::builder().build(target, *level));
    }

    builder
        .build(root.build(default_level))
        .map_err(anyhow::Error::new)
}
