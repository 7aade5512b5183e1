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
mod args;

use anyhow::Context;
use args::{Args, Commands};
use mailpulse_config::{get_log4rs_config, Config};
use mailpulse_server::start_runtime;

fn socket_bind_anyhow<A: std::net::ToSocketAddrs + std::fmt::Debug>(
    addr: A,
) -> anyhow::Result<std::net::TcpListener> {
    let socket = std::net::TcpListener::bind(&addr)
        .with_context(|| format!("Failed to bind socket on addr: '{addr:?}'"))?;

    socket
        .set_nonblocking(true)
        .with_context(|| format!("Failed to set non-blocking socket on addr: '{addr:?}'"))?;

    Ok(socket)
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("ERROR: {err}");
        log::error!("ERROR: {err}");
        err.chain().skip(1).for_each(|cause| {
            eprintln!("because: {cause}");
            log::error!("because: {cause}");
        });
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    let mut config = args.config.as_ref().map_or_else(
        || Ok(Config::default()),
        |path| {
            std::fs::read_to_string(path)
                .context(format!("Cannot read file '{path}'"))
                .and_then(|content| {
                    Config::from_toml(&content).context("File contains format error")
                })
                .context("Cannot parse the configuration")
        },
    )?;
    config.apply_env()?;
    let config = config.finalize();

    if let Some(Commands::ConfigShow) = args.command {
        let stringified = serde_json::to_string_pretty(&config)?;
        println!("Loaded configuration: {stringified}");
        return Ok(());
    }

    mailpulse_config::re::log4rs::init_config(get_log4rs_config(&config, args.no_daemon)?)
        .context("Logs configuration contain error")?;

    let socket = socket_bind_anyhow(config.server.addr)?;

    start_runtime(std::sync::Arc::new(config), socket)
}
