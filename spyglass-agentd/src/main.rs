// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process;

use clap::{App, Arg};
use log::{error, info};

use spyglass_agent::proto::DEFAULT_AGENT_PORT;
use spyglass_agent::server::AgentServer;

fn main() {
    pretty_env_logger::init();

    let default_port = DEFAULT_AGENT_PORT.to_string();

    let matches = App::new("Spyglass Agent")
        .version("0.1.0")
        .about("Guest-side agent daemon for Project Spyglass")
        .arg(
            Arg::with_name("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Address to bind the session socket on")
                .default_value("0.0.0.0"),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .short('p')
                .value_name("PORT")
                .help("UDP port to serve on")
                .default_value(&default_port),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .takes_value(true)
                .value_name("PATH")
                .help("Override the agent log file path"),
        )
        .get_matches();

    let bind = matches.value_of("bind").unwrap();

    let port: u16 = match matches.value_of("port").unwrap().parse() {
        Ok(port) => port,
        Err(_) => {
            error!("invalid port number");
            process::exit(1);
        }
    };

    let log_path = matches.value_of("log").map(PathBuf::from);

    let mut server = match AgentServer::bind((bind, port), log_path) {
        Ok(server) => server,
        Err(err) => {
            error!("agent initialization failed: {}", err);
            process::exit(2);
        }
    };

    info!("agent log at {}", server.log_path().display());

    if let Err(err) = server.run() {
        error!("agent session ended: {}", err);
        process::exit(3);
    }
}
