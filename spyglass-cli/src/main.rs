// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::Path;
use std::process;

use clap::{App, AppSettings, Arg};
use log::warn;

use spyglass_agent::client::AgentClient;
use spyglass_core::errors::{Error, Result};

fn main() {
    pretty_env_logger::init();

    let matches = App::new("Spyglass")
        .version("0.1.0")
        .about("Host-side console for the Spyglass guest agent")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("agent")
                .long("agent")
                .value_name("ADDR")
                .help("Agent address as host:port")
                .default_value("127.0.0.1:8888"),
        )
        .subcommand(App::new("init").about("Initialize the agent session and verify reachability"))
        .subcommand(
            App::new("impo")
                .about("Import a host file into the guest")
                .arg(Arg::with_name("srcpath").required(true).index(1))
                .arg(Arg::with_name("dstpath").required(true).index(2)),
        )
        .subcommand(
            App::new("expo")
                .about("Export a guest file to the host")
                .arg(Arg::with_name("srcpath").required(true).index(1))
                .arg(Arg::with_name("dstpath").required(true).index(2)),
        )
        .subcommand(
            App::new("exec")
                .about("Run a command line in the guest with streamed stdio")
                .arg(Arg::with_name("cmdline").required(true).multiple_values(true)),
        )
        .subcommand(
            App::new("invo")
                .about("Launch a command line in the guest, detached")
                .arg(Arg::with_name("cmdline").required(true).multiple_values(true)),
        )
        .subcommand(
            App::new("logf")
                .about("Copy the guest agent log to the host")
                .arg(Arg::with_name("dstpath").required(true).index(1)),
        )
        .subcommand(App::new("sync").about("Ask the guest to flush its filesystem caches"))
        .subcommand(
            App::new("lzxh")
                .about("Decompress a raw LZXPRESS Huffman stream")
                .arg(Arg::with_name("input").required(true).index(1))
                .arg(Arg::with_name("output").required(true).index(2))
                .arg(
                    Arg::with_name("size")
                        .required(true)
                        .index(3)
                        .help("Decompressed size in bytes"),
                )
                .arg(
                    Arg::with_name("plain")
                        .long("plain")
                        .help("Treat the input as the plain (non-Huffman) LZXPRESS variant"),
                ),
        )
        .get_matches();

    let agent = matches.value_of("agent").unwrap();

    let result = match matches.subcommand() {
        Some(("init", _)) => run_init(agent),
        Some(("impo", sub)) => run_import(
            agent,
            sub.value_of("srcpath").unwrap(),
            sub.value_of("dstpath").unwrap(),
        ),
        Some(("expo", sub)) => run_export(
            agent,
            sub.value_of("srcpath").unwrap(),
            sub.value_of("dstpath").unwrap(),
        ),
        Some(("exec", sub)) => run_execute(agent, &joined_cmdline(sub)),
        Some(("invo", sub)) => run_invoke(agent, &joined_cmdline(sub)),
        Some(("logf", sub)) => run_logfile(agent, sub.value_of("dstpath").unwrap()),
        Some(("sync", _)) => run_sync(agent),
        Some(("lzxh", sub)) => run_decompress(
            sub.value_of("input").unwrap(),
            sub.value_of("output").unwrap(),
            sub.value_of("size").unwrap(),
            sub.is_present("plain"),
        ),
        _ => unreachable!(),
    };

    match result {
        Ok(status) => println!("{}", status),
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    }
}

fn joined_cmdline(sub: &clap::ArgMatches) -> String {
    sub.values_of("cmdline").unwrap().collect::<Vec<_>>().join(" ")
}

fn run_init(agent: &str) -> Result<String> {
    let client = AgentClient::connect(agent)?;

    // A sync round trip doubles as the reachability probe.
    client.sync_guest()?;

    Ok(format!("Agent session ready at {}", agent))
}

fn run_import(agent: &str, src: &str, dst: &str) -> Result<String> {
    AgentClient::connect(agent)?.import(Path::new(src), dst)
}

fn run_export(agent: &str, src: &str, dst: &str) -> Result<String> {
    AgentClient::connect(agent)?.export(src, Path::new(dst))
}

fn run_execute(agent: &str, cmdline: &str) -> Result<String> {
    let client = AgentClient::connect(agent)?;

    let stdout = io::stdout();
    let mut output = stdout.lock();

    client.execute(cmdline, Some(Box::new(io::stdin())), &mut output)
}

fn run_invoke(agent: &str, cmdline: &str) -> Result<String> {
    AgentClient::connect(agent)?.invoke(cmdline)
}

fn run_logfile(agent: &str, dst: &str) -> Result<String> {
    AgentClient::connect(agent)?.logfile(Path::new(dst))
}

fn run_sync(agent: &str) -> Result<String> {
    AgentClient::connect(agent)?.sync_guest()
}

fn run_decompress(input: &str, output: &str, size: &str, plain: bool) -> Result<String> {
    let size: usize = match size.parse() {
        Ok(size) => size,
        Err(_) => {
            let err = io::Error::new(io::ErrorKind::InvalidInput, "size must be a byte count");
            return Err(Error::IoError(err));
        }
    };

    let compressed = fs::read(input)?;

    let mut out = vec![0u8; size];
    let written = if plain {
        spyglass_codec_lzxh::decompress_plain(&compressed, &mut out)?
    }
    else {
        spyglass_codec_lzxh::decompress(&compressed, &mut out)?
    };

    if written < size {
        warn!("stream ended after {} of {} requested bytes", written, size);
    }

    fs::write(output, &out[..written])?;

    Ok(format!("Decompressed {} bytes to {}", written, output))
}
