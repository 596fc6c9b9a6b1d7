/*
 * Copyright 2021 William Swartzendruber
 *
 * This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a
 * copy of the MPL was not distributed with this file, You can obtain one at
 * https://mozilla.org/MPL/2.0/.
 *
 * SPDX-License-Identifier: MPL-2.0
 */

use dvd::{
    demux::Selection,
    session::{
        Destination,
        ExtractionSession,
        Overwrite,
        OverwriteCheck,
        SessionEvent,
        SessionState,
    },
    titleset::TitleSet,
    volume::Volume,
    BadSectorPolicy,
    Config,
    DemuxPolicy,
};
use std::{
    io::{stdin, stderr, Write},
    path::PathBuf,
    process::exit,
    sync::mpsc::{channel, RecvTimeoutError},
    time::Duration,
};
use clap::{app_from_crate, crate_authors, crate_description, crate_name, crate_version, Arg};
use tracing_subscriber::EnvFilter;

fn main() {

    let matches = app_from_crate!()
        .arg(Arg::with_name("verbose")
            .long("verbose")
            .short("v")
            .help("Logs more details to STDERR; use twice for debugging output")
            .multiple(true)
        )
        .arg(Arg::with_name("iso")
            .long("iso")
            .help("Dumps the whole volume as a disc image")
            .conflicts_with_all(&["vts", "title"])
        )
        .arg(Arg::with_name("vts")
            .long("vts")
            .short("s")
            .value_name("NUMBER")
            .help("Title set to extract; copies its files unless a title is given")
            .takes_value(true)
            .required_unless("iso")
            .validator(|value| {
                match value.parse::<u8>() {
                    Ok(number) if number > 0 => Ok(()),
                    _ => Err("must be a title set number from 1 to 255".to_string()),
                }
            })
        )
        .arg(Arg::with_name("title")
            .long("title")
            .short("t")
            .value_name("NUMBER")
            .help("Title to demux out of the title set")
            .takes_value(true)
            .requires("vts")
            .validator(|value| {
                match value.parse::<u8>() {
                    Ok(number) if number > 0 => Ok(()),
                    _ => Err("must be a title number from 1 to 255".to_string()),
                }
            })
        )
        .arg(Arg::with_name("angle")
            .long("angle")
            .short("a")
            .value_name("NUMBER")
            .help("Angle to demux")
            .takes_value(true)
            .default_value("1")
            .validator(|value| {
                if value.parse::<u8>().is_ok() {
                    Ok(())
                } else {
                    Err("must be an angle number from 0 to 255".to_string())
                }
            })
        )
        .arg(Arg::with_name("fallback-title")
            .long("fallback-title")
            .value_name("NUMBER")
            .help("Title to demux instead when the requested one does not exist")
            .takes_value(true)
            .requires("title")
            .validator(|value| {
                match value.parse::<u8>() {
                    Ok(number) if number > 0 => Ok(()),
                    _ => Err("must be a title number from 1 to 255".to_string()),
                }
            })
        )
        .arg(Arg::with_name("nav-packs")
            .long("nav-packs")
            .value_name("POLICY")
            .help("Navigation packs in demuxed output: fixed, unchanged or removed")
            .takes_value(true)
            .default_value("fixed")
            .validator(|value| value.parse::<DemuxPolicy>().map(|_| ()))
        )
        .arg(Arg::with_name("bad-sectors")
            .long("bad-sectors")
            .short("b")
            .value_name("POLICY")
            .help("What to do with unreadable sectors: fail, skip, retry or zero")
            .takes_value(true)
            .default_value("skip")
            .validator(|value| {
                value.parse::<BadSectorPolicy>().map(|_| ()).map_err(|err| err.to_string())
            })
        )
        .arg(Arg::with_name("max-speed")
            .long("max-speed")
            .help("Asks the drive to read at its maximum speed")
        )
        .arg(Arg::with_name("yes")
            .long("yes")
            .short("y")
            .help("Overwrites existing files without asking")
        )
        .arg(Arg::with_name("pipe")
            .long("pipe")
            .short("p")
            .value_name("COMMAND")
            .help("Pipes the output into a shell command instead of writing it")
            .takes_value(true)
            .conflicts_with("output")
        )
        .arg(Arg::with_name("input")
            .index(1)
            .value_name("INPUT")
            .help("DVD device, disc image or mount point")
            .required(true)
        )
        .arg(Arg::with_name("output")
            .index(2)
            .value_name("OUTPUT")
            .help("Output file, or directory for title set files; use - for STDOUT")
            .required_unless("pipe")
        )
        .after_help(format!("This utility will extract DVD-Video media as a disc image, as \
            the raw files of a title set, or as a single title demuxed out of its title set.\n\n\
            Copyright © 2021 William Swartzendruber\n\
            Licensed under the Mozilla Public License 2.0\n\
            <{}>", env!("CARGO_PKG_REPOSITORY")).as_str())
        .get_matches();
    let level = match matches.occurrences_of("verbose") {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(stderr).init();

    let config = Config {
        use_max_read_speed: matches.is_present("max-speed"),
        bad_sector_policy: matches.value_of("bad-sectors").unwrap().parse().unwrap(),
        demux_policy: matches.value_of("nav-packs").unwrap().parse().unwrap(),
        ..Config::default()
    };
    let vts = matches.value_of("vts").map(|value| value.parse::<u8>().unwrap());
    let title = matches.value_of("title").map(|value| value.parse::<u8>().unwrap());
    let angle = matches.value_of("angle").unwrap().parse::<u8>().unwrap();
    let fallback_title = matches
        .value_of("fallback-title")
        .map(|value| value.parse::<u8>().unwrap());
    let destination = match (matches.value_of("pipe"), matches.value_of("output")) {
        (Some(command), _) => Destination::Pipe(command.to_string()),
        (None, Some("-")) => Destination::Stdout,
        (None, Some(path)) => Destination::File(PathBuf::from(path)),
        (None, None) => unreachable!(),
    };
    let input = matches.value_of("input").unwrap();
    let mut volume = match Volume::open(input, &config) {
        Ok(volume) => volume,
        Err(err) => {
            eprintln!("Could not open {}: {}", input, err);
            exit(1);
        }
    };
    let title_set = match (vts, title) {
        (Some(vts), Some(_)) => match TitleSet::load_from_volume(&mut volume, vts) {
            Ok(title_set) => Some(title_set),
            Err(err) => {
                eprintln!("Could not read title set {}: {}", vts, err);
                exit(1);
            }
        },
        _ => None,
    };
    let (sender, receiver) = channel();
    let mut session = ExtractionSession::new(volume, &config).with_events(sender);
    let queued = match (vts, title, title_set) {
        (_, Some(title), Some(title_set)) => {
            let mut selection = Selection::new(title, angle);
            if let Some(fallback) = fallback_title {
                selection = selection.with_fallback(fallback);
            }
            session.add_title(destination, &title_set, selection).map(|_| ())
        }
        (Some(vts), None, _) => match destination {
            Destination::File(directory) => {
                session.add_title_set_files(directory, vts).map(|_| ())
            }
            _ => {
                eprintln!("Title set files can only be written into a directory.");
                exit(1);
            }
        },
        _ => session.add_iso_dump(destination),
    };

    if let Err(err) = queued {
        eprintln!("Could not queue the extraction: {}", err);
        exit(1);
    }

    let overwrite = match session.check_overwrites() {
        OverwriteCheck::NeedsConfirmation(paths) if !matches.is_present("yes") => {
            if confirm_overwrite(&paths) {
                Overwrite::Allow
            } else {
                eprintln!("Nothing extracted.");
                exit(1);
            }
        }
        _ => Overwrite::Allow,
    };
    let handle = session.spawn(overwrite);

    //
    // PROGRESS
    //

    let mut last_percent = None;

    loop {
        match receiver.recv_timeout(Duration::from_millis(250)) {
            Ok(SessionEvent::Progress { completed_sectors, total_sectors }) => {
                let percent = completed_sectors * 100 / total_sectors.max(1);
                if last_percent != Some(percent) {
                    eprint!(
                        "\r{:>3}% ({} of {} sectors)",
                        percent,
                        completed_sectors,
                        total_sectors,
                    );
                    let _ = stderr().flush();
                    last_percent = Some(percent);
                }
            }
            Ok(SessionEvent::Log { .. }) => (),
            Err(RecvTimeoutError::Timeout) if handle.is_finished() => break,
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if last_percent.is_some() {
        eprintln!();
    }

    let (_, report) = handle.join();

    match report {
        Ok(report) => {
            if report.skipped_sectors > 0 {
                eprintln!("Skipped {} bad sectors.", report.skipped_sectors);
            }
            match report.state {
                SessionState::Completed => (),
                SessionState::PartiallyCompleted => {
                    eprintln!("Some files could not be extracted, see messages above.");
                    exit(1);
                }
                SessionState::Cancelled => {
                    eprintln!("DVD extraction aborted.");
                    exit(1);
                }
                _ => {
                    eprintln!("DVD extraction failed, see messages above.");
                    exit(1);
                }
            }
        }
        Err(err) => {
            eprintln!("DVD extraction failed: {}", err);
            exit(1);
        }
    }
}

fn confirm_overwrite(paths: &[PathBuf]) -> bool {

    eprintln!("The following files already exist:");
    for path in paths.iter() {
        eprintln!("  {}", path.display());
    }
    eprint!("Overwrite them? [y/N] ");
    let _ = stderr().flush();

    let mut answer = String::new();

    match stdin().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes" | "YES"),
        Err(_) => false,
    }
}
