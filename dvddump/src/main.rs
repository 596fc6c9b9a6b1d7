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
    titleset::{
        AudioCoding,
        DisplayAspectRatio,
        ProgramChain,
        TitleSet,
        VideoStandard,
    },
    volume::Volume,
    Config,
};
use std::{
    path::Path,
    process::exit,
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
        .arg(Arg::with_name("layout")
            .long("layout")
            .short("l")
            .help("Also lists every region of the volume in sector order")
        )
        .arg(Arg::with_name("input")
            .index(1)
            .value_name("INPUT")
            .help("DVD device, disc image, mount point, or VTS_nn_0.IFO file")
            .required(true)
        )
        .after_help(format!("This utility will dump the structure of DVD-Video media: its \
            volume, title sets, titles, cells, angles, chapters, streams and palettes.\n\n\
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

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let input = Path::new(matches.value_of("input").unwrap());
    let is_ifo = input.is_file() && input
        .extension()
        .map(|extension| extension.eq_ignore_ascii_case("IFO"))
        .unwrap_or(false);

    if is_ifo {
        match TitleSet::load(input, None) {
            Ok(title_set) => dump_title_set(&title_set),
            Err(err) => {
                eprintln!("Could not read {}: {}", input.display(), err);
                exit(1);
            }
        }
        return
    }

    let config = Config { use_max_read_speed: false, ..Config::default() };
    let mut volume = match Volume::open(input, &config) {
        Ok(volume) => volume,
        Err(err) => {
            eprintln!("Could not open {}: {}", input.display(), err);
            exit(1);
        }
    };

    println!("volume({})", volume.device_name().display());
    println!("  volume_id = {}", volume.volume_id());
    println!("  volume_size = {} sectors", volume.volume_size());
    println!("  root_directory_sector = {}", volume.root_directory_sector());
    println!("  encrypted = {}", volume.is_encrypted());
    println!("  title_sets = {}", volume.vts_count());
    if let Some(root) = volume.root_name() {
        println!("  mount_point = {}", root.display());
    }

    if matches.is_present("layout") {
        println!("layout");
        for region in volume.layout().iter() {
            println!(
                "  {:>8} {:>8}  {}",
                region.start_sector,
                region.sector_count(),
                region.description(),
            );
        }
    }

    let mut failed = false;

    for vts in 1..=volume.vts_count() as u8 {
        match TitleSet::load_from_volume(&mut volume, vts) {
            Ok(title_set) => dump_title_set(&title_set),
            Err(err) => {
                eprintln!("Could not read title set {}: {}", vts, err);
                failed = true;
            }
        }
    }

    if failed {
        exit(1);
    }
}

fn dump_title_set(title_set: &TitleSet) {

    println!("title_set({})", title_set.vts_number);
    println!("  ifo = {}", title_set.ifo_name);
    println!("  video_standard = {}", match title_set.video.standard {
        VideoStandard::Ntsc => "NTSC",
        VideoStandard::Pal => "PAL",
    });
    println!("  display_aspect_ratio = {}", match title_set.video.aspect_ratio {
        DisplayAspectRatio::Standard => "4:3".to_string(),
        DisplayAspectRatio::Widescreen => "16:9".to_string(),
        DisplayAspectRatio::Reserved(code) => format!("reserved ({})", code),
    });
    match title_set.video.frame_size {
        Some((width, height)) => println!("  frame_size = {}x{}", width, height),
        None => (),
    }
    for (index, audio) in title_set.audio.iter().enumerate() {
        println!("  audio_stream({})", index);
        match audio.stream_id {
            Some(stream_id) => println!("    stream_id = 0x{:02X}", stream_id),
            None => (),
        }
        println!("    coding = {}", match audio.coding {
            AudioCoding::Ac3 => "AC-3".to_string(),
            AudioCoding::Mpeg1 => "MPEG-1".to_string(),
            AudioCoding::Mpeg2Extended => "MPEG-2 extended".to_string(),
            AudioCoding::Lpcm => "LPCM".to_string(),
            AudioCoding::Dts => "DTS".to_string(),
            AudioCoding::Unknown(code) => format!("unknown ({})", code),
        });
        println!("    channels = {}", audio.channels);
        println!("    language = {}", audio.language.as_deref().unwrap_or("-"));
        println!("    hearing_impaired = {}", audio.hearing_impaired);
        println!("    commentary = {}", audio.commentary);
    }
    for (index, subtitle) in title_set.subtitles.iter().enumerate() {
        println!("  subtitle_stream({})", index);
        println!("    stream_id = 0x{:02X}", subtitle.stream_id);
        println!("    language = {}", subtitle.language.as_deref().unwrap_or("-"));
        println!("    forced = {}", subtitle.forced);
        println!("    hearing_impaired = {}", subtitle.hearing_impaired);
        println!("    commentary = {}", subtitle.commentary);
    }
    for vob in title_set.vob_files.iter() {
        match vob.disc_sector {
            Some(sector) => {
                println!("  vob_file({}) = {} bytes at sector {}", vob.name, vob.size, sector);
            }
            None => println!("  vob_file({}) = {} bytes", vob.name, vob.size),
        }
    }
    for warning in title_set.warnings.iter() {
        println!("  warning = {}", warning);
    }
    for pgc in title_set.titles(false) {
        dump_program_chain(title_set, pgc);
    }
}

fn dump_program_chain(title_set: &TitleSet, pgc: &ProgramChain) {

    let sequence: Vec<String> = title_set
        .all_titles(pgc.title_number)
        .iter()
        .map(|linked| linked.title_number.to_string())
        .collect();

    println!("  title({})", pgc.title_number);
    println!("    duration = {}", duration_to_string(pgc.duration));
    println!("    sectors = {}", pgc.sector_count());
    println!("    angles = {}", pgc.angle_count);
    println!("    next_pgc = {}", pgc.next_pgc);
    println!("    previous_pgc = {}", pgc.previous_pgc);
    println!("    parent_pgc = {}", pgc.parent_pgc);
    if sequence.len() > 1 {
        println!(
            "    sequence = {} ({})",
            sequence.join(" "),
            duration_to_string(title_set.all_titles_duration(pgc.title_number)),
        );
    }
    if !pgc.palette.entries.is_empty() {
        println!("    palette = {}", pgc.palette.to_rgb_string());
    }
    for chapter in pgc.chapters.iter() {
        println!("    chapter({}) = cell {}", chapter.number, chapter.first_cell);
    }
    for cell in pgc.cells.iter() {
        println!("    cell({})", cell.cell_id);
        println!("      vob_id = {}", cell.vob_id);
        println!("      vob_cell_id = {}", cell.original_cell_id);
        if cell.angle > 0 {
            println!("      angle = {}", cell.angle);
        }
        println!("      duration = {}", duration_to_string(cell.duration));
        for range in cell.sectors.iter() {
            println!("      sectors = {} to {}", range.first, range.last);
        }
    }
}

fn duration_to_string(seconds: u32) -> String {
    format!("{}:{:02}:{:02}", seconds / 3600, seconds / 60 % 60, seconds % 60)
}
