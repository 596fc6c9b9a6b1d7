/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use crate::SECTOR_SIZE;
use byteorder::{ByteOrder, LittleEndian};

pub(super) const MIN_RECORD_SIZE: usize = 34;

const FLAG_DIRECTORY: u8 = 0x02;

/// One entry of an ISO 9660 directory extent.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct DirectoryRecord {
    pub name: String,
    pub is_directory: bool,
    pub sector: u32,
    pub size: u32,
}

/// Decodes the records of a directory extent, leaving out the entries for the directory itself
/// and its parent.
///
/// Records never span a sector boundary. A zero length byte pads out the rest of the sector.
pub(super) fn parse_directory_records(data: &[u8]) -> Vec<DirectoryRecord> {

    let mut records = Vec::new();
    let mut index = 0;

    while index < data.len() {

        let length = data[index] as usize;

        if length == 0 {
            index = (index / SECTOR_SIZE + 1) * SECTOR_SIZE;
            continue
        }
        if length < MIN_RECORD_SIZE || index + length > data.len() {
            break
        }

        let record = &data[index..index + length];
        let name_length = record[32] as usize;

        if MIN_RECORD_SIZE - 1 + name_length <= length {

            let name = &record[33..33 + name_length];

            if name != [0x00] && name != [0x01] {
                records.push(
                    DirectoryRecord {
                        name: decode_name(name),
                        is_directory: record[25] & FLAG_DIRECTORY != 0,
                        sector: LittleEndian::read_u32(&record[2..6]),
                        size: LittleEndian::read_u32(&record[10..14]),
                    }
                );
            }
        }

        index += length;
    }

    records
}

/// Decodes an identifier, stripping the `;1` style version suffix.
pub(super) fn decode_name(name: &[u8]) -> String {

    let name: String = name.iter().map(|&byte| byte as char).collect();

    match name.find(';') {
        Some(position) => name[..position].to_string(),
        None => name,
    }
}
