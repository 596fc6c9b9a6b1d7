/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: CC0-1.0
 */

use super::*;

#[test]
fn test_batch_sectors_from_transfer_size() {

    let config = Config::default();

    assert_eq!(config.batch_sectors(), 256);
}

#[test]
fn test_batch_sectors_never_zero() {

    let config = Config { transfer_size: 100, ..Config::default() };

    assert_eq!(config.batch_sectors(), 1);
}

#[test]
fn test_bad_sector_policy_from_str() {

    assert_eq!("skip".parse::<BadSectorPolicy>().unwrap(), BadSectorPolicy::Skip);
    assert_eq!("Retry".parse::<BadSectorPolicy>().unwrap(), BadSectorPolicy::Retry);
    assert_eq!("zero".parse::<BadSectorPolicy>().unwrap(), BadSectorPolicy::ReadAsZero);
    assert_eq!("error".parse::<BadSectorPolicy>().unwrap(), BadSectorPolicy::Fail);
}

#[test]
fn test_bad_sector_policy_unrecognized() {

    match "sometimes".parse::<BadSectorPolicy>() {
        Err(VolumeError::InvalidBadSectorPolicy { value }) => assert_eq!(value, "sometimes"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        BadSectorPolicy::from_u8(9),
        Err(VolumeError::InvalidBadSectorPolicy { .. }),
    ));
    assert_eq!(BadSectorPolicy::from_u8(2).unwrap(), BadSectorPolicy::ReadAsZero);
}

#[test]
fn test_demux_policy_from_str() {

    assert_eq!("removed".parse::<DemuxPolicy>().unwrap(), DemuxPolicy::NavPacksRemoved);
    assert!("sideways".parse::<DemuxPolicy>().is_err());
}
