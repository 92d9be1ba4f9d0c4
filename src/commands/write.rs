//! Write command implementation

use std::fs;
use std::path::Path;

use nandprog_core::chip::ChipProfile;
use nandprog_serial::{Programmer, Transport};

use super::host::{block_span, progress_bar, track};
use super::CmdResult;
use crate::cli::RangeArgs;

/// Erased NAND reads as all ones
const ERASED: u8 = 0xFF;

/// Program `input` over the block range
///
/// A short image is padded with erased bytes; a long one is refused.
pub fn run_write<T: Transport>(
    programmer: &mut Programmer<T>,
    profile: &ChipProfile,
    range: &RangeArgs,
    input: &Path,
) -> CmdResult {
    let mut image = fs::read(input)?;
    println!("Read {} bytes from {:?}", image.len(), input);
    fit_image(&mut image, profile, range)?;

    let pb = progress_bar("pages")?;
    let digest = programmer.write(range.op_args(), &image, track(&pb))?;
    pb.finish_with_message("Write complete");

    println!("Programmed {} bytes, digest {:#010x}", image.len(), digest);
    Ok(())
}

fn fit_image(image: &mut Vec<u8>, profile: &ChipProfile, range: &RangeArgs) -> CmdResult {
    let blocks = block_span(profile, range.start, range.count) as usize;
    let expected = blocks * profile.pages_per_block as usize * profile.page_total_size() as usize;
    if image.len() > expected {
        return Err(format!(
            "Image is {} bytes but {} blocks from block {} hold {}",
            image.len(),
            blocks,
            range.start,
            expected
        )
        .into());
    }
    if image.len() < expected {
        log::warn!("Padding image with {} erased bytes", expected - image.len());
        image.resize(expected, ERASED);
    }
    Ok(())
}
