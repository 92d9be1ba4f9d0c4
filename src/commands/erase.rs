//! Erase command implementation

use nandprog_core::chip::ChipProfile;
use nandprog_serial::{Programmer, Transport};

use super::host::{block_span, progress_bar, track};
use super::CmdResult;
use crate::cli::RangeArgs;

/// Erase the block range
pub fn run_erase<T: Transport>(programmer: &mut Programmer<T>, profile: &ChipProfile, range: &RangeArgs) -> CmdResult {
    let blocks = block_span(profile, range.start, range.count);
    println!("Erasing {} blocks from block {}", blocks, range.start);

    let pb = progress_bar("blocks")?;
    programmer.erase(range.op_args(), track(&pb))?;
    pb.finish_with_message("Erase complete");
    Ok(())
}
