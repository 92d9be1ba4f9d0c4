//! Read command implementation

use std::fs::File;
use std::io::Write;
use std::path::Path;

use nandprog_core::chip::ChipProfile;
use nandprog_serial::{Programmer, Transport};

use super::host::{progress_bar, track};
use super::CmdResult;
use crate::cli::RangeArgs;

/// Read the block range into `output`
pub fn run_read<T: Transport>(
    programmer: &mut Programmer<T>,
    profile: &ChipProfile,
    range: &RangeArgs,
    output: &Path,
) -> CmdResult {
    let pb = progress_bar("pages")?;
    let outcome = programmer.read(range.op_args(), track(&pb))?;
    pb.finish_with_message("Read complete");

    let first_page = profile.block_first_page(range.start);
    if let Some(page) = outcome.first_page.filter(|&p| p != first_page) {
        println!("Device resumed at page {}; the file starts there", page);
    }

    let mut file = File::create(output)?;
    file.write_all(&outcome.data)?;

    println!(
        "Wrote {} pages ({} bytes) to {:?}, digest {:#010x}",
        outcome.pages,
        outcome.data.len(),
        output,
        outcome.digest
    );
    Ok(())
}
