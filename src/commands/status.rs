//! Status command implementation

use nandprog_serial::{Detection, Programmer, Transport};

use super::host::print_listing;
use super::CmdResult;

/// Print what the device reports about itself
pub fn run_status<T: Transport>(programmer: &mut Programmer<T>) -> CmdResult {
    let mut status = programmer.status()?;
    if status.model.is_none() {
        match programmer.redetect()? {
            Detection::Detected(model) => status.model = Some(model),
            Detection::Unknown(entries) => print_listing(&entries),
        }
    }

    println!("Programmer Status");
    println!("=================");
    println!();
    match &status.model {
        Some(model) => println!("Chip:            {}", model),
        None => println!("Chip:            not identified"),
    }
    if let Some(profile) = programmer.profile() {
        println!("Page size:       {} + {} bytes", profile.page_size, profile.oob_size);
        println!("Pages per block: {}", profile.pages_per_block);
        println!("Blocks:          {}", profile.block_count);
        println!(
            "Size:            {} bytes ({} with spare areas)",
            profile.total_size(),
            profile.raw_size()
        );
    }
    println!(
        "Supply:          {}.{:03} V",
        status.millivolts / 1000,
        status.millivolts % 1000
    );
    match status.resume {
        Some(offer) => println!(
            "Resumable:       {:?} from block {} (chunk hash {:#010x})",
            offer.kind, offer.next_block, offer.chunk_hash
        ),
        None => println!("Resumable:       none"),
    }
    if let Some(mv) = programmer.power_warning() {
        println!();
        println!("Warning: the device reported a low supply ({} mV)", mv);
    }
    Ok(())
}
