//! List command implementation

use nandprog_core::chip::ChipRegistry;

/// List every chip this host knows
pub fn list_chips(registry: &ChipRegistry, vendor_filter: Option<&str>) {
    println!("Supported NAND chips:");
    println!();
    println!(
        "{:<10} {:<18} {:>10} {:>6} {:>8} {:>8}  {}",
        "Vendor", "Name", "Page", "OOB", "Pg/Blk", "Size", "ID"
    );
    println!("{}", "-".repeat(80));

    for chip in registry.iter() {
        if let Some(vendor) = vendor_filter {
            if !chip.vendor.to_lowercase().contains(&vendor.to_lowercase()) {
                continue;
            }
        }

        let id: Vec<String> = chip.id.iter().map(|b| format!("{:02X}", b)).collect();
        println!(
            "{:<10} {:<18} {:>10} {:>6} {:>8} {:>8}  {}",
            chip.vendor,
            chip.name,
            format_size(chip.page_size as u64),
            chip.oob_size,
            chip.pages_per_block,
            format_size(chip.total_size()),
            id.join(" ")
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{} GiB", bytes / (1024 * 1024 * 1024))
    } else if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(64), "64 B");
        assert_eq!(format_size(2048), "2 KiB");
        assert_eq!(format_size(128 * 1024 * 1024), "128 MiB");
        assert_eq!(format_size(4 * 1024 * 1024 * 1024), "4 GiB");
    }
}
