use log::{error, warn};

use intel_flash::{FlashImage, bios::BiosRegion, error::FlashError};

pub fn show_bios(bios: &BiosRegion, verbose: bool) {
    if verbose {
        println!("{bios:#02x?}");
    }
    println!("{bios}");
    let issues = bios.validate();
    for i in &issues {
        warn!("{i}");
    }
}

pub fn show(image: &FlashImage, issues: &[FlashError], verbose: bool) {
    if verbose {
        println!("{image:#02x?}");
    }
    println!();
    println!("{image}");
    println!();
    match &image.bios {
        Some(bios) => println!("{bios}"),
        None => error!("No BIOS region found"),
    }
    println!();
    if issues.is_empty() {
        println!("No issues found");
    }
    for i in issues {
        warn!("{i}");
    }
}
