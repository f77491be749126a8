//! Build script for partalloc.
//!
//! Reports the enabled features and flags feature combinations that are
//! probably not what the user wants.

use std::env;

fn main() {
    // Re-run if features change
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DEBUG");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_LOG");
    println!("cargo:rerun-if-env-changed=PARTALLOC_QUIET");

    if env::var("PARTALLOC_QUIET").is_ok() {
        return;
    }

    let debug_enabled = env::var("CARGO_FEATURE_DEBUG").is_ok();
    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();
    let log_enabled = env::var("CARGO_FEATURE_LOG").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    // --- Debug Features ---
    if debug_enabled {
        emit_info("Debug features enabled");
        emit_note("Debug mode provides:");
        emit_note("  • 16-byte cookies before and after every slot");
        emit_note("  • Memory poisoning (fresh slots 0xAB, freed slots 0xCD)");
        emit_note("  • BacktraceObserver for leak reports");

        if is_release {
            emit_warning("Debug features enabled in release build!");
            emit_note("Every slot grows by 32 bytes and every free checks cookies.");
        }
    }

    // --- Fatal diagnostics ---
    if is_release && !diagnostics_enabled && !log_enabled {
        emit_note("Fatal allocator errors abort silently in release builds.");
        emit_note("Enable 'diagnostics' or 'log' to see the PAxxx diagnostic first.");
    }

    // --- Parking Lot ---
    if parking_lot_enabled {
        emit_info("Using parking_lot for the GenericRoot lock");
    } else if is_release {
        emit_note("Tip: Consider enabling 'parking_lot' for a cheaper GenericRoot lock:");
        emit_note("  partalloc = { version = \"0.1\", features = [\"parking_lot\"] }");
    }

    check_target();
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[partalloc] {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[partalloc]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[partalloc] warning: {}", msg);
}

fn check_target() {
    let family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    if !family.split(',').any(|f| f == "unix") {
        emit_warning("No mmap on this target; SystemPages falls back to heap-backed pages");
        emit_note("Decommit and discard become bookkeeping only.");
    }
}
