fn main() {
    // ── macOS: CoreBluetooth only scans for binaries with an Info.plist ──────
    //
    // A CLI tool has no app bundle, so the plist (which carries
    // NSBluetoothAlwaysUsageDescription) is linked into the
    // `__TEXT,__info_plist` section of the Mach-O image instead.
    //
    // `CARGO_CFG_TARGET_OS` is the target, not the host, so this also holds
    // when cross-compiling for macOS.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }

    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let plist = format!("{dir}/Info.plist");

    for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
        println!("cargo:rustc-link-arg={arg}");
    }
    println!("cargo:rerun-if-changed=Info.plist");
}
