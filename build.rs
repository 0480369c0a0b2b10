extern crate image;
use std::{env, fs};
use std::path::PathBuf;

fn package_dir() -> String {
    env::var("CARGO_MANIFEST_DIR").expect("No CARGO_MANIFEST_DIR env var")
}

fn out_dir() -> String {
    env::var("OUT_DIR").expect("No OUT_DIR env var")
}

fn build_window_icon() {
    let out_dir = out_dir();
    let img_path: PathBuf = [package_dir().as_str(), "resources", "icon-32.png"].iter().collect();
    let out_path: PathBuf = [out_dir.as_str(), "icon-32-rgba"].iter().collect();

    let img = image::open(&img_path).expect("Failed to read/decode icon-32.png");
    let img = img.to_rgba8();
    let rgba = img.into_raw();
    fs::write(&out_path, rgba).expect("Failed to write icon-32-rgba");

    println!("cargo:rerun-if-changed={}", img_path.to_string_lossy());
}

// CoreBluetooth refuses to scan unless the running binary carries an Info.plist with
// NSBluetoothAlwaysUsageDescription. The plist is embedded by bin/gobe-session.rs.
fn build_info_plist() {
    let out_path: PathBuf = [out_dir().as_str(), "Info.plist"].iter().collect();
    let version = env::var("CARGO_PKG_VERSION").expect("No CARGO_PKG_VERSION env var");

    let plist = format!(r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>com.gobe.session</string>
    <key>CFBundleName</key>
    <string>GoBe Session</string>
    <key>CFBundleShortVersionString</key>
    <string>{version}</string>
    <key>NSBluetoothAlwaysUsageDescription</key>
    <string>Bluetooth is used to find and connect to your GoBe wristband.</string>
</dict>
</plist>
"#);

    fs::write(&out_path, plist).expect("Failed to write Info.plist");
}

fn main() {
    build_window_icon();
    build_info_plist();
}
