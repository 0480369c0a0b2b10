use std::env;
use log::info;
use msgbox::IconType;
use gobe_session::{init_logging, run};
use gobe_session::error::{error_msgbox, AppRunError, ConfigError};

// CoreBluetooth only grants access to binaries that carry an Info.plist with a bluetooth usage
// description. Example: `open ./target/debug/gobe-session`
#[cfg(target_os = "macos")]
embed_plist::embed_info_plist!(concat!(env!("OUT_DIR"), "/Info.plist"));

fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("GoBe Session ", env!("CARGO_PKG_VERSION")));

    let args = env::args();

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            if let Err(err) = msgbox::create(
                concat!("GoBe Session ", env!("CARGO_PKG_VERSION")),
                "This application has already been started",
                IconType::Error,
            ) {
                eprintln!("Failed to create msgbox: {:?}", err);
            }
            Ok(())
        },
        Err(err) => {
            error_msgbox("Unexpected error", &err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}
