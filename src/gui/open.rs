use log::info;
use open;
use tokio::task::spawn_blocking;
use crate::error::LinkOpenError;

/// Opens an http(s) link, such as the support page, in the default browser.
pub async fn open_link(url: &str) -> Result<(), LinkOpenError> {
    let link = url.trim().to_string();
    if !link.starts_with("https://") && !link.starts_with("http://") {
        return Err(LinkOpenError::NotHttp);
    }

    info!("Opening {}", link);
    spawn_blocking(move || {
        open::that(&link)
    }).await.expect("Failed to join open_link task")?;

    Ok(())
}
