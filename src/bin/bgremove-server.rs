//! Background removal HTTP service
//!
//! Loads the segmentation model once, then serves `POST /remove_bg` and
//! friends until Ctrl-C or SIGTERM.

use bgremove_server::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
