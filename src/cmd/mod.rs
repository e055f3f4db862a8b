mod download;
mod setup;

pub use download::{cmd_download, DownloadArgs};
pub use setup::cmd_setup;
