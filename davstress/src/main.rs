//! Load generator for the WebDAV upload endpoints of file-sync servers.
//!
//! See the `davstress` library for details, and `davstress --help` for usage.

use anyhow::Result;

fn main() -> Result<()> {
    davstress::cli::execute()
}
