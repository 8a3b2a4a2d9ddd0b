//! Archive snapshot producer
//!
//! Builds a self-contained ZIP of every public persistent file plus a
//! `server.pubkey` pseudo-file and a README. Private-key material never
//! enters the archive. Files are read without the primary lock; append-only
//! semantics guarantee each entry is a consistent prefix of the live file.

use crate::server::Server;
use crate::storage::Storage;
use std::io::{Cursor, Write};
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Pseudo-file carrying the 32 public-key bytes of `server.keys`
pub const SERVER_PUBKEY_ENTRY: &str = "server.pubkey";

/// Archive README entry name
pub const README_ENTRY: &str = "README";

/// Build the snapshot ZIP in memory.
///
/// Entries are written in reverse dependency order, so a reader that
/// truncates the archive at any byte boundary still sees consistent
/// prefixes.
pub fn build_archive(server: &Server) -> Result<Vec<u8>, ArchiveError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in Storage::public_files() {
        let path = server.storage().base().join(name);
        if !path.exists() {
            continue;
        }
        zip.start_file(name, options)?;
        zip.write_all(&std::fs::read(&path)?)?;
    }

    zip.start_file(SERVER_PUBKEY_ENTRY, options)?;
    zip.write_all(&server.public_key().0)?;

    zip.start_file(README_ENTRY, options)?;
    zip.write_all(readme(server).as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

fn readme(server: &Server) -> String {
    format!(
        "GCA collection server archive snapshot\n\
         \n\
         Record files are append-only concatenations of fixed-width records;\n\
         any prefix that ends on a record boundary is valid on its own.\n\
         server.pubkey holds this server's 32-byte public key. Signatures in\n\
         the record files verify against the keys they were issued under.\n\
         \n\
         Recent server events:\n{}",
        server.events().dump()
    )
}
