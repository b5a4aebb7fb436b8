//! Reading and writing of optionally gzip-framed JSON files.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{StateError, StateResult};

/// The first two bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Opens `path` for reading, transparently decompressing it if its content
/// starts with the gzip magic bytes. The file name plays no part in the
/// decision.
pub fn open_decompressed(path: &Path) -> io::Result<Box<dyn Read>> {
    let mut reader = BufReader::new(File::open(path)?);
    if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Reads the whole (decompressed) content of `path`.
pub fn read_decompressed(path: &Path) -> StateResult<Vec<u8>> {
    let open_error = |source| StateError::Open {
        path: path.to_owned(),
        source,
    };

    let mut buf = Vec::new();
    open_decompressed(path)
        .and_then(|mut reader| reader.read_to_end(&mut buf))
        .map_err(open_error)?;
    Ok(buf)
}

/// Reads and decodes a JSON record from `path`. Decoding failures report the
/// JSON path of the offending value.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StateResult<T> {
    let buf = read_decompressed(path)?;
    let des = &mut serde_json::Deserializer::from_slice(&buf);
    serde_path_to_error::deserialize(des).map_err(|source| StateError::Decode {
        path: path.to_owned(),
        source,
    })
}

/// Writes `value` as JSON to `path`, gzip-compressed if the file name ends in
/// `.gz`. Parent directories are created as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StateResult<()> {
    let write_error = |source| StateError::Write {
        path: path.to_owned(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }

    let file = BufWriter::new(File::create(path).map_err(write_error)?);
    let compress = path.extension().is_some_and(|ext| ext == "gz");
    if compress {
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, value).map_err(io::Error::from).map_err(write_error)?;
        encoder.finish().and_then(|mut file| file.flush()).map_err(write_error)?;
    } else {
        let mut file = file;
        serde_json::to_writer(&mut file, value).map_err(io::Error::from).map_err(write_error)?;
        file.flush().map_err(write_error)?;
    }

    tracing::debug!(path = %path.display(), compress, "wrote JSON file");
    Ok(())
}
