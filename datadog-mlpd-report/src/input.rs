// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ReportError;
use flate2::bufread::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Opens a profile for reading. `-` reads standard input. Gzip compressed profiles are
/// decompressed on the fly.
pub fn open_profile(path: &Path) -> Result<Box<dyn Read>, ReportError> {
    if path.as_os_str() == "-" {
        return Ok(maybe_gunzip(BufReader::new(io::stdin()))?);
    }
    let file = File::open(path).map_err(|source| ReportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(maybe_gunzip(BufReader::new(file))?)
}

/// Wraps `reader` in a gzip decoder when the stream starts with the gzip magic.
pub fn maybe_gunzip<R: BufRead + 'static>(mut reader: R) -> io::Result<Box<dyn Read>> {
    let head = reader.fill_buf()?;
    if head.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Counts the bytes read through it: the offset of the next buffer record in the
/// decompressed stream.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    position: u64,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    #[test]
    fn plain_and_compressed() {
        let data = b"some profile bytes".to_vec();

        let mut plain = String::new();
        maybe_gunzip(Cursor::new(data.clone()))
            .unwrap()
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain.as_bytes(), data);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();
        let mut out = Vec::new();
        maybe_gunzip(Cursor::new(compressed))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn counts_bytes() {
        let mut reader = CountingReader::new(Cursor::new(vec![0u8; 100]));
        let mut buf = [0u8; 48];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.position(), 48);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(reader.position(), 100);
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_profile(&dir.path().join("nope.mlpd")).err().unwrap();
        assert!(matches!(err, ReportError::Open { .. }));
    }
}
