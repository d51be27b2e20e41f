//! Buffered inflate reader that decodes zlib-compressed object bytes
//! while simultaneously tracking the SHA-1 digest, so loose reads can
//! verify the object id without a second pass over the data.

use std::io;
use std::io::BufRead;

use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};

/// Inflates a DEFLATE stream from a [`BufRead`] without consuming bytes
/// past the end of the stream.
///
/// A loose object inflates to `"<type> <size>\0"` followed by the
/// payload, and the object id is the SHA-1 of exactly those bytes; the
/// hashing variant accumulates that digest as data flows through.
///
/// Each [`io::Read::read`] call returns as soon as the decompressor
/// yields bytes, so short reads are normal; callers use `read_exact`
/// or `read_to_end` as usual.
pub struct InflateReader<R> {
    /// The reader from which bytes should be decompressed.
    pub inner: R,
    decompressor: Box<Decompress>,
    hasher: Option<Sha1>,
}

impl<R> InflateReader<R>
where
    R: BufRead,
{
    /// Reader that accumulates the SHA-1 of everything it inflates.
    pub fn new_hashing(inner: R) -> Self {
        InflateReader {
            inner,
            decompressor: Box::new(Decompress::new(true)),
            hasher: Some(Sha1::new()),
        }
    }

    /// Reader for raw payloads (pack entries, delta bytes) where no
    /// object hash applies.
    pub fn new_raw(inner: R) -> Self {
        InflateReader {
            inner,
            decompressor: Box::new(Decompress::new(true)),
            hasher: None,
        }
    }

    /// Total compressed bytes consumed so far.
    pub fn compressed_in(&self) -> u64 {
        self.decompressor.total_in()
    }

    /// Finish and return the accumulated digest bytes.
    pub fn finalize_hash(self) -> Option<[u8; 20]> {
        self.hasher.map(|h| h.finalize().into())
    }

    /// Run one decompression step over the currently buffered input.
    /// Returns the inflated byte count, the consumed input count, and
    /// whether the stream ended.
    fn step(&mut self, into: &mut [u8]) -> io::Result<(usize, usize, bool)> {
        let input = self.inner.fill_buf()?;
        let drained = input.is_empty();
        let flush = if drained {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };

        let out_before = self.decompressor.total_out();
        let in_before = self.decompressor.total_in();
        let status = self
            .decompressor
            .decompress(input, into, flush)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "corrupt deflate stream"))?;
        let inflated = (self.decompressor.total_out() - out_before) as usize;
        let consumed = (self.decompressor.total_in() - in_before) as usize;

        self.inner.consume(consumed);
        if let Some(hasher) = &mut self.hasher {
            hasher.update(&into[..inflated]);
        }

        match status {
            Status::StreamEnd => Ok((inflated, consumed, true)),
            Status::Ok | Status::BufError => {
                // zlib asking for more input after the reader drained
                // means the compressed stream is cut short.
                if drained && inflated == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "deflate stream ended early",
                    ));
                }
                Ok((inflated, consumed, false))
            }
        }
    }
}

impl<R> io::Read for InflateReader<R>
where
    R: BufRead,
{
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        if into.is_empty() {
            return Ok(0);
        }
        loop {
            let (inflated, consumed, done) = self.step(into)?;
            if inflated > 0 || done {
                return Ok(inflated);
            }
            if consumed == 0 {
                // Neither input nor output moved; bail out rather than
                // spin on a stuck stream.
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "deflate stream made no progress",
                ));
            }
            // Only header or dictionary bytes were consumed; go again.
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use flate2::{Compression, write::ZlibEncoder};

    use super::*;
    use crate::hash::ObjectId;
    use crate::internal::object::types::ObjectType;

    /// Helper to build zlib-compressed bytes from input data.
    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Inflating a loose object form accumulates the object id.
    #[test]
    fn inflate_object_counts_hash() {
        let body = b"hello\n";
        let loose_form = b"blob 6\0hello\n";
        let compressed = zlib_compress(loose_form);

        let mut reader = InflateReader::new_hashing(io::Cursor::new(compressed));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, loose_form);

        let digest = reader.finalize_hash().unwrap();
        let expected = ObjectId::from_type_and_data(ObjectType::Blob, body);
        assert_eq!(&digest, expected.as_bytes());
    }

    /// Raw payload reads skip the hash accumulator.
    #[test]
    fn inflate_raw_skips_hash() {
        let body = b"delta bytes";
        let compressed = zlib_compress(body);

        let mut reader = InflateReader::new_raw(io::Cursor::new(compressed));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
        assert!(reader.finalize_hash().is_none());
    }

    /// The reader does not consume bytes past the end of the stream.
    #[test]
    fn stops_at_stream_end() {
        let body = b"payload";
        let mut data = zlib_compress(body);
        let compressed_len = data.len();
        data.extend(b"trailing bytes");

        let mut reader = InflateReader::new_raw(io::Cursor::new(data));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
        assert_eq!(reader.compressed_in(), compressed_len as u64);
    }

    /// Short reads still deliver the whole stream.
    #[test]
    fn single_byte_reads_reassemble() {
        let body = b"one byte at a time";
        let compressed = zlib_compress(body);

        let mut reader = InflateReader::new_raw(io::Cursor::new(compressed));
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte).unwrap() {
                0 => break,
                n => out.extend_from_slice(&byte[..n]),
            }
        }
        assert_eq!(out, body);
    }

    /// Corrupt deflate input surfaces as InvalidInput.
    #[test]
    fn corrupt_stream_returns_error() {
        let data = b"not a valid zlib stream";
        let mut reader = InflateReader::new_raw(io::Cursor::new(data));
        let mut out = [0u8; 16];
        let err = reader.read(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    /// A stream cut off mid-way reports UnexpectedEof, not silence.
    #[test]
    fn truncated_stream_is_an_error() {
        let compressed = zlib_compress(b"cut me short, please");
        let truncated = &compressed[..compressed.len() / 2];

        let mut reader = InflateReader::new_raw(io::Cursor::new(truncated.to_vec()));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
