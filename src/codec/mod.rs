//! Compression wrappers for TAR-family containers.
//!
//! Compression is an orthogonal dimension of a TAR container: the archive
//! layer only ever sees a decompressed byte stream, and the same codec is
//! applied again when the cleaned archive is written out.

use std::fmt;
use std::io::{self, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::{Error, Result};

/// Compression applied around a TAR stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Plain, uncompressed stream.
    #[default]
    None,
    /// gzip (`.tar.gz`, `.tgz`).
    Gzip,
    /// bzip2 (`.tar.bz2`, `.tbz2`).
    Bzip2,
    /// XZ (`.tar.xz`, `.txz`).
    Xz,
}

/// Known compression signatures.
const SIGNATURES: &[(&[u8], Compression)] = &[
    // gzip: 0x1F 0x8B
    (&[0x1F, 0x8B], Compression::Gzip),
    // bzip2: 'B' 'Z' 'h'
    (&[0x42, 0x5A, 0x68], Compression::Bzip2),
    // XZ: 0xFD '7' 'z' 'X' 'Z' 0x00
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], Compression::Xz),
];

impl Compression {
    /// Returns a human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        }
    }

    /// Returns the media type of the bare compressed stream.
    pub fn media_type(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("application/gzip"),
            Compression::Bzip2 => Some("application/x-bzip2"),
            Compression::Xz => Some("application/x-xz"),
        }
    }

    /// Returns whether this codec was compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Compression::None | Compression::Gzip => true,
            Compression::Bzip2 => cfg!(feature = "bzip2"),
            Compression::Xz => cfg!(feature = "xz"),
        }
    }

    /// Detects the compression of a stream from its first bytes.
    ///
    /// Anything without a known signature is assumed to be uncompressed.
    pub fn from_signature(header: &[u8]) -> Compression {
        SIGNATURES
            .iter()
            .find(|(sig, _)| header.starts_with(sig))
            .map(|(_, c)| *c)
            .unwrap_or(Compression::None)
    }

    #[allow(dead_code)]
    fn unavailable(&self) -> Error {
        Error::UnsupportedFormat {
            media_type: self.media_type().map(str::to_string),
        }
    }

    /// Wraps a reader with the matching decoder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] if the codec was not compiled in.
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        match self {
            Compression::None => Ok(Box::new(reader)),
            Compression::Gzip => Ok(Box::new(MultiGzDecoder::new(reader))),
            #[cfg(feature = "bzip2")]
            Compression::Bzip2 => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
            #[cfg(feature = "xz")]
            Compression::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
            #[allow(unreachable_patterns)]
            _ => Err(self.unavailable()),
        }
    }

    /// Wraps a writer with the matching encoder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] if the codec was not compiled in.
    pub fn encoder<W: Write>(&self, writer: W) -> Result<Encoder<W>> {
        match self {
            Compression::None => Ok(Encoder::Plain(writer)),
            Compression::Gzip => Ok(Encoder::Gzip(GzEncoder::new(
                writer,
                flate2::Compression::default(),
            ))),
            #[cfg(feature = "bzip2")]
            Compression::Bzip2 => Ok(Encoder::Bzip2(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::best(),
            ))),
            #[cfg(feature = "xz")]
            Compression::Xz => Ok(Encoder::Xz(xz2::write::XzEncoder::new(writer, 6))),
            #[allow(unreachable_patterns)]
            _ => Err(self.unavailable()),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A writer applying one of the [`Compression`] codecs.
///
/// The gzip header written here carries no file name and a zero
/// modification time.
pub enum Encoder<W: Write> {
    /// No compression.
    Plain(W),
    /// gzip.
    Gzip(GzEncoder<W>),
    /// bzip2.
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2::write::BzEncoder<W>),
    /// XZ.
    #[cfg(feature = "xz")]
    Xz(xz2::write::XzEncoder<W>),
}

impl<W: Write> fmt::Debug for Encoder<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder").finish_non_exhaustive()
    }
}

impl<W: Write> Encoder<W> {
    /// Finishes the compressed stream and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(w) => Ok(w),
            Encoder::Gzip(e) => e.finish(),
            #[cfg(feature = "bzip2")]
            Encoder::Bzip2(e) => e.finish(),
            #[cfg(feature = "xz")]
            Encoder::Xz(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            #[cfg(feature = "bzip2")]
            Encoder::Bzip2(e) => e.write(buf),
            #[cfg(feature = "xz")]
            Encoder::Xz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(e) => e.flush(),
            #[cfg(feature = "bzip2")]
            Encoder::Bzip2(e) => e.flush(),
            #[cfg(feature = "xz")]
            Encoder::Xz(e) => e.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(compression: Compression) {
        let mut encoder = compression.encoder(Vec::new()).unwrap();
        encoder.write_all(b"hello tar stream").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(Compression::from_signature(&compressed), compression);

        let mut decoder = compression.decoder(compressed.as_slice()).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello tar stream");
    }

    #[test]
    fn test_gzip() {
        round_trip(Compression::Gzip);
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn test_bzip2() {
        round_trip(Compression::Bzip2);
    }

    #[cfg(feature = "xz")]
    #[test]
    fn test_xz() {
        round_trip(Compression::Xz);
    }

    #[test]
    fn test_unknown_signature_is_plain() {
        assert_eq!(Compression::from_signature(b"ustar"), Compression::None);
        assert_eq!(Compression::from_signature(b""), Compression::None);
    }

    #[test]
    fn test_gzip_output_is_deterministic() {
        let encode = || {
            let mut e = Compression::Gzip.encoder(Vec::new()).unwrap();
            e.write_all(b"same input").unwrap();
            e.finish().unwrap()
        };
        assert_eq!(encode(), encode());
    }
}
