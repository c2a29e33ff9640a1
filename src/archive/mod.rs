//! Reader for `.deb` archives.
//!
//! A `.deb` is an `ar` container holding `debian-binary`, a compressed
//! `control.tar` and a `data.tar`. Only the control member is unpacked; the
//! rest is skipped. Signature members written by debsigs/dpkg-sig
//! (`_gpgorigin`, `_gpgbuilder`, ...) are noted so the caller knows whether
//! a signature is present at all.

use flate2::read::GzDecoder;
use std::io::{self, Read};
use thiserror::Error;

const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
const AR_HEADER_LEN: usize = 60;

#[derive(Debug, Error)]
pub enum DebArchiveError {
    #[error("not an ar archive")]
    NotAnArchive,

    #[error("malformed ar member header")]
    BadHeader,

    #[error("unsupported package format version {0:?}")]
    UnsupportedFormat(String),

    #[error("archive has no {0} member")]
    MissingMember(&'static str),

    #[error("control archive has no control file")]
    MissingControl,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What the reader extracted from a package file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebContents {
    /// Raw text of the `control` file, or `None` when the control member uses
    /// a compression the reader does not handle (see `control_member`).
    pub control: Option<String>,
    /// Name of the control member, e.g. `control.tar.xz`.
    pub control_member: String,
    /// Names of signature members found in the archive.
    pub signatures: Vec<String>,
}

impl DebContents {
    pub fn has_signature(&self) -> bool {
        !self.signatures.is_empty()
    }
}

/// Read the control file and signature markers from a `.deb` stream.
#[tracing::instrument(skip(reader))]
pub fn read_deb<R: Read>(mut reader: R) -> Result<DebContents, DebArchiveError> {
    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|_| DebArchiveError::NotAnArchive)?;
    if &magic != AR_MAGIC {
        return Err(DebArchiveError::NotAnArchive);
    }

    let mut seen_version = false;
    let mut control_member = None;
    let mut control = None;
    let mut signatures = Vec::new();

    while let Some((name, size)) = next_member(&mut reader)? {
        let mut member = (&mut reader).take(size);

        if !seen_version {
            if name != "debian-binary" {
                return Err(DebArchiveError::MissingMember("debian-binary"));
            }
            let mut version = String::new();
            member.read_to_string(&mut version)?;
            let version = version.trim().to_string();
            if !version.starts_with("2.") {
                return Err(DebArchiveError::UnsupportedFormat(version));
            }
            seen_version = true;
        } else if let Some(compression) = name.strip_prefix("control.tar") {
            control = read_control(&mut member, compression)?;
            control_member = Some(name.clone());
        } else if name.starts_with("_gpg") {
            signatures.push(name.clone());
        }

        // Drain whatever the member handler left, then the padding byte.
        io::copy(&mut member, &mut io::sink())?;
        if size % 2 == 1 {
            let mut pad = [0u8; 1];
            let _ = reader.read(&mut pad)?;
        }
    }

    if !seen_version {
        return Err(DebArchiveError::MissingMember("debian-binary"));
    }

    let control_member = control_member.ok_or(DebArchiveError::MissingMember("control.tar"))?;
    Ok(DebContents {
        control,
        control_member,
        signatures,
    })
}

/// Parse the next ar member header; `None` at a clean end of archive.
fn next_member<R: Read>(reader: &mut R) -> Result<Option<(String, u64)>, DebArchiveError> {
    let mut header = [0u8; AR_HEADER_LEN];
    let mut filled = 0;
    while filled < AR_HEADER_LEN {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < AR_HEADER_LEN || &header[58..60] != b"`\n" {
        return Err(DebArchiveError::BadHeader);
    }

    let name = String::from_utf8_lossy(&header[0..16])
        .trim_end()
        .trim_end_matches('/')
        .to_string();
    let size = String::from_utf8_lossy(&header[48..58])
        .trim()
        .parse::<u64>()
        .map_err(|_| DebArchiveError::BadHeader)?;

    Ok(Some((name, size)))
}

fn read_control<R: Read>(member: R, compression: &str) -> Result<Option<String>, DebArchiveError> {
    let text = match compression {
        "" => control_from_tar(member)?,
        ".gz" => control_from_tar(GzDecoder::new(member))?,
        ".zst" => control_from_tar(zstd::stream::read::Decoder::new(member)?)?,
        other => {
            log::debug!("Skipping control member with compression {:?}", other);
            return Ok(None);
        }
    };
    Ok(Some(text))
}

fn control_from_tar<R: Read>(reader: R) -> Result<String, DebArchiveError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        if path.trim_start_matches("./") == "control" {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            return Ok(text);
        }
    }
    Err(DebArchiveError::MissingControl)
}
