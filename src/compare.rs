use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};

const CHUNK: usize = 64 * 1024;

/// Decide whether `src` must be copied over `dest`.
///
/// True when `dest` is missing, unreadable, or differs from `src` in any
/// byte. Matching sizes and timestamps are never trusted: an interrupted
/// earlier run can leave a destination of the right length with the wrong
/// contents. An unreadable `src` is an error.
pub fn needs_copy(src: &Path, dest: &Path) -> Result<bool> {
    let mut source = File::open(src).with_context(|| format!("open source {}", src.display()))?;
    let src_len = source
        .metadata()
        .with_context(|| format!("stat source {}", src.display()))?
        .len();

    let mut target = match File::open(dest) {
        Ok(file) => file,
        Err(_) => return Ok(true),
    };
    match target.metadata() {
        Ok(meta) if meta.is_file() && meta.len() == src_len => {}
        _ => return Ok(true),
    }

    let mut src_buf = vec![0u8; CHUNK];
    let mut dest_buf = vec![0u8; CHUNK];
    loop {
        let read = read_full(&mut source, &mut src_buf)
            .with_context(|| format!("read source {}", src.display()))?;
        let dest_read = match read_full(&mut target, &mut dest_buf) {
            Ok(n) => n,
            Err(_) => return Ok(true),
        };
        if read != dest_read || src_buf[..read] != dest_buf[..dest_read] {
            return Ok(true);
        }
        if read == 0 {
            return Ok(false);
        }
    }
}

/// Fill `buf` as far as the reader allows; returns fewer bytes only at EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
