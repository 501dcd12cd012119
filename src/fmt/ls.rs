//! The -ls long listing

use super::mode::mode_string;
use super::times::local_datetime;
use crate::userdb;
use crate::walk::entry::readlinkat;
use crate::walk::{FileKind, TimeSpec, Visit};
use std::io::{self, Write};

/// Write one `ls -dils`-style line for a stat'd entry.
///
/// `now` decides whether the timestamp shows a clock time (recent files) or
/// a year.
pub fn render_ls(visit: &mut Visit, now: TimeSpec, out: &mut dyn Write) -> io::Result<()> {
    let Some(st) = visit.stat().copied() else {
        return Ok(());
    };

    write!(
        out,
        "{:>9} {:>6} {} {:>3} ",
        st.ino(),
        (st.blocks() + 1) / 2,
        mode_string(st.mode()),
        st.nlink(),
    )?;

    match userdb::user_name(st.uid()) {
        Some(name) => write!(out, " {name:<8}")?,
        None => write!(out, " {:<8}", st.uid())?,
    }
    match userdb::group_name(st.gid()) {
        Some(name) => write!(out, " {name:<8}")?,
        None => write!(out, " {:<8}", st.gid())?,
    }

    write!(out, " {:>8}", st.size())?;

    let mtime = st.mtime();
    let six_months_ago = now.sec - 6 * 30 * 24 * 60 * 60;
    let tomorrow = now.sec + 24 * 60 * 60;
    let dt = local_datetime(mtime).ok_or_else(|| io::Error::from_raw_os_error(libc::EOVERFLOW))?;
    let time_format = if mtime.sec <= six_months_ago || mtime.sec >= tomorrow {
        "%b %e  %Y"
    } else {
        "%b %e %H:%M"
    };
    write!(out, " {}", dt.format(time_format))?;

    write!(out, " ")?;
    out.write_all(visit.path_bytes())?;

    if visit.kind() == FileKind::Link {
        let rel = visit.rel_cstring()?;
        if let Ok(target) = readlinkat(visit.at_fd(), &rel, st.size()) {
            write!(out, " -> ")?;
            out.write_all(&target)?;
        }
    }

    writeln!(out)
}
