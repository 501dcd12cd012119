//! Compiled -printf format programs
//!
//! A format string compiles once into a list of pieces: literal byte runs,
//! `%` directives bundling a format spec with a field selector, and the
//! `\c` flush marker. Compilation validates everything up front, so a
//! malformed format never reaches the walk. A `needs_stat` flag records
//! whether any selected field requires stat data.

use super::mode::mode_string;
use super::times::{ctime_like, is_strftime_letter, strftime_char, TimeField};
use crate::error::{ParseError, ParseResult};
use crate::walk::entry::{fstatat, readlinkat};
use crate::walk::{FileKind, Visit};
use crate::{fstype, userdb};
use std::io::{self, Write};

/// Width/precision/flags for one directive, applied to the rendered value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSpec {
    minus: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl FormatSpec {
    fn is_plain(&self) -> bool {
        *self == FormatSpec::default()
    }

    fn wants_numeric(&self) -> bool {
        self.zero || self.plus || self.alt
    }
}

/// How a field's rendered value is formatted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conv {
    Str,
    Dec,
    Oct,
    Float,
}

/// A field selector in a directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// %b: allocated 512-byte blocks
    Blocks,
    /// %d: depth
    Depth,
    /// %D: device number
    Device,
    /// %f: basename
    Basename,
    /// %F: filesystem type
    Fstype,
    /// %G: numeric gid
    Gid,
    /// %g: group name
    GroupName,
    /// %h: leading directories
    Leading,
    /// %H: the starting path
    Root,
    /// %i: inode
    Inode,
    /// %k: 1 KiB blocks
    KiloBlocks,
    /// %l: symlink target
    LinkTarget,
    /// %m: octal mode
    Mode,
    /// %M: symbolic mode
    ModeString,
    /// %n: hard link count
    Nlink,
    /// %p: full path
    Path,
    /// %P: path with the starting path stripped
    RelPath,
    /// %s: size in bytes
    Size,
    /// %S: sparseness ratio
    Sparseness,
    /// %U: numeric uid
    Uid,
    /// %u: user name
    UserName,
    /// %y: type character
    TypeChar,
    /// %Y: type character of a link's target
    DerefTypeChar,
    /// %a/%c/%t: ctime-style timestamp
    Ctime(TimeField),
    /// %A/%C/%T + letter: strftime subfield
    Strftime(TimeField, char),
}

impl Field {
    fn conv(&self) -> Conv {
        match self {
            Field::Depth => Conv::Dec,
            Field::Mode => Conv::Oct,
            Field::Sparseness => Conv::Float,
            _ => Conv::Str,
        }
    }

    fn needs_stat(&self) -> bool {
        matches!(
            self,
            Field::Blocks
                | Field::Device
                | Field::Fstype
                | Field::Gid
                | Field::GroupName
                | Field::Inode
                | Field::KiloBlocks
                | Field::Mode
                | Field::ModeString
                | Field::Nlink
                | Field::Size
                | Field::Sparseness
                | Field::Uid
                | Field::UserName
                | Field::Ctime(_)
                | Field::Strftime(..)
        )
    }
}

/// One compiled piece of a format program
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    /// Copy these bytes verbatim
    Literal(Vec<u8>),
    /// \c: flush the sink and stop
    Flush,
    /// Insert a formatted field
    Directive { spec: FormatSpec, field: Field },
}

/// A compiled format program
#[derive(Debug, Clone)]
pub struct FormatProgram {
    pieces: Vec<Piece>,
    needs_stat: bool,
}

impl FormatProgram {
    /// Whether rendering needs the stat result filled in.
    pub fn needs_stat(&self) -> bool {
        self.needs_stat
    }
}

fn bad(format: &str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidFormat {
        format: format.to_string(),
        reason: reason.into(),
    }
}

/// Compile a format string.
pub fn compile(format: &str) -> ParseResult<FormatProgram> {
    let mut pieces = Vec::new();
    let mut needs_stat = false;
    let mut literal: Vec<u8> = Vec::new();
    let bytes = format.as_bytes();
    let mut i = 0;

    let flush_literal = |pieces: &mut Vec<Piece>, literal: &mut Vec<u8>| {
        if !literal.is_empty() {
            pieces.push(Piece::Literal(std::mem::take(literal)));
        }
    };

    while i < bytes.len() {
        let c = bytes[i];
        i += 1;

        if c == b'\\' {
            let Some(&esc) = bytes.get(i) else {
                return Err(bad(format, "incomplete escape sequence '\\'"));
            };
            i += 1;

            if (b'0'..b'8').contains(&esc) {
                let mut value = 0u32;
                i -= 1;
                for _ in 0..3 {
                    match bytes.get(i) {
                        Some(&d) if (b'0'..b'8').contains(&d) => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                literal.push(value as u8);
                continue;
            }

            match esc {
                b'a' => literal.push(0x07),
                b'b' => literal.push(0x08),
                b'f' => literal.push(0x0c),
                b'n' => literal.push(b'\n'),
                b'r' => literal.push(b'\r'),
                b't' => literal.push(b'\t'),
                b'v' => literal.push(0x0b),
                b'\\' => literal.push(b'\\'),
                b'c' => {
                    flush_literal(&mut pieces, &mut literal);
                    pieces.push(Piece::Flush);
                    return Ok(FormatProgram { pieces, needs_stat });
                }
                other => {
                    return Err(bad(
                        format,
                        format!("unrecognized escape sequence '\\{}'", other as char),
                    ));
                }
            }
        } else if c == b'%' {
            if bytes.get(i) == Some(&b'%') {
                literal.push(b'%');
                i += 1;
                continue;
            }

            let mut spec = FormatSpec::default();

            // Flags
            loop {
                let Some(&f) = bytes.get(i) else { break };
                let slot = match f {
                    b'#' => &mut spec.alt,
                    b'0' => &mut spec.zero,
                    b'+' => &mut spec.plus,
                    b' ' => &mut spec.space,
                    b'-' => &mut spec.minus,
                    _ => break,
                };
                if *slot {
                    return Err(bad(format, format!("duplicate flag '{}'", f as char)));
                }
                *slot = true;
                i += 1;
            }

            // Field width
            let mut width = None;
            while let Some(&d) = bytes.get(i) {
                if d.is_ascii_digit() {
                    width = Some(width.unwrap_or(0) * 10 + usize::from(d - b'0'));
                    i += 1;
                } else {
                    break;
                }
            }
            spec.width = width;

            // Precision
            if bytes.get(i) == Some(&b'.') {
                i += 1;
                let mut precision = 0;
                while let Some(&d) = bytes.get(i) {
                    if d.is_ascii_digit() {
                        precision = precision * 10 + usize::from(d - b'0');
                        i += 1;
                    } else {
                        break;
                    }
                }
                spec.precision = Some(precision);
            }

            let Some(&letter) = bytes.get(i) else {
                return Err(bad(format, "incomplete format specifier"));
            };
            i += 1;

            let field = match letter {
                b'a' => Field::Ctime(TimeField::Accessed),
                b'b' => Field::Blocks,
                b'c' => Field::Ctime(TimeField::Changed),
                b'd' => Field::Depth,
                b'D' => Field::Device,
                b'f' => Field::Basename,
                b'F' => Field::Fstype,
                b'g' => Field::GroupName,
                b'G' => Field::Gid,
                b'h' => Field::Leading,
                b'H' => Field::Root,
                b'i' => Field::Inode,
                b'k' => Field::KiloBlocks,
                b'l' => Field::LinkTarget,
                b'm' => Field::Mode,
                b'M' => Field::ModeString,
                b'n' => Field::Nlink,
                b'p' => Field::Path,
                b'P' => Field::RelPath,
                b's' => Field::Size,
                b'S' => Field::Sparseness,
                b't' => Field::Ctime(TimeField::Modified),
                b'u' => Field::UserName,
                b'U' => Field::Uid,
                b'y' => Field::TypeChar,
                b'Y' => Field::DerefTypeChar,
                b'A' | b'C' | b'T' => {
                    let time_field = match letter {
                        b'A' => TimeField::Accessed,
                        b'C' => TimeField::Changed,
                        _ => TimeField::Modified,
                    };
                    let Some(&sub) = bytes.get(i) else {
                        return Err(bad(
                            format,
                            format!("incomplete time specifier '%{}'", letter as char),
                        ));
                    };
                    i += 1;
                    if !is_strftime_letter(sub as char) {
                        return Err(bad(
                            format,
                            format!(
                                "unrecognized time specifier '%{}{}'",
                                letter as char, sub as char
                            ),
                        ));
                    }
                    Field::Strftime(time_field, sub as char)
                }
                other => {
                    return Err(bad(
                        format,
                        format!("unrecognized format specifier '%{}'", other as char),
                    ));
                }
            };

            if spec.wants_numeric() && field.conv() == Conv::Str {
                return Err(bad(
                    format,
                    format!("invalid numeric flags for '%{}'", letter as char),
                ));
            }

            needs_stat = needs_stat || field.needs_stat();

            flush_literal(&mut pieces, &mut literal);
            pieces.push(Piece::Directive { spec, field });
        } else {
            literal.push(c);
        }
    }

    flush_literal(&mut pieces, &mut literal);
    Ok(FormatProgram { pieces, needs_stat })
}

/// Expand a compiled program for one file.
///
/// When [`FormatProgram::needs_stat`] is set, the caller must have filled the
/// visit's stat; directives that find it missing render nothing.
pub fn render(program: &FormatProgram, visit: &mut Visit, out: &mut dyn Write) -> io::Result<()> {
    for piece in &program.pieces {
        match piece {
            Piece::Literal(bytes) => out.write_all(bytes)?,
            Piece::Flush => {
                out.flush()?;
            }
            Piece::Directive { spec, field } => render_field(spec, field, visit, out)?,
        }
    }
    Ok(())
}

fn render_field(
    spec: &FormatSpec,
    field: &Field,
    visit: &mut Visit,
    out: &mut dyn Write,
) -> io::Result<()> {
    match field {
        Field::Depth => return put_int(out, spec, visit.depth() as i64, false),
        Field::Mode => {
            if let Some(st) = visit.stat() {
                let mode = i64::from(st.mode() & 0o7777);
                return put_int(out, spec, mode, true);
            }
            return Ok(());
        }
        Field::Sparseness => {
            if let Some(st) = visit.stat() {
                let sparsity = 512.0 * st.blocks() as f64 / st.size() as f64;
                return put_float(out, spec, sparsity);
            }
            return Ok(());
        }
        _ => {}
    }

    let rendered: Vec<u8> = match field {
        Field::Path => visit.path_bytes().to_vec(),
        Field::Basename => visit.name_bytes().to_vec(),
        Field::Root => visit.root().as_os_str().as_encoded_bytes().to_vec(),
        Field::RelPath => {
            let root_len = visit.root().as_os_str().len();
            let mut rel = &visit.path_bytes()[root_len.min(visit.path_bytes().len())..];
            if rel.first() == Some(&b'/') {
                rel = &rel[1..];
            }
            rel.to_vec()
        }
        Field::Leading => {
            let path = visit.path_bytes();
            let nameoff = visit.name_offset();
            if nameoff > 0 {
                let len = if nameoff > 1 { nameoff - 1 } else { nameoff };
                path[..len].to_vec()
            } else if path.first() == Some(&b'/') {
                b"/".to_vec()
            } else {
                b".".to_vec()
            }
        }
        Field::LinkTarget => {
            if visit.kind() != FileKind::Link {
                return Ok(());
            }
            let size_hint = visit.stat().map_or(0, |st| st.size());
            let rel = visit.rel_cstring()?;
            readlinkat(visit.at_fd(), &rel, size_hint)?
        }
        Field::TypeChar => visit.kind().type_char().to_string().into_bytes(),
        Field::DerefTypeChar => {
            let ch = if visit.kind() != FileKind::Link {
                visit.kind().type_char()
            } else {
                let rel = visit.rel_cstring()?;
                match fstatat(visit.at_fd(), &rel, true) {
                    Ok(st) => st.kind().type_char(),
                    Err(err) => match err.raw_os_error() {
                        Some(libc::ELOOP) => 'L',
                        Some(libc::ENOENT) => 'N',
                        _ => 'U',
                    },
                }
            };
            ch.to_string().into_bytes()
        }
        Field::Blocks => match visit.stat() {
            Some(st) => st.blocks().to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::KiloBlocks => match visit.stat() {
            Some(st) => ((st.blocks() + 1) / 2).to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::Device => match visit.stat() {
            Some(st) => st.dev().to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::Inode => match visit.stat() {
            Some(st) => st.ino().to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::Nlink => match visit.stat() {
            Some(st) => st.nlink().to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::Size => match visit.stat() {
            Some(st) => st.size().to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::Uid => match visit.stat() {
            Some(st) => st.uid().to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::Gid => match visit.stat() {
            Some(st) => st.gid().to_string().into_bytes(),
            None => return Ok(()),
        },
        Field::UserName => match visit.stat() {
            Some(st) => match userdb::user_name(st.uid()) {
                Some(name) => name.into_bytes(),
                None => st.uid().to_string().into_bytes(),
            },
            None => return Ok(()),
        },
        Field::GroupName => match visit.stat() {
            Some(st) => match userdb::group_name(st.gid()) {
                Some(name) => name.into_bytes(),
                None => st.gid().to_string().into_bytes(),
            },
            None => return Ok(()),
        },
        Field::ModeString => match visit.stat() {
            Some(st) => mode_string(st.mode()).into_bytes(),
            None => return Ok(()),
        },
        Field::Fstype => match visit.stat() {
            Some(st) => fstype::fstype_name(st.dev()).into_bytes(),
            None => return Ok(()),
        },
        Field::Ctime(tf) => match visit.stat() {
            Some(st) => match ctime_like(tf.of(st)) {
                Some(rendered) => rendered.into_bytes(),
                None => return Err(io::Error::from_raw_os_error(libc::EOVERFLOW)),
            },
            None => return Ok(()),
        },
        Field::Strftime(tf, letter) => match visit.stat() {
            Some(st) => match strftime_char(tf.of(st), *letter) {
                Some(rendered) => rendered.into_bytes(),
                None => return Err(io::Error::from_raw_os_error(libc::EOVERFLOW)),
            },
            None => return Ok(()),
        },
        Field::Depth | Field::Mode | Field::Sparseness => unreachable!("handled above"),
    };

    put_str(out, spec, &rendered)
}

/// Apply a spec to a string value.
fn put_str(out: &mut dyn Write, spec: &FormatSpec, bytes: &[u8]) -> io::Result<()> {
    let truncated = match spec.precision {
        Some(p) if p < bytes.len() => &bytes[..p],
        _ => bytes,
    };

    if spec.is_plain() {
        return out.write_all(truncated);
    }

    let width = spec.width.unwrap_or(0);
    let pad = width.saturating_sub(truncated.len());
    if spec.minus {
        out.write_all(truncated)?;
        write_repeated(out, b' ', pad)
    } else {
        write_repeated(out, b' ', pad)?;
        out.write_all(truncated)
    }
}

/// Apply a spec to an integer value.
fn put_int(out: &mut dyn Write, spec: &FormatSpec, value: i64, octal: bool) -> io::Result<()> {
    let magnitude = value.unsigned_abs();
    let mut digits = if octal {
        format!("{magnitude:o}")
    } else {
        magnitude.to_string()
    };

    if octal && spec.alt && !digits.starts_with('0') {
        digits.insert(0, '0');
    }

    if let Some(precision) = spec.precision {
        while digits.len() < precision {
            digits.insert(0, '0');
        }
    }

    let sign: &[u8] = if value < 0 {
        b"-"
    } else if octal {
        b""
    } else if spec.plus {
        b"+"
    } else if spec.space {
        b" "
    } else {
        b""
    };

    let body_len = sign.len() + digits.len();
    let width = spec.width.unwrap_or(0);
    let pad = width.saturating_sub(body_len);

    if spec.minus {
        out.write_all(sign)?;
        out.write_all(digits.as_bytes())?;
        write_repeated(out, b' ', pad)
    } else if spec.zero && spec.precision.is_none() {
        out.write_all(sign)?;
        write_repeated(out, b'0', pad)?;
        out.write_all(digits.as_bytes())
    } else {
        write_repeated(out, b' ', pad)?;
        out.write_all(sign)?;
        out.write_all(digits.as_bytes())
    }
}

/// Apply a spec to a float value, rendered %g style.
fn put_float(out: &mut dyn Write, spec: &FormatSpec, value: f64) -> io::Result<()> {
    let digits = g_format(value.abs(), spec.precision.unwrap_or(6));

    let sign: &[u8] = if value.is_sign_negative() && value != 0.0 {
        b"-"
    } else if spec.plus {
        b"+"
    } else if spec.space {
        b" "
    } else {
        b""
    };

    let body_len = sign.len() + digits.len();
    let width = spec.width.unwrap_or(0);
    let pad = width.saturating_sub(body_len);

    if spec.minus {
        out.write_all(sign)?;
        out.write_all(digits.as_bytes())?;
        write_repeated(out, b' ', pad)
    } else if spec.zero {
        out.write_all(sign)?;
        write_repeated(out, b'0', pad)?;
        out.write_all(digits.as_bytes())
    } else {
        write_repeated(out, b' ', pad)?;
        out.write_all(sign)?;
        out.write_all(digits.as_bytes())
    }
}

/// printf %g: shortest of fixed and scientific with the given number of
/// significant digits, trailing zeros stripped.
fn g_format(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return "inf".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let precision = precision.max(1);
    let exponent = value.log10().floor() as i32;

    if exponent < -4 || exponent >= precision as i32 {
        let mantissa = format!("{:.*}", precision - 1, value / 10f64.powi(exponent));
        let mantissa = trim_fraction(&mantissa);
        format!("{mantissa}e{}{:02}", if exponent < 0 { '-' } else { '+' }, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn write_repeated(out: &mut dyn Write, byte: u8, count: usize) -> io::Result<()> {
    const PAD: [u8; 64] = [b' '; 64];
    const ZEROS: [u8; 64] = [b'0'; 64];
    let block: &[u8] = if byte == b'0' { &ZEROS } else { &PAD };

    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(block.len());
        out.write_all(&block[..n])?;
        remaining -= n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_of(format: &str) -> (FormatSpec, Field) {
        let program = compile(format).unwrap();
        match &program.pieces[..] {
            [Piece::Directive { spec, field }] => (spec.clone(), field.clone()),
            other => panic!("unexpected pieces: {other:?}"),
        }
    }

    #[test]
    fn test_compile_literals_and_escapes() {
        let program = compile("a\\tb\\n\\101").unwrap();
        assert_eq!(
            program.pieces,
            vec![Piece::Literal(b"a\tb\nA".to_vec())]
        );
        assert!(!program.needs_stat());
    }

    #[test]
    fn test_compile_percent_escape() {
        let program = compile("100%%").unwrap();
        assert_eq!(program.pieces, vec![Piece::Literal(b"100%".to_vec())]);
    }

    #[test]
    fn test_flush_stops_compilation() {
        let program = compile("x\\cignored").unwrap();
        assert_eq!(
            program.pieces,
            vec![Piece::Literal(b"x".to_vec()), Piece::Flush]
        );
    }

    #[test]
    fn test_needs_stat_tracking() {
        assert!(!compile("%p %d %y\n").unwrap().needs_stat());
        assert!(compile("%s").unwrap().needs_stat());
        assert!(compile("%TY").unwrap().needs_stat());
    }

    #[test]
    fn test_directive_spec_parsing() {
        let (spec, field) = spec_of("%-10.3p");
        assert!(spec.minus);
        assert_eq!(spec.width, Some(10));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(field, Field::Path);
    }

    #[test]
    fn test_strftime_directive() {
        let (_, field) = spec_of("%T@");
        assert_eq!(field, Field::Strftime(TimeField::Modified, '@'));
    }

    #[test]
    fn test_compile_errors() {
        assert!(compile("%").is_err());
        assert!(compile("%q").is_err());
        assert!(compile("\\q").is_err());
        assert!(compile("abc\\").is_err());
        assert!(compile("%T").is_err());
        assert!(compile("%Tq").is_err());
        assert!(compile("%--p").is_err());
    }

    #[test]
    fn test_numeric_flags_rejected_for_strings() {
        assert!(compile("%010s").is_err());
        assert!(compile("%+p").is_err());
        assert!(compile("%#f").is_err());
        // but fine for numeric conversions
        assert!(compile("%05d").is_ok());
        assert!(compile("%#m").is_ok());
        assert!(compile("%010S").is_ok());
    }

    #[test]
    fn test_put_str_width() {
        let spec = spec_of("%8f").0;
        let mut out = Vec::new();
        put_str(&mut out, &spec, b"abc").unwrap();
        assert_eq!(out, b"     abc");

        let spec = spec_of("%-8f").0;
        let mut out = Vec::new();
        put_str(&mut out, &spec, b"abc").unwrap();
        assert_eq!(out, b"abc     ");

        let spec = spec_of("%.2f").0;
        let mut out = Vec::new();
        put_str(&mut out, &spec, b"abc").unwrap();
        assert_eq!(out, b"ab");
    }

    #[test]
    fn test_put_int_flags() {
        let spec = spec_of("%05d").0;
        let mut out = Vec::new();
        put_int(&mut out, &spec, 42, false).unwrap();
        assert_eq!(out, b"00042");

        let spec = spec_of("%+d").0;
        let mut out = Vec::new();
        put_int(&mut out, &spec, 42, false).unwrap();
        assert_eq!(out, b"+42");

        let spec = spec_of("%#m").0;
        let mut out = Vec::new();
        put_int(&mut out, &spec, 0o644, true).unwrap();
        assert_eq!(out, b"0644");

        let spec = spec_of("%m").0;
        let mut out = Vec::new();
        put_int(&mut out, &spec, 0o644, true).unwrap();
        assert_eq!(out, b"644");
    }

    #[test]
    fn test_g_format() {
        assert_eq!(g_format(0.0, 6), "0");
        assert_eq!(g_format(1.0, 6), "1");
        assert_eq!(g_format(0.5, 6), "0.5");
        assert_eq!(g_format(1.25, 6), "1.25");
        assert_eq!(g_format(123456.0, 6), "123456");
        assert_eq!(g_format(0.0001, 6), "0.0001");
        assert_eq!(g_format(0.00001, 6), "1e-05");
        assert_eq!(g_format(10000000.0, 6), "1e+07");
        assert_eq!(g_format(f64::INFINITY, 6), "inf");
    }
}
