//! Trace record parsing
//!
//! A trace line holds one entry:
//!
//! ```text
//! name␞type␞inode␞mode␞nlink␞uid␞gid␞size␞blksize␞blocks␞atime␞mtime␞ctime␞linkname␞xattrs␞crtime␞
//! ```
//!
//! `␞` is the delimiter (0x1e unless overridden). Names are full paths.
//! Empty numeric fields read as zero.

use crate::entry::{EntryMeta, EntryRecord, EntryType};
use crate::error::{TraceError, TraceResult};
use crate::trace::scout::find_delim;
use std::fmt::Write;
use std::str::FromStr;

/// Default field delimiter (ASCII record separator)
pub const DEFAULT_DELIMITER: char = '\x1e';

/// Parse one trace line into a record
///
/// Fields are split on raw bytes, so names that are not valid UTF-8 do not
/// shift later fields. Text fields are stored lossily; numeric fields must
/// be ASCII digits.
pub fn parse_record(line: impl AsRef<[u8]>, delim: char) -> TraceResult<EntryRecord> {
    let line = line.as_ref();
    let line = line.strip_suffix(b"\n").unwrap_or(line);

    let mut delim_buf = [0u8; 4];
    let mut fields = Fields {
        rest: Some(line),
        delim: delim.encode_utf8(&mut delim_buf).as_bytes(),
    };

    let name = field(&mut fields, "name")?;
    if name.is_empty() {
        return Err(TraceError::MissingField { field: "name" });
    }

    let tag = field(&mut fields, "type")?;
    let kind = std::str::from_utf8(tag)
        .ok()
        .and_then(EntryType::from_tag)
        .ok_or_else(|| TraceError::UnknownType { tag: text(tag) })?;

    let meta = EntryMeta {
        inode: number(&mut fields, "inode")?,
        mode: number(&mut fields, "mode")?,
        nlink: number(&mut fields, "nlink")?,
        uid: number(&mut fields, "uid")?,
        gid: number(&mut fields, "gid")?,
        size: number(&mut fields, "size")?,
        blksize: number(&mut fields, "blksize")?,
        blocks: number(&mut fields, "blocks")?,
        atime: number(&mut fields, "atime")?,
        mtime: number(&mut fields, "mtime")?,
        ctime: number(&mut fields, "ctime")?,
        crtime: 0,
    };
    let linkname = text(field(&mut fields, "linkname")?);
    let xattrs = text(field(&mut fields, "xattrs")?);
    let crtime = number(&mut fields, "crtime")?;

    Ok(EntryRecord {
        name: text(name),
        kind,
        meta: EntryMeta { crtime, ..meta },
        linkname,
        xattrs,
    })
}

/// Render a record as a trace line (without the trailing newline)
pub fn format_record(record: &EntryRecord, delim: char) -> String {
    let m = &record.meta;
    let mut line = String::with_capacity(record.name.len() + 96);

    for value in [record.name.as_str(), record.kind.tag()] {
        line.push_str(value);
        line.push(delim);
    }
    for value in [m.inode, m.mode as u64, m.nlink, m.uid as u64, m.gid as u64, m.size, m.blksize, m.blocks] {
        let _ = write!(line, "{}{}", value, delim);
    }
    for value in [m.atime, m.mtime, m.ctime] {
        let _ = write!(line, "{}{}", value, delim);
    }
    let _ = write!(
        line,
        "{}{d}{}{d}{}{d}",
        record.linkname,
        record.xattrs,
        m.crtime,
        d = delim
    );

    line
}

/// Byte-wise `split`: the piece after the last delimiter is yielded too
struct Fields<'a> {
    rest: Option<&'a [u8]>,
    delim: &'a [u8],
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest?;
        match find_delim(rest, self.delim) {
            Some(pos) => {
                self.rest = Some(&rest[pos + self.delim.len()..]);
                Some(&rest[..pos])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

fn text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn field<'a>(fields: &mut Fields<'a>, name: &'static str) -> TraceResult<&'a [u8]> {
    fields.next().ok_or(TraceError::MissingField { field: name })
}

fn number<T>(fields: &mut Fields<'_>, name: &'static str) -> TraceResult<T>
where
    T: FromStr + Default,
{
    let raw = field(fields, name)?;
    if raw.is_empty() {
        return Ok(T::default());
    }
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| TraceError::BadField {
            field: name,
            value: text(raw),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: char = DEFAULT_DELIMITER;

    fn line(fields: &[&str]) -> String {
        fields.iter().map(|f| format!("{}{}", f, D)).collect()
    }

    #[test]
    fn test_parse_file_record() {
        let text = line(&[
            "/data/a.txt", "f", "12", "33188", "1", "1000", "100", "4096", "4096", "8", "1", "2", "3",
            "", "user.tag=x", "4",
        ]);
        let rec = parse_record(&text, D).unwrap();

        assert_eq!(rec.name, "/data/a.txt");
        assert_eq!(rec.kind, EntryType::File);
        assert_eq!(rec.meta.inode, 12);
        assert_eq!(rec.meta.mode, 0o100644);
        assert_eq!(rec.meta.size, 4096);
        assert_eq!((rec.meta.atime, rec.meta.mtime, rec.meta.ctime), (1, 2, 3));
        assert_eq!(rec.xattrs, "user.tag=x");
        assert_eq!(rec.meta.crtime, 4);
        assert_eq!(rec.basename(), "a.txt");
    }

    #[test]
    fn test_empty_numbers_are_zero() {
        let text = line(&["/d", "d", "", "", "", "", "", "", "", "", "", "", "", "", "", ""]);
        let rec = parse_record(&text, D).unwrap();
        assert_eq!(rec.kind, EntryType::Directory);
        assert_eq!(rec.meta, EntryMeta::default());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_record("/d", D),
            Err(TraceError::MissingField { field: "type" })
        ));

        let bad_type = line(&["/d", "x", "1"]);
        assert!(matches!(
            parse_record(&bad_type, D),
            Err(TraceError::UnknownType { .. })
        ));

        let bad_size = line(&[
            "/f", "f", "1", "1", "1", "1", "1", "big", "1", "1", "1", "1", "1", "", "", "1",
        ]);
        assert!(matches!(
            parse_record(&bad_size, D),
            Err(TraceError::BadField { field: "size", .. })
        ));

        let short = line(&["/f", "f", "1", "1"]);
        assert!(matches!(
            parse_record(&short, D),
            Err(TraceError::MissingField { field: "uid" })
        ));
    }

    #[test]
    fn test_format_then_parse_with_custom_delimiter() {
        let mut rec = EntryRecord::new(
            "/data/link",
            EntryMeta {
                inode: 7,
                mode: 0o120777,
                size: 6,
                mtime: 1_700_000_000,
                ..Default::default()
            },
        );
        rec.linkname = "target".into();

        let text = format_record(&rec, '|');
        assert!(text.starts_with("/data/link|l|7|"));
        assert_eq!(parse_record(&text, '|').unwrap(), rec);
    }

    #[test]
    fn test_non_utf8_name_keeps_fields_aligned() {
        let mut raw = b"/t/\xff".to_vec();
        raw.extend_from_slice(line(&["", "f", "1", "0", "1", "0", "0", "42", "", "", "", "", "", "", "", ""]).as_bytes());
        let rec = parse_record(&raw, D).unwrap();

        assert_eq!(rec.name, "/t/\u{fffd}");
        assert_eq!(rec.kind, EntryType::File);
        assert_eq!(rec.meta.size, 42);

        let mut bad = b"/t/\xfe".to_vec();
        bad.extend_from_slice(line(&["", "d", "1", "1", "1", "1", "1", "\u{e9}", "1"]).as_bytes());
        assert!(matches!(
            parse_record(&bad, D),
            Err(TraceError::BadField { field: "size", .. })
        ));
    }
}
