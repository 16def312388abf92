//! Entry types and per-directory summaries
//!
//! These types carry filesystem metadata from `lstat`/`readdir` or from a
//! trace record into the per-directory databases.

use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};

/// Type of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryType {
    /// Regular file
    File = 0,
    /// Directory
    Directory = 1,
    /// Symbolic link
    Symlink = 2,
    /// Block device
    BlockDevice = 3,
    /// Character device
    CharDevice = 4,
    /// Named pipe (FIFO)
    Fifo = 5,
    /// Unix socket
    Socket = 6,
    /// Unknown type
    Unknown = 255,
}

impl EntryType {
    /// Convert from mode bits
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o100000 => EntryType::File,
            0o040000 => EntryType::Directory,
            0o120000 => EntryType::Symlink,
            0o060000 => EntryType::BlockDevice,
            0o020000 => EntryType::CharDevice,
            0o010000 => EntryType::Fifo,
            0o140000 => EntryType::Socket,
            _ => EntryType::Unknown,
        }
    }

    /// Convert from a `readdir` file type (does not follow links)
    pub fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_file() {
            EntryType::File
        } else if ft.is_dir() {
            EntryType::Directory
        } else if ft.is_symlink() {
            EntryType::Symlink
        } else if ft.is_block_device() {
            EntryType::BlockDevice
        } else if ft.is_char_device() {
            EntryType::CharDevice
        } else if ft.is_fifo() {
            EntryType::Fifo
        } else if ft.is_socket() {
            EntryType::Socket
        } else {
            EntryType::Unknown
        }
    }

    /// Convert from the single-character tag used in traces and databases
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "f" => Some(EntryType::File),
            "d" => Some(EntryType::Directory),
            "l" => Some(EntryType::Symlink),
            "b" => Some(EntryType::BlockDevice),
            "c" => Some(EntryType::CharDevice),
            "p" => Some(EntryType::Fifo),
            "s" => Some(EntryType::Socket),
            _ => None,
        }
    }

    /// Single-character tag
    pub fn tag(&self) -> &'static str {
        match self {
            EntryType::File => "f",
            EntryType::Directory => "d",
            EntryType::Symlink => "l",
            EntryType::BlockDevice => "b",
            EntryType::CharDevice => "c",
            EntryType::Fifo => "p",
            EntryType::Socket => "s",
            EntryType::Unknown => "?",
        }
    }

    /// Check if this is a regular file
    pub fn is_file(&self) -> bool {
        *self == EntryType::File
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        *self == EntryType::Directory
    }

    /// Check if this is a symbolic link
    pub fn is_symlink(&self) -> bool {
        *self == EntryType::Symlink
    }

    /// Entries that get a row in the `entries` table
    pub fn is_indexed(&self) -> bool {
        self.is_file() || self.is_symlink()
    }
}

/// Stat metadata for one entry
///
/// Opaque to the scheduler: work items carry it so a directory does not
/// have to be stat'ed twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMeta {
    pub inode: u64,
    /// File mode (type + permissions)
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: u64,
    /// Number of 512-byte blocks allocated
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    /// Creation time, when the source knows it (0 otherwise)
    pub crtime: i64,
}

impl EntryMeta {
    /// Capture metadata from `lstat`
    pub fn from_metadata(md: &Metadata) -> Self {
        Self {
            inode: md.ino(),
            mode: md.mode(),
            nlink: md.nlink(),
            uid: md.uid(),
            gid: md.gid(),
            size: md.size(),
            blksize: md.blksize(),
            blocks: md.blocks(),
            atime: md.atime(),
            mtime: md.mtime(),
            ctime: md.ctime(),
            crtime: md
                .created()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        }
    }

    /// Get the entry type from mode
    pub fn entry_type(&self) -> EntryType {
        EntryType::from_mode(self.mode)
    }

    /// Permission bits without the type
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// One row destined for a per-directory database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Entry name (a full path for trace records)
    pub name: String,
    pub kind: EntryType,
    pub meta: EntryMeta,
    /// Symlink target, empty otherwise
    pub linkname: String,
    /// Extended attributes, stored verbatim
    pub xattrs: String,
}

impl EntryRecord {
    /// Create a record with no link target or xattrs
    pub fn new(name: impl Into<String>, meta: EntryMeta) -> Self {
        Self {
            name: name.into(),
            kind: meta.entry_type(),
            meta,
            linkname: String::new(),
            xattrs: String::new(),
        }
    }

    /// Last path component of the name
    pub fn basename(&self) -> &str {
        let trimmed = self.name.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        }
    }
}

/// Statistics collected while processing one directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSummary {
    /// Regular files directly in this directory
    pub files: u64,
    /// Symlinks directly in this directory
    pub links: u64,
    /// Subdirectories directly in this directory
    pub subdirs: u64,
    /// Anything else (devices, fifos, sockets)
    pub others: u64,
    /// Total size of files directly in this directory
    pub bytes: u64,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_mtime: Option<i64>,
    pub max_mtime: Option<i64>,
}

impl DirSummary {
    /// Add an entry to these stats
    pub fn add_entry(&mut self, kind: EntryType, meta: &EntryMeta) {
        match kind {
            EntryType::File => {
                self.files += 1;
                self.bytes += meta.size;
                self.min_size = Some(self.min_size.map_or(meta.size, |m| m.min(meta.size)));
                self.max_size = Some(self.max_size.map_or(meta.size, |m| m.max(meta.size)));
            }
            EntryType::Directory => {
                self.subdirs += 1;
                return;
            }
            EntryType::Symlink => {
                self.links += 1;
            }
            _ => {
                self.others += 1;
                return;
            }
        }
        self.min_mtime = Some(self.min_mtime.map_or(meta.mtime, |m| m.min(meta.mtime)));
        self.max_mtime = Some(self.max_mtime.map_or(meta.mtime, |m| m.max(meta.mtime)));
    }

    /// Total number of entries
    pub fn total_entries(&self) -> u64 {
        self.files + self.links + self.subdirs + self.others
    }
}
