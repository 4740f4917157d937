//! In-RAM POSIX-like filesystem.
//!
//! A single flat directory of byte files behind the standard open/read/write
//! surface. It underpins OTA staging, script loading and logging, so the
//! handle-table and lifetime rules matter more than raw features:
//!
//! - at most [`FD_MAX`] descriptors are open at once, allocated densely from
//!   the smallest free slot;
//! - a file with a write-capable descriptor open rejects every further open
//!   and every rename/unlink/truncate aimed at it (`EBUSY`);
//! - every operation takes the single filesystem-wide lock for its whole
//!   duration.

use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Maximum simultaneously open descriptors.
pub const FD_MAX: usize = 8;

/// Block size reported by `stat`.
pub const STAT_BLOCK_SIZE: u64 = 512;

/// Allocation granularity for capacity accounting.
pub const ALLOC_BLOCK: usize = 4096;

/// Errno-flavored filesystem errors, rendered with the `strerror` text the
/// wire replies carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    /// ENOENT
    #[error("No such file or directory")]
    NotFound,
    /// EBUSY
    #[error("Device or resource busy")]
    Busy,
    /// EBADF
    #[error("Bad file descriptor")]
    BadFd,
    /// EINVAL
    #[error("Invalid argument")]
    Invalid,
    /// ENOMEM: descriptor table exhausted
    #[error("Cannot allocate memory")]
    NoMemory,
    /// ENOSPC: capacity exceeded
    #[error("No space left on device")]
    NoSpace,
    /// EEXIST
    #[error("File exists")]
    Exists,
    /// EXDEV
    #[error("Invalid cross-device link")]
    CrossMount,
}

/// Open mode, POSIX `O_*` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Create the file when absent.
    pub create: bool,
    /// Discard existing contents.
    pub truncate: bool,
    /// Start the offset at end of file.
    pub append: bool,
}

impl OpenFlags {
    /// `O_RDONLY`
    #[must_use]
    pub fn read_only() -> Self {
        Self { read: true, ..Self::default() }
    }

    /// `O_WRONLY`
    #[must_use]
    pub fn write_only() -> Self {
        Self { write: true, ..Self::default() }
    }

    /// `O_RDWR`
    #[must_use]
    pub fn read_write() -> Self {
        Self { read: true, write: true, ..Self::default() }
    }

    /// Add `O_CREAT`.
    #[must_use]
    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    /// Add `O_TRUNC`.
    #[must_use]
    pub fn truncating(mut self) -> Self {
        self.truncate = true;
        self
    }

    /// Add `O_APPEND`.
    #[must_use]
    pub fn appending(mut self) -> Self {
        self.append = true;
        self
    }
}

/// `lseek` origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the file.
    Set,
    /// Relative to the current offset.
    Cur,
    /// Relative to the end of the file.
    End,
}

/// Mount-root ioctls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamfsIoctl {
    /// Bytes currently allocated.
    GetUsed,
    /// Capacity in bytes.
    GetSize,
    /// Change the capacity (must not undercut current allocation).
    SetSize(usize),
}

/// `stat`/`fstat` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// File length in bytes.
    pub size: u64,
    /// Always [`STAT_BLOCK_SIZE`].
    pub blksize: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Last modification, unix seconds.
    pub mtime: u64,
    /// Creation, unix seconds.
    pub ctime: u64,
    /// The file's `fileno`.
    pub ino: u64,
}

/// One directory entry as yielded by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    /// Unique file number within this filesystem instance.
    pub fileno: u32,
    /// File name (no directory component).
    pub name: String,
}

/// Directory iteration cursor; `next_fileno == -1` means end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirIter {
    next_fileno: i64,
}

#[derive(Debug)]
struct RamFile {
    fileno: u32,
    name: String,
    ctime: u64,
    mtime: u64,
    data: Vec<u8>,
}

impl RamFile {
    fn allocated(&self) -> usize {
        self.data.len().div_ceil(ALLOC_BLOCK) * ALLOC_BLOCK
    }
}

#[derive(Debug, Clone, Copy)]
struct RamFd {
    fileno: u32,
    flags: OpenFlags,
    offset: usize,
    is_dir: bool,
}

#[derive(Debug)]
struct Inner {
    files: Vec<RamFile>,
    fds: [Option<RamFd>; FD_MAX],
    last_fileno: u32,
    capacity: usize,
}

impl Inner {
    fn file(&self, fileno: u32) -> Option<&RamFile> {
        self.files.iter().find(|f| f.fileno == fileno)
    }

    fn file_mut(&mut self, fileno: u32) -> Option<&mut RamFile> {
        self.files.iter_mut().find(|f| f.fileno == fileno)
    }

    fn file_by_name(&self, name: &str) -> Option<&RamFile> {
        self.files.iter().find(|f| f.name == name)
    }

    fn used(&self) -> usize {
        self.files.iter().map(RamFile::allocated).sum()
    }

    fn fd(&self, fd: u8) -> Result<RamFd, FsError> {
        self.fds.get(fd as usize).copied().flatten().ok_or(FsError::BadFd)
    }

    /// Write-open exclusion: any descriptor on the file blocks a write open,
    /// and an existing write descriptor blocks every open.
    fn open_conflicts(&self, fileno: u32, wants_write: bool) -> bool {
        self.fds.iter().flatten().any(|fd| {
            fd.fileno == fileno && (wants_write || fd.flags.write)
        })
    }

    fn write_open(&self, fileno: u32) -> bool {
        self.fds.iter().flatten().any(|fd| fd.fileno == fileno && fd.flags.write)
    }

    fn any_open(&self, fileno: u32) -> bool {
        self.fds.iter().flatten().any(|fd| fd.fileno == fileno)
    }
}

/// Shared handle to the filesystem; clones refer to the same instance.
#[derive(Clone)]
pub struct Ramfs {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl Ramfs {
    /// Create a filesystem with the given byte capacity, stamped by the
    /// system clock.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_secs())
        })
    }

    /// Create a filesystem with an injected clock (tests).
    #[must_use]
    pub fn with_clock(capacity: usize, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                files: Vec::new(),
                fds: [None; FD_MAX],
                last_fileno: 0,
                capacity,
            })),
            clock: Arc::new(clock),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, FsError> {
        self.inner.lock().map_err(|_| FsError::Invalid)
    }

    /// Flat namespace: strip the leading slash, refuse nested paths.
    fn normalize(path: &str) -> Result<&str, FsError> {
        let stripped = path.strip_prefix('/').unwrap_or(path);
        if stripped.contains('/') {
            return Err(FsError::CrossMount);
        }
        Ok(stripped)
    }

    /// Open a file (or the mount root when `path` is `/` or empty).
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<u8, FsError> {
        let now = (self.clock)();
        let mut inner = self.lock()?;

        let name = Self::normalize(path)?;

        if name.is_empty() {
            return Self::install_fd(
                &mut inner,
                RamFd { fileno: 0, flags, offset: 0, is_dir: true },
            );
        }

        let fileno = match inner.file_by_name(name) {
            Some(file) => file.fileno,
            None => {
                if !flags.create {
                    return Err(FsError::NotFound);
                }

                if inner.used() + ALLOC_BLOCK > inner.capacity {
                    return Err(FsError::NoSpace);
                }

                inner.last_fileno += 1;
                let fileno = inner.last_fileno;
                inner.files.push(RamFile {
                    fileno,
                    name: name.to_string(),
                    ctime: now,
                    mtime: now,
                    data: Vec::new(),
                });
                fileno
            },
        };

        if inner.open_conflicts(fileno, flags.write) {
            return Err(FsError::Busy);
        }

        if flags.truncate {
            if let Some(file) = inner.file_mut(fileno) {
                file.data.clear();
                file.mtime = now;
            }
        }

        let offset = if flags.append {
            inner.file(fileno).map_or(0, |f| f.data.len())
        } else {
            0
        };

        Self::install_fd(&mut inner, RamFd { fileno, flags, offset, is_dir: false })
    }

    fn install_fd(inner: &mut Inner, fd: RamFd) -> Result<u8, FsError> {
        let slot = inner.fds.iter().position(Option::is_none).ok_or(FsError::NoMemory)?;
        inner.fds[slot] = Some(fd);
        Ok(slot as u8)
    }

    /// Release a descriptor.
    pub fn close(&self, fd: u8) -> Result<(), FsError> {
        let mut inner = self.lock()?;
        let slot = inner.fds.get_mut(fd as usize).ok_or(FsError::BadFd)?;
        if slot.take().is_none() {
            return Err(FsError::BadFd);
        }
        Ok(())
    }

    /// Read up to `len` bytes at the descriptor's offset.
    pub fn read(&self, fd: u8, len: usize) -> Result<Vec<u8>, FsError> {
        let mut inner = self.lock()?;
        let desc = inner.fd(fd)?;

        if desc.is_dir || !desc.flags.read {
            return Err(FsError::Invalid);
        }

        let file = inner.file(desc.fileno).ok_or(FsError::BadFd)?;
        let available = file.data.len().saturating_sub(desc.offset);
        let take = len.min(available);
        let out = file.data[desc.offset..desc.offset + take].to_vec();

        if let Some(slot) = inner.fds.get_mut(fd as usize).and_then(Option::as_mut) {
            slot.offset += take;
        }

        Ok(out)
    }

    /// Write at the descriptor's offset, extending the file as needed.
    pub fn write(&self, fd: u8, data: &[u8]) -> Result<usize, FsError> {
        let now = (self.clock)();
        let mut inner = self.lock()?;
        let desc = inner.fd(fd)?;

        if desc.is_dir || !desc.flags.write {
            return Err(FsError::BadFd);
        }

        let end = desc.offset + data.len();
        let capacity = inner.capacity;
        let used_other: usize = inner
            .files
            .iter()
            .filter(|f| f.fileno != desc.fileno)
            .map(RamFile::allocated)
            .sum();
        let grown = end.div_ceil(ALLOC_BLOCK) * ALLOC_BLOCK;

        let file = inner.file_mut(desc.fileno).ok_or(FsError::BadFd)?;

        if end > file.data.len() && used_other + grown > capacity {
            return Err(FsError::NoSpace);
        }

        if end > file.data.len() {
            file.data.resize(end, 0);
        }
        file.data[desc.offset..end].copy_from_slice(data);
        file.mtime = now;

        if let Some(slot) = inner.fds.get_mut(fd as usize).and_then(Option::as_mut) {
            slot.offset = end;
        }

        Ok(data.len())
    }

    /// Move the descriptor's offset; the new offset must land inside the
    /// file, `[0, length)`.
    pub fn lseek(&self, fd: u8, offset: i64, whence: Whence) -> Result<u64, FsError> {
        let mut inner = self.lock()?;
        let desc = inner.fd(fd)?;

        if desc.is_dir {
            return Err(FsError::Invalid);
        }

        let len = inner.file(desc.fileno).ok_or(FsError::BadFd)?.data.len() as i64;

        let target = match whence {
            Whence::Set => offset,
            Whence::Cur => desc.offset as i64 + offset,
            Whence::End => len + offset,
        };

        if target < 0 || target >= len {
            return Err(FsError::Invalid);
        }

        if let Some(slot) = inner.fds.get_mut(fd as usize).and_then(Option::as_mut) {
            slot.offset = target as usize;
        }

        Ok(target as u64)
    }

    /// Set a file's length by path. Fails while a writer has it open.
    pub fn truncate(&self, path: &str, len: usize) -> Result<(), FsError> {
        let now = (self.clock)();
        let mut inner = self.lock()?;
        let name = Self::normalize(path)?;

        let fileno = inner.file_by_name(name).ok_or(FsError::NotFound)?.fileno;

        if inner.write_open(fileno) {
            return Err(FsError::Busy);
        }

        Self::resize(&mut inner, fileno, len, now)
    }

    /// Set a file's length through a writable descriptor.
    pub fn ftruncate(&self, fd: u8, len: usize) -> Result<(), FsError> {
        let now = (self.clock)();
        let mut inner = self.lock()?;
        let desc = inner.fd(fd)?;

        if desc.is_dir || !desc.flags.write {
            return Err(FsError::BadFd);
        }

        Self::resize(&mut inner, desc.fileno, len, now)
    }

    fn resize(inner: &mut Inner, fileno: u32, len: usize, now: u64) -> Result<(), FsError> {
        let capacity = inner.capacity;
        let used_other: usize =
            inner.files.iter().filter(|f| f.fileno != fileno).map(RamFile::allocated).sum();
        let grown = len.div_ceil(ALLOC_BLOCK) * ALLOC_BLOCK;

        let file = inner.file_mut(fileno).ok_or(FsError::NotFound)?;

        if len > file.data.len() && used_other + grown > capacity {
            return Err(FsError::NoSpace);
        }

        file.data.resize(len, 0);
        file.data.shrink_to_fit();
        file.mtime = now;
        Ok(())
    }

    /// Remove a file. Fails while any descriptor has it open.
    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        let mut inner = self.lock()?;
        let name = Self::normalize(path)?;

        let fileno = inner.file_by_name(name).ok_or(FsError::NotFound)?.fileno;

        if inner.any_open(fileno) {
            return Err(FsError::Busy);
        }

        inner.files.retain(|f| f.fileno != fileno);
        Ok(())
    }

    /// Rename `from` to `to`, replacing a closed existing target.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let now = (self.clock)();
        let mut inner = self.lock()?;

        let from = Self::normalize(from)?;
        let to = Self::normalize(to)?;

        if to.is_empty() {
            return Err(FsError::Invalid);
        }

        let fileno = inner.file_by_name(from).ok_or(FsError::NotFound)?.fileno;

        if let Some(target) = inner.file_by_name(to) {
            let target_fileno = target.fileno;
            if target_fileno != fileno {
                if inner.any_open(target_fileno) {
                    return Err(FsError::Busy);
                }
                inner.files.retain(|f| f.fileno != target_fileno);
            }
        }

        let file = inner.file_mut(fileno).ok_or(FsError::NotFound)?;
        file.name = to.to_string();
        file.mtime = now;
        Ok(())
    }

    /// Begin iterating the (single, flat) directory.
    pub fn opendir(&self, path: &str) -> Result<DirIter, FsError> {
        let name = Self::normalize(path)?;
        if !name.is_empty() {
            return Err(FsError::NotFound);
        }
        Ok(DirIter { next_fileno: 0 })
    }

    /// Yield the next entry in fileno order, or `None` at the end.
    pub fn readdir(&self, iter: &mut DirIter) -> Option<Dirent> {
        if iter.next_fileno < 0 {
            return None;
        }

        let inner = self.lock().ok()?;
        let next = inner
            .files
            .iter()
            .filter(|f| i64::from(f.fileno) >= iter.next_fileno)
            .min_by_key(|f| f.fileno);

        match next {
            Some(file) => {
                iter.next_fileno = i64::from(file.fileno) + 1;
                Some(Dirent { fileno: file.fileno, name: file.name.clone() })
            },
            None => {
                iter.next_fileno = -1;
                None
            },
        }
    }

    /// `stat` by path.
    pub fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let inner = self.lock()?;
        let name = Self::normalize(path)?;
        let file = inner.file_by_name(name).ok_or(FsError::NotFound)?;
        Ok(Self::stat_of(file))
    }

    /// `fstat` by descriptor.
    pub fn fstat(&self, fd: u8) -> Result<Stat, FsError> {
        let inner = self.lock()?;
        let desc = inner.fd(fd)?;
        if desc.is_dir {
            return Err(FsError::Invalid);
        }
        let file = inner.file(desc.fileno).ok_or(FsError::BadFd)?;
        Ok(Self::stat_of(file))
    }

    fn stat_of(file: &RamFile) -> Stat {
        Stat {
            size: file.data.len() as u64,
            blksize: STAT_BLOCK_SIZE,
            blocks: (file.allocated() as u64).div_ceil(STAT_BLOCK_SIZE),
            mtime: file.mtime,
            ctime: file.ctime,
            ino: u64::from(file.fileno),
        }
    }

    /// Mount-root ioctls; the descriptor must be a directory handle.
    pub fn ioctl(&self, fd: u8, op: RamfsIoctl) -> Result<usize, FsError> {
        let mut inner = self.lock()?;
        let desc = inner.fd(fd)?;

        if !desc.is_dir {
            return Err(FsError::Invalid);
        }

        match op {
            RamfsIoctl::GetUsed => Ok(inner.used()),
            RamfsIoctl::GetSize => Ok(inner.capacity),
            RamfsIoctl::SetSize(size) => {
                if size < inner.used() {
                    return Err(FsError::Invalid);
                }
                inner.capacity = size;
                Ok(size)
            },
        }
    }

    /// Remove every file and reset the fileno counter. Fails while any
    /// descriptor is open.
    pub fn format(&self) -> Result<(), FsError> {
        let mut inner = self.lock()?;
        if inner.fds.iter().flatten().any(|fd| !fd.is_dir) {
            return Err(FsError::Busy);
        }
        inner.files.clear();
        inner.last_fileno = 0;
        Ok(())
    }

    /// (allocated bytes, capacity bytes), as `fs-info` reports them.
    #[must_use]
    pub fn usage(&self) -> (usize, usize) {
        self.lock().map_or((0, 0), |inner| (inner.used(), inner.capacity))
    }

    /// Convenience: read a whole file by path.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let fd = self.open(path, OpenFlags::read_only())?;
        let stat = self.fstat(fd)?;
        let data = self.read(fd, stat.size as usize);
        let _ = self.close(fd);
        data
    }

    /// Convenience: create/overwrite a whole file by path.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let fd = self.open(path, OpenFlags::write_only().create().truncating())?;
        let written = self.write(fd, data);
        let _ = self.close(fd);
        written.map(|_| ())
    }
}

impl std::fmt::Debug for Ramfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ramfs").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> Ramfs {
        Ramfs::with_clock(1 << 20, || 1_700_000_000)
    }

    #[test]
    fn create_write_read_round_trip() {
        let fs = fs();
        fs.write_file("/hello", b"hello world").expect("write");
        assert_eq!(fs.read_file("/hello").expect("read"), b"hello world");
    }

    #[test]
    fn open_missing_without_create_fails() {
        let fs = fs();
        assert_eq!(fs.open("/nope", OpenFlags::read_only()), Err(FsError::NotFound));
    }

    #[test]
    fn fd_table_exhaustion() {
        let fs = fs();
        let mut fds = Vec::new();

        for i in 0..FD_MAX {
            let path = format!("/f{i}");
            fds.push(fs.open(&path, OpenFlags::write_only().create()).expect("slot free"));
        }

        assert_eq!(fs.open("/f9", OpenFlags::write_only().create()), Err(FsError::NoMemory));

        fs.close(fds[3]).expect("close");
        let reused = fs.open("/f9", OpenFlags::write_only().create()).expect("slot reuse");
        assert_eq!(reused, 3);
    }

    #[test]
    fn smallest_free_fd_is_reused() {
        let fs = fs();
        let a = fs.open("/a", OpenFlags::write_only().create()).expect("open");
        let b = fs.open("/b", OpenFlags::write_only().create()).expect("open");
        assert_eq!((a, b), (0, 1));

        fs.close(a).expect("close");
        assert_eq!(fs.open("/c", OpenFlags::write_only().create()).expect("open"), 0);
    }

    #[test]
    fn write_open_excludes_second_writer() {
        let fs = fs();
        fs.write_file("/shared", b"x").expect("create");

        let writer = fs.open("/shared", OpenFlags::write_only()).expect("first writer");
        assert_eq!(fs.open("/shared", OpenFlags::write_only()), Err(FsError::Busy));
        assert_eq!(fs.open("/shared", OpenFlags::read_only()), Err(FsError::Busy));

        fs.close(writer).expect("close");
        let reader = fs.open("/shared", OpenFlags::read_only()).expect("after close");
        // Readers don't exclude each other, but they do exclude writers.
        let reader2 = fs.open("/shared", OpenFlags::read_only()).expect("second reader");
        assert_eq!(fs.open("/shared", OpenFlags::write_only()), Err(FsError::Busy));
        fs.close(reader).expect("close");
        fs.close(reader2).expect("close");
    }

    #[test]
    fn append_positions_at_end() {
        let fs = fs();
        fs.write_file("/log", b"one").expect("create");

        let fd = fs.open("/log", OpenFlags::write_only().appending()).expect("append open");
        fs.write(fd, b"two").expect("write");
        fs.close(fd).expect("close");

        assert_eq!(fs.read_file("/log").expect("read"), b"onetwo");
    }

    #[test]
    fn lseek_bounds() {
        let fs = fs();
        fs.write_file("/f", b"0123456789").expect("create");

        let fd = fs.open("/f", OpenFlags::read_only()).expect("open");
        assert_eq!(fs.lseek(fd, 4, Whence::Set).expect("seek"), 4);
        assert_eq!(fs.read(fd, 2).expect("read"), b"45");
        assert_eq!(fs.lseek(fd, -1, Whence::End).expect("seek"), 9);
        assert_eq!(fs.lseek(fd, -20, Whence::Cur), Err(FsError::Invalid));
        assert_eq!(fs.lseek(fd, 11, Whence::Set), Err(FsError::Invalid));
        fs.close(fd).expect("close");
    }

    #[test]
    fn lseek_to_eof_is_rejected() {
        let fs = fs();
        fs.write_file("/f", b"0123456789").expect("create");

        // The valid range is [0, length): exactly end-of-file is out.
        let fd = fs.open("/f", OpenFlags::read_only()).expect("open");
        assert_eq!(fs.lseek(fd, 0, Whence::End), Err(FsError::Invalid));
        assert_eq!(fs.lseek(fd, 10, Whence::Set), Err(FsError::Invalid));
        assert_eq!(fs.lseek(fd, 9, Whence::Set).expect("last byte"), 9);
        fs.close(fd).expect("close");
    }

    #[test]
    fn truncate_shrinks_and_extends() {
        let fs = fs();
        fs.write_file("/t", b"abcdef").expect("create");

        fs.truncate("/t", 3).expect("shrink");
        assert_eq!(fs.read_file("/t").expect("read"), b"abc");

        fs.truncate("/t", 5).expect("extend");
        assert_eq!(fs.read_file("/t").expect("read"), b"abc\0\0");
    }

    #[test]
    fn truncate_blocked_by_writer() {
        let fs = fs();
        fs.write_file("/t", b"abcdef").expect("create");

        let fd = fs.open("/t", OpenFlags::write_only()).expect("open");
        assert_eq!(fs.truncate("/t", 0), Err(FsError::Busy));
        fs.ftruncate(fd, 2).expect("ftruncate through the writer works");
        fs.close(fd).expect("close");
    }

    #[test]
    fn unlink_blocked_while_open() {
        let fs = fs();
        fs.write_file("/u", b"x").expect("create");

        let fd = fs.open("/u", OpenFlags::read_only()).expect("open");
        assert_eq!(fs.unlink("/u"), Err(FsError::Busy));
        fs.close(fd).expect("close");

        fs.unlink("/u").expect("unlink");
        assert_eq!(fs.unlink("/u"), Err(FsError::NotFound));
    }

    #[test]
    fn rename_replaces_closed_target() {
        let fs = fs();
        fs.write_file("/a", b"from a").expect("create");
        fs.write_file("/b", b"from b").expect("create");

        fs.rename("/a", "/b").expect("rename");

        assert_eq!(fs.read_file("/b").expect("read"), b"from a");
        assert_eq!(fs.stat("/a"), Err(FsError::NotFound));
    }

    #[test]
    fn rename_onto_open_target_is_busy() {
        let fs = fs();
        fs.write_file("/a", b"a").expect("create");
        fs.write_file("/b", b"b").expect("create");

        let fd = fs.open("/b", OpenFlags::write_only()).expect("open");
        assert_eq!(fs.rename("/a", "/b"), Err(FsError::Busy));
        fs.close(fd).expect("close");

        fs.rename("/a", "/b").expect("after close");
    }

    #[test]
    fn rename_across_mounts_rejected() {
        let fs = fs();
        fs.write_file("/a", b"a").expect("create");
        assert_eq!(fs.rename("/a", "/flash/b"), Err(FsError::CrossMount));
    }

    #[test]
    fn readdir_walks_in_fileno_order() {
        let fs = fs();
        fs.write_file("/one", b"1").expect("create");
        fs.write_file("/two", b"2").expect("create");
        fs.write_file("/three", b"3").expect("create");

        let mut iter = fs.opendir("/").expect("opendir");
        let names: Vec<String> =
            std::iter::from_fn(|| fs.readdir(&mut iter)).map(|d| d.name).collect();
        assert_eq!(names, ["one", "two", "three"]);
        assert!(fs.readdir(&mut iter).is_none());
    }

    #[test]
    fn opendir_rejects_files() {
        let fs = fs();
        fs.write_file("/f", b"x").expect("create");
        assert_eq!(fs.opendir("/f"), Err(FsError::NotFound));
    }

    #[test]
    fn stat_reports_blocks_and_times() {
        let fs = fs();
        fs.write_file("/s", &[0u8; 5000]).expect("create");

        let stat = fs.stat("/s").expect("stat");
        assert_eq!(stat.size, 5000);
        assert_eq!(stat.blksize, STAT_BLOCK_SIZE);
        assert_eq!(stat.blocks, 8192 / STAT_BLOCK_SIZE);
        assert_eq!(stat.mtime, 1_700_000_000);
        assert_eq!(stat.ino, 1);
    }

    #[test]
    fn ioctl_capacity_round_trip() {
        let fs = fs();
        fs.write_file("/x", &[0u8; 100]).expect("create");

        let root = fs.open("/", OpenFlags::read_only()).expect("root fd");
        assert_eq!(fs.ioctl(root, RamfsIoctl::GetUsed).expect("used"), ALLOC_BLOCK);
        assert_eq!(fs.ioctl(root, RamfsIoctl::GetSize).expect("size"), 1 << 20);
        fs.ioctl(root, RamfsIoctl::SetSize(1 << 21)).expect("grow");
        assert_eq!(fs.ioctl(root, RamfsIoctl::SetSize(1)), Err(FsError::Invalid));
        fs.close(root).expect("close");

        let file = fs.open("/x", OpenFlags::read_only()).expect("file fd");
        assert_eq!(fs.ioctl(file, RamfsIoctl::GetUsed), Err(FsError::Invalid));
        fs.close(file).expect("close");
    }

    #[test]
    fn capacity_enforced_on_write() {
        let fs = Ramfs::with_clock(ALLOC_BLOCK, || 0);
        fs.write_file("/fits", &[0u8; ALLOC_BLOCK]).expect("exactly one block");
        assert_eq!(fs.write_file("/more", b"x"), Err(FsError::NoSpace));
    }

    #[test]
    fn format_clears_everything() {
        let fs = fs();
        fs.write_file("/a", b"1").expect("create");
        fs.write_file("/b", b"2").expect("create");

        let fd = fs.open("/a", OpenFlags::read_only()).expect("open");
        assert_eq!(fs.format(), Err(FsError::Busy));
        fs.close(fd).expect("close");

        fs.format().expect("format");
        let mut iter = fs.opendir("/").expect("opendir");
        assert!(fs.readdir(&mut iter).is_none());
    }
}
