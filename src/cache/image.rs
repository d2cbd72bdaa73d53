// src/cache/image.rs

//! Flat byte image of a package cache
//!
//! Layout (all integers little-endian, all offsets relative to the image
//! start so a copy at any address decodes to the same cache):
//!
//! ```text
//! header     signature, format major/minor, dirty flag, native arch and
//!            versioning label (string refs), record counts and sizes,
//!            section offsets, CRC32 of everything after the header
//! hash table u32 package id per bucket
//! strings    string pool bytes
//! records    packages, versions, dependencies, provides, package files,
//!            version files (fixed-size records, slot 0 included)
//! ```
//!
//! A signature, major version, size or checksum mismatch is an
//! [`Error::ImageError`]. A minor version or dirty flag mismatch, or an image
//! built for another versioning system, is [`Error::StaleImage`]: the caller
//! rebuilds instead of using it.

use super::records::{
    Dependency, Package, PackageFile, Provides, RecordReader, RecordWriter, VerFile, Version,
};
use super::strings::{StrRef, StringPool};
use super::PackageCache;
use crate::error::{Error, Result};
use crate::lock::CacheLock;
use crate::version::VersioningSystem;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SIGNATURE: u32 = 0x98FE_76DC;
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;
pub const HEADER_SIZE: usize = 133;

const DIRTY_OFFSET: usize = 8;

/// Decoded header fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Header {
    signature: u32,
    major: u16,
    minor: u16,
    dirty: u8,
    native_arch: StrRef,
    vs_label: StrRef,
    file_list: u32,
    hash_table_size: u32,
    /// (count, record size) per table, in layout order
    tables: [(u32, u16); 6],
    pool_size: u32,
    /// hash table, pool, then the six record tables
    offsets: [u64; 8],
    body_crc: u32,
}

const RECORD_SIZES: [usize; 6] = [
    Package::SIZE,
    Version::SIZE,
    Dependency::SIZE,
    Provides::SIZE,
    PackageFile::SIZE,
    VerFile::SIZE,
];

impl Header {
    fn encode(&self, w: &mut RecordWriter<'_>) {
        w.u32(self.signature);
        w.u16(self.major);
        w.u16(self.minor);
        w.u8(self.dirty);
        w.str_ref(self.native_arch);
        w.str_ref(self.vs_label);
        w.u32(self.file_list);
        w.u32(self.hash_table_size);
        for (count, size) in self.tables {
            w.u32(count);
            w.u16(size);
        }
        w.u32(self.pool_size);
        for offset in self.offsets {
            w.u64(offset);
        }
        w.u32(self.body_crc);
    }

    fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        let mut header = Header {
            signature: r.u32()?,
            major: r.u16()?,
            minor: r.u16()?,
            dirty: r.u8()?,
            native_arch: r.str_ref()?,
            vs_label: r.str_ref()?,
            file_list: r.u32()?,
            hash_table_size: r.u32()?,
            ..Default::default()
        };
        for table in header.tables.iter_mut() {
            *table = (r.u32()?, r.u16()?);
        }
        header.pool_size = r.u32()?;
        for offset in header.offsets.iter_mut() {
            *offset = r.u64()?;
        }
        header.body_crc = r.u32()?;
        Ok(header)
    }
}

fn count_of(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::ImageError(format!("too many {} for an image", what)))
}

/// Serialize a cache into a standalone image
pub fn to_bytes(cache: &PackageCache) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut offsets = [0u64; 8];
    let base = HEADER_SIZE as u64;
    {
        let mut w = RecordWriter::new(&mut body);
        offsets[0] = base;
        for &bucket in &cache.hash_table {
            w.u32(bucket);
        }
    }
    offsets[1] = base + body.len() as u64;
    body.extend_from_slice(cache.strings.as_bytes());

    macro_rules! write_table {
        ($slot:expr, $table:expr) => {{
            offsets[$slot] = base + body.len() as u64;
            let mut w = RecordWriter::new(&mut body);
            for record in &$table {
                record.encode(&mut w);
            }
        }};
    }
    write_table!(2, cache.packages);
    write_table!(3, cache.versions);
    write_table!(4, cache.depends);
    write_table!(5, cache.provides);
    write_table!(6, cache.files);
    write_table!(7, cache.ver_files);

    let lens = [
        cache.packages.len(),
        cache.versions.len(),
        cache.depends.len(),
        cache.provides.len(),
        cache.files.len(),
        cache.ver_files.len(),
    ];
    let mut tables = [(0u32, 0u16); 6];
    for (i, len) in lens.into_iter().enumerate() {
        tables[i] = (count_of(len, "records")?, RECORD_SIZES[i] as u16);
    }

    let header = Header {
        signature: SIGNATURE,
        major: MAJOR_VERSION,
        minor: MINOR_VERSION,
        dirty: 0,
        native_arch: cache.native_arch,
        vs_label: cache.vs_label,
        file_list: cache.file_list,
        hash_table_size: count_of(cache.hash_table.len(), "hash buckets")?,
        tables,
        pool_size: count_of(cache.strings.as_bytes().len(), "string bytes")?,
        offsets,
        body_crc: crc32fast::hash(&body),
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    header.encode(&mut RecordWriter::new(&mut out));
    out.extend_from_slice(&body);
    Ok(out)
}

fn section<'a>(bytes: &'a [u8], offset: u64, len: usize, what: &str) -> Result<&'a [u8]> {
    let start = usize::try_from(offset)
        .map_err(|_| Error::ImageError(format!("{} offset out of range", what)))?;
    start
        .checked_add(len)
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| Error::ImageError(format!("{} section is truncated", what)))
}

fn decode_table<T>(
    bytes: &[u8],
    offset: u64,
    count: u32,
    size: usize,
    what: &str,
    decode: fn(&mut RecordReader<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let data = section(bytes, offset, count as usize * size, what)?;
    let mut r = RecordReader::new(data);
    (0..count).map(|_| decode(&mut r)).collect()
}

/// Restore a cache from image bytes
///
/// `bytes` may start at any address; nothing in the image is absolute.
pub fn from_bytes(bytes: &[u8], vs: Arc<dyn VersioningSystem>) -> Result<PackageCache> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::ImageError(format!(
            "image of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let header = Header::decode(&mut RecordReader::new(&bytes[..HEADER_SIZE]))?;

    if header.signature != SIGNATURE {
        return Err(Error::ImageError(format!(
            "bad signature {:#010x}",
            header.signature
        )));
    }
    if header.major != MAJOR_VERSION {
        return Err(Error::ImageError(format!(
            "format version {} is not supported (expected {})",
            header.major, MAJOR_VERSION
        )));
    }
    if header.minor != MINOR_VERSION {
        return Err(Error::StaleImage(format!(
            "minor version {} differs from {}",
            header.minor, MINOR_VERSION
        )));
    }
    if header.dirty != 0 {
        return Err(Error::StaleImage("image was left dirty".to_string()));
    }
    for (i, (count, size)) in header.tables.iter().enumerate() {
        if *size as usize != RECORD_SIZES[i] {
            return Err(Error::ImageError(format!(
                "record table {} has size {} (expected {})",
                i, size, RECORD_SIZES[i]
            )));
        }
        if *count == 0 {
            return Err(Error::ImageError(format!("record table {} is empty", i)));
        }
    }

    let body = &bytes[HEADER_SIZE..];
    let crc = crc32fast::hash(body);
    if crc != header.body_crc {
        return Err(Error::ImageError(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x}",
            header.body_crc, crc
        )));
    }

    let hash_bytes = section(
        bytes,
        header.offsets[0],
        header.hash_table_size as usize * 4,
        "hash table",
    )?;
    let mut r = RecordReader::new(hash_bytes);
    let hash_table = (0..header.hash_table_size)
        .map(|_| r.u32())
        .collect::<Result<Vec<_>>>()?;
    if hash_table.is_empty() {
        return Err(Error::ImageError("hash table is empty".to_string()));
    }

    let strings = StringPool::from_bytes(section(
        bytes,
        header.offsets[1],
        header.pool_size as usize,
        "string pool",
    )?)?;

    let t = &header.tables;
    let o = &header.offsets;
    let cache = PackageCache {
        native_arch: header.native_arch,
        vs_label: header.vs_label,
        packages: decode_table(bytes, o[2], t[0].0, Package::SIZE, "package", Package::decode)?,
        versions: decode_table(bytes, o[3], t[1].0, Version::SIZE, "version", Version::decode)?,
        depends: decode_table(bytes, o[4], t[2].0, Dependency::SIZE, "dependency", Dependency::decode)?,
        provides: decode_table(bytes, o[5], t[3].0, Provides::SIZE, "provides", Provides::decode)?,
        files: decode_table(bytes, o[6], t[4].0, PackageFile::SIZE, "package file", PackageFile::decode)?,
        ver_files: decode_table(bytes, o[7], t[5].0, VerFile::SIZE, "version file", VerFile::decode)?,
        strings,
        hash_table,
        file_list: header.file_list,
        vs,
    };

    check_links(&cache)?;

    let label = cache.str(cache.vs_label);
    if label != cache.vs.label() {
        return Err(Error::StaleImage(format!(
            "image was built with versioning '{}', not '{}'",
            label,
            cache.vs.label()
        )));
    }
    if cache.native_arch().is_empty() {
        return Err(Error::ImageError("image has no native architecture".to_string()));
    }
    Ok(cache)
}

/// Verify every link and string reference points inside its table
fn check_links(c: &PackageCache) -> Result<()> {
    let bad = |what: &str, id: usize| Error::ImageError(format!("{} {} has a dangling link", what, id));
    let in_range = |raw: u32, len: usize| (raw as usize) < len;
    let str_ok = |r: StrRef| c.strings.contains(r);

    let (np, nv, nd, npr, nf, nvf) = (
        c.packages.len(),
        c.versions.len(),
        c.depends.len(),
        c.provides.len(),
        c.files.len(),
        c.ver_files.len(),
    );

    if !c.hash_table.iter().all(|&p| in_range(p, np)) || !in_range(c.file_list, nf) {
        return Err(Error::ImageError("hash table or file list out of range".to_string()));
    }
    if !str_ok(c.native_arch) || !str_ok(c.vs_label) {
        return Err(Error::ImageError("header string out of range".to_string()));
    }
    for (i, p) in c.packages.iter().enumerate() {
        let ok = [p.name, p.arch, p.section].into_iter().all(str_ok)
            && in_range(p.version_list, nv)
            && in_range(p.current_ver, nv)
            && in_range(p.rev_depends, nd)
            && in_range(p.provides_list, npr)
            && in_range(p.next_package, np);
        if !ok {
            return Err(bad("package", i));
        }
    }
    for (i, v) in c.versions.iter().enumerate() {
        let ok = [v.ver_str, v.arch, v.section, v.hash].into_iter().all(str_ok)
            && in_range(v.parent_pkg, np)
            && (i == 0 || v.parent_pkg != 0)
            && in_range(v.next_ver, nv)
            && in_range(v.depends_list, nd)
            && in_range(v.provides_list, npr)
            && in_range(v.file_list, nvf);
        if !ok {
            return Err(bad("version", i));
        }
    }
    for (i, d) in c.depends.iter().enumerate() {
        let ok = str_ok(d.target_ver)
            && in_range(d.package, np)
            && in_range(d.parent_ver, nv)
            && (i == 0 || (d.package != 0 && d.parent_ver != 0))
            && in_range(d.next_depends, nd)
            && in_range(d.next_rev_depends, nd);
        if !ok {
            return Err(bad("dependency", i));
        }
    }
    for (i, p) in c.provides.iter().enumerate() {
        let ok = str_ok(p.provide_version)
            && in_range(p.parent_pkg, np)
            && in_range(p.version, nv)
            && (i == 0 || (p.parent_pkg != 0 && p.version != 0))
            && in_range(p.next_provides, npr)
            && in_range(p.next_pkg_prov, npr);
        if !ok {
            return Err(bad("provides", i));
        }
    }
    for (i, f) in c.files.iter().enumerate() {
        let ok = [
            f.file_name,
            f.archive,
            f.component,
            f.version,
            f.origin,
            f.label,
            f.architecture,
            f.site,
            f.index_type,
        ]
        .into_iter()
        .all(str_ok)
            && in_range(f.next_file, nf);
        if !ok {
            return Err(bad("package file", i));
        }
    }
    for (i, vf) in c.ver_files.iter().enumerate() {
        if !in_range(vf.file, nf) || !in_range(vf.next_file, nvf) {
            return Err(bad("version file", i));
        }
    }
    Ok(())
}

/// Write the image of `cache` to `path`
///
/// The caller must hold the cache write lock. The image is written to a
/// sibling temporary file and renamed into place.
pub fn save(cache: &PackageCache, path: &Path, lock: &CacheLock) -> Result<()> {
    if !lock.is_held() {
        return Err(Error::LockError(format!(
            "{} is not locked by this process",
            lock.path().display()
        )));
    }
    let bytes = to_bytes(cache)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    info!("Wrote cache image {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Read and validate an image file
pub fn load(path: &Path, vs: Arc<dyn VersioningSystem>) -> Result<PackageCache> {
    let bytes = fs::read(path)
        .map_err(|e| Error::IoError(format!("{}: {}", path.display(), e)))?;
    let cache = from_bytes(&bytes, vs)?;
    debug!(
        "Loaded cache image {}: {} packages",
        path.display(),
        cache.package_count()
    );
    Ok(cache)
}

/// Use the image at `path` if it is valid, otherwise rebuild and save it
pub fn load_or_build<F>(
    path: &Path,
    vs: Arc<dyn VersioningSystem>,
    lock: &CacheLock,
    build: F,
) -> Result<PackageCache>
where
    F: FnOnce() -> Result<PackageCache>,
{
    if path.exists() {
        match load(path, vs) {
            Ok(cache) => return Ok(cache),
            Err(e @ (Error::StaleImage(_) | Error::ImageError(_) | Error::IoError(_))) => {
                warn!("Rebuilding cache: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    let cache = build()?;
    save(&cache, path, lock)?;
    Ok(cache)
}
