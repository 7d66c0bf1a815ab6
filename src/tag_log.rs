// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-record side file for tag/attribute payloads.
//!
//! Each record holds two serialized `map<string,string>`s — tags then
//! attributes — zero-padded out to a configured record size. Records are
//! appended, addressed by byte offset, and never reclaimed on delete.
//!
//! The backing store is guarded by its own mutex rather than relying on the
//! catalog's outer reader/writer lock: `MManager` needs to read tag records
//! while holding only a read lock (to answer `get_all_timeseries_schema`
//! queries), so this type has to support read-through access via `&self`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

type TagMap = BTreeMap<String, String>;

/// A seekable byte store a [`TagLogFile`] can be backed by.
///
/// Named by interface only: the real remote-filesystem adapters this would
/// let a deployment plug in are out of scope for this crate. Only the
/// local-file implementation below ships here.
pub trait SeekableByteStore: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> SeekableByteStore for T {}

/// Random-access, fixed-record tag/attribute store.
pub struct TagLogFile<S: SeekableByteStore = File> {
    store: Mutex<S>,
    record_bytes: usize,
    next_offset: AtomicU64,
}

impl TagLogFile<File> {
    /// Opens (creating if necessary) the tag log at `path`.
    pub fn open(path: &Path, record_bytes: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path).map_err(|e| {
            log::error!("failed to open tag log at {path:?}: {e}");
            e
        })?;
        let len = file.metadata()?.len();

        Ok(Self {
            store: Mutex::new(file),
            record_bytes,
            next_offset: AtomicU64::new(len),
        })
    }
}

impl<S: SeekableByteStore> TagLogFile<S> {
    /// Appends a new record, returning its byte offset.
    pub fn write(&self, tags: &TagMap, attributes: &TagMap) -> Result<u64> {
        let mut buf = Vec::with_capacity(self.record_bytes);
        encode_map(&mut buf, tags)?;
        encode_map(&mut buf, attributes)?;

        if buf.len() > self.record_bytes {
            return Err(Error::PayloadTooLarge {
                size: buf.len(),
                limit: self.record_bytes,
            });
        }

        buf.resize(self.record_bytes, 0);

        let offset = self.next_offset.fetch_add(self.record_bytes as u64, Ordering::SeqCst);

        let mut store = self.store.lock().expect("tag log lock poisoned");
        store.seek(SeekFrom::Start(offset)).and_then(|_| store.write_all(&buf)).map_err(|e| {
            log::error!("failed to write tag record at offset {offset}: {e}");
            e
        })?;

        Ok(offset)
    }

    /// Reads the record at `offset`, returning both tags and attributes.
    pub fn read(&self, offset: u64) -> Result<(TagMap, TagMap)> {
        let mut buf = vec![0u8; self.record_bytes];

        {
            let mut store = self.store.lock().expect("tag log lock poisoned");
            store.seek(SeekFrom::Start(offset)).and_then(|_| store.read_exact(&mut buf)).map_err(|e| {
                log::error!("failed to read tag record at offset {offset}: {e}");
                e
            })?;
        }

        let mut cursor = io::Cursor::new(buf);
        let tags = decode_map(&mut cursor)?;
        let attributes = decode_map(&mut cursor)?;
        Ok((tags, attributes))
    }

    /// Reads only the tag submap at `offset`, discarding attributes.
    pub fn read_tag(&self, offset: u64) -> Result<TagMap> {
        Ok(self.read(offset)?.0)
    }
}

fn encode_map<W: Write>(writer: &mut W, map: &TagMap) -> Result<()> {
    writer.write_u32::<LittleEndian>(map.len() as u32)?;

    for (k, v) in map {
        write_string(writer, k)?;
        write_string(writer, v)?;
    }

    Ok(())
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_u16::<LittleEndian>(s.len() as u16)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn decode_map<R: Read>(reader: &mut R) -> Result<TagMap> {
    let count = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Corrupt(e.to_string()))?;

    let mut map = TagMap::new();

    for _ in 0..count {
        let key = read_string(reader)?;
        let value = read_string(reader)?;
        map.insert(key, value);
    }

    Ok(map)
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader
        .read_u16::<LittleEndian>()
        .map_err(|e| Error::Corrupt(e.to_string()))? as usize;

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::Corrupt(e.to_string()))?;

    String::from_utf8(buf).map_err(|e| Error::Corrupt(e.to_string()))
}
