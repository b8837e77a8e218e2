use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use parking_lot::Mutex;

use super::ArchiveFile;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

const GEMF_VERSION: u32 = 4;
const GEMF_TILE_SIZE: u32 = 256;
/// Size of an index entry: u64 data offset and u32 data length.
const INDEX_ENTRY_SIZE: u64 = 12;

#[derive(Debug, Clone, Copy)]
struct GemfRange {
    zoom: u32,
    x_min: u32,
    x_max: u32,
    y_min: u32,
    y_max: u32,
    source_index: u32,
    offset: u64,
}

impl GemfRange {
    fn contains(&self, key: &TileKey) -> bool {
        key.zoom == self.zoom
            && (self.x_min..=self.x_max).contains(&key.x)
            && (self.y_min..=self.y_max).contains(&key.y)
    }

    /// Position of the index entry of a tile inside the range.
    fn index_offset(&self, key: &TileKey) -> Option<u64> {
        let rows = self.y_max as u64 - self.y_min as u64 + 1;
        let column = key.x as u64 - self.x_min as u64;
        let row = key.y as u64 - self.y_min as u64;
        let position = column.checked_mul(rows)?.checked_add(row)?;
        position
            .checked_mul(INDEX_ENTRY_SIZE)?
            .checked_add(self.offset)
    }
}

struct DataFile {
    file: Mutex<File>,
    len: u64,
}

/// GEMF archive.
///
/// Large archives are split into `<name>.gemf`, `<name>.gemf-1`, `<name>.gemf-2` and so on. Data
/// offsets address the concatenation of all the parts.
pub struct GemfArchive {
    files: Vec<DataFile>,
    sources: Vec<(u32, String)>,
    ranges: Vec<GemfRange>,
    ignore_source: AtomicBool,
}

impl GemfArchive {
    /// Opens the archive with all its parts and reads the header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TileError> {
        let path = path.as_ref();
        let mut files = vec![open_part(path)?];
        for index in 1.. {
            let mut part = path.as_os_str().to_owned();
            part.push(format!("-{index}"));
            let part = PathBuf::from(part);
            if !part.is_file() {
                break;
            }

            files.push(open_part(&part)?);
        }

        let (sources, ranges) = {
            let mut base = files[0].file.lock();
            base.seek(SeekFrom::Start(0))?;
            read_header(&mut BufReader::new(&mut *base), files[0].len)?
        };

        Ok(Self {
            files,
            sources,
            ranges,
            ignore_source: AtomicBool::new(false),
        })
    }

    fn find_range(&self, source: &TileSource, key: &TileKey) -> Option<&GemfRange> {
        let source_index = if self.ignore_source.load(Ordering::Relaxed) {
            None
        } else {
            let (index, _) = self
                .sources
                .iter()
                .find(|(_, name)| name == source.name())?;
            Some(*index)
        };

        self.ranges.iter().find(|range| {
            range.contains(key) && source_index.map_or(true, |index| index == range.source_index)
        })
    }

    fn read_data(&self, mut offset: u64, len: u32) -> Result<Bytes, TileError> {
        let total: u64 = self.files.iter().map(|file| file.len).sum();
        if offset.saturating_add(len as u64) > total {
            return Err(TileError::Decoding(format!(
                "GEMF tile data at {offset} with length {len} is outside the archive"
            )));
        }

        let mut part = 0;
        while part < self.files.len() - 1 && offset >= self.files[part].len {
            offset -= self.files[part].len;
            part += 1;
        }

        let mut file = self.files[part].file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0; len as usize];
        file.read_exact(&mut data)?;

        Ok(data.into())
    }
}

fn open_part(path: &Path) -> Result<DataFile, TileError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    Ok(DataFile {
        file: Mutex::new(file),
        len,
    })
}

type Header = (Vec<(u32, String)>, Vec<GemfRange>);

/// Sizes and counts in the header are checked against the length of the base file before anything
/// is allocated for them.
fn read_header(reader: &mut impl Read, file_len: u64) -> Result<Header, TileError> {
    let check_size = |what: &str, count: u32, item_size: u64| {
        if count as u64 * item_size > file_len {
            Err(TileError::Decoding(format!(
                "GEMF {what} {count} does not fit into the file"
            )))
        } else {
            Ok(count as usize)
        }
    };

    let version = reader.read_u32::<BigEndian>()?;
    if version != GEMF_VERSION {
        return Err(TileError::Decoding(format!("unsupported GEMF version {version}")));
    }

    let tile_size = reader.read_u32::<BigEndian>()?;
    if tile_size != GEMF_TILE_SIZE {
        return Err(TileError::Decoding(format!("unsupported GEMF tile size {tile_size}")));
    }

    let source_count = check_size("source count", reader.read_u32::<BigEndian>()?, 8)?;
    let mut sources = Vec::with_capacity(source_count);
    for _ in 0..source_count {
        let index = reader.read_u32::<BigEndian>()?;
        let name_len = check_size("source name length", reader.read_u32::<BigEndian>()?, 1)?;
        let mut name = vec![0; name_len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| TileError::Decoding("GEMF source name is not valid UTF-8".into()))?;
        sources.push((index, name));
    }

    let range_count = check_size("range count", reader.read_u32::<BigEndian>()?, 32)?;
    let mut ranges = Vec::with_capacity(range_count);
    for _ in 0..range_count {
        let range = GemfRange {
            zoom: reader.read_u32::<BigEndian>()?,
            x_min: reader.read_u32::<BigEndian>()?,
            x_max: reader.read_u32::<BigEndian>()?,
            y_min: reader.read_u32::<BigEndian>()?,
            y_max: reader.read_u32::<BigEndian>()?,
            source_index: reader.read_u32::<BigEndian>()?,
            offset: reader.read_u64::<BigEndian>()?,
        };
        if range.x_min > range.x_max || range.y_min > range.y_max {
            return Err(TileError::Decoding(format!("invalid GEMF range {range:?}")));
        }
        ranges.push(range);
    }

    Ok((sources, ranges))
}

impl ArchiveFile for GemfArchive {
    fn tile_bytes(&self, source: &TileSource, key: &TileKey) -> Result<Option<Bytes>, TileError> {
        let Some(range) = self.find_range(source, key) else {
            return Ok(None);
        };

        let index_offset = range
            .index_offset(key)
            .ok_or_else(|| TileError::Decoding(format!("GEMF index of tile {key} overflows")))?;
        let (data_offset, data_len) = {
            let mut base = self.files[0].file.lock();
            base.seek(SeekFrom::Start(index_offset))?;
            (base.read_u64::<BigEndian>()?, base.read_u32::<BigEndian>()?)
        };

        self.read_data(data_offset, data_len).map(Some)
    }

    fn tile_sources(&self) -> Vec<String> {
        self.sources.iter().map(|(_, name)| name.clone()).collect()
    }

    fn set_ignore_tile_source(&self, ignore: bool) {
        self.ignore_source.store(ignore, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    /// Writes an archive with one source and one range of two tiles `1/0/0` and `1/1/0`. With
    /// `split`, the second tile goes to the `-1` part.
    fn write_archive(path: &Path, source: &str, tiles: [&[u8]; 2], split: bool) {
        let header_len = 4 * 3 + (8 + source.len() as u64) + 4 + 32;
        let index_len = 2 * INDEX_ENTRY_SIZE;
        let data_start = header_len + index_len;

        let mut base = vec![];
        base.write_u32::<BigEndian>(GEMF_VERSION).expect("written");
        base.write_u32::<BigEndian>(GEMF_TILE_SIZE).expect("written");
        base.write_u32::<BigEndian>(1).expect("written");
        base.write_u32::<BigEndian>(0).expect("written");
        base.write_u32::<BigEndian>(source.len() as u32).expect("written");
        base.write_all(source.as_bytes()).expect("written");
        base.write_u32::<BigEndian>(1).expect("written");
        for value in [1, 0, 1, 0, 0, 0] {
            base.write_u32::<BigEndian>(value).expect("written");
        }
        base.write_u64::<BigEndian>(header_len).expect("written");

        let mut offset = data_start;
        for tile in tiles {
            base.write_u64::<BigEndian>(offset).expect("written");
            base.write_u32::<BigEndian>(tile.len() as u32).expect("written");
            offset += tile.len() as u64;
        }
        assert_eq!(base.len() as u64, data_start);

        base.write_all(tiles[0]).expect("written");
        if split {
            std::fs::write(path, base).expect("written");
            let mut part = path.as_os_str().to_owned();
            part.push("-1");
            std::fs::write(PathBuf::from(part), tiles[1]).expect("written");
        } else {
            base.write_all(tiles[1]).expect("written");
            std::fs::write(path, base).expect("written");
        }
    }

    #[test]
    fn reads_tiles() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tiles.gemf");
        write_archive(&path, "Mapnik", [b"first", b"second"], false);

        let archive = GemfArchive::open(&path).expect("opened");
        let source = TileSource::osm();
        assert_eq!(archive.tile_sources(), vec!["Mapnik"]);
        assert_eq!(
            archive.tile_bytes(&source, &TileKey::new(1, 0, 0)).expect("read"),
            Some(Bytes::from_static(b"first"))
        );
        assert_eq!(
            archive.tile_bytes(&source, &TileKey::new(1, 1, 0)).expect("read"),
            Some(Bytes::from_static(b"second"))
        );
        assert_eq!(archive.tile_bytes(&source, &TileKey::new(1, 0, 1)).expect("read"), None);
        assert_eq!(archive.tile_bytes(&source, &TileKey::new(2, 0, 0)).expect("read"), None);
    }

    #[test]
    fn reads_split_archive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tiles.gemf");
        write_archive(&path, "Mapnik", [b"first", b"second"], true);

        let archive = GemfArchive::open(&path).expect("opened");
        assert_eq!(
            archive
                .tile_bytes(&TileSource::osm(), &TileKey::new(1, 1, 0))
                .expect("read"),
            Some(Bytes::from_static(b"second"))
        );
    }

    #[test]
    fn source_is_checked_unless_ignored() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tiles.gemf");
        write_archive(&path, "Cycle", [b"first", b"second"], false);

        let archive = GemfArchive::open(&path).expect("opened");
        let key = TileKey::new(1, 0, 0);
        assert_eq!(archive.tile_bytes(&TileSource::osm(), &key).expect("read"), None);

        archive.set_ignore_tile_source(true);
        assert!(archive.tile_bytes(&TileSource::osm(), &key).expect("read").is_some());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tiles.gemf");
        std::fs::write(&path, [0, 0, 0, 3, 0, 0, 1, 0]).expect("written");

        assert!(matches!(GemfArchive::open(&path), Err(TileError::Decoding(_))));
    }

    fn header(counts: [u32; 3]) -> Vec<u8> {
        let [source_count, name_len, range_count] = counts;
        let mut bytes = vec![];
        for value in [GEMF_VERSION, GEMF_TILE_SIZE, source_count, 0, name_len] {
            bytes.write_u32::<BigEndian>(value).expect("written");
        }
        bytes.write_all(b"Mapnik").expect("written");
        bytes.write_u32::<BigEndian>(range_count).expect("written");
        bytes
    }

    #[test]
    fn header_counts_larger_than_file_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tiles.gemf");

        for counts in [[u32::MAX, 6, 0], [1, u32::MAX, 0], [1, 6, u32::MAX]] {
            std::fs::write(&path, header(counts)).expect("written");
            assert!(
                matches!(GemfArchive::open(&path), Err(TileError::Decoding(_))),
                "header {counts:?} must be rejected"
            );
        }
    }

    #[test]
    fn index_offset_of_full_range_does_not_overflow() {
        let range = GemfRange {
            zoom: 31,
            x_min: 0,
            x_max: u32::MAX,
            y_min: 0,
            y_max: u32::MAX,
            source_index: 0,
            offset: 100,
        };

        assert_eq!(range.index_offset(&TileKey::new(31, 0, 1)), Some(112));
        assert_eq!(range.index_offset(&TileKey::new(31, u32::MAX, u32::MAX)), None);
    }

    #[test]
    fn tile_data_outside_archive_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tiles.gemf");
        write_archive(&path, "Mapnik", [b"first", b"second"], false);

        let archive = GemfArchive::open(&path).expect("opened");
        assert!(matches!(archive.read_data(u64::MAX - 2, u32::MAX), Err(TileError::Decoding(_))));
        assert_eq!(archive.read_data(archive.files[0].len - 6, 6).expect("read"), Bytes::from_static(b"second"));
    }
}
