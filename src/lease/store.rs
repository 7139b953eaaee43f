use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use super::{offset_of, Acquisition, LeaseRecord, HEADER_SIZE, MAGIC, RECORD_SIZE, STORE_LEN};
use crate::{
    error::{LeaseError, Result},
    interface::RequesterId,
    util::clock::Clock,
};

/// Chunk used when zero-filling a fresh store.
const FILL_CHUNK: usize = 4096;

/// Persistent table of lease records, one slot per token.
///
/// Every acquisition runs read, check, write and flush under one store-wide
/// lock, so all mutations form a single total order.
pub struct LeaseStore {
    file: Mutex<File>,
    path: PathBuf,
    ttl: i64,
    clock: Arc<dyn Clock>,
}

impl LeaseStore {
    /// Opens the store at `path`, creating it if needed.
    ///
    /// A file with the wrong length or magic is truncated and rebuilt from
    /// scratch before this returns.
    pub fn open(path: impl AsRef<Path>, ttl: i64, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        match fs::symlink_metadata(&path) {
            Ok(meta) if !meta.file_type().is_file() => {
                return Err(LeaseError::NotRegularFile { path });
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(LeaseError::StoreOpen { path, source }),
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| LeaseError::StoreOpen {
                path: path.clone(),
                source,
            })?;

        if !Self::is_valid(&mut file)? {
            tracing::warn!(path = %path.display(), "lease store missing or invalid, reinitializing");
            Self::reinitialize(&mut file)?;
        }

        tracing::debug!(path = %path.display(), ttl, "lease store open");
        Ok(Self {
            file: Mutex::new(file),
            path,
            ttl,
            clock,
        })
    }

    fn is_valid(file: &mut File) -> Result<bool> {
        let len = file
            .metadata()
            .map_err(LeaseError::store_io("stat store"))?
            .len();
        if len != STORE_LEN {
            return Ok(false);
        }

        let mut magic = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))
            .map_err(LeaseError::store_io("seek header"))?;
        file.read_exact(&mut magic)
            .map_err(LeaseError::store_io("read header"))?;
        Ok(magic == MAGIC)
    }

    fn reinitialize(file: &mut File) -> Result<()> {
        file.set_len(0)
            .map_err(LeaseError::store_io("truncate store"))?;
        file.seek(SeekFrom::Start(0))
            .map_err(LeaseError::store_io("seek header"))?;
        file.write_all(&MAGIC)
            .map_err(LeaseError::store_io("write header"))?;

        let zeros = [0u8; FILL_CHUNK];
        let mut remaining = STORE_LEN - HEADER_SIZE;
        while remaining > 0 {
            let n = remaining.min(FILL_CHUNK as u64) as usize;
            file.write_all(&zeros[..n])
                .map_err(LeaseError::store_io("zero-fill store"))?;
            remaining -= n as u64;
        }

        file.sync_all()
            .map_err(LeaseError::store_io("flush reinitialized store"))
    }

    /// Tries to lease `token` to `owner`, stamping the record with
    /// `acquired_at` on success.
    ///
    /// Succeeds when the slot is unleased, already held by `owner`, or held
    /// by a lease that has expired. A granted record is durable when this
    /// returns; a rejected one is left untouched.
    pub fn try_acquire(
        &self,
        token: u16,
        owner: RequesterId,
        acquired_at: i64,
    ) -> Result<Acquisition> {
        let mut file = self.file.lock();

        let existing = Self::read_slot(&mut file, token)?;
        let now = self.clock.now();
        if !existing.grants(owner, now, self.ttl) {
            tracing::trace!(token, owner, holder = existing.owner, now, "lease held");
            return Ok(Acquisition::TokenNotAvailable);
        }

        let record = LeaseRecord::new(owner, acquired_at);
        file.seek(SeekFrom::Start(offset_of(token)))
            .map_err(LeaseError::store_io("seek record"))?;
        file.write_all(&record.to_bytes())
            .map_err(LeaseError::store_io("write record"))?;
        file.sync_data()
            .map_err(LeaseError::store_io("flush record"))?;

        Ok(Acquisition::Granted)
    }

    /// Reads the current record for `token`.
    pub fn record(&self, token: u16) -> Result<LeaseRecord> {
        let mut file = self.file.lock();
        Self::read_slot(&mut file, token)
    }

    fn read_slot(file: &mut File, token: u16) -> Result<LeaseRecord> {
        let mut buf = [0u8; RECORD_SIZE];
        file.seek(SeekFrom::Start(offset_of(token)))
            .map_err(LeaseError::store_io("seek record"))?;
        file.read_exact(&mut buf)
            .map_err(LeaseError::store_io("read record"))?;
        Ok(LeaseRecord::from_bytes(&buf))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use tempfile::TempDir;

    use super::*;
    use crate::util::clock::ManualClock;

    const TTL: i64 = 10;

    fn open_at(dir: &TempDir, clock: Arc<ManualClock>) -> LeaseStore {
        LeaseStore::open(dir.path().join("db"), TTL, clock).expect("open store")
    }

    #[test]
    fn open_creates_a_zeroed_store() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_at(&dir, Arc::new(ManualClock::new(0)));

        let bytes = fs::read(store.path()).expect("read store");
        assert_eq!(bytes.len() as u64, STORE_LEN);
        assert_eq!(&bytes[..8], &MAGIC);
        assert!(bytes[8..].iter().all(|b| *b == 0));
        assert!(store.record(u16::MAX).unwrap().is_unleased());
    }

    #[test]
    fn reopening_is_byte_identical() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("db");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        drop(LeaseStore::open(&path, TTL, clock.clone()).unwrap());
        let first = fs::read(&path).unwrap();
        drop(LeaseStore::open(&path, TTL, clock).unwrap());
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn valid_store_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(50));
        let store = open_at(&dir, clock.clone());
        assert_eq!(store.try_acquire(9, 42, 50).unwrap(), Acquisition::Granted);
        drop(store);

        let store = open_at(&dir, clock);
        assert_eq!(store.record(9).unwrap(), LeaseRecord::new(42, 50));
    }

    #[test]
    fn wrong_magic_reinitializes() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(0));
        let store = open_at(&dir, clock.clone());
        store.try_acquire(3, 11, 0).unwrap();
        let path = store.path().to_path_buf();
        drop(store);

        let mut bytes = fs::read(&path).unwrap();
        bytes[0] = b'X';
        fs::write(&path, &bytes).unwrap();

        let store = open_at(&dir, clock);
        assert!(store.record(3).unwrap().is_unleased());
        assert_eq!(&fs::read(&path).unwrap()[..8], &MAGIC);
    }

    #[test]
    fn wrong_length_reinitializes() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("db");
        let mut foreign = MAGIC.to_vec();
        foreign.extend_from_slice(&[0xFF; 100]);
        fs::write(&path, &foreign).unwrap();

        let store = LeaseStore::open(&path, TTL, Arc::new(ManualClock::new(0))).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), STORE_LEN);
        assert!(store.record(0).unwrap().is_unleased());
    }

    #[test]
    fn directory_is_not_a_store() {
        let dir = TempDir::new().expect("tempdir");
        let err = LeaseStore::open(dir.path(), TTL, Arc::new(ManualClock::new(0)))
            .err()
            .expect("directory rejected");
        assert!(matches!(err, LeaseError::NotRegularFile { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_not_followed() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("real");
        fs::write(&target, b"").unwrap();
        let link = dir.path().join("db");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = LeaseStore::open(&link, TTL, Arc::new(ManualClock::new(0)))
            .err()
            .expect("symlink rejected");
        assert!(matches!(err, LeaseError::NotRegularFile { .. }));
    }

    #[test]
    fn ttl_boundary() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(1_000));
        let store = open_at(&dir, clock.clone());
        assert_eq!(store.try_acquire(5, 1, 1_000).unwrap(), Acquisition::Granted);

        clock.set(1_000 + TTL - 1);
        assert_eq!(
            store.try_acquire(5, 2, clock.now()).unwrap(),
            Acquisition::TokenNotAvailable
        );
        assert_eq!(store.record(5).unwrap(), LeaseRecord::new(1, 1_000));

        clock.set(1_000 + TTL);
        assert_eq!(store.try_acquire(5, 2, clock.now()).unwrap(), Acquisition::Granted);
        assert_eq!(store.record(5).unwrap(), LeaseRecord::new(2, 1_000 + TTL));
    }

    #[test]
    fn owner_always_reenters() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(0));
        let store = open_at(&dir, clock.clone());
        store.try_acquire(8, 77, 0).unwrap();

        clock.set(3);
        assert_eq!(store.try_acquire(8, 77, 3).unwrap(), Acquisition::Granted);
        clock.set(500);
        assert_eq!(store.try_acquire(8, 77, 500).unwrap(), Acquisition::Granted);
        assert_eq!(store.record(8).unwrap().acquired_at, 500);
    }

    #[test]
    fn concurrent_acquisitions_have_one_winner() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_at(&dir, Arc::new(ManualClock::new(0)));

        let winners: Vec<RequesterId> = thread::scope(|s| {
            let handles: Vec<_> = (1..=16u32)
                .map(|owner| {
                    let store = &store;
                    s.spawn(move || (owner, store.try_acquire(21, owner, 0).unwrap()))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|(_, outcome)| *outcome == Acquisition::Granted)
                .map(|(owner, _)| owner)
                .collect()
        });

        assert_eq!(winners.len(), 1);
        assert_eq!(store.record(21).unwrap().owner, winners[0]);
    }

    #[test]
    fn slots_are_independent() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_at(&dir, Arc::new(ManualClock::new(0)));
        for token in [0u16, 1, 2, 1000, u16::MAX] {
            assert_eq!(
                store.try_acquire(token, u32::from(token) + 1, 0).unwrap(),
                Acquisition::Granted
            );
        }
        let owners: HashSet<_> = [0u16, 1, 2, 1000, u16::MAX]
            .iter()
            .map(|t| store.record(*t).unwrap().owner)
            .collect();
        assert_eq!(owners.len(), 5);
    }
}
