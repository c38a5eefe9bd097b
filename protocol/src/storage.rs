use crate::protocol::ProtocolSnapshot;
use anyhow::Result;
use rocksdb::{Options, DB};

/// Versioned key for the single deployment blob
const SNAPSHOT_KEY: &[u8] = b"state:v1";

/// Persistence layer using RocksDB.
///
/// One deployment persists as one versioned blob: protocol scalars, the tick
/// ledger (with its bitmap and accumulator), the pending queue and the
/// rebalancer. Snapshots are bincode since the ledger is keyed by raw hashes.
pub struct ProtocolStorage {
    db: DB,
}

impl ProtocolStorage {
    /// Create or open a storage instance
    pub fn new(path: &str) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    /// Persist the full deployment state
    pub fn store_snapshot(&self, snapshot: &ProtocolSnapshot) -> Result<()> {
        let value = bincode::serialize(snapshot)?;
        self.db.put(SNAPSHOT_KEY, value)?;
        Ok(())
    }

    /// Load the deployment state, if one was ever stored
    pub fn load_snapshot(&self) -> Result<Option<ProtocolSnapshot>> {
        match self.db.get(SNAPSHOT_KEY)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}
