use std::ops::Bound;

use crossbeam_channel::{Receiver, Sender};
use heed::{Database, Env, RoTxn, RwTxn, types::Bytes};
use tracing::{debug, error, trace, warn};
use worldlog::store::check_batch;
use worldlog::{
    ADMIN_TARGET, ChangeRecord, Direction, NewRecord, RecordId, Scope, StoreError, StoreResult,
    Timestamp,
};

pub enum Request {
    Append(NewRecord, Sender<StoreResult<RecordId>>),
    Query(Scope, Sender<StoreResult<Vec<ChangeRecord>>>),
    MutateBatch(Vec<RecordId>, Direction, Sender<StoreResult<usize>>),
    Purge(Timestamp, Sender<StoreResult<usize>>),
    Begin(Sender<StoreResult<()>>),
    CommitAndReopen(Sender<StoreResult<()>>),
    End(Sender<StoreResult<()>>),
}

/// The two LMDB databases of a change log.
///
/// `records` maps big-endian ids to encoded records. `by_time` holds one
/// empty-valued key per record: the length-prefixed world name, then the
/// order-preserving timestamp, then the id. A range over it yields one
/// world's records from a point in time onwards.
#[derive(Clone, Copy)]
pub struct Tables {
    pub records: Database<Bytes, Bytes>,
    pub by_time: Database<Bytes, Bytes>,
}

/// Serve requests until every sender is gone, then commit.
pub fn run(env: &Env, tables: Tables, last_id: RecordId, requests: &Receiver<Request>) {
    let mut writer = Writer {
        env,
        tables,
        last_id,
        long: None,
    };

    for request in requests {
        writer.handle(request);
    }

    if let Err(err) = writer.end() {
        error!(target: ADMIN_TARGET, "Final commit on close failed: {err}");
    }
    debug!("LMDB writer stopped");
}

pub fn decode_key(key: &[u8]) -> Option<RecordId> {
    <[u8; 8]>::try_from(key).ok().map(RecordId::from_be_bytes)
}

/// Index every record of a log written before `by_time` existed.
pub fn rebuild_index(env: &Env, tables: Tables) -> StoreResult<usize> {
    let mut txn = env.write_txn().map_err(heed_err)?;
    let mut keys = Vec::new();
    for entry in tables.records.iter(&txn).map_err(heed_err)? {
        let (_, bytes) = entry.map_err(heed_err)?;
        keys.push(index_key(&decode(bytes)?)?);
    }
    for key in &keys {
        tables.by_time.put(&mut txn, key, NO_VALUE).map_err(heed_err)?;
    }
    txn.commit().map_err(heed_err)?;
    Ok(keys.len())
}

const NO_VALUE: &[u8] = &[];

/// Length-prefixed world name.
fn world_prefix(world: &str) -> StoreResult<Vec<u8>> {
    let len = u32::try_from(world.len())
        .map_err(|_| StoreError::TransactionAborted("world name too long".to_string()))?;
    let mut key = Vec::with_capacity(4 + world.len() + 16);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(world.as_bytes());
    Ok(key)
}

/// Big-endian with the sign bit flipped, so negative times sort first.
fn time_bytes(timestamp: Timestamp) -> [u8; 8] {
    ((timestamp as u64) ^ (1 << 63)).to_be_bytes()
}

fn index_key(record: &ChangeRecord) -> StoreResult<Vec<u8>> {
    let mut key = world_prefix(&record.world)?;
    key.extend_from_slice(&time_bytes(record.timestamp));
    key.extend_from_slice(&record.id.to_be_bytes());
    Ok(key)
}

/// Timestamp and id from the tail of a `by_time` key.
fn split_index_key(key: &[u8]) -> StoreResult<(Timestamp, RecordId)> {
    let corrupt = || StoreError::TransactionAborted("corrupt time index key".to_string());
    let tail = key
        .len()
        .checked_sub(16)
        .and_then(|at| key.get(at..))
        .ok_or_else(corrupt)?;
    let (time, id) = tail.split_at(8);
    let time = u64::from_be_bytes(time.try_into().map_err(|_| corrupt())?) ^ (1 << 63);
    let id = RecordId::from_be_bytes(id.try_into().map_err(|_| corrupt())?);
    Ok((time as Timestamp, id))
}

fn heed_err(err: heed::Error) -> StoreError {
    match err {
        heed::Error::Io(err) => StoreError::ConnectionLost(err.to_string()),
        other => StoreError::TransactionAborted(other.to_string()),
    }
}

fn encode(record: &ChangeRecord) -> StoreResult<Vec<u8>> {
    bincode::serialize(record)
        .map_err(|err| StoreError::TransactionAborted(format!("failed to encode record: {err}")))
}

fn decode(bytes: &[u8]) -> StoreResult<ChangeRecord> {
    bincode::deserialize(bytes)
        .map_err(|err| StoreError::TransactionAborted(format!("corrupt record: {err}")))
}

struct Writer<'env> {
    env: &'env Env,
    tables: Tables,
    last_id: RecordId,
    /// Open between `Begin` and `End`; appends go here.
    long: Option<RwTxn<'env>>,
}

impl Writer<'_> {
    fn handle(&mut self, request: Request) {
        // A dropped reply receiver only means the caller gave up.
        match request {
            Request::Append(record, reply) => {
                let _ = reply.send(self.append(record));
            }
            Request::Query(scope, reply) => {
                let _ = reply.send(self.query(&scope));
            }
            Request::MutateBatch(ids, direction, reply) => {
                let _ = reply.send(self.isolated(|writer| writer.flip(&ids, direction)));
            }
            Request::Purge(cutoff, reply) => {
                let _ = reply.send(self.isolated(|writer| writer.delete_older(cutoff)));
            }
            Request::Begin(reply) => {
                let _ = reply.send(self.begin());
            }
            Request::CommitAndReopen(reply) => {
                let _ = reply.send(self.end().and_then(|()| self.begin()));
            }
            Request::End(reply) => {
                let _ = reply.send(self.end());
            }
        }
    }

    fn begin(&mut self) -> StoreResult<()> {
        if self.long.is_none() {
            self.long = Some(self.env.write_txn().map_err(heed_err)?);
            trace!("Opened long transaction");
        }
        Ok(())
    }

    fn end(&mut self) -> StoreResult<()> {
        if let Some(txn) = self.long.take() {
            txn.commit().map_err(heed_err)?;
            trace!("Committed long transaction");
        }
        Ok(())
    }

    /// Run `op` in its own transaction, outside the long one.
    fn isolated<T>(&mut self, op: impl FnOnce(&Self) -> StoreResult<T>) -> StoreResult<T> {
        let reopen = self.long.is_some();
        self.end()?;
        let result = op(self);
        if reopen {
            if let Err(err) = self.begin() {
                warn!(target: ADMIN_TARGET, "Could not reopen long transaction: {err}");
            }
        }
        result
    }

    fn append(&mut self, record: NewRecord) -> StoreResult<RecordId> {
        let id = self.last_id + 1;
        let record = record.into_record(id);
        let bytes = encode(&record)?;
        let key = id.to_be_bytes();
        let time_key = index_key(&record)?;
        let tables = self.tables;
        let put = |txn: &mut RwTxn<'_>| -> StoreResult<()> {
            tables.records.put(txn, &key, &bytes).map_err(heed_err)?;
            tables
                .by_time
                .put(txn, &time_key, NO_VALUE)
                .map_err(heed_err)
        };

        if let Some(txn) = self.long.as_mut() {
            put(txn)?;
        } else {
            let mut txn = self.env.write_txn().map_err(heed_err)?;
            put(&mut txn)?;
            txn.commit().map_err(heed_err)?;
        }

        self.last_id = id;
        trace!("Appended record {id}");
        Ok(id)
    }

    fn query(&self, scope: &Scope) -> StoreResult<Vec<ChangeRecord>> {
        let matched = match &self.long {
            Some(txn) => self.select(txn, scope)?,
            None => {
                let txn = self.env.read_txn().map_err(heed_err)?;
                self.select(&txn, scope)?
            }
        };
        debug!("Query matched {} records", matched.len());
        Ok(matched)
    }

    fn select(&self, txn: &RoTxn<'_>, scope: &Scope) -> StoreResult<Vec<ChangeRecord>> {
        match &scope.world {
            Some(world) => self.seek(txn, world, scope),
            None => self.scan(txn, scope),
        }
    }

    /// Walk one world's slice of the time index from `scope.since` on.
    fn seek(&self, txn: &RoTxn<'_>, world: &str, scope: &Scope) -> StoreResult<Vec<ChangeRecord>> {
        let mut lower = world_prefix(world)?;
        let mut upper = lower.clone();
        lower.extend_from_slice(&time_bytes(scope.since.unwrap_or(Timestamp::MIN)));
        upper.extend_from_slice(&[u8::MAX; 16]);
        let bounds = (
            Bound::Included(lower.as_slice()),
            Bound::Included(upper.as_slice()),
        );

        let mut matched = Vec::new();
        for entry in self.tables.by_time.range(txn, &bounds).map_err(heed_err)? {
            let (key, _) = entry.map_err(heed_err)?;
            let (_, id) = split_index_key(key)?;
            let Some(record) = self.get(txn, id)? else {
                warn!(target: ADMIN_TARGET, "Time index points at missing record {id}");
                continue;
            };
            if scope.matches(&record) {
                matched.push(record);
            }
        }

        // index order is by time; callers expect id order
        matched.sort_unstable_by_key(|record| record.id);
        Ok(matched)
    }

    fn scan(&self, txn: &RoTxn<'_>, scope: &Scope) -> StoreResult<Vec<ChangeRecord>> {
        let mut matched = Vec::new();
        for entry in self.tables.records.iter(txn).map_err(heed_err)? {
            let (_, bytes) = entry.map_err(heed_err)?;
            let record = decode(bytes)?;
            if scope.matches(&record) {
                matched.push(record);
            }
        }
        Ok(matched)
    }

    fn get(&self, txn: &RoTxn<'_>, id: RecordId) -> StoreResult<Option<ChangeRecord>> {
        self.tables
            .records
            .get(txn, &id.to_be_bytes())
            .map_err(heed_err)?
            .map(decode)
            .transpose()
    }

    /// Check then flip every flag; the transaction aborts on any mismatch.
    fn flip(&self, ids: &[RecordId], direction: Direction) -> StoreResult<usize> {
        let mut txn = self.env.write_txn().map_err(heed_err)?;

        let mut records = Vec::with_capacity(ids.len());
        check_batch(ids, direction, |id| {
            let record = self.get(&txn, id)?;
            let flag = record.as_ref().map(|record| record.rolled_back);
            records.extend(record);
            Ok(flag)
        })?;

        for mut record in records {
            record.rolled_back = direction.resulting_flag();
            let bytes = encode(&record)?;
            self.tables
                .records
                .put(&mut txn, &record.id.to_be_bytes(), &bytes)
                .map_err(heed_err)?;
        }
        txn.commit().map_err(heed_err)?;

        debug!("{} flipped {} records", direction.name(), ids.len());
        Ok(ids.len())
    }

    fn delete_older(&self, cutoff: Timestamp) -> StoreResult<usize> {
        let mut txn = self.env.write_txn().map_err(heed_err)?;

        // keys alone carry the timestamp, no record is decoded
        let mut stale = Vec::new();
        for entry in self.tables.by_time.iter(&txn).map_err(heed_err)? {
            let (key, _) = entry.map_err(heed_err)?;
            let (timestamp, id) = split_index_key(key)?;
            if timestamp < cutoff {
                stale.push((key.to_vec(), id));
            }
        }

        for (key, id) in &stale {
            self.tables.by_time.delete(&mut txn, key).map_err(heed_err)?;
            self.tables
                .records
                .delete(&mut txn, &id.to_be_bytes())
                .map_err(heed_err)?;
        }
        txn.commit().map_err(heed_err)?;

        debug!("Purged {} records older than {cutoff}", stale.len());
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_bytes_sort_like_timestamps() {
        let times = [Timestamp::MIN, -5, -1, 0, 1, 1_700_000_000, Timestamp::MAX];
        for pair in times.windows(2) {
            assert!(time_bytes(pair[0]) < time_bytes(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn test_index_keys_group_by_world() {
        let record = |world: &str, timestamp: Timestamp, id: RecordId| {
            NewRecord {
                timestamp,
                world: world.to_string(),
                pos: worldlog::BlockPos::new(0, 0, 0),
                action: worldlog::Action::BlockPlace,
                actor: worldlog::Actor::player("Steve"),
                old_state: worldlog::State::Absent,
                new_state: worldlog::State::Absent,
                linked_position: None,
            }
            .into_record(id)
        };

        let early_nether = index_key(&record("nether", 10, 2)).unwrap();
        let late_world = index_key(&record("world", 500, 1)).unwrap();
        let early_world = index_key(&record("world", -3, 3)).unwrap();
        // "world" is one byte longer, so every nether key sorts first
        assert!(early_nether < early_world);
        assert!(early_world < late_world);
        assert_eq!(split_index_key(&early_world).unwrap(), (-3, 3));
        assert!(split_index_key(&[1, 2, 3]).is_err());
    }
}
